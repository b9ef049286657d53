//! Data types for traffic scripts
//!
//! These are the plain values a parsed script is made of: the ordered
//! messages of the flow, the capture/injection rule sets that chain state
//! between them, the target server description, and the answer triple a
//! completed request produces.

use std::collections::BTreeMap;

use serde_json::Value;

/// Named integer ranges: identifier → (min, max), both inclusive
pub type RangeMap = BTreeMap<String, (i64, i64)>;

/// Message headers declared in the script
pub type MsgHeaders = BTreeMap<String, String>;

/// The type a body capture or injection rule operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A JSON string
    String,
    /// A JSON integer
    Int,
    /// A JSON subtree stored as a sub-document
    Object,
}

impl ValueType {
    /// Parses the schema keyword (`string`, `int`, `object`)
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

/// One body extraction or injection rule: a JSON pointer and the expected
/// type at that path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyRule {
    pub path: String,
    pub value_type: ValueType,
}

/// Save-from-answer rules attached to a message
///
/// Header rules capture the raw value of a response header; body rules
/// extract a typed value at a JSON pointer in the response body. Both are
/// keyed by the capture identifier they store under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveFromAnswer {
    /// capture identifier → response header name
    pub headers: BTreeMap<String, String>,
    /// capture identifier → body rule
    pub body: BTreeMap<String, BodyRule>,
}

impl SaveFromAnswer {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.body.is_empty()
    }
}

/// Add-to-body rules attached to a message: capture identifier → injection
/// rule applied to this message's body before it is sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddToBody {
    pub fields: BTreeMap<String, BodyRule>,
}

/// One request/response exchange of the flow
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub url: String,
    /// Serialized JSON body; empty when the script declares none
    pub body: String,
    pub method: String,
    /// The response status that counts as success
    pub pass_code: u16,
    pub headers: MsgHeaders,
    pub sfa: Option<SaveFromAnswer>,
    pub atb: Option<AddToBody>,
}

/// The endpoint the script runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub dns: String,
    pub port: String,
    pub secure: bool,
}

/// The triple a completed request produces: status code, body text, and
/// response headers (names lowercase, as HTTP/2 delivers them)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answer {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl Answer {
    /// Builds an answer with no headers
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }
}

/// Saved values captured from previous answers, one store per capture type
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SavedValues {
    pub strings: BTreeMap<String, String>,
    pub ints: BTreeMap<String, i64>,
    pub objects: BTreeMap<String, Value>,
}
