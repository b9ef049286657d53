//! Traffic script document validation and construction
//!
//! `ScriptReader` turns a neutral JSON document into the typed parts of a
//! script, enforcing the schema rules once at load time. Any violation is
//! fatal to startup; nothing here is checked again on the hot path.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::StampedeError;
use crate::script::json::JsonDoc;
use crate::script::model::{
    AddToBody, BodyRule, Message, MsgHeaders, RangeMap, SaveFromAnswer, ServerInfo, ValueType,
};

/// Message identifier reserved for the aggregate statistics row
pub const RESERVED_MESSAGE_ID: &str = "Total";

/// Canonical JSON schema of the traffic script document, printed by
/// `--show-schema` for operator reference
pub const SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "required": ["flow", "messages", "dns", "port", "timeout"],
  "additionalProperties": false,
  "properties": {
    "dns": { "type": "string" },
    "port": { "type": "string" },
    "secure": { "type": "boolean" },
    "timeout": { "type": "integer" },
    "variables": {
      "type": "object",
      "minProperties": 1,
      "additionalProperties": {
        "oneOf": [{ "type": "string" }, { "type": "integer" }]
      }
    },
    "ranges": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "additionalProperties": false,
        "required": ["min", "max"],
        "properties": {
          "min": { "type": "integer" },
          "max": { "type": "integer" }
        }
      }
    },
    "flow": {
      "type": "array",
      "minItems": 1,
      "items": { "type": "string" }
    },
    "messages": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "required": ["url", "method", "response"],
        "additionalProperties": false,
        "properties": {
          "url": { "type": "string" },
          "body": { "type": "object" },
          "headers": {
            "type": "object",
            "minProperties": 1,
            "additionalProperties": { "type": "string" }
          },
          "method": { "type": "string" },
          "response": {
            "type": "object",
            "required": ["code"],
            "additionalProperties": false,
            "properties": { "code": { "type": "integer" } }
          },
          "save_from_answer": {
            "type": "object",
            "minProperties": 1,
            "properties": {
              "headers": {
                "type": "object",
                "additionalProperties": { "type": "string" }
              }
            },
            "additionalProperties": {
              "type": "object",
              "required": ["path", "value_type"],
              "additionalProperties": false,
              "properties": {
                "path": { "type": "string" },
                "value_type": { "type": "string", "enum": ["string", "int", "object"] }
              }
            }
          },
          "add_from_saved_to_body": {
            "type": "object",
            "minProperties": 1,
            "additionalProperties": {
              "type": "object",
              "required": ["path", "value_type"],
              "additionalProperties": false,
              "properties": {
                "path": { "type": "string" },
                "value_type": { "type": "string", "enum": ["string", "int", "object"] }
              }
            }
          }
        }
      }
    }
  }
}"#;

const TOP_LEVEL_KEYS: [&str; 8] = [
    "dns",
    "port",
    "secure",
    "timeout",
    "flow",
    "messages",
    "ranges",
    "variables",
];

const MESSAGE_KEYS: [&str; 7] = [
    "url",
    "body",
    "method",
    "response",
    "headers",
    "save_from_answer",
    "add_from_saved_to_body",
];

/// Header fields the client generates itself; scripts must not redeclare
/// them (either spelling, any case)
const GENERATED_HEADERS: [&str; 4] = [
    "content-type",
    "content_type",
    "content-length",
    "content_length",
];

/// Builds the typed parts of a script from a parsed document
#[derive(Debug)]
pub struct ScriptReader {
    doc: JsonDoc,
}

impl ScriptReader {
    /// Wraps a document, rejecting unknown or missing top-level fields
    pub fn new(doc: JsonDoc) -> Result<Self, StampedeError> {
        for key in doc.attributes() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                return Err(StampedeError::Script(format!(
                    "unknown top-level field '{key}'"
                )));
            }
        }
        for required in ["dns", "port", "timeout", "flow", "messages"] {
            if !doc.is_present(&format!("/{required}")) {
                return Err(StampedeError::Script(format!(
                    "missing required field '{required}'"
                )));
            }
        }
        Ok(Self { doc })
    }

    /// Builds the target server description; `secure` defaults to false
    pub fn build_server_info(&self) -> Result<ServerInfo, StampedeError> {
        let secure = if self.doc.is_present("/secure") {
            self.doc.get_bool("/secure")?
        } else {
            false
        };
        Ok(ServerInfo {
            dns: self.doc.get_str("/dns")?,
            port: self.doc.get_str("/port")?,
            secure,
        })
    }

    /// Builds the per-request timeout in milliseconds
    pub fn build_timeout(&self) -> Result<u64, StampedeError> {
        let timeout = self.doc.get_i64("/timeout")?;
        if timeout <= 0 {
            return Err(StampedeError::Script(format!(
                "timeout must be a positive number of milliseconds, got {timeout}"
            )));
        }
        Ok(timeout as u64)
    }

    /// Builds the range map, checking min ≤ max for every range
    pub fn build_ranges(&self) -> Result<RangeMap, StampedeError> {
        let mut ranges = RangeMap::new();
        if !self.doc.is_present("/ranges") {
            return Ok(ranges);
        }

        let declared = self.doc.get_object("/ranges")?;
        for name in declared.attributes() {
            let range = declared.get_object(&format!("/{name}"))?;
            for key in range.attributes() {
                if key != "min" && key != "max" {
                    return Err(StampedeError::Script(format!(
                        "unknown field '{key}' in range '{name}'"
                    )));
                }
            }
            let min = range.get_i64("/min")?;
            let max = range.get_i64("/max")?;
            if min > max {
                return Err(StampedeError::Script(format!(
                    "range '{name}': min cannot be greater than max"
                )));
            }
            ranges.insert(name, (min, max));
        }
        Ok(ranges)
    }

    /// Builds the variable map; integer values are rendered as strings
    pub fn build_variables(&self) -> Result<BTreeMap<String, String>, StampedeError> {
        let mut vars = BTreeMap::new();
        if !self.doc.is_present("/variables") {
            return Ok(vars);
        }

        let declared = self.doc.get_object("/variables")?;
        for name in declared.attributes() {
            let path = format!("/{name}");
            let value = if let Ok(s) = declared.get_str(&path) {
                s
            } else if let Ok(n) = declared.get_i64(&path) {
                n.to_string()
            } else {
                return Err(StampedeError::Script(format!(
                    "variable '{name}' must be a string or an integer"
                )));
            };
            vars.insert(name, value);
        }
        Ok(vars)
    }

    /// Builds the ordered message deque from the flow
    ///
    /// Every flow entry must exist in the message dictionary, and the
    /// reserved identifier is rejected anywhere in the dictionary.
    pub fn build_messages(&self) -> Result<VecDeque<Message>, StampedeError> {
        let dictionary = self.doc.get_object("/messages")?;
        if dictionary
            .attributes()
            .iter()
            .any(|id| id == RESERVED_MESSAGE_ID)
        {
            return Err(StampedeError::Script(format!(
                "message name '{RESERVED_MESSAGE_ID}' is reserved, choose another name"
            )));
        }

        let flow = self.doc.get_string_array("/flow")?;
        if flow.is_empty() {
            return Err(StampedeError::Script("flow must not be empty".to_string()));
        }

        let mut messages = VecDeque::with_capacity(flow.len());
        for id in &flow {
            if !dictionary.is_present(&format!("/{id}")) {
                return Err(StampedeError::Script(format!(
                    "flow references message '{id}' which is not defined"
                )));
            }
            let msg_doc = dictionary.get_object(&format!("/{id}"))?;
            messages.push_back(self.build_message(id, &msg_doc)?);
        }
        Ok(messages)
    }

    fn build_message(&self, id: &str, msg: &JsonDoc) -> Result<Message, StampedeError> {
        for key in msg.attributes() {
            if !MESSAGE_KEYS.contains(&key.as_str()) {
                return Err(StampedeError::Script(format!(
                    "message '{id}': unknown field '{key}'"
                )));
            }
        }

        let url = msg
            .get_str("/url")
            .map_err(|_| StampedeError::Script(format!("message '{id}': missing url")))?;
        let method = msg
            .get_str("/method")
            .map_err(|_| StampedeError::Script(format!("message '{id}': missing method")))?;
        let response = msg.get_object("/response").map_err(|_| {
            StampedeError::Script(format!("message '{id}': missing response object"))
        })?;
        for key in response.attributes() {
            if key != "code" {
                return Err(StampedeError::Script(format!(
                    "message '{id}': unknown field '{key}' in response"
                )));
            }
        }
        let pass_code = response.get_i64("/code").map_err(|_| {
            StampedeError::Script(format!("message '{id}': missing response code"))
        })?;
        if !(100..=999).contains(&pass_code) {
            return Err(StampedeError::Script(format!(
                "message '{id}': response code {pass_code} is not a status code"
            )));
        }

        let body = if msg.is_present("/body") {
            msg.get_object("/body")
                .map_err(|_| {
                    StampedeError::Script(format!("message '{id}': body must be an object"))
                })?
                .as_string()
        } else {
            String::new()
        };

        let headers = if msg.is_present("/headers") {
            Self::build_headers(id, &msg.get_object("/headers")?)?
        } else {
            MsgHeaders::new()
        };

        let sfa = if msg.is_present("/save_from_answer") {
            Some(Self::build_sfa(id, &msg.get_object("/save_from_answer")?)?)
        } else {
            None
        };

        let atb = if msg.is_present("/add_from_saved_to_body") {
            Some(Self::build_atb(
                id,
                &msg.get_object("/add_from_saved_to_body")?,
            )?)
        } else {
            None
        };

        Ok(Message {
            id: id.to_string(),
            url,
            body,
            method,
            pass_code: pass_code as u16,
            headers,
            sfa,
            atb,
        })
    }

    fn build_headers(id: &str, doc: &JsonDoc) -> Result<MsgHeaders, StampedeError> {
        let names = doc.attributes();
        if names.is_empty() {
            return Err(StampedeError::Script(format!(
                "message '{id}': headers must have at least one entry"
            )));
        }

        let mut headers = MsgHeaders::new();
        for name in names {
            if GENERATED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                return Err(StampedeError::Script(format!(
                    "message '{id}': header '{name}' is generated automatically"
                )));
            }
            let value = doc.get_str(&format!("/{name}")).map_err(|_| {
                StampedeError::Script(format!("message '{id}': header '{name}' must be a string"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn build_sfa(id: &str, doc: &JsonDoc) -> Result<SaveFromAnswer, StampedeError> {
        let mut sfa = SaveFromAnswer::default();
        for capture in doc.attributes() {
            if capture == "headers" {
                let headers = doc.get_object("/headers")?;
                for capture_id in headers.attributes() {
                    let header_name = headers.get_str(&format!("/{capture_id}")).map_err(|_| {
                        StampedeError::Script(format!(
                            "message '{id}': save_from_answer header capture '{capture_id}' \
                             must name a header"
                        ))
                    })?;
                    sfa.headers.insert(capture_id, header_name);
                }
            } else {
                let rule = Self::build_body_rule(id, "save_from_answer", &capture, doc)?;
                sfa.body.insert(capture, rule);
            }
        }

        if sfa.is_empty() {
            return Err(StampedeError::Script(format!(
                "message '{id}': save_from_answer declares no capture rules"
            )));
        }
        Ok(sfa)
    }

    fn build_atb(id: &str, doc: &JsonDoc) -> Result<AddToBody, StampedeError> {
        let mut atb = AddToBody::default();
        for capture in doc.attributes() {
            let rule = Self::build_body_rule(id, "add_from_saved_to_body", &capture, doc)?;
            atb.fields.insert(capture, rule);
        }
        if atb.fields.is_empty() {
            return Err(StampedeError::Script(format!(
                "message '{id}': add_from_saved_to_body declares no rules"
            )));
        }
        Ok(atb)
    }

    fn build_body_rule(
        id: &str,
        section: &str,
        capture: &str,
        doc: &JsonDoc,
    ) -> Result<BodyRule, StampedeError> {
        let rule = doc.get_object(&format!("/{capture}")).map_err(|_| {
            StampedeError::Script(format!(
                "message '{id}': {section} rule '{capture}' must be an object"
            ))
        })?;
        for key in rule.attributes() {
            if key != "path" && key != "value_type" {
                return Err(StampedeError::Script(format!(
                    "message '{id}': {section} rule '{capture}': unknown field '{key}'"
                )));
            }
        }
        let path = rule.get_str("/path").map_err(|_| {
            StampedeError::Script(format!(
                "message '{id}': {section} rule '{capture}': missing path"
            ))
        })?;
        let keyword = rule.get_str("/value_type").map_err(|_| {
            StampedeError::Script(format!(
                "message '{id}': {section} rule '{capture}': missing value_type"
            ))
        })?;
        let value_type = ValueType::from_keyword(&keyword).ok_or_else(|| {
            StampedeError::Script(format!(
                "message '{id}': {section} rule '{capture}': \
                 value_type must be one of string, int, object"
            ))
        })?;
        Ok(BodyRule { path, value_type })
    }
}

/// Rejects identifiers appearing in more than one substitution namespace
///
/// Range and variable identifiers share the `<name>` token space, so a
/// collision would make substitution ambiguous.
pub fn check_unique_ids(
    ranges: &RangeMap,
    variables: &BTreeMap<String, String>,
) -> Result<(), StampedeError> {
    let mut seen = BTreeSet::new();
    for id in ranges.keys().chain(variables.keys()) {
        if !seen.insert(id.as_str()) {
            return Err(StampedeError::Script(format!(
                "'{id}' found as repeated identifier, choose a different name"
            )));
        }
    }
    Ok(())
}
