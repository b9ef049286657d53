//! Traffic script handling
//!
//! This module owns everything between the JSON traffic document and the
//! per-request state the client consumes: the neutral document accessors,
//! the validated script model, and the queue that produces dispatchable
//! instances.

pub mod json;
pub mod model;
pub mod queue;
pub mod reader;
#[allow(clippy::module_inception)]
pub mod script;

pub use json::JsonDoc;
pub use model::{Answer, Message, MsgHeaders, RangeMap, ServerInfo, ValueType};
pub use queue::ScriptQueue;
pub use reader::{ScriptReader, RESERVED_MESSAGE_ID, SCHEMA};
pub use script::Script;
