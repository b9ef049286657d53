//! Neutral JSON document access for traffic scripts
//!
//! Traffic scripts, request bodies, and response bodies are all handled as
//! plain JSON trees addressed by JSON pointers. `JsonDoc` wraps a
//! `serde_json::Value` and exposes typed accessors returning outcomes, plus
//! write operations that create intermediate objects along a pointer (used
//! by the add-to-body machinery and by test builders).

use serde_json::{Map, Value};

use crate::error::StampedeError;

/// A JSON document with pointer-addressed typed accessors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonDoc {
    root: Value,
}

impl JsonDoc {
    /// Parses a document from JSON text
    ///
    /// # Errors
    ///
    /// Returns `StampedeError::Json` when the text is not valid JSON.
    pub fn parse(text: &str) -> Result<Self, StampedeError> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| StampedeError::Json(format!("invalid JSON document: {e}")))?;
        Ok(Self { root })
    }

    /// Wraps an already-parsed value
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Borrows the underlying value
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Consumes the document and returns the underlying value
    pub fn into_value(self) -> Value {
        self.root
    }

    /// Returns whether any value exists at the pointer path
    pub fn is_present(&self, path: &str) -> bool {
        self.root.pointer(path).is_some()
    }

    /// Reads a string at the pointer path
    pub fn get_str(&self, path: &str) -> Result<String, StampedeError> {
        match self.root.pointer(path) {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(StampedeError::Json(format!("string not found at {path}"))),
        }
    }

    /// Reads an integer at the pointer path
    ///
    /// Floating point numbers are rejected: script fields declared as
    /// integers must be exact.
    pub fn get_i64(&self, path: &str) -> Result<i64, StampedeError> {
        match self.root.pointer(path).and_then(Value::as_i64) {
            Some(n) => Ok(n),
            None => Err(StampedeError::Json(format!("integer not found at {path}"))),
        }
    }

    /// Reads a boolean at the pointer path
    pub fn get_bool(&self, path: &str) -> Result<bool, StampedeError> {
        match self.root.pointer(path) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(StampedeError::Json(format!("boolean not found at {path}"))),
        }
    }

    /// Extracts the object at the pointer path as a sub-document
    pub fn get_object(&self, path: &str) -> Result<JsonDoc, StampedeError> {
        match self.root.pointer(path) {
            Some(v @ Value::Object(_)) => Ok(JsonDoc::from_value(v.clone())),
            _ => Err(StampedeError::Json(format!("object not found at {path}"))),
        }
    }

    /// Reads an array of strings at the pointer path
    pub fn get_string_array(&self, path: &str) -> Result<Vec<String>, StampedeError> {
        let Some(Value::Array(items)) = self.root.pointer(path) else {
            return Err(StampedeError::Json(format!("array not found at {path}")));
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(StampedeError::Json(format!(
                    "non-string element in array at {path}"
                ))),
            })
            .collect()
    }

    /// Returns the keys of the document when it is an object, empty otherwise
    pub fn attributes(&self) -> Vec<String> {
        match &self.root {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Serializes the subtree at the pointer path to compact JSON text
    pub fn json_as_string(&self, path: &str) -> Result<String, StampedeError> {
        match self.root.pointer(path) {
            Some(v) => Ok(v.to_string()),
            None => Err(StampedeError::Json(format!("no value at {path}"))),
        }
    }

    /// Serializes the whole document to compact JSON text
    pub fn as_string(&self) -> String {
        self.root.to_string()
    }

    /// Writes a string at the pointer path, creating intermediate objects
    pub fn set_str(&mut self, path: &str, value: &str) -> Result<(), StampedeError> {
        self.set_value(path, Value::String(value.to_string()))
    }

    /// Writes an integer at the pointer path, creating intermediate objects
    pub fn set_i64(&mut self, path: &str, value: i64) -> Result<(), StampedeError> {
        self.set_value(path, Value::Number(value.into()))
    }

    /// Writes an arbitrary value at the pointer path, creating intermediate
    /// objects
    ///
    /// # Errors
    ///
    /// Returns `StampedeError::Json` when the pointer is malformed or an
    /// intermediate element is a scalar that cannot be descended into.
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<(), StampedeError> {
        let slot = pointer_mut_or_create(&mut self.root, path)?;
        *slot = value;
        Ok(())
    }
}

/// Resolves a JSON pointer for writing, creating missing intermediate
/// objects along the way
fn pointer_mut_or_create<'a>(
    root: &'a mut Value,
    path: &str,
) -> Result<&'a mut Value, StampedeError> {
    if path.is_empty() {
        return Ok(root);
    }
    if !path.starts_with('/') {
        return Err(StampedeError::Json(format!("invalid JSON pointer: {path}")));
    }

    let mut current = root;
    for token in path.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(token).or_insert(Value::Null),
            Value::Array(items) => {
                let index: usize = token.parse().map_err(|_| {
                    StampedeError::Json(format!("array index expected in pointer {path}"))
                })?;
                items.get_mut(index).ok_or_else(|| {
                    StampedeError::Json(format!("array index out of bounds in pointer {path}"))
                })?
            }
            _ => {
                return Err(StampedeError::Json(format!(
                    "cannot descend into scalar while resolving {path}"
                )))
            }
        };
    }
    Ok(current)
}
