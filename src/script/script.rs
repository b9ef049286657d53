//! Script template and traversal state
//!
//! A `Script` is both the immutable template parsed from the traffic
//! document and, once cloned by the queue, the mutable state of one
//! traversal of the flow: the deque of remaining messages (front is
//! current), the values captured from previous answers, and the bound
//! range and variable substitutions.
//!
//! The traversal rolls forward through `post_process`: capture rules of the
//! answered message run against the answer, the message is popped, and the
//! injection rules of the next message rewrite its body. Any capture or
//! injection failure marks the traversal failed and the caller cancels it.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use crate::error::StampedeError;
use crate::script::json::JsonDoc;
use crate::script::model::{
    AddToBody, Answer, Message, MsgHeaders, RangeMap, SaveFromAnswer, SavedValues, ServerInfo,
    ValueType,
};
use crate::script::reader::{check_unique_ids, ScriptReader};

/// One scripted message flow and the state of one traversal of it
#[derive(Debug, Clone)]
pub struct Script {
    messages: VecDeque<Message>,
    ranges: RangeMap,
    server: ServerInfo,
    timeout_ms: u64,
    vars: BTreeMap<String, String>,
    saved: SavedValues,
}

impl Script {
    /// Loads and validates a script from a file
    pub fn from_path(path: &Path) -> Result<Self, StampedeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StampedeError::Script(format!("cannot read script '{}': {e}", path.display()))
        })?;
        Self::from_text(&text)
    }

    /// Loads and validates a script from JSON text
    pub fn from_text(text: &str) -> Result<Self, StampedeError> {
        Self::from_doc(JsonDoc::parse(text)?)
    }

    /// Builds and validates a script from a parsed document
    pub fn from_doc(doc: JsonDoc) -> Result<Self, StampedeError> {
        let reader = ScriptReader::new(doc)?;
        let ranges = reader.build_ranges()?;
        let vars = reader.build_variables()?;
        check_unique_ids(&ranges, &vars)?;

        Ok(Self {
            messages: reader.build_messages()?,
            server: reader.build_server_info()?,
            timeout_ms: reader.build_timeout()?,
            ranges,
            vars,
            saved: SavedValues::default(),
        })
    }

    // The deque is non-empty while the instance is owned by the queue or the
    // dispatcher; an empty deque means the instance is terminal and dropped.
    fn front(&self) -> &Message {
        self.messages
            .front()
            .expect("script instance has no remaining messages")
    }

    /// Url of the current message
    pub fn next_url(&self) -> &str {
        &self.front().url
    }

    /// Body of the current message
    pub fn next_body(&self) -> &str {
        &self.front().body
    }

    /// Method of the current message
    pub fn next_method(&self) -> &str {
        &self.front().method
    }

    /// Identifier of the current message
    pub fn next_name(&self) -> &str {
        &self.front().id
    }

    /// Headers declared on the current message
    pub fn next_headers(&self) -> &MsgHeaders {
        &self.front().headers
    }

    pub fn ranges(&self) -> &RangeMap {
        &self.ranges
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Identifiers of the remaining messages, in flow order
    pub fn message_names(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    /// Whether the answer carries the status the current message expects
    pub fn validate_answer(&self, answer: &Answer) -> bool {
        answer.status == self.front().pass_code
    }

    /// Rolls the traversal forward after a validated answer
    ///
    /// Applies the current message's save-from-answer rules, pops it, and
    /// applies the next message's add-to-body rules. Returns false when the
    /// current message was the last one or when any rule fails; the caller
    /// must then discard the instance.
    pub fn post_process(&mut self, answer: &Answer) -> bool {
        !self.is_last() && self.process_next(answer)
    }

    fn is_last(&self) -> bool {
        self.messages.len() == 1
    }

    fn process_next(&mut self, answer: &Answer) -> bool {
        let sfa = self.messages.front().and_then(|m| m.sfa.clone());
        if let Some(sfa) = sfa {
            if !self.save_from_answer(answer, &sfa) {
                return false;
            }
        }

        self.messages.pop_front();

        let atb = self.messages.front().and_then(|m| m.atb.clone());
        if let Some(atb) = atb {
            let body = self.front().body.clone();
            match inject_saved(&atb, &body, &self.saved) {
                Some(new_body) => {
                    if let Some(next) = self.messages.front_mut() {
                        next.body = new_body;
                    }
                }
                None => return false,
            }
        }

        true
    }

    fn save_from_answer(&mut self, answer: &Answer, sfa: &SaveFromAnswer) -> bool {
        for (capture, header_name) in &sfa.headers {
            match answer.headers.get(&header_name.to_ascii_lowercase()) {
                Some(value) => {
                    self.saved.strings.insert(capture.clone(), value.clone());
                }
                None => {
                    tracing::debug!(header = %header_name, "header not found in answer");
                    return false;
                }
            }
        }

        if sfa.body.is_empty() {
            return true;
        }

        let Ok(body) = JsonDoc::parse(&answer.body) else {
            tracing::debug!("answer body is not valid JSON");
            return false;
        };

        for (capture, rule) in &sfa.body {
            let saved = match rule.value_type {
                ValueType::String => body
                    .get_str(&rule.path)
                    .map(|v| { self.saved.strings.insert(capture.clone(), v); }),
                ValueType::Int => body
                    .get_i64(&rule.path)
                    .map(|v| { self.saved.ints.insert(capture.clone(), v); }),
                ValueType::Object => body
                    .get_object(&rule.path)
                    .map(|v| { self.saved.objects.insert(capture.clone(), v.into_value()); }),
            };
            if let Err(e) = saved {
                tracing::debug!(capture = %capture, error = %e, "save_from_answer failed");
                return false;
            }
        }
        true
    }

    /// Binds the current range cursor values into the remaining messages
    pub fn parse_ranges(&mut self, current: &BTreeMap<String, i64>) {
        for (name, value) in current {
            self.replace_in_messages(name, &value.to_string());
        }
    }

    /// Binds the declared variable values into the remaining messages
    pub fn parse_variables(&mut self) {
        let vars: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in vars {
            self.replace_in_messages(&name, &value);
        }
    }

    fn replace_in_messages(&mut self, name: &str, value: &str) {
        let token = format!("<{name}>");
        for message in &mut self.messages {
            message.url = message.url.replace(&token, value);
            message.body = message.body.replace(&token, value);

            let touches_headers = message
                .headers
                .iter()
                .any(|(k, v)| k.contains(&token) || v.contains(&token));
            if touches_headers {
                message.headers = message
                    .headers
                    .iter()
                    .map(|(k, v)| (k.replace(&token, value), v.replace(&token, value)))
                    .collect();
            }
        }
    }
}

/// Applies add-to-body rules to a scratch copy of the body; the caller
/// commits the result only when every rule succeeded
fn inject_saved(atb: &AddToBody, body: &str, saved: &SavedValues) -> Option<String> {
    let source = if body.is_empty() { "{}" } else { body };
    let mut doc = JsonDoc::parse(source).ok()?;

    for (capture, rule) in &atb.fields {
        let applied = match rule.value_type {
            ValueType::String => {
                let value = saved.strings.get(capture)?;
                doc.set_str(&rule.path, value)
            }
            ValueType::Int => {
                let value = saved.ints.get(capture)?;
                doc.set_i64(&rule.path, *value)
            }
            ValueType::Object => {
                let value = saved.objects.get(capture)?;
                doc.set_value(&rule.path, value.clone())
            }
        };
        if applied.is_err() {
            return None;
        }
    }
    Some(doc.as_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_doc() -> JsonDoc {
        JsonDoc::from_value(json!({
            "dns": "public-dns",
            "port": "8686",
            "timeout": 2000,
            "flow": ["test1"],
            "messages": {
                "test1": {
                    "url": "v1/test",
                    "body": {},
                    "method": "GET",
                    "response": {"code": 200}
                }
            }
        }))
    }

    fn two_message_doc() -> JsonDoc {
        let mut doc = base_doc();
        doc.set_value("/flow", json!(["test1", "test1"])).unwrap();
        doc
    }

    fn with_sfa(doc: &mut JsonDoc, rules: serde_json::Value) {
        doc.set_value("/messages/test1/save_from_answer", rules)
            .unwrap();
    }

    fn with_atb(doc: &mut JsonDoc, rules: serde_json::Value) {
        doc.set_value("/messages/test1/add_from_saved_to_body", rules)
            .unwrap();
    }

    #[test]
    fn test_minimum_correct_script() {
        let script = Script::from_doc(base_doc()).unwrap();
        assert_eq!(script.server().dns, "public-dns");
        assert_eq!(script.server().port, "8686");
        assert_eq!(script.timeout_ms(), 2000);
        assert!(!script.server().secure);
        assert_eq!(script.message_names(), vec!["test1"]);
        assert_eq!(script.next_url(), "v1/test");
        assert_eq!(script.next_method(), "GET");
        assert_eq!(script.next_body(), "{}");
    }

    #[test]
    fn test_from_path_missing_file() {
        assert!(Script::from_path(Path::new("/impossible/path/to/find.json")).is_err());
    }

    #[test]
    fn test_from_text_rejects_garbage() {
        assert!(Script::from_text("not json at all").is_err());
    }

    #[test]
    fn test_validate_answer_checks_pass_code() {
        let script = Script::from_doc(base_doc()).unwrap();
        assert!(script.validate_answer(&Answer::new(200, "OK")));
        assert!(!script.validate_answer(&Answer::new(404, "nope")));
    }

    #[test]
    fn test_post_process_last_message_returns_false() {
        let mut script = Script::from_doc(base_doc()).unwrap();
        assert!(!script.post_process(&Answer::new(200, "OK")));
    }

    #[test]
    fn test_post_process_two_answers() {
        let mut script = Script::from_doc(two_message_doc()).unwrap();
        assert!(script.post_process(&Answer::new(200, "OK")));
        assert!(!script.post_process(&Answer::new(200, "OK")));
    }

    #[test]
    fn test_sfa_string_found() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"my_string": {"path": "/some/path", "value_type": "string"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        let answer = Answer::new(200, json!({"some": {"path": "I am a string"}}).to_string());
        assert!(script.post_process(&answer));
        assert_eq!(script.saved.strings["my_string"], "I am a string");
    }

    #[test]
    fn test_sfa_int_found() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"my_int": {"path": "/some/path", "value_type": "int"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        let answer = Answer::new(200, json!({"some": {"path": 7}}).to_string());
        assert!(script.post_process(&answer));
        assert_eq!(script.saved.ints["my_int"], 7);
    }

    #[test]
    fn test_sfa_object_found() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"my_object": {"path": "/some", "value_type": "object"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        let answer = Answer::new(200, json!({"some": {"path": 1}}).to_string());
        assert!(script.post_process(&answer));
        assert_eq!(script.saved.objects["my_object"], json!({"path": 1}));
    }

    #[test]
    fn test_sfa_type_mismatch_fails() {
        for value_type in ["string", "int", "object"] {
            let mut doc = two_message_doc();
            with_sfa(
                &mut doc,
                json!({"capture": {"path": "/field", "value_type": value_type}}),
            );
            let mut script = Script::from_doc(doc).unwrap();
            // A boolean satisfies none of the three declared types
            let answer = Answer::new(200, json!({"field": true}).to_string());
            assert!(!script.post_process(&answer), "{value_type} accepted a bool");
        }
    }

    #[test]
    fn test_sfa_missing_path_fails() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"capture": {"path": "/not/there", "value_type": "string"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        assert!(!script.post_process(&Answer::new(200, "{}")));
    }

    #[test]
    fn test_sfa_non_json_answer_fails() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"capture": {"path": "/x", "value_type": "string"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        assert!(!script.post_process(&Answer::new(200, "plain text")));
    }

    #[test]
    fn test_sfa_header_capture() {
        let mut doc = two_message_doc();
        with_sfa(&mut doc, json!({"headers": {"token": "X-Auth-Token"}}));
        let mut script = Script::from_doc(doc).unwrap();

        let mut answer = Answer::new(200, "{}");
        answer
            .headers
            .insert("x-auth-token".to_string(), "secret".to_string());
        assert!(script.post_process(&answer));
        assert_eq!(script.saved.strings["token"], "secret");
    }

    #[test]
    fn test_sfa_missing_header_fails() {
        let mut doc = two_message_doc();
        with_sfa(&mut doc, json!({"headers": {"token": "x-auth-token"}}));
        let mut script = Script::from_doc(doc).unwrap();
        assert!(!script.post_process(&Answer::new(200, "{}")));
    }

    #[test]
    fn test_capture_overwrites_previous_value() {
        let mut doc = base_doc();
        doc.set_value("/flow", json!(["test1", "test1", "test1"]))
            .unwrap();
        with_sfa(
            &mut doc,
            json!({"seq": {"path": "/n", "value_type": "int"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        assert!(script.post_process(&Answer::new(200, json!({"n": 1}).to_string())));
        assert_eq!(script.saved.ints["seq"], 1);
        assert!(script.post_process(&Answer::new(200, json!({"n": 2}).to_string())));
        assert_eq!(script.saved.ints["seq"], 2);
        // Terminal post_process never runs captures
        assert!(!script.post_process(&Answer::new(200, json!({"n": 3}).to_string())));
        assert_eq!(script.saved.ints["seq"], 2);
    }

    #[test]
    fn test_sfa_then_atb_roundtrip_int() {
        let mut doc = two_message_doc();
        with_sfa(&mut doc, json!({"x": {"path": "/id", "value_type": "int"}}));
        with_atb(&mut doc, json!({"x": {"path": "/ref", "value_type": "int"}}));
        let mut script = Script::from_doc(doc).unwrap();

        let answer = Answer::new(200, json!({"id": 7}).to_string());
        assert!(script.post_process(&answer));
        let body = JsonDoc::parse(script.next_body()).unwrap();
        assert_eq!(body.get_i64("/ref").unwrap(), 7);
    }

    #[test]
    fn test_sfa_then_atb_roundtrip_string() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"x": {"path": "/name", "value_type": "string"}}),
        );
        with_atb(
            &mut doc,
            json!({"x": {"path": "/copied/name", "value_type": "string"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();

        let answer = Answer::new(200, json!({"name": "zeus"}).to_string());
        assert!(script.post_process(&answer));
        let body = JsonDoc::parse(script.next_body()).unwrap();
        assert_eq!(body.get_str("/copied/name").unwrap(), "zeus");
    }

    #[test]
    fn test_sfa_then_atb_roundtrip_object() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"x": {"path": "/user", "value_type": "object"}}),
        );
        with_atb(
            &mut doc,
            json!({"x": {"path": "/payload", "value_type": "object"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();

        let answer = Answer::new(200, json!({"user": {"id": 3, "name": "ann"}}).to_string());
        assert!(script.post_process(&answer));
        let body = JsonDoc::parse(script.next_body()).unwrap();
        assert_eq!(body.get_i64("/payload/id").unwrap(), 3);
        assert_eq!(body.get_str("/payload/name").unwrap(), "ann");
    }

    #[test]
    fn test_atb_missing_capture_fails() {
        let mut doc = two_message_doc();
        with_atb(
            &mut doc,
            json!({"never_saved": {"path": "/ref", "value_type": "int"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        assert!(!script.post_process(&Answer::new(200, "{}")));
    }

    #[test]
    fn test_atb_type_mismatch_against_store_fails() {
        // Captured as a string, injected as an int: the int store has no
        // such identifier.
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({"x": {"path": "/v", "value_type": "string"}}),
        );
        with_atb(&mut doc, json!({"x": {"path": "/ref", "value_type": "int"}}));
        let mut script = Script::from_doc(doc).unwrap();
        let answer = Answer::new(200, json!({"v": "text"}).to_string());
        assert!(!script.post_process(&answer));
    }

    #[test]
    fn test_atb_failure_leaves_body_untouched() {
        let mut doc = two_message_doc();
        doc.set_value("/messages/test1/body", json!({"keep": 1}))
            .unwrap();
        with_atb(
            &mut doc,
            json!({"missing": {"path": "/ref", "value_type": "int"}}),
        );
        let mut script = Script::from_doc(doc).unwrap();
        assert!(!script.post_process(&Answer::new(200, "{}")));
        let body = JsonDoc::parse(script.next_body()).unwrap();
        assert_eq!(body.get_i64("/keep").unwrap(), 1);
        assert!(!body.is_present("/ref"));
    }

    #[test]
    fn test_atb_on_empty_body_starts_from_empty_object() {
        let mut doc = two_message_doc();
        doc.set_value(
            "/messages/test1",
            json!({
                "url": "v1/test",
                "method": "POST",
                "response": {"code": 200},
                "save_from_answer": {"x": {"path": "/id", "value_type": "int"}},
                "add_from_saved_to_body": {"x": {"path": "/ref", "value_type": "int"}}
            }),
        )
        .unwrap();
        let mut script = Script::from_doc(doc).unwrap();
        assert_eq!(script.next_body(), "");

        let answer = Answer::new(200, json!({"id": 4}).to_string());
        assert!(script.post_process(&answer));
        let body = JsonDoc::parse(script.next_body()).unwrap();
        assert_eq!(body.get_i64("/ref").unwrap(), 4);
    }

    #[test]
    fn test_parse_variables_substitutes_tokens() {
        let mut doc = base_doc();
        doc.set_value("/variables", json!({"my_int": 50, "my_string": "hello"}))
            .unwrap();
        doc.set_str("/messages/test1/url", "v1/<my_string>/items")
            .unwrap();
        doc.set_value("/messages/test1/body", json!({"count": "<my_int>"}))
            .unwrap();
        doc.set_value(
            "/messages/test1/headers",
            json!({"x-tag": "tag-<my_string>"}),
        )
        .unwrap();
        let mut script = Script::from_doc(doc).unwrap();
        script.parse_variables();

        assert_eq!(script.next_url(), "v1/hello/items");
        assert!(script.next_body().contains("50"));
        assert_eq!(script.next_headers()["x-tag"], "tag-hello");
    }

    #[test]
    fn test_parse_ranges_substitutes_current_values() {
        let mut doc = base_doc();
        doc.set_value("/ranges/r1", json!({"min": 5, "max": 9})).unwrap();
        doc.set_str("/messages/test1/url", "items/<r1>").unwrap();
        let mut script = Script::from_doc(doc).unwrap();

        let mut current = BTreeMap::new();
        current.insert("r1".to_string(), 5_i64);
        script.parse_ranges(&current);
        assert_eq!(script.next_url(), "items/5");
    }

    #[test]
    fn test_substitution_applies_to_all_remaining_messages() {
        let mut doc = two_message_doc();
        doc.set_value("/variables", json!({"v": "X"})).unwrap();
        doc.set_str("/messages/test1/url", "path/<v>").unwrap();
        let mut script = Script::from_doc(doc).unwrap();
        script.parse_variables();

        assert_eq!(script.next_url(), "path/X");
        assert!(script.post_process(&Answer::new(200, "{}")));
        assert_eq!(script.next_url(), "path/X");
    }

    #[test]
    fn test_next_headers_empty_when_not_declared() {
        let script = Script::from_doc(base_doc()).unwrap();
        assert!(script.next_headers().is_empty());
    }

    #[test]
    fn test_sfa_combines_header_and_body_rules() {
        let mut doc = two_message_doc();
        with_sfa(
            &mut doc,
            json!({
                "headers": {"trace": "x-trace-id"},
                "count": {"path": "/count", "value_type": "int"},
                "label": {"path": "/label", "value_type": "string"}
            }),
        );
        let mut script = Script::from_doc(doc).unwrap();

        let mut answer = Answer::new(200, json!({"count": 3, "label": "ok"}).to_string());
        answer
            .headers
            .insert("x-trace-id".to_string(), "t-123".to_string());
        assert!(script.post_process(&answer));
        assert_eq!(script.saved.strings["trace"], "t-123");
        assert_eq!(script.saved.strings["label"], "ok");
        assert_eq!(script.saved.ints["count"], 3);
    }

    #[test]
    fn test_substitution_is_whole_token_only() {
        let mut doc = base_doc();
        doc.set_value("/variables", json!({"a": "ONE"})).unwrap();
        doc.set_str("/messages/test1/url", "v1/<a>/<ab>").unwrap();
        let mut script = Script::from_doc(doc).unwrap();
        script.parse_variables();

        // <ab> is a different token and stays untouched
        assert_eq!(script.next_url(), "v1/ONE/<ab>");
    }

    #[test]
    fn test_validate_answer_follows_the_flow() {
        let mut doc = base_doc();
        doc.set_value("/flow", json!(["test1", "test2"])).unwrap();
        doc.set_value(
            "/messages/test2",
            json!({"url": "v1/other", "method": "GET", "response": {"code": 201}}),
        )
        .unwrap();
        let mut script = Script::from_doc(doc).unwrap();

        assert!(script.validate_answer(&Answer::new(200, "")));
        assert!(!script.validate_answer(&Answer::new(201, "")));

        assert!(script.post_process(&Answer::new(200, "")));

        // The front message changed; so did the expected code
        assert!(script.validate_answer(&Answer::new(201, "")));
        assert!(!script.validate_answer(&Answer::new(200, "")));
        assert_eq!(script.next_url(), "v1/other");
    }
}
