//! Shared translator scaffolding.
//!
//! [`ClaudeTranslator`](claude::ClaudeTranslator) and
//! [`OpenAITranslator`](openai::OpenAITranslator) both implement
//! [`Translator`] against the same dialect-independent [`RequestTree`] and
//! stream into the same [`ClientFrame`] carrier so the [`Executor`] never has
//! to special-case which dialect it's driving.
//!
//! [`Executor`]: crate::executor::Executor

pub mod claude;
pub mod openai;

use crate::signature_cache::SignatureCache;
use crate::tree::RequestTree;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// One outbound fragment to write to the client — either an SSE event (name
/// + JSON data) or, for the unary path, a single complete JSON body.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Event { event: String, data: Value },
    Unary(Value),
    Done,
}

/// Per-stream mutable bookkeeping threaded through every
/// `convert_stream_chunk` call for one client connection.
pub struct StreamState {
    pub response_id: String,
    pub created_at: i64,
    pub model_group: String,
    tool_call_counter: AtomicU64,
    pub started_block: bool,
    pub current_block_index: u64,
    pub pending_tool_use: bool,
    /// Thinking text seen so far for the block currently in progress;
    /// cleared once a signature arrives and is cached against the full
    /// accumulated text rather than just the latest fragment.
    pub thinking_accum: String,
}

impl StreamState {
    pub fn new(response_id: impl Into<String>, created_at: i64, model_group: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            created_at,
            model_group: model_group.into(),
            tool_call_counter: AtomicU64::new(0),
            started_block: false,
            current_block_index: 0,
            pending_tool_use: false,
            thinking_accum: String::new(),
        }
    }

    /// `call_<functionName>_<monotonic counter>`.
    pub fn next_tool_call_id(&self, function_name: &str) -> String {
        let n = self.tool_call_counter.fetch_add(1, Ordering::SeqCst);
        format!("call_{function_name}_{n}")
    }
}

/// Request/response translation between a client dialect and Upstream's
/// `serde_json::Value` wire shape.
pub trait Translator {
    /// Build the Upstream request body for `tree` (already routed and
    /// compressed).
    fn convert_request(&self, tree: &RequestTree, cache: &SignatureCache) -> Value;

    /// Convert one raw Upstream SSE data payload into zero or more client
    /// frames, updating `state` in place.
    fn convert_stream_chunk(
        &self,
        chunk: &Value,
        state: &mut StreamState,
        cache: &SignatureCache,
    ) -> Vec<ClientFrame>;

    /// Convert a complete (non-streamed) Upstream response body into the
    /// dialect's canonical unary JSON shape.
    fn convert_unary(&self, body: &Value, cache: &SignatureCache) -> Value;
}

/// Strip a leading `modelGroup#` prefix from a thought signature, if present.
pub(crate) fn strip_group_prefix(signature: &str) -> &str {
    match signature.split_once('#') {
        Some((_, rest)) => rest,
        None => signature,
    }
}

/// Recursively strip the given keys from a JSON Schema-ish object, both at
/// the root and on each immediate property.
pub(crate) fn clean_schema_shallow(schema: &Value, strip_keys: &[&str]) -> Value {
    let mut cleaned = schema.clone();
    if let Some(obj) = cleaned.as_object_mut() {
        for key in strip_keys {
            obj.remove(*key);
        }
        if let Some(Value::Object(props)) = obj.get_mut("properties") {
            for (_, prop) in props.iter_mut() {
                if let Some(prop_obj) = prop.as_object_mut() {
                    for key in strip_keys {
                        prop_obj.remove(*key);
                    }
                }
            }
        }
    }
    cleaned
}

/// Recursively strip `strip_keys` at every nesting level, then uppercase
/// every `type` field in place.
pub(crate) fn clean_schema_deep(schema: &Value, strip_keys: &[&str]) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if strip_keys.contains(&k.as_str()) {
                    continue;
                }
                if k == "type" {
                    if let Value::String(s) = v {
                        out.insert(k.clone(), Value::String(s.to_uppercase()));
                        continue;
                    }
                }
                out.insert(k.clone(), clean_schema_deep(v, strip_keys));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| clean_schema_deep(v, strip_keys)).collect()),
        other => other.clone(),
    }
}

/// Recursively replace the literal string `"[undefined]"` with an empty
/// string throughout a JSON tree.
pub(crate) fn scrub_undefined_literal(value: &mut Value) {
    match value {
        Value::String(s) if s == "[undefined]" => *s = String::new(),
        Value::Array(items) => items.iter_mut().for_each(scrub_undefined_literal),
        Value::Object(map) => map.values_mut().for_each(scrub_undefined_literal),
        _ => {}
    }
}

/// Derive the tool name Upstream expects from a `tool_use_id` by stripping
/// its last two `-`-separated tokens.
pub(crate) fn tool_name_from_use_id(tool_use_id: &str) -> String {
    let tokens: Vec<&str> = tool_use_id.split('-').collect();
    if tokens.len() > 2 {
        tokens[..tokens.len() - 2].join("-")
    } else {
        tool_use_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_group_prefix_only_when_present() {
        assert_eq!(strip_group_prefix("group#abc123"), "abc123");
        assert_eq!(strip_group_prefix("abc123"), "abc123");
    }

    #[test]
    fn tool_name_strips_last_two_tokens() {
        assert_eq!(tool_name_from_use_id("read_file-call-42"), "read_file");
        assert_eq!(tool_name_from_use_id("nocontext"), "nocontext");
    }

    #[test]
    fn scrubs_undefined_literal_recursively() {
        let mut v = serde_json::json!({"a": "[undefined]", "b": ["[undefined]", "keep"]});
        scrub_undefined_literal(&mut v);
        assert_eq!(v["a"], "");
        assert_eq!(v["b"][0], "");
        assert_eq!(v["b"][1], "keep");
    }

    #[test]
    fn deep_clean_uppercases_types_and_strips_keys() {
        let schema = serde_json::json!({
            "type": "object",
            "format": "drop-me",
            "properties": {"x": {"type": "string", "additionalProperties": false}}
        });
        let cleaned = clean_schema_deep(&schema, &["format", "strict", "additionalProperties"]);
        assert_eq!(cleaned["type"], "OBJECT");
        assert_eq!(cleaned["properties"]["x"]["type"], "STRING");
        assert!(cleaned.get("format").is_none());
        assert!(cleaned["properties"]["x"].get("additionalProperties").is_none());
    }
}
