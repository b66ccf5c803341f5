//! Claude Messages API ⇄ Upstream translation.

use super::{clean_schema_shallow, strip_group_prefix, tool_name_from_use_id, ClientFrame, StreamState, Translator};
use crate::signature_cache::SignatureCache;
use crate::tree::{ContentPart, Message, RequestTree, Role};
use serde_json::{json, Value};

const INTERLEAVED_THINKING_HINT: &str =
    "Interleaved thinking is enabled. You may think between tool calls to reflect on tool outputs before proceeding.";

const SKIP_VALIDATOR_SIGNATURE: &str = "skip_thought_signature_validator";

pub struct ClaudeTranslator;

impl ClaudeTranslator {
    pub fn new() -> Self {
        Self
    }

    fn build_system_instruction(&self, tree: &RequestTree) -> Value {
        let mut parts = Vec::new();
        if let Some(system) = &tree.system {
            if !system.is_empty() {
                parts.push(json!({"text": system}));
            }
        }
        if tree.has_tools() && tree.thinking_enabled() {
            parts.push(json!({"text": INTERLEAVED_THINKING_HINT}));
        }
        json!({"role": "user", "parts": parts})
    }

    fn convert_part(&self, part: &ContentPart, cache: &SignatureCache) -> Value {
        match part {
            ContentPart::Text { text } => json!({"text": text}),
            ContentPart::Thinking { text, signature } => {
                let sig = cache
                    .get(text)
                    .or_else(|| signature.as_ref().map(|s| strip_group_prefix(s).to_string()));
                json!({"thought": true, "text": text, "thoughtSignature": sig})
            }
            ContentPart::ToolUse { id, name, args } => json!({
                "thoughtSignature": SKIP_VALIDATOR_SIGNATURE,
                "functionCall": {"id": id, "name": name, "args": args},
            }),
            ContentPart::ToolResult { tool_use_id, content } => {
                let name = tool_name_from_use_id(tool_use_id);
                json!({
                    "functionResponse": {
                        "id": tool_use_id,
                        "name": name,
                        "response": {"result": content},
                    }
                })
            }
            ContentPart::Image { mime_type, data } => json!({
                "inlineData": {"mime_type": mime_type, "data": data},
            }),
        }
    }

    fn convert_message(&self, message: &Message, cache: &SignatureCache) -> Value {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::Tool | Role::System => "user",
        };

        let ordered_parts: Vec<&ContentPart> = if role == "model" && message.parts.iter().any(|p| p.is_thinking()) {
            // Stable partition: thinking parts first, then the rest, each in
            // original relative order.
            let mut thinking: Vec<&ContentPart> = Vec::new();
            let mut rest: Vec<&ContentPart> = Vec::new();
            for part in &message.parts {
                if part.is_thinking() {
                    thinking.push(part);
                } else {
                    rest.push(part);
                }
            }
            thinking.into_iter().chain(rest).collect()
        } else {
            message.parts.iter().collect()
        };

        let parts: Vec<Value> = ordered_parts.into_iter().map(|p| self.convert_part(p, cache)).collect();
        json!({"role": role, "parts": parts})
    }

    fn clean_tool_schema(&self, schema: &Value) -> Value {
        clean_schema_shallow(schema, &["$schema", "additionalProperties", "default"])
    }
}

impl Default for ClaudeTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator for ClaudeTranslator {
    fn convert_request(&self, tree: &RequestTree, cache: &SignatureCache) -> Value {
        let mut generation_config = serde_json::Map::new();
        if let Some(t) = tree.temperature {
            generation_config.insert("temperature".into(), json!(t));
        }
        if let Some(t) = tree.top_p {
            generation_config.insert("topP".into(), json!(t));
        }
        if let Some(t) = tree.top_k {
            generation_config.insert("topK".into(), json!(t));
        }
        if let Some(t) = tree.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(t));
        }
        if let Some(thinking) = &tree.thinking {
            if thinking.enabled {
                if let Some(budget) = thinking.budget_tokens {
                    generation_config.insert(
                        "thinkingConfig".into(),
                        json!({"thinkingBudget": budget, "includeThoughts": true}),
                    );
                }
            }
        }

        let function_declarations: Vec<Value> = tree
            .tools
            .as_ref()
            .map(|tools| {
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "parametersJsonSchema": self.clean_tool_schema(&t.parameters),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let contents: Vec<Value> = tree.messages.iter().map(|m| self.convert_message(m, cache)).collect();

        let mut request = serde_json::Map::new();
        request.insert("contents".into(), json!(contents));
        request.insert("systemInstruction".into(), self.build_system_instruction(tree));
        if !generation_config.is_empty() {
            request.insert("generationConfig".into(), Value::Object(generation_config));
        }
        if !function_declarations.is_empty() {
            request.insert(
                "tools".into(),
                json!([{"functionDeclarations": function_declarations}]),
            );
        }
        request.insert("safetySettings".into(), safety_settings_off());

        json!({"model": tree.model, "request": Value::Object(request)})
    }

    fn convert_stream_chunk(&self, chunk: &Value, state: &mut StreamState, cache: &SignatureCache) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        let candidate = &chunk["candidates"][0];
        let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();

        if !state.started_block {
            frames.push(ClientFrame::Event {
                event: "message_start".into(),
                data: json!({
                    "type": "message_start",
                    "message": {
                        "id": state.response_id,
                        "type": "message",
                        "role": "assistant",
                        "content": [],
                        "model": state.model_group,
                    }
                }),
            });
            state.started_block = true;
        }

        for part in &parts {
            let index = state.current_block_index;
            state.current_block_index += 1;

            if let Some(text) = part.get("text").and_then(Value::as_str) {
                let is_thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
                let block_type = if is_thought { "thinking" } else { "text" };
                frames.push(ClientFrame::Event {
                    event: "content_block_start".into(),
                    data: json!({"type": "content_block_start", "index": index, "content_block": {"type": block_type}}),
                });
                let delta_key = if is_thought { "thinking" } else { "text" };
                frames.push(ClientFrame::Event {
                    event: "content_block_delta".into(),
                    data: json!({"type": "content_block_delta", "index": index, "delta": {"type": format!("{delta_key}_delta"), delta_key: text}}),
                });
                if is_thought {
                    state.thinking_accum.push_str(text);
                    if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                        cache.set(&state.thinking_accum, sig);
                        state.thinking_accum.clear();
                        frames.push(ClientFrame::Event {
                            event: "content_block_delta".into(),
                            data: json!({
                                "type": "content_block_delta",
                                "index": index,
                                "delta": {"type": "signature_delta", "signature": format!("{}#{}", state.model_group, sig)},
                            }),
                        });
                    }
                }
                frames.push(ClientFrame::Event {
                    event: "content_block_stop".into(),
                    data: json!({"type": "content_block_stop", "index": index}),
                });
            } else if let Some(call) = part.get("functionCall") {
                state.pending_tool_use = true;
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let id = state.next_tool_call_id(name);
                frames.push(ClientFrame::Event {
                    event: "content_block_start".into(),
                    data: json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}},
                    }),
                });
                frames.push(ClientFrame::Event {
                    event: "content_block_delta".into(),
                    data: json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "input_json_delta", "partial_json": call.get("args").cloned().unwrap_or(json!({})).to_string()},
                    }),
                });
                frames.push(ClientFrame::Event {
                    event: "content_block_stop".into(),
                    data: json!({"type": "content_block_stop", "index": index}),
                });
            }
        }

        if let Some(finish_reason) = candidate.get("finishReason").and_then(Value::as_str) {
            let stop_reason = map_stop_reason(finish_reason, state.pending_tool_use);
            frames.push(ClientFrame::Event {
                event: "message_delta".into(),
                data: json!({"type": "message_delta", "delta": {"stop_reason": stop_reason}}),
            });
            frames.push(ClientFrame::Event {
                event: "message_stop".into(),
                data: json!({"type": "message_stop"}),
            });
        }

        frames
    }

    fn convert_unary(&self, body: &Value, cache: &SignatureCache) -> Value {
        let candidate = &body["candidates"][0];
        let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();

        let mut content = Vec::new();
        let mut pending_tool_use = false;
        let mut counter = 0u64;
        for part in &parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                        cache.set(text, sig);
                    }
                    content.push(json!({"type": "thinking", "thinking": text}));
                } else {
                    content.push(json!({"type": "text", "text": text}));
                }
            } else if let Some(call) = part.get("functionCall") {
                pending_tool_use = true;
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let id = format!("call_{name}_{counter}");
                counter += 1;
                content.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": call.get("args").cloned().unwrap_or(json!({})),
                }));
            }
        }

        let finish_reason = candidate.get("finishReason").and_then(Value::as_str).unwrap_or("STOP");
        let usage = &body["usageMetadata"];

        json!({
            "type": "message",
            "role": "assistant",
            "content": content,
            "stop_reason": map_stop_reason(finish_reason, pending_tool_use),
            "usage": {
                "input_tokens": usage.get("promptTokenCount").cloned().unwrap_or(json!(0)),
                "output_tokens": usage.get("candidatesTokenCount").cloned().unwrap_or(json!(0)),
            },
        })
    }
}

fn safety_settings_off() -> Value {
    let categories = [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ];
    json!(categories
        .iter()
        .map(|c| json!({"category": c, "threshold": "OFF"}))
        .collect::<Vec<_>>())
}

fn map_stop_reason(finish_reason: &str, pending_tool_use: bool) -> &'static str {
    if pending_tool_use {
        return "tool_use";
    }
    match finish_reason {
        "STOP" => "end_turn",
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature_cache::SignatureCacheConfig;
    use crate::tree::{ReasoningEffort, ThinkingSetting, ToolDecl};
    use std::time::Duration;

    fn cache() -> SignatureCache {
        SignatureCache::new(SignatureCacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 100,
            cleanup_interval: Duration::ZERO,
        })
    }

    fn base_tree(messages: Vec<Message>) -> RequestTree {
        RequestTree {
            model: "claude-sonnet-4-5".into(),
            system: Some("be nice".into()),
            messages,
            tools: None,
            thinking: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn property_7_interleaved_thinking_hint_appended_last() {
        let mut tree = base_tree(vec![]);
        tree.tools = Some(vec![ToolDecl {
            name: "search".into(),
            description: "d".into(),
            parameters: json!({}),
        }]);
        tree.thinking = Some(ThinkingSetting {
            enabled: true,
            budget_tokens: None,
            reasoning_effort: None,
        });
        let translator = ClaudeTranslator::new();
        let instruction = translator.build_system_instruction(&tree);
        let parts = instruction["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "be nice");
        assert_eq!(parts[1]["text"], INTERLEAVED_THINKING_HINT);
    }

    #[test]
    fn property_6_stable_partition_of_thinking_parts() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentPart::Text { text: "a".into() },
                ContentPart::Thinking {
                    text: "think1".into(),
                    signature: Some("s".repeat(20)),
                },
                ContentPart::Text { text: "b".into() },
                ContentPart::Thinking {
                    text: "think2".into(),
                    signature: Some("t".repeat(20)),
                },
            ],
        );
        let translator = ClaudeTranslator::new();
        let converted = translator.convert_message(&message, &cache());
        let parts = converted["parts"].as_array().unwrap();
        assert!(parts[0]["text"].as_str().unwrap_or_default().is_empty() || parts[0].get("thoughtSignature").is_some());
        assert!(parts[0].get("thoughtSignature").is_some());
        assert!(parts[1].get("thoughtSignature").is_some());
        assert_eq!(parts[2]["text"], "a");
        assert_eq!(parts[3]["text"], "b");
    }

    #[test]
    fn property_2_signature_cache_hit_beats_client_signature() {
        let c = cache();
        c.set("my thought", &"cached".repeat(5));
        let part = ContentPart::Thinking {
            text: "my thought".into(),
            signature: Some("group#client-provided-signature".into()),
        };
        let translator = ClaudeTranslator::new();
        let converted = translator.convert_part(&part, &c);
        assert_eq!(converted["thoughtSignature"], "cached".repeat(5));
    }

    #[test]
    fn property_2_falls_back_to_stripped_client_signature_on_miss() {
        let c = cache();
        let part = ContentPart::Thinking {
            text: "unseen thought".into(),
            signature: Some("group#clientsignatureabc".into()),
        };
        let translator = ClaudeTranslator::new();
        let converted = translator.convert_part(&part, &c);
        assert_eq!(converted["thoughtSignature"], "clientsignatureabc");
    }

    #[test]
    fn tool_use_gets_skip_validator_signature() {
        let part = ContentPart::ToolUse {
            id: "t1".into(),
            name: "search".into(),
            args: json!({"q": "x"}),
        };
        let translator = ClaudeTranslator::new();
        let converted = translator.convert_part(&part, &cache());
        assert_eq!(converted["thoughtSignature"], SKIP_VALIDATOR_SIGNATURE);
        assert_eq!(converted["functionCall"]["name"], "search");
    }

    #[test]
    fn tool_schema_cleaning_strips_root_and_property_keys() {
        let translator = ClaudeTranslator::new();
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "additionalProperties": false,
            "default": {},
            "properties": {"x": {"type": "string", "default": "y", "additionalProperties": true}}
        });
        let cleaned = translator.clean_tool_schema(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned.get("default").is_none());
        assert!(cleaned["properties"]["x"].get("default").is_none());
        assert!(cleaned["properties"]["x"].get("additionalProperties").is_none());
    }

    #[test]
    fn stop_reason_prefers_tool_use_when_pending() {
        assert_eq!(map_stop_reason("STOP", true), "tool_use");
        assert_eq!(map_stop_reason("STOP", false), "end_turn");
        assert_eq!(map_stop_reason("MAX_TOKENS", false), "max_tokens");
    }

    #[test]
    fn scenario_unary_response_copies_usage_and_thinking_signature() {
        let c = cache();
        let body = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "reasoning", "thought": true, "thoughtSignature": "sigsigsigsigsig"},
                    {"text": "final answer"},
                ]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5},
        });
        let translator = ClaudeTranslator::new();
        let unary = translator.convert_unary(&body, &c);
        assert_eq!(unary["content"][0]["type"], "thinking");
        assert_eq!(unary["content"][1]["text"], "final answer");
        assert_eq!(unary["usage"]["input_tokens"], 10);
        assert_eq!(c.get("reasoning"), Some("sigsigsigsigsig".to_string()));
    }

    #[test]
    fn streamed_signature_caches_against_accumulated_block_text() {
        let c = cache();
        let mut state = StreamState::new("resp-1", 0, "group");
        let translator = ClaudeTranslator::new();

        let first = json!({
            "candidates": [{"content": {"parts": [
                {"text": "partial ", "thought": true},
            ]}}],
        });
        translator.convert_stream_chunk(&first, &mut state, &c);

        let second = json!({
            "candidates": [{"content": {"parts": [
                {"text": "thought", "thought": true, "thoughtSignature": "sigsigsigsigsig"},
            ]}}],
        });
        translator.convert_stream_chunk(&second, &mut state, &c);

        assert_eq!(c.get("partial thought"), Some("sigsigsigsigsig".to_string()));
        assert!(c.get("thought").is_none());
        assert!(state.thinking_accum.is_empty());
    }
}
