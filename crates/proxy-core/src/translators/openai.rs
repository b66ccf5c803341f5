//! OpenAI Chat Completions API ⇄ Upstream translation.

use super::{clean_schema_deep, scrub_undefined_literal, tool_name_from_use_id, ClientFrame, StreamState, Translator};
use crate::signature_cache::SignatureCache;
use crate::tree::{ContentPart, Message, ReasoningEffort, RequestTree, Role};
use serde_json::{json, Value};
use std::collections::HashMap;

pub struct OpenAITranslator;

impl OpenAITranslator {
    pub fn new() -> Self {
        Self
    }

    fn is_thinking_capable(model: &str) -> bool {
        model.starts_with("gemini-3-") || model.contains("thinking")
    }

    fn thinking_config(effort: ReasoningEffort) -> Value {
        match effort {
            ReasoningEffort::Auto => json!({"thinkingBudget": -1, "includeThoughts": true}),
            ReasoningEffort::Low => json!({"thinkingBudget": 1024, "includeThoughts": true}),
            ReasoningEffort::Medium => json!({"thinkingBudget": 8192, "includeThoughts": true}),
            ReasoningEffort::High => json!({"thinkingBudget": 32768, "includeThoughts": true}),
            ReasoningEffort::None => json!({"includeThoughts": false}),
        }
    }

    /// Maps known tool names' argument shapes before they leave this process.
    fn remap_function_args(name: &str, args: &mut Value) {
        let Some(obj) = args.as_object_mut() else { return };
        match name {
            "grep" | "glob" => {
                if let Some(v) = obj.remove("description") {
                    obj.insert("pattern".into(), v);
                }
                if name == "grep" {
                    if let Some(v) = obj.remove("query") {
                        obj.insert("pattern".into(), v);
                    }
                }
            }
            "search" => {
                if let Some(v) = obj.remove("query") {
                    obj.insert("pattern".into(), v);
                }
            }
            "EnterPlanMode" => obj.clear(),
            _ => {}
        }
        if let Some(Value::Array(paths)) = obj.remove("paths") {
            if let Some(first) = paths.into_iter().next() {
                obj.insert("path".into(), first);
            }
        }
    }

    fn clean_tool_schema(&self, schema: &Value) -> Value {
        let cleaned = clean_schema_deep(schema, &["format", "strict", "additionalProperties"]);
        cleaned
    }

    fn convert_part(&self, part: &ContentPart, cache: &SignatureCache) -> Value {
        match part {
            ContentPart::Text { text } => json!({"text": text}),
            ContentPart::Thinking { text, signature } => {
                let sig = cache.get(text).or_else(|| signature.clone());
                json!({"thought": true, "text": text, "thoughtSignature": sig})
            }
            ContentPart::ToolUse { id, name, args } => {
                json!({"functionCall": {"id": id, "name": name, "args": args}})
            }
            ContentPart::ToolResult { tool_use_id, content } => json!({
                "functionResponse": {
                    "id": tool_use_id,
                    "name": tool_name_from_use_id(tool_use_id),
                    "response": {"result": content},
                }
            }),
            ContentPart::Image { mime_type, data } => json!({"inlineData": {"mime_type": mime_type, "data": data}}),
        }
    }

    /// First pass: `tool_call_id → function_name`, from every `ToolUse` part
    /// anywhere in the conversation.
    fn tool_call_names(tree: &RequestTree) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for message in &tree.messages {
            for part in &message.parts {
                if let ContentPart::ToolUse { id, name, .. } = part {
                    map.insert(id.clone(), name.clone());
                }
            }
        }
        map
    }

    /// Second pass: `tool_call_id → serialized content`, from every
    /// `ToolResult` part anywhere in the conversation.
    fn tool_result_contents(tree: &RequestTree) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for message in &tree.messages {
            for part in &message.parts {
                if let ContentPart::ToolResult { tool_use_id, content } = part {
                    map.insert(tool_use_id.clone(), content.clone());
                }
            }
        }
        map
    }

    fn merge_consecutive_same_role(contents: Vec<Value>) -> Vec<Value> {
        let mut merged: Vec<Value> = Vec::new();
        for entry in contents {
            if let Some(last) = merged.last_mut() {
                if last["role"] == entry["role"] {
                    if let (Some(last_parts), Some(new_parts)) =
                        (last["parts"].as_array().cloned(), entry["parts"].as_array().cloned())
                    {
                        let mut combined = last_parts;
                        combined.extend(new_parts);
                        last["parts"] = json!(combined);
                        continue;
                    }
                }
            }
            merged.push(entry);
        }
        merged
    }
}

impl Default for OpenAITranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator for OpenAITranslator {
    fn convert_request(&self, tree: &RequestTree, cache: &SignatureCache) -> Value {
        let thinking_capable = Self::is_thinking_capable(&tree.model);
        let thinking_compatible = !thinking_capable
            || tree
                .messages
                .iter()
                .filter(|m| m.role == Role::Assistant && !m.parts.is_empty())
                .all(|m| m.parts.iter().any(ContentPart::is_thinking));

        let call_names = Self::tool_call_names(tree);
        let call_results = Self::tool_result_contents(tree);

        let mut system_parts = Vec::new();
        if let Some(system) = &tree.system {
            if !system.is_empty() {
                system_parts.push(json!({"text": system}));
            }
        }

        let only_message = tree.messages.len() == 1;
        let mut contents: Vec<Value> = Vec::new();

        for message in &tree.messages {
            if message.is_all_tool_results() {
                // Already folded into the synthetic response message emitted
                // right after its owning assistant turn.
                continue;
            }

            if matches!(message.role, Role::System) && !only_message {
                for part in &message.parts {
                    if let ContentPart::Text { text } = part {
                        system_parts.push(json!({"text": text}));
                    }
                }
                continue;
            }

            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };

            let parts_source: Vec<&ContentPart> = if role == "model"
                && thinking_compatible
                && thinking_capable
                && message.parts.iter().any(ContentPart::is_thinking)
            {
                let mut thinking = Vec::new();
                let mut rest = Vec::new();
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

            let parts: Vec<Value> = parts_source.into_iter().map(|p| self.convert_part(p, cache)).collect();
            let tool_use_ids: Vec<String> = message
                .parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect();

            contents.push(json!({"role": role, "parts": parts}));

            if !tool_use_ids.is_empty() {
                let response_parts: Vec<Value> = tool_use_ids
                    .iter()
                    .map(|id| {
                        let name = call_names.get(id).cloned().unwrap_or_else(|| tool_name_from_use_id(id));
                        let result = call_results.get(id).cloned().unwrap_or_default();
                        json!({"functionResponse": {"id": id, "name": name, "response": {"result": result}}})
                    })
                    .collect();
                contents.push(json!({"role": "user", "parts": response_parts}));
            }
        }

        let contents = Self::merge_consecutive_same_role(contents);

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
            if let Some(effort) = thinking.reasoning_effort {
                // An incompatible assistant history silently disables thinking
                // rather than shipping a thinkingConfig Upstream would reject.
                let config = if thinking_compatible {
                    Self::thinking_config(effort)
                } else {
                    json!({"includeThoughts": false})
                };
                generation_config.insert("thinkingConfig".into(), config);
            }
        }

        let function_declarations: Vec<Value> = tree
            .tools
            .as_ref()
            .map(|tools| {
                tools
                    .iter()
                    .map(|t| {
                        let name = if t.name == "local_shell_call" { "shell".to_string() } else { t.name.clone() };
                        json!({
                            "name": name,
                            "description": t.description,
                            "parametersJsonSchema": self.clean_tool_schema(&t.parameters),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut request = serde_json::Map::new();
        request.insert("contents".into(), json!(contents));
        if !system_parts.is_empty() {
            request.insert("systemInstruction".into(), json!({"role": "user", "parts": system_parts}));
        }
        if !generation_config.is_empty() {
            request.insert("generationConfig".into(), Value::Object(generation_config));
        }
        if !function_declarations.is_empty() {
            request.insert("tools".into(), json!([{"functionDeclarations": function_declarations}]));
        }

        let mut body = json!({"model": tree.model, "request": Value::Object(request)});
        scrub_undefined_literal(&mut body);
        body
    }

    fn convert_stream_chunk(&self, chunk: &Value, state: &mut StreamState, cache: &SignatureCache) -> Vec<ClientFrame> {
        let candidate = &chunk["candidates"][0];
        let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();
        let mut delta = serde_json::Map::new();
        let mut tool_calls = Vec::new();
        let mut images = Vec::new();

        for part in &parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    state.thinking_accum.push_str(text);
                    if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                        cache.set(&state.thinking_accum, sig);
                        state.thinking_accum.clear();
                    }
                    delta.insert("reasoning_content".into(), json!(text));
                } else {
                    delta.insert("content".into(), json!(text));
                }
            } else if let Some(call) = part.get("functionCall") {
                state.pending_tool_use = true;
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let id = state.next_tool_call_id(name);
                let mut args = call.get("args").cloned().unwrap_or(json!({}));
                Self::remap_function_args(name, &mut args);
                tool_calls.push(json!({
                    "index": 0,
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": args.to_string()},
                }));
            } else if let Some(inline) = part.get("inlineData") {
                let mime = inline.get("mime_type").and_then(Value::as_str).unwrap_or("image/png");
                let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
                images.push(json!({"image_url": {"url": format!("data:{mime};base64,{data}")}}));
            }
        }

        if !tool_calls.is_empty() {
            delta.insert("tool_calls".into(), json!(tool_calls));
        }
        if !images.is_empty() {
            delta.insert("images".into(), json!(images));
        }

        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(|r| match r {
                "STOP" if state.pending_tool_use => json!("tool_calls"),
                "STOP" => json!("stop"),
                "MAX_TOKENS" => json!("length"),
                _ => json!("stop"),
            });

        let mut frame = json!({
            "id": state.response_id,
            "object": "chat.completion.chunk",
            "created": state.created_at,
            "model": state.model_group,
            "choices": [{"index": 0, "delta": Value::Object(delta), "finish_reason": finish_reason}],
        });
        scrub_undefined_literal(&mut frame);

        let mut frames = vec![ClientFrame::Event {
            event: String::new(),
            data: frame.take(),
        }];
        if finish_reason.is_some() {
            frames.push(ClientFrame::Done);
        }
        frames
    }

    fn convert_unary(&self, body: &Value, cache: &SignatureCache) -> Value {
        let candidate = &body["candidates"][0];
        let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();

        let mut content_text = String::new();
        let mut reasoning_text = String::new();
        let mut tool_calls = Vec::new();
        let mut counter = 0u64;

        for part in &parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                        cache.set(text, sig);
                    }
                    reasoning_text.push_str(text);
                } else {
                    content_text.push_str(text);
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let mut args = call.get("args").cloned().unwrap_or(json!({}));
                Self::remap_function_args(name, &mut args);
                let id = format!("call_{name}_{counter}");
                counter += 1;
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": args.to_string()},
                }));
            }
        }

        if let Some(grounding) = candidate.get("groundingMetadata") {
            if let Some(citations) = grounding.get("groundingChunks").and_then(Value::as_array) {
                if !citations.is_empty() {
                    content_text.push_str("\n\n");
                    for c in citations {
                        if let Some(uri) = c.get("web").and_then(|w| w.get("uri")).and_then(Value::as_str) {
                            content_text.push_str(&format!("- {uri}\n"));
                        }
                    }
                }
            }
        }

        let usage = compute_usage(&body["usageMetadata"]);
        let mut message = serde_json::Map::new();
        message.insert("role".into(), json!("assistant"));
        if !content_text.is_empty() {
            message.insert("content".into(), json!(content_text));
        }
        if !reasoning_text.is_empty() {
            message.insert("reasoning_content".into(), json!(reasoning_text));
        }
        if !tool_calls.is_empty() {
            message.insert("tool_calls".into(), json!(tool_calls));
        }

        json!({
            "object": "chat.completion",
            "choices": [{"index": 0, "message": Value::Object(message), "finish_reason": "stop"}],
            "usage": usage,
        })
    }
}

/// `prompt_tokens = promptTokenCount − cachedContentTokenCount`;
/// `completion_tokens = candidatesTokenCount + thoughtsTokenCount`;
/// `total_tokens = totalTokenCount`.
pub fn compute_usage(usage_metadata: &Value) -> Value {
    let prompt = usage_metadata.get("promptTokenCount").and_then(Value::as_i64).unwrap_or(0);
    let cached = usage_metadata.get("cachedContentTokenCount").and_then(Value::as_i64).unwrap_or(0);
    let candidates = usage_metadata.get("candidatesTokenCount").and_then(Value::as_i64).unwrap_or(0);
    let thoughts = usage_metadata.get("thoughtsTokenCount").and_then(Value::as_i64).unwrap_or(0);
    let total = usage_metadata.get("totalTokenCount").and_then(Value::as_i64).unwrap_or(prompt + candidates);

    json!({
        "prompt_tokens": prompt - cached,
        "completion_tokens": candidates + thoughts,
        "total_tokens": total,
        "prompt_tokens_details": {"cached_tokens": cached},
        "completion_tokens_details": {"reasoning_tokens": thoughts},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature_cache::SignatureCacheConfig;
    use crate::tree::ThinkingSetting;
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
            model: "gemini-2.5-pro".into(),
            system: None,
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
    fn reasoning_effort_maps_to_thinking_budget() {
        assert_eq!(OpenAITranslator::thinking_config(ReasoningEffort::Auto)["thinkingBudget"], -1);
        assert_eq!(OpenAITranslator::thinking_config(ReasoningEffort::Low)["thinkingBudget"], 1024);
        assert_eq!(OpenAITranslator::thinking_config(ReasoningEffort::High)["thinkingBudget"], 32768);
        assert_eq!(OpenAITranslator::thinking_config(ReasoningEffort::None)["includeThoughts"], false);
    }

    #[test]
    fn synthetic_response_message_follows_assistant_tool_call() {
        let mut tree = base_tree(vec![
            Message::new(
                Role::Assistant,
                vec![ContentPart::ToolUse {
                    id: "call-1".into(),
                    name: "search".into(),
                    args: json!({"q": "x"}),
                }],
            ),
            Message::new(
                Role::Tool,
                vec![ContentPart::ToolResult {
                    tool_use_id: "call-1".into(),
                    content: "found it".into(),
                }],
            ),
        ]);
        tree.thinking = Some(ThinkingSetting::default());
        let translator = OpenAITranslator::new();
        let upstream = translator.convert_request(&tree, &cache());
        let contents = upstream["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["response"]["result"],
            "found it"
        );
    }

    #[test]
    fn function_arg_remapping_renames_known_tools() {
        let mut args = json!({"description": "needle", "paths": ["a.rs", "b.rs"]});
        OpenAITranslator::remap_function_args("grep", &mut args);
        assert_eq!(args["pattern"], "needle");
        assert_eq!(args["path"], "a.rs");
        assert!(args.get("description").is_none());
        assert!(args.get("paths").is_none());

        let mut plan_args = json!({"plan": "do the thing"});
        OpenAITranslator::remap_function_args("EnterPlanMode", &mut plan_args);
        assert_eq!(plan_args, json!({}));
    }

    #[test]
    fn local_shell_call_renamed_to_shell() {
        let mut tree = base_tree(vec![]);
        tree.tools = Some(vec![crate::tree::ToolDecl {
            name: "local_shell_call".into(),
            description: "run a shell command".into(),
            parameters: json!({"type": "object"}),
        }]);
        let translator = OpenAITranslator::new();
        let upstream = translator.convert_request(&tree, &cache());
        let decls = upstream["request"]["tools"][0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(decls[0]["name"], "shell");
    }

    #[test]
    fn usage_formula_subtracts_cached_and_adds_reasoning() {
        let usage = compute_usage(&json!({
            "promptTokenCount": 100,
            "cachedContentTokenCount": 20,
            "candidatesTokenCount": 30,
            "thoughtsTokenCount": 10,
            "totalTokenCount": 140,
        }));
        assert_eq!(usage["prompt_tokens"], 80);
        assert_eq!(usage["completion_tokens"], 40);
        assert_eq!(usage["total_tokens"], 140);
    }

    #[test]
    fn scrubs_undefined_literal_from_request_body() {
        let mut tree = base_tree(vec![Message::new(
            Role::User,
            vec![ContentPart::Text { text: "[undefined]".into() }],
        )]);
        tree.system = Some("hi".into());
        let translator = OpenAITranslator::new();
        let upstream = translator.convert_request(&tree, &cache());
        assert_eq!(upstream["request"]["contents"][0]["parts"][0]["text"], "");
    }

    #[test]
    fn incompatible_history_disables_thinking_config() {
        let mut tree = base_tree(vec![Message::new(
            Role::Assistant,
            vec![ContentPart::Text { text: "no reasoning here".into() }],
        )]);
        tree.model = "gemini-3-pro-thinking".into();
        tree.thinking = Some(ThinkingSetting {
            enabled: true,
            budget_tokens: None,
            reasoning_effort: Some(ReasoningEffort::High),
        });
        let translator = OpenAITranslator::new();
        let upstream = translator.convert_request(&tree, &cache());
        let thinking_config = &upstream["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(thinking_config["includeThoughts"], false);
        assert!(thinking_config.get("thinkingBudget").is_none());
    }

    #[test]
    fn compatible_history_keeps_thinking_config() {
        let mut tree = base_tree(vec![Message::new(
            Role::Assistant,
            vec![ContentPart::Thinking { text: "reasoning".into(), signature: None }],
        )]);
        tree.model = "gemini-3-pro-thinking".into();
        tree.thinking = Some(ThinkingSetting {
            enabled: true,
            budget_tokens: None,
            reasoning_effort: Some(ReasoningEffort::High),
        });
        let translator = OpenAITranslator::new();
        let upstream = translator.convert_request(&tree, &cache());
        assert_eq!(upstream["request"]["generationConfig"]["thinkingConfig"]["thinkingBudget"], 32768);
    }

    #[test]
    fn tool_call_in_terminal_chunk_maps_to_tool_calls_finish_reason() {
        let c = cache();
        let mut state = StreamState::new("resp-1", 0, "gemini-2.5-pro");
        let chunk = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "search", "args": {"q": "x"}}},
                ]},
                "finishReason": "STOP",
            }],
        });
        let translator = OpenAITranslator::new();
        let frames = translator.convert_stream_chunk(&chunk, &mut state, &c);
        let data = match &frames[0] {
            ClientFrame::Event { data, .. } => data,
            _ => panic!("expected an event frame"),
        };
        assert_eq!(data["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn streamed_signature_caches_against_accumulated_block_text() {
        let c = cache();
        let mut state = StreamState::new("resp-1", 0, "gemini-2.5-pro");
        let translator = OpenAITranslator::new();

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
