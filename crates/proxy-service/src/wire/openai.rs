//! OpenAI Chat Completions API wire shapes: JSON body → [`RequestTree`].

use serde::Deserialize;
use serde_json::Value;
use upstream_proxy_core::error::ProxyError;
use upstream_proxy_core::tree::{ContentPart, Message, ReasoningEffort, RequestTree, Role, ThinkingSetting, ToolDecl};

#[derive(Debug, Deserialize)]
pub struct OpenAiRequestBody {
    pub model: String,
    pub messages: Vec<OpenAiMessageIn>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<OpenAiToolIn>>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiToolIn {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionIn,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiFunctionIn {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiMessageIn {
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAiContentIn>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCallIn>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContentIn {
    Text(String),
    Parts(Vec<OpenAiContentPartIn>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum OpenAiContentPartIn {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrlIn },
}

#[derive(Debug, Deserialize)]
pub struct OpenAiImageUrlIn {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiToolCallIn {
    pub id: String,
    #[serde(default)]
    pub function: OpenAiToolCallFunctionIn,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAiToolCallFunctionIn {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Parse a `/v1/chat/completions` body into the dialect-independent
/// [`RequestTree`].
pub fn parse_request(body: Value) -> Result<RequestTree, ProxyError> {
    let parsed: OpenAiRequestBody =
        serde_json::from_value(body).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let reasoning_effort = parsed.reasoning_effort.as_deref().and_then(parse_reasoning_effort);

    // `system`/`developer` messages fold into a single system string unless
    // they are the conversation's only message.
    let only_message = parsed.messages.len() == 1;
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages = Vec::new();

    for m in parsed.messages {
        let is_system_role = matches!(m.role.as_str(), "system" | "developer");
        if is_system_role && !only_message {
            if let Some(text) = content_as_text(&m.content) {
                system_parts.push(text);
            }
            continue;
        }

        let role = match m.role.as_str() {
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        };

        let mut parts = Vec::new();

        // A placeholder thought part carries the assistant's prior
        // reasoning so the Upstream signature chain survives a later turn
        //.
        if role == Role::Assistant {
            if let Some(reasoning) = &m.reasoning_content {
                parts.push(ContentPart::Thinking {
                    text: reasoning.clone(),
                    signature: None,
                });
            }
        }

        if let Some(content) = &m.content {
            parts.extend(convert_content(content));
        }

        if let Some(tool_calls) = &m.tool_calls {
            for call in tool_calls {
                let args: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
                parts.push(ContentPart::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    args,
                });
            }
        }

        if role == Role::Tool {
            let content = content_as_text(&m.content).unwrap_or_default();
            parts = vec![ContentPart::ToolResult {
                tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                content,
            }];
        }

        messages.push(Message::new(role, parts));
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };

    let tools = parsed.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ToolDecl {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect()
    });

    let thinking = reasoning_effort.map(|effort| ThinkingSetting {
        enabled: !matches!(effort, ReasoningEffort::None),
        budget_tokens: None,
        reasoning_effort: Some(effort),
    });

    Ok(RequestTree {
        model: parsed.model,
        system,
        messages,
        tools,
        thinking,
        max_tokens: parsed.max_tokens,
        temperature: parsed.temperature,
        top_p: parsed.top_p,
        top_k: None,
        extra: Default::default(),
    })
}

pub fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn parse_reasoning_effort(s: &str) -> Option<ReasoningEffort> {
    match s {
        "auto" => Some(ReasoningEffort::Auto),
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        "none" => Some(ReasoningEffort::None),
        _ => None,
    }
}

fn content_as_text(content: &Option<OpenAiContentIn>) -> Option<String> {
    match content {
        Some(OpenAiContentIn::Text(t)) => Some(t.clone()),
        Some(OpenAiContentIn::Parts(parts)) => {
            let text: String = parts
                .iter()
                .filter_map(|p| match p {
                    OpenAiContentPartIn::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            Some(text)
        }
        None => None,
    }
}

fn convert_content(content: &OpenAiContentIn) -> Vec<ContentPart> {
    match content {
        OpenAiContentIn::Text(text) => vec![ContentPart::Text { text: text.clone() }],
        OpenAiContentIn::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                OpenAiContentPartIn::Text { text } => ContentPart::Text { text: text.clone() },
                OpenAiContentPartIn::ImageUrl { image_url } => split_data_uri(&image_url.url),
            })
            .collect(),
    }
}

/// Split a `data:<mime>;base64,<data>` URI into an `Image` part, splitting
/// at the `;` and `,base64,` delimiters.
fn split_data_uri(uri: &str) -> ContentPart {
    let without_scheme = uri.strip_prefix("data:").unwrap_or(uri);
    let (mime_type, data) = match without_scheme.split_once(";base64,") {
        Some((mime, data)) => (mime.to_string(), data.to_string()),
        None => match without_scheme.split_once(',') {
            Some((mime, data)) => (mime.trim_end_matches(";base64").to_string(), data.to_string()),
            None => (String::new(), without_scheme.to_string()),
        },
    };
    ContentPart::Image { mime_type, data }
}
