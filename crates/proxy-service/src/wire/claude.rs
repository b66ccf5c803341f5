//! Claude Messages API wire shapes: JSON body → [`RequestTree`], and
//! [`ClientFrame`]s → the HTTP response the client expects.

use serde::Deserialize;
use serde_json::Value;
use upstream_proxy_core::error::ProxyError;
use upstream_proxy_core::tree::{ContentPart, Message, RequestTree, Role, ThinkingSetting, ToolDecl};

#[derive(Debug, Deserialize)]
pub struct ClaudeRequestBody {
    pub model: String,
    #[serde(default)]
    pub system: Option<SystemField>,
    pub messages: Vec<ClaudeMessageIn>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub thinking: Option<ClaudeThinking>,
    #[serde(default)]
    pub tools: Option<Vec<ClaudeToolIn>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SystemField {
    Text(String),
    Blocks(Vec<ClaudeTextBlock>),
}

#[derive(Debug, Deserialize)]
pub struct ClaudeTextBlock {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeThinking {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub budget_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeToolIn {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeMessageIn {
    pub role: String,
    pub content: ClaudeContentIn,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContentIn {
    Text(String),
    Blocks(Vec<ClaudeBlockIn>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClaudeBlockIn {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContentIn>,
    },
    Image {
        source: ClaudeImageSourceIn,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContentIn {
    Text(String),
    Blocks(Vec<ClaudeTextBlock>),
}

impl ToolResultContentIn {
    fn flatten(&self) -> String {
        match self {
            ToolResultContentIn::Text(t) => t.clone(),
            ToolResultContentIn::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join(""),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaudeImageSourceIn {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

/// Parse a `/v1/messages` body into the dialect-independent [`RequestTree`].
pub fn parse_request(body: Value) -> Result<RequestTree, ProxyError> {
    let parsed: ClaudeRequestBody =
        serde_json::from_value(body).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let system = parsed.system.map(|s| match s {
        SystemField::Text(t) => t,
        SystemField::Blocks(blocks) => blocks.into_iter().map(|b| b.text).collect::<Vec<_>>().join("\n"),
    });

    let messages = parsed
        .messages
        .into_iter()
        .map(|m| {
            let role = match m.role.as_str() {
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            let blocks = match m.content {
                ClaudeContentIn::Text(text) => vec![ClaudeBlockIn::Text { text }],
                ClaudeContentIn::Blocks(blocks) => blocks,
            };
            let parts = blocks.into_iter().map(convert_block).collect();
            Message::new(role, parts)
        })
        .collect();

    let thinking = parsed.thinking.map(|t| ThinkingSetting {
        enabled: t.kind == "enabled",
        budget_tokens: t.budget_tokens,
        reasoning_effort: None,
    });

    let tools = parsed.tools.map(|tools| {
        tools
            .into_iter()
            .map(|t| ToolDecl {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect()
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
        top_k: parsed.top_k,
        extra: Default::default(),
    })
}

/// Whether the parsed body asked for a streamed response.
pub fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn convert_block(block: ClaudeBlockIn) -> ContentPart {
    match block {
        ClaudeBlockIn::Text { text } => ContentPart::Text { text },
        ClaudeBlockIn::Thinking { thinking, signature } => ContentPart::Thinking {
            text: thinking,
            signature,
        },
        ClaudeBlockIn::ToolUse { id, name, input } => ContentPart::ToolUse { id, name, args: input },
        ClaudeBlockIn::ToolResult { tool_use_id, content } => ContentPart::ToolResult {
            tool_use_id,
            content: content.map(|c| c.flatten()).unwrap_or_default(),
        },
        ClaudeBlockIn::Image { source } => ContentPart::Image {
            mime_type: source.media_type,
            data: source.data,
        },
    }
}
