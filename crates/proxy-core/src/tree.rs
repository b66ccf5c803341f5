//! The semi-structured request/response tree shared by both translators.
//!
//! Upstream's own wire schema is intentionally *not* modeled here as typed
//! Rust — that's out of scope. Translators read and write Upstream
//! shapes as raw [`serde_json::Value`] via the small helpers in
//! `crate::upstream`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who sent a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One tagged content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Image {
        mime_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
}

impl ContentPart {
    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentPart::Thinking { .. })
    }

    pub fn thinking_signature(&self) -> Option<&str> {
        match self {
            ContentPart::Thinking {
                signature: Some(s), ..
            } => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self { role, parts }
    }

    /// True when every part is a `tool_result` block — the defining shape of
    /// the user-turn half of a "tool round".
    pub fn is_all_tool_results(&self) -> bool {
        !self.parts.is_empty()
            && self
                .parts
                .iter()
                .all(|p| matches!(p, ContentPart::ToolResult { .. }))
    }

    pub fn has_tool_use(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::ToolUse { .. }))
    }
}

/// Declared reasoning/thinking configuration on the inbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingSetting {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Auto,
    Low,
    Medium,
    High,
    None,
}

/// A tool declaration as supplied by the client, independent of dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The dialect-independent request tree both translators consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTree {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDecl>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    /// Forward-compatible fields neither translator understands; carried so
    /// degrade-don't-throw applies to unknown input too.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestTree {
    pub fn thinking_enabled(&self) -> bool {
        self.thinking.as_ref().map(|t| t.enabled).unwrap_or(false)
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}
