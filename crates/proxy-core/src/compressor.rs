//! Three-layer progressive context compression.

use crate::estimator::estimate_request_tokens;
use crate::tree::{ContentPart, Message, RequestTree, Role};

/// Tunables.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub layer1_threshold: f64,
    pub layer2_threshold: f64,
    pub layer3_threshold: f64,
    pub keep_last_tool_rounds: usize,
    pub protected_last_n: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            layer1_threshold: 60.0,
            layer2_threshold: 75.0,
            layer3_threshold: 90.0,
            keep_last_tool_rounds: 5,
            protected_last_n: 4,
        }
    }
}

/// What happened during a single [`ContextCompressor::apply`] call.
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub pressure_before: f64,
    pub pressure_after: f64,
    /// Layer 3's fork anchor, if pressure reached its threshold.
    pub fork_hint: Option<String>,
    pub layers_applied: Vec<&'static str>,
}

pub struct ContextCompressor {
    config: CompressionConfig,
}

impl ContextCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Pressure as a percentage: `100 * estimated_tokens / max_tokens`.
    pub fn pressure(req: &RequestTree, max_tokens: u64) -> f64 {
        if max_tokens == 0 {
            return 100.0;
        }
        100.0 * estimate_request_tokens(req) as f64 / max_tokens as f64
    }

    /// Run the layers in strict order, re-estimating pressure after each.
    /// A later layer only runs if the previous one left pressure at or
    /// above its own threshold.
    pub fn apply(&self, req: &mut RequestTree, max_tokens: u64) -> CompressionResult {
        let pressure_before = Self::pressure(req, max_tokens);
        let mut pressure = pressure_before;
        let mut layers_applied = Vec::new();

        if pressure >= self.config.layer1_threshold {
            self.trim_tool_rounds(req);
            layers_applied.push("tool_round_trim");
            pressure = Self::pressure(req, max_tokens);
        }

        if pressure >= self.config.layer2_threshold {
            self.compress_thinking(req);
            layers_applied.push("thinking_compression");
            pressure = Self::pressure(req, max_tokens);
        }

        let mut fork_hint = None;
        if pressure >= self.config.layer3_threshold {
            fork_hint = Self::fork_hint(req);
            layers_applied.push("fork_hint");
        }

        CompressionResult {
            pressure_before,
            pressure_after: Self::pressure(req, max_tokens),
            fork_hint,
            layers_applied,
        }
    }

    /// Layer 1 (>=60%): keep the most recent `keep_last_tool_rounds` tool
    /// rounds, delete earlier ones without reordering survivors.
    fn trim_tool_rounds(&self, req: &mut RequestTree) {
        let rounds = find_tool_rounds(&req.messages);
        if rounds.len() <= self.config.keep_last_tool_rounds {
            return;
        }
        let cut = rounds.len() - self.config.keep_last_tool_rounds;
        for &(start, end) in rounds[..cut].iter().rev() {
            req.messages.drain(start..=end);
        }
    }

    /// Layer 2 (>=75%): blank out signed thinking text outside the
    /// protected tail, preserving signatures verbatim.
    fn compress_thinking(&self, req: &mut RequestTree) {
        let len = req.messages.len();
        let protected_from = len.saturating_sub(self.config.protected_last_n);
        for (idx, message) in req.messages.iter_mut().enumerate() {
            if idx >= protected_from || message.role != Role::Assistant {
                continue;
            }
            for part in message.parts.iter_mut() {
                if let ContentPart::Thinking { text, signature } = part {
                    let has_signature = signature.as_deref().is_some_and(|s| !s.is_empty());
                    if has_signature && text.len() > 10 {
                        *text = "...".to_string();
                    }
                }
            }
        }
    }

    /// Layer 3 (>=90%): the most recent thinking signature of length >= 50,
    /// scanned back-to-front. Does not mutate the tree.
    fn fork_hint(req: &RequestTree) -> Option<String> {
        for message in req.messages.iter().rev() {
            if message.role != Role::Assistant {
                continue;
            }
            for part in message.parts.iter().rev() {
                if let Some(sig) = part.thinking_signature() {
                    if sig.len() >= 50 {
                        return Some(sig.to_string());
                    }
                }
            }
        }
        None
    }
}

/// Identify tool rounds: an assistant message containing a tool-use part,
/// followed by one or more consecutive user messages whose parts are all
/// tool-result blocks. Returns `(start, end)` inclusive message-index ranges
/// in document order.
fn find_tool_rounds(messages: &[Message]) -> Vec<(usize, usize)> {
    let mut rounds = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        if messages[i].role == Role::Assistant && messages[i].has_tool_use() {
            let mut j = i + 1;
            while j < messages.len()
                && messages[j].role == Role::User
                && messages[j].is_all_tool_results()
            {
                j += 1;
            }
            if j > i + 1 {
                rounds.push((i, j - 1));
                i = j;
                continue;
            }
        }
        i += 1;
    }
    rounds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_round(id: &str) -> [Message; 2] {
        [
            Message::new(
                Role::Assistant,
                vec![ContentPart::ToolUse {
                    id: id.into(),
                    name: "search".into(),
                    args: serde_json::json!({}),
                }],
            ),
            Message::new(
                Role::User,
                vec![ContentPart::ToolResult {
                    tool_use_id: id.into(),
                    content: "result".into(),
                }],
            ),
        ]
    }

    fn request_with_rounds(n: usize) -> RequestTree {
        let mut messages = Vec::new();
        for i in 0..n {
            messages.extend(tool_round(&format!("call-{i}")));
        }
        RequestTree {
            model: "m".into(),
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
    fn scenario_6_seven_rounds_keep_five() {
        let mut req = request_with_rounds(7);
        let compressor = ContextCompressor::new(CompressionConfig::default());
        let before_len = req.messages.len();
        compressor.trim_tool_rounds(&mut req);
        assert_eq!(req.messages.len(), before_len - 4);
        // survivors still pair up tool_use with matching tool_result
        let rounds = find_tool_rounds(&req.messages);
        assert_eq!(rounds.len(), 5);
        for (start, end) in rounds {
            assert!(req.messages[start].has_tool_use());
            assert!(req.messages[end].is_all_tool_results());
        }
    }

    #[test]
    fn monotonic_token_count() {
        let mut req = request_with_rounds(7);
        let before = estimate_request_tokens(&req);
        let compressor = ContextCompressor::new(CompressionConfig::default());
        compressor.trim_tool_rounds(&mut req);
        let after = estimate_request_tokens(&req);
        assert!(after <= before);
    }

    #[test]
    fn scenario_7_thinking_compression_preserves_signature() {
        let mut req = RequestTree {
            model: "m".into(),
            system: None,
            messages: vec![
                Message::new(
                    Role::Assistant,
                    vec![ContentPart::Thinking {
                        text: "x".repeat(100),
                        signature: Some("s".repeat(60)),
                    }],
                ),
                Message::new(Role::User, vec![ContentPart::Text { text: "a".into() }]),
                Message::new(Role::Assistant, vec![ContentPart::Text { text: "b".into() }]),
                Message::new(Role::User, vec![ContentPart::Text { text: "c".into() }]),
                Message::new(Role::Assistant, vec![ContentPart::Text { text: "d".into() }]),
                Message::new(Role::User, vec![ContentPart::Text { text: "e".into() }]),
            ],
            tools: None,
            thinking: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            extra: Default::default(),
        };
        let config = CompressionConfig {
            protected_last_n: 4,
            ..Default::default()
        };
        let compressor = ContextCompressor::new(config);
        compressor.compress_thinking(&mut req);
        match &req.messages[0].parts[0] {
            ContentPart::Thinking { text, signature } => {
                assert_eq!(text, "...");
                assert_eq!(signature.as_deref(), Some("s".repeat(60).as_str()));
            }
            _ => panic!("expected thinking part"),
        }
    }

    #[test]
    fn protected_tail_untouched() {
        let mut req = RequestTree {
            model: "m".into(),
            system: None,
            messages: vec![Message::new(
                Role::Assistant,
                vec![ContentPart::Thinking {
                    text: "x".repeat(20),
                    signature: Some("s".repeat(20)),
                }],
            )],
            tools: None,
            thinking: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            extra: Default::default(),
        };
        let compressor = ContextCompressor::new(CompressionConfig::default());
        compressor.compress_thinking(&mut req);
        match &req.messages[0].parts[0] {
            ContentPart::Thinking { text, .. } => assert_eq!(text, &"x".repeat(20)),
            _ => panic!(),
        }
    }

    #[test]
    fn fork_hint_scans_back_to_front() {
        let req = RequestTree {
            model: "m".into(),
            system: None,
            messages: vec![
                Message::new(
                    Role::Assistant,
                    vec![ContentPart::Thinking {
                        text: "old".into(),
                        signature: Some("x".repeat(60)),
                    }],
                ),
                Message::new(
                    Role::Assistant,
                    vec![ContentPart::Thinking {
                        text: "new".into(),
                        signature: Some("y".repeat(60)),
                    }],
                ),
            ],
            tools: None,
            thinking: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            extra: Default::default(),
        };
        assert_eq!(ContextCompressor::fork_hint(&req), Some("y".repeat(60)));
    }

    #[test]
    fn fork_hint_ignores_short_signatures() {
        let req = RequestTree {
            model: "m".into(),
            system: None,
            messages: vec![Message::new(
                Role::Assistant,
                vec![ContentPart::Thinking {
                    text: "t".into(),
                    signature: Some("short".into()),
                }],
            )],
            tools: None,
            thinking: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            extra: Default::default(),
        };
        assert_eq!(ContextCompressor::fork_hint(&req), None);
    }
}
