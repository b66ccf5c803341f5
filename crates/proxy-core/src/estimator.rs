//! Heuristic token counting.
//!
//! Deliberately crude: this estimates Upstream's tokenizer well enough to
//! drive compression decisions, not to bill accurately.

use crate::tree::{ContentPart, RequestTree};

const MESSAGE_ROLE_OVERHEAD: f64 = 4.0;
const FUDGE_FACTOR: f64 = 1.15;

/// Estimate the number of tokens in `text`.
///
/// ASCII code points count as `ceil(ascii / 4)`, non-ASCII as
/// `ceil(non_ascii / 1.5)`; the sum is multiplied by 1.15 and rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let (ascii, non_ascii) = text
        .chars()
        .fold((0u64, 0u64), |(a, n), c| {
            if c.is_ascii() {
                (a + 1, n)
            } else {
                (a, n + 1)
            }
        });
    let ascii_tokens = (ascii as f64 / 4.0).ceil();
    let non_ascii_tokens = (non_ascii as f64 / 1.5).ceil();
    ((ascii_tokens + non_ascii_tokens) * FUDGE_FACTOR).ceil() as u64
}

/// Estimate the total tokens a [`RequestTree`] would cost Upstream.
///
/// Sums the system instruction text, every message part (with a fixed
/// per-message role overhead), serialized tool declarations, and any
/// declared thinking budget.
pub fn estimate_request_tokens(req: &RequestTree) -> u64 {
    let mut total = 0u64;

    if let Some(system) = &req.system {
        total += estimate_tokens(system);
    }

    for message in &req.messages {
        total += MESSAGE_ROLE_OVERHEAD.ceil() as u64;
        for part in &message.parts {
            total += estimate_part_tokens(part);
        }
    }

    if let Some(tools) = &req.tools {
        for tool in tools {
            if let Ok(text) = serde_json::to_string(tool) {
                total += estimate_tokens(&text);
            }
        }
    }

    if let Some(budget) = req.thinking.as_ref().and_then(|t| t.budget_tokens) {
        total += budget;
    }

    total
}

fn estimate_part_tokens(part: &ContentPart) -> u64 {
    match part {
        ContentPart::Text { text } => estimate_tokens(text),
        ContentPart::Thinking { text, .. } => estimate_tokens(text),
        ContentPart::ToolUse { name, args, .. } => {
            let payload = serde_json::json!({ "name": name, "args": args });
            estimate_tokens(&payload.to_string())
        }
        ContentPart::ToolResult { content, .. } => estimate_tokens(content),
        ContentPart::Image { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_null_are_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn deterministic() {
        let text = "hello, world! \u{4e2d}\u{6587}";
        assert_eq!(estimate_tokens(text), estimate_tokens(text));
    }

    #[test]
    fn ascii_only() {
        // 8 ascii chars -> ceil(8/4)=2 -> *1.15 = 2.3 -> ceil = 3
        assert_eq!(estimate_tokens("abcdefgh"), 3);
    }

    #[test]
    fn non_ascii_only() {
        // 3 non-ascii chars -> ceil(3/1.5)=2 -> *1.15=2.3 -> ceil=3
        assert_eq!(estimate_tokens("\u{4e2d}\u{6587}\u{5b57}"), 3);
    }
}
