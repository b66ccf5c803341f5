//! Input model name → Upstream model name resolution.

use std::collections::HashMap;

/// Precedence, stopping at first hit: exact custom mapping, highest-specificity
/// wildcard custom mapping, built-in default table, pass-through, fallback.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    custom_mappings: HashMap<String, String>,
    default_model: String,
}

impl ModelRouter {
    pub fn new(custom_mappings: HashMap<String, String>, default_model: impl Into<String>) -> Self {
        Self {
            custom_mappings,
            default_model: default_model.into(),
        }
    }

    /// Resolve `input` to the Upstream-native model name.
    pub fn resolve(&self, input: &str) -> String {
        if let Some(target) = self.custom_mappings.get(input) {
            return target.clone();
        }

        if let Some(target) = self.best_wildcard_match(input) {
            return target;
        }

        if let Some(target) = builtin_default_table().get(input) {
            return target.to_string();
        }

        if input.starts_with("gemini-") || input.contains("thinking") {
            return input.to_string();
        }

        self.default_model.clone()
    }

    fn best_wildcard_match(&self, input: &str) -> Option<String> {
        let mut best: Option<(i64, &str)> = None;
        for (pattern, target) in &self.custom_mappings {
            if !pattern.contains('*') {
                continue;
            }
            if wildcard_matches(pattern, input) {
                let specificity = specificity_of(pattern);
                if best.map(|(s, _)| specificity > s).unwrap_or(true) {
                    best = Some((specificity, target.as_str()));
                }
            }
        }
        best.map(|(_, target)| target.to_string())
    }
}

/// `len(pattern) − count('*')`.
fn specificity_of(pattern: &str) -> i64 {
    pattern.len() as i64 - pattern.matches('*').count() as i64
}

/// Segments between `*`s must anchor at start/end and appear in order.
fn wildcard_matches(pattern: &str, input: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == input;
    }

    let mut pos = 0usize;
    let first = parts[0];
    if !first.is_empty() {
        if !input[pos..].starts_with(first) {
            return false;
        }
        pos += first.len();
    }

    for middle in &parts[1..parts.len() - 1] {
        if middle.is_empty() {
            continue;
        }
        match input[pos..].find(middle) {
            Some(offset) => pos += offset + middle.len(),
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    if !last.is_empty() {
        return input[pos..].ends_with(last) && input.len() >= pos + last.len();
    }
    true
}

/// Common client model names the proxy recognizes without custom config.
fn builtin_default_table() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("claude-3-5-sonnet-20241022", "claude-sonnet-4-5"),
        ("claude-3-opus-20240229", "claude-opus-4-5"),
        ("claude-3-5-haiku-20241022", "claude-haiku-4-5"),
        ("gpt-4o", "gemini-2.5-pro"),
        ("gpt-4o-mini", "gemini-2.5-flash"),
        ("gpt-4-turbo", "gemini-2.5-pro"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_builtin_table() {
        let router = ModelRouter::new(HashMap::new(), "gemini-2.5-pro");
        assert_eq!(
            router.resolve("claude-3-5-sonnet-20241022"),
            "claude-sonnet-4-5"
        );
    }

    #[test]
    fn scenario_8_wildcard_specificity() {
        let mappings = HashMap::from([
            ("claude-*".to_string(), "A".to_string()),
            ("claude-*-sonnet-*".to_string(), "B".to_string()),
        ]);
        let router = ModelRouter::new(mappings, "fallback");
        assert_eq!(router.resolve("claude-3-5-sonnet-20241022"), "B");
    }

    #[test]
    fn exact_beats_wildcard() {
        let mappings = HashMap::from([
            ("claude-*".to_string(), "A".to_string()),
            ("claude-3-5-sonnet-20241022".to_string(), "exact".to_string()),
        ]);
        let router = ModelRouter::new(mappings, "fallback");
        assert_eq!(router.resolve("claude-3-5-sonnet-20241022"), "exact");
    }

    #[test]
    fn pass_through_gemini_and_thinking() {
        let router = ModelRouter::new(HashMap::new(), "fallback");
        assert_eq!(router.resolve("gemini-3-pro-thinking"), "gemini-3-pro-thinking");
        assert_eq!(router.resolve("custom-thinking-variant"), "custom-thinking-variant");
    }

    #[test]
    fn fallback_to_default() {
        let router = ModelRouter::new(HashMap::new(), "fallback-model");
        assert_eq!(router.resolve("totally-unknown"), "fallback-model");
    }

    #[test]
    fn determinism_p13() {
        let mappings = HashMap::from([("foo-*".to_string(), "bar".to_string())]);
        let r1 = ModelRouter::new(mappings.clone(), "d");
        let r2 = ModelRouter::new(mappings, "d");
        for input in ["foo-1", "foo-bar-baz", "totally-different", "gemini-x"] {
            assert_eq!(r1.resolve(input), r2.resolve(input));
        }
    }
}
