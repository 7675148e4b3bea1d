//! Generated code strings and cleanup of the formatting artifacts that LLM
//! responses wrap around them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Language tags that generation models put on the first line of a code reply.
const LANGUAGE_TAGS: &[&str] = &[
    "jsx",
    "tsx",
    "javascript",
    "typescript",
    "js",
    "ts",
    "html",
    "react",
];

/// Untrusted UI source produced by an upstream generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedCode(String);

impl GeneratedCode {
    pub fn new(code: impl Into<String>) -> Self {
        GeneratedCode(code.into())
    }

    /// Wraps a raw model reply, removing code fences, a leading language tag
    /// and surrounding whitespace.
    pub fn from_llm_output(raw: &str) -> Self {
        GeneratedCode(strip_artifacts(raw).trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for GeneratedCode {
    fn from(code: String) -> Self {
        GeneratedCode(code)
    }
}

impl From<&str> for GeneratedCode {
    fn from(code: &str) -> Self {
        GeneratedCode(code.to_string())
    }
}

impl fmt::Display for GeneratedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)\r?\n?```").expect("valid regex")
    })
}

/// Removes markdown fences and a leading language tag line.
///
/// When the reply contains prose around a fenced block, the first fenced
/// block wins. Code without any artifact is returned untouched, whitespace
/// included.
pub fn strip_artifacts(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Some(caps) = fenced_block_regex().captures(trimmed) {
        if let Some(body) = caps.get(2) {
            return body.as_str().trim().to_string();
        }
    }

    let mut code = trimmed;
    let mut stripped = false;
    if code.starts_with("```") && code.ends_with("```") && code.len() >= 6 {
        code = code[3..code.len() - 3].trim();
        stripped = true;
    } else if let Some(rest) = code.strip_prefix("```") {
        code = rest.trim();
        stripped = true;
    }

    if let Some(first_line) = code.lines().next() {
        let tag = first_line.trim().to_ascii_lowercase();
        if LANGUAGE_TAGS.contains(&tag.as_str()) {
            code = code[first_line.len()..].trim_start_matches(['\r', '\n']);
            stripped = true;
        }
    }

    if !stripped {
        return raw.to_string();
    }
    code.trim().to_string()
}

/// Extracts the returned markup from a `const Component = () => (...)` style
/// wrapper. Source that already starts with markup is returned unchanged.
pub fn unwrap_component(code: &str) -> &str {
    let trimmed = code.trim();
    if trimmed.starts_with('<') || trimmed.is_empty() {
        return trimmed;
    }

    let start = ["return (", "return(", "=> (", "=>("]
        .iter()
        .filter_map(|needle| trimmed.find(needle).map(|i| i + needle.len() - 1))
        .min();

    if let Some(open) = start {
        if let Some(close) = matching_paren(trimmed, open) {
            let inner = trimmed[open + 1..close].trim();
            if inner.starts_with('<') {
                return inner;
            }
        }
    }

    // `return <div>...</div>;` without parentheses
    if let Some(lt) = trimmed.find('<') {
        if let Some(gt) = trimmed.rfind('>') {
            if gt > lt {
                return &trimmed[lt..=gt];
            }
        }
    }

    trimmed
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in s[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}
