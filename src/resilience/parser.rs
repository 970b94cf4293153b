//! Structured output extraction
//!
//! Model output asked to be JSON routinely arrives wrapped in prose, in
//! markdown fences, or behind a `<think>` block. This module recovers the
//! first complete JSON object from such text using a single pass
//! bracket-matching scan that ignores braces inside string literals.

use crate::errors::{ResearchError, Result};
use serde::de::DeserializeOwned;

/// Maximum input size scanned for JSON (1MB)
pub const MAX_INPUT_SIZE: usize = 1_048_576;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Remove `<think>...</think>` blocks emitted by reasoning models.
/// An unterminated block swallows the rest of the text.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + THINK_OPEN.len()..];
        match after_open.find(THINK_CLOSE) {
            Some(end) => rest = &after_open[end + THINK_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Extract the body of the first markdown code fence, if any.
/// Accepts both ```` ```json ```` and bare ```` ``` ```` fences.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // Skip the info string (e.g. "json") up to the end of the line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Find the first complete top-level JSON object in `text`.
///
/// Returns byte offsets `(start, end)` inclusive, or `None` when no
/// balanced object exists.
fn find_json_object(text: &str) -> Option<(usize, usize)> {
    let mut depth: i32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if start.is_some() => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some((s, i));
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract a JSON object string from raw model output
pub fn extract_json(raw: &str) -> Result<String> {
    if raw.len() > MAX_INPUT_SIZE {
        return Err(ResearchError::StructuredOutput(format!(
            "Response too large: {} bytes exceeds maximum {}",
            raw.len(),
            MAX_INPUT_SIZE
        )));
    }

    let cleaned = strip_think_blocks(raw);
    if cleaned.is_empty() {
        return Err(ResearchError::StructuredOutput("Empty response".to_string()));
    }

    // Prefer a fenced block when it holds an object
    let candidate = match fenced_block(&cleaned) {
        Some(body) if body.contains('{') => body,
        _ => cleaned.as_str(),
    };

    match find_json_object(candidate) {
        Some((start, end)) => Ok(candidate[start..=end].to_string()),
        None => Err(ResearchError::StructuredOutput(format!(
            "No JSON object found in response: {}",
            preview(&cleaned)
        ))),
    }
}

/// Extract and deserialize a structured response
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let json = extract_json(raw)?;
    serde_json::from_str(&json).map_err(|e| {
        ResearchError::StructuredOutput(format!("Response does not match schema: {}", e))
    })
}

fn preview(text: &str) -> String {
    crate::types::messages::clip(text, 80)
}
