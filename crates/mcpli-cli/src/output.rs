//! Terminal output helpers.

use colored::Colorize;
use serde_json::Value;

/// Render a success marker line.
#[must_use]
pub fn success(message: &str) -> String {
    format!("{} {message}", "✓".green())
}

/// Render a warning line.
#[must_use]
pub fn warning(message: &str) -> String {
    format!("{} {message}", "!".yellow())
}

/// Render an error line.
#[must_use]
pub fn error(message: &str) -> String {
    format!("{} {message}", "✗".red())
}

/// Render a section header.
#[must_use]
pub fn header(title: &str) -> String {
    title.bold().cyan().to_string()
}

/// Extract the human-readable text of a `callTool` result.
///
/// MCP results carry a `content` array; text items are concatenated in
/// order. Non-text content falls back to its JSON rendering.
#[must_use]
pub fn tool_result_text(result: &Value) -> String {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return serde_json::to_string_pretty(result).unwrap_or_default();
    };

    let mut out = String::new();
    for item in content {
        if let Some(text) = item.get("text").and_then(Value::as_str) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&serde_json::to_string(item).unwrap_or_default());
        }
    }
    out
}

/// Whether a `callTool` result is flagged as a tool-level error.
#[must_use]
pub fn tool_result_is_error(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
