//! Parsing of the freeform invocation tail.
//!
//! The primary surface is
//! `mcpli <tool> [--key value ...] -- [KEY=VAL ...] <command> [args...]`:
//! everything left of `--` addresses a tool on the daemon, everything right
//! of it identifies the MCP server (and with it, the daemon).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{CliError, CliResult};

/// The server half of an invocation: explicit env, command, args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    /// Explicit environment (identity-relevant).
    pub env: HashMap<String, String>,
    /// Server command.
    pub command: String,
    /// Server arguments.
    pub args: Vec<String>,
}

impl ServerSpec {
    /// Parse the tokens right of `--`: leading `KEY=VAL` pairs, then the
    /// command, then its arguments.
    ///
    /// # Errors
    ///
    /// Returns a usage error if no command remains after the env pairs.
    pub fn parse(tokens: &[String]) -> CliResult<Self> {
        let mut env = HashMap::new();
        let mut rest = tokens;

        while let Some(token) = rest.first() {
            let Some((key, value)) = split_env_pair(token) else {
                break;
            };
            env.insert(key.to_string(), value.to_string());
            rest = &rest[1..];
        }

        let Some((command, args)) = rest.split_first() else {
            return Err(CliError::Usage(
                "missing server command after `--` (expected: -- [KEY=VAL ...] <command> [args...])"
                    .to_string(),
            ));
        };

        Ok(Self {
            env,
            command: command.clone(),
            args: args.to_vec(),
        })
    }
}

/// The tool half of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Tool name; `None` means "list the available tools".
    pub tool: Option<String>,
    /// Tool arguments assembled from `--key value` flags.
    pub arguments: serde_json::Map<String, Value>,
}

impl ToolInvocation {
    /// Parse the tokens left of `--`.
    ///
    /// `--key value` and `--key=value` become arguments; a flag without a
    /// value becomes `true`. Values parse as JSON when they look like it
    /// (numbers, booleans, null, arrays, objects) and fall back to strings.
    ///
    /// # Errors
    ///
    /// Returns a usage error on a positional token after the tool name.
    pub fn parse(tokens: &[String]) -> CliResult<Self> {
        let mut tool = None;
        let mut arguments = serde_json::Map::new();
        let mut iter = tokens.iter().peekable();

        while let Some(token) = iter.next() {
            if let Some(flag) = token.strip_prefix("--") {
                if let Some((key, value)) = flag.split_once('=') {
                    arguments.insert(kebab_to_snake(key), parse_value(value));
                } else if iter
                    .peek()
                    .is_some_and(|next| !next.starts_with("--"))
                {
                    let value = iter.next().map(String::as_str).unwrap_or_default();
                    arguments.insert(kebab_to_snake(flag), parse_value(value));
                } else {
                    arguments.insert(kebab_to_snake(flag), Value::Bool(true));
                }
            } else if tool.is_none() {
                tool = Some(token.clone());
            } else {
                return Err(CliError::Usage(format!(
                    "unexpected positional argument: {token}"
                )));
            }
        }

        Ok(Self { tool, arguments })
    }
}

/// Split the full invocation tail at the first `--`.
///
/// # Errors
///
/// Returns a usage error when the separator is missing, since the server spec
/// is mandatory because it is the daemon's identity.
pub fn split_invocation(tokens: &[String]) -> CliResult<(&[String], &[String])> {
    let Some(pos) = tokens.iter().position(|t| t == "--") else {
        return Err(CliError::Usage(
            "missing `--` separator (expected: <tool> [args...] -- <command> [args...])"
                .to_string(),
        ));
    };
    let right_start = pos.saturating_add(1);
    Ok((&tokens[..pos], &tokens[right_start..]))
}

/// Recognize `KEY=VAL` env pairs (`KEY` must look like an env var name).
fn split_env_pair(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let mut chars = key.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value))
}

/// MCP tool parameters are snake_case; CLI flags are kebab-case.
fn kebab_to_snake(key: &str) -> String {
    key.replace('-', "_")
}

/// Interpret a flag value: JSON when it parses, string otherwise.
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null | Value::Array(_)
        | Value::Object(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}
