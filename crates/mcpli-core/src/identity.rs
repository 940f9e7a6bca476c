//! Daemon identity derivation.
//!
//! A daemon is dedicated to one (command, args, env) tuple. The identity id
//! is the first 8 hex characters of SHA-256 over the canonical JSON encoding
//! `[command, ...args, {"env": env}]` of the *normalized* inputs, so the same
//! logical server always maps to the same daemon regardless of argument
//! spacing or env declaration order.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Maximum accepted identifier length.
pub const MAX_ID_LEN: usize = 64;

/// A fully normalized daemon identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonIdentity {
    /// Normalized command (absolute if path-like, bare name otherwise).
    pub command: String,
    /// Normalized arguments (trimmed, empties dropped, order preserved).
    pub args: Vec<String>,
    /// Identity environment in sorted-key order.
    pub env: BTreeMap<String, String>,
    /// Stable 8-hex identifier.
    pub id: String,
}

impl DaemonIdentity {
    /// Derive an identity from raw inputs.
    ///
    /// `env` must be the *explicitly provided* server environment; the
    /// ambient process environment is never consulted (identity must not
    /// depend on the caller's shell state).
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty after trimming.
    pub fn derive(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> CoreResult<Self> {
        let (command, args) = normalize_command(command, args, cwd)?;
        let env = derive_identity_env(env);
        let id = compute_id(&command, &args, &env);
        Ok(Self {
            command,
            args,
            env,
            id,
        })
    }
}

/// Normalize a server command and its arguments.
///
/// Path-like commands (containing a separator, starting with `.`, or already
/// absolute) are resolved to an absolute, lexically normalized path against
/// `cwd`. Bare executable names (`node`, `python3`) are kept as-is so PATH
/// resolution stays deferred to spawn time. Arguments are trimmed and empty
/// strings dropped; order is preserved.
///
/// # Errors
///
/// Returns an error if the command is empty after trimming.
pub fn normalize_command(
    command: &str,
    args: &[String],
    cwd: &Path,
) -> CoreResult<(String, Vec<String>)> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("command must not be empty".into()));
    }

    let command = if is_path_like(trimmed) {
        let absolute = if Path::new(trimmed).is_absolute() {
            PathBuf::from(trimmed)
        } else {
            cwd.join(trimmed)
        };
        let normalized = lexical_normalize(&absolute);
        platform_path_string(&normalized)
    } else {
        trimmed.to_string()
    };

    let args = args
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(ToString::to_string)
        .collect();

    Ok((command, args))
}

/// Normalize an environment mapping into sorted-key order.
///
/// On case-insensitive platforms (Windows semantics) keys are uppercased so
/// `Path` and `PATH` collapse to one identity input; elsewhere case is
/// preserved.
#[must_use]
pub fn normalize_env(env: &HashMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            #[cfg(windows)]
            let key = k.to_uppercase();
            #[cfg(not(windows))]
            let key = k.clone();
            (key, v.clone())
        })
        .collect()
}

/// Derive the identity environment from explicitly provided variables.
///
/// Only the explicit mapping participates; the ambient process environment
/// is deliberately excluded.
#[must_use]
pub fn derive_identity_env(explicit: &HashMap<String, String>) -> BTreeMap<String, String> {
    normalize_env(explicit)
}

/// Compute the stable 8-hex daemon id over normalized inputs.
///
/// The digest input is the canonical JSON array
/// `[command, ...args, {"env": env}]` with env keys in sorted order
/// (guaranteed by `BTreeMap` iteration).
#[must_use]
pub fn compute_id(command: &str, args: &[String], env: &BTreeMap<String, String>) -> String {
    let mut canonical: Vec<serde_json::Value> = Vec::with_capacity(args.len().saturating_add(2));
    canonical.push(serde_json::Value::String(command.to_string()));
    canonical.extend(args.iter().map(|a| serde_json::Value::String(a.clone())));

    let env_value = serde_json::Value::Object(
        env.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    );
    let mut wrapper = serde_json::Map::new();
    wrapper.insert("env".to_string(), env_value);
    canonical.push(serde_json::Value::Object(wrapper));

    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(8);
    hex
}

/// Validate an identifier before it participates in path construction.
///
/// Accepts `^[A-Za-z0-9_-]{1,64}$` and nothing else; in particular no path
/// separators, so a validated id can never escape its base directory.
///
/// # Errors
///
/// Returns [`CoreError::InvalidId`] if the id is empty, too long, or
/// contains a character outside the accepted set.
pub fn validate_id(id: &str) -> CoreResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(CoreError::InvalidId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Whether a command string refers to a path rather than a bare executable.
fn is_path_like(command: &str) -> bool {
    command.contains('/')
        || command.starts_with('.')
        || Path::new(command).is_absolute()
        || (cfg!(windows) && command.contains('\\'))
}

/// Lexically normalize a path: collapse `.` and resolve `..` without
/// touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            },
            other => out.push(other),
        }
    }
    out
}

/// Render a normalized path as the identity string.
fn platform_path_string(path: &Path) -> String {
    let s = path.display().to_string();
    #[cfg(windows)]
    let s = s.to_lowercase();
    s
}
