//! Integration tests for the mcpli workspace.
//!
//! The crate body is empty; everything lives under `tests/`.
