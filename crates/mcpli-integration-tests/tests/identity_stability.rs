//! Identity stability and the wrapper's stale-definition guard.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use mcpli_core::identity::{DaemonIdentity, compute_id, derive_identity_env};
use mcpli_daemon::{DaemonError, OrchestratorMode, WrapperEnv};

fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn identity_is_stable_across_env_declaration_order() {
    let args = vec!["/tmp/server.js".to_string()];
    let cwd = Path::new("/project");

    let forward = DaemonIdentity::derive(
        "/usr/bin/node",
        &args,
        &env_of(&[("B", "2"), ("A", "1")]),
        cwd,
    )
    .unwrap();
    let reverse = DaemonIdentity::derive(
        "/usr/bin/node",
        &args,
        &env_of(&[("A", "1"), ("B", "2")]),
        cwd,
    )
    .unwrap();

    assert_eq!(forward.id, reverse.id);
    assert_eq!(forward.id.len(), 8);
    assert!(forward.id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn identity_distinguishes_command_args_and_env() {
    let cwd = Path::new("/project");
    let base = DaemonIdentity::derive("node", &["a.js".to_string()], &HashMap::new(), cwd)
        .unwrap()
        .id;

    let other_cmd = DaemonIdentity::derive("python3", &["a.js".to_string()], &HashMap::new(), cwd)
        .unwrap()
        .id;
    let other_args = DaemonIdentity::derive("node", &["b.js".to_string()], &HashMap::new(), cwd)
        .unwrap()
        .id;
    let other_env = DaemonIdentity::derive(
        "node",
        &["a.js".to_string()],
        &env_of(&[("K", "v")]),
        cwd,
    )
    .unwrap()
    .id;

    assert_ne!(base, other_cmd);
    assert_ne!(base, other_args);
    assert_ne!(base, other_env);
}

#[test]
fn compute_id_matches_full_derivation() {
    let cwd = Path::new("/project");
    let env = env_of(&[("A", "1")]);
    let identity =
        DaemonIdentity::derive("node", &["s.js".to_string()], &env, cwd).unwrap();

    let direct = compute_id(
        &identity.command,
        &identity.args,
        &derive_identity_env(&env),
    );
    assert_eq!(identity.id, direct);
}

#[test]
fn wrapper_rejects_mismatched_expected_id() {
    // A wrapper started with ID_EXPECTED that no longer matches its inputs
    // must fail before any socket work.
    let env = WrapperEnv {
        orchestrator: OrchestratorMode::Standalone,
        socket_env_key: "mcpli".to_string(),
        socket_path: "/tmp/mcpli/x/y.sock".into(),
        cwd: "/project".into(),
        inactivity_timeout: Duration::from_secs(1800),
        command: "node".to_string(),
        args: vec!["server.js".to_string()],
        server_env: env_of(&[("A", "1")]),
        expected_id: "deadbeef".to_string(),
    };

    let err = env.verify_identity().unwrap_err();
    match err {
        DaemonError::IdentityMismatch { expected, computed } => {
            assert_eq!(expected, "deadbeef");
            assert_ne!(computed, "deadbeef");
        },
        other => panic!("expected identity mismatch, got {other}"),
    }
}

#[test]
fn wrapper_accepts_matching_expected_id() {
    let server_env = env_of(&[("A", "1")]);
    let identity = DaemonIdentity::derive(
        "node",
        &["server.js".to_string()],
        &server_env,
        Path::new("/project"),
    )
    .unwrap();

    let env = WrapperEnv {
        orchestrator: OrchestratorMode::Launchd,
        socket_env_key: "mcpli".to_string(),
        socket_path: "/tmp/mcpli/x/y.sock".into(),
        cwd: "/project".into(),
        inactivity_timeout: Duration::from_secs(1800),
        command: "node".to_string(),
        args: vec!["server.js".to_string()],
        server_env,
        expected_id: identity.id.clone(),
    };

    assert_eq!(env.verify_identity().unwrap().id, identity.id);
}
