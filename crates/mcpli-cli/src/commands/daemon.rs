//! Daemon management commands (start, stop, restart, status, clean, logs).

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use tracing::debug;

use mcpli_core::Scope;
use mcpli_core::fs::safe_unlink;
use mcpli_core::identity::DaemonIdentity;
use mcpli_launchd::LaunchctlDriver;

use crate::commands::{GlobalFlags, current_scope};
use crate::error::{CliError, CliResult};
use crate::invocation::ServerSpec;
use crate::output;

/// Gap between stop and start during a restart.
const RESTART_DELAY: Duration = Duration::from_millis(300);

/// Absolute path of the macOS unified log tool.
const LOG_TOOL: &str = "/usr/bin/log";

/// Run the daemon wrapper in the foreground (invoked by launchd).
pub(crate) async fn daemon_run() -> CliResult<()> {
    mcpli_daemon::run().await?;
    Ok(())
}

/// `daemon start`: ensure with an immediate kickstart.
pub(crate) async fn daemon_start(server: &[String], flags: GlobalFlags) -> CliResult<()> {
    let spec = parse_server_tokens(server)?;
    let (outcome, _) = crate::commands::run::ensure_daemon(&spec, flags, true).await?;

    let state = if outcome.started {
        format!("started (pid {})", outcome.pid.unwrap_or(-1))
    } else {
        "ready (starts on first request)".to_string()
    };
    println!(
        "{}",
        output::success(&format!("daemon {} {state}", outcome.id))
    );
    if flags.verbose {
        println!("  label:  {}", outcome.label);
        println!("  socket: {}", outcome.socket_path.display());
    }
    Ok(())
}

/// `daemon stop [id]`: bootout and remove artifacts for one or all daemons.
pub(crate) async fn daemon_stop(id: Option<&str>, _flags: GlobalFlags) -> CliResult<()> {
    let scope = current_scope()?;
    let driver = LaunchctlDriver::system();

    let ids = match id {
        Some(id) => vec![id.to_string()],
        None => discover_ids(&scope),
    };
    if ids.is_empty() {
        println!("{}", output::warning("no daemons found for this directory"));
        return Ok(());
    }

    for id in &ids {
        stop_one(&scope, &driver, id).await?;
        println!("{}", output::success(&format!("daemon {id} stopped")));
    }
    Ok(())
}

/// `daemon restart`: stop the matching daemon, wait, start it again.
pub(crate) async fn daemon_restart(server: &[String], flags: GlobalFlags) -> CliResult<()> {
    let spec = parse_server_tokens(server)?;
    let scope = current_scope()?;
    let identity = DaemonIdentity::derive(&spec.command, &spec.args, &spec.env, scope.cwd())?;

    let driver = LaunchctlDriver::system();
    stop_one(&scope, &driver, &identity.id).await?;

    tokio::time::sleep(RESTART_DELAY).await;

    daemon_start(server, flags).await
}

/// `daemon status`: one row per service definition under this directory.
pub(crate) async fn daemon_status(_flags: GlobalFlags) -> CliResult<()> {
    let scope = current_scope()?;
    let driver = LaunchctlDriver::system();

    let ids = discover_ids(&scope);
    if ids.is_empty() {
        println!("{}", output::warning("no daemons found for this directory"));
        return Ok(());
    }

    println!("{}", output::header("mcpli daemons"));
    for id in &ids {
        let label = scope.label(id)?;
        let socket_path = scope.socket_path(id)?;
        let loaded = driver.is_loaded(&label).await;
        let state = driver.running_state(&label).await;

        let status = if state.running {
            format!("running (pid {})", state.pid.unwrap_or(-1))
                .green()
                .to_string()
        } else if loaded {
            "loaded".yellow().to_string()
        } else {
            "not loaded".red().to_string()
        };

        println!("  {id}  {status}");
        println!("     label:  {label}");
        println!("     socket: {}", socket_path.display());
    }
    Ok(())
}

/// `daemon clean`: stop everything and remove all artifacts.
pub(crate) async fn daemon_clean(_flags: GlobalFlags) -> CliResult<()> {
    let scope = current_scope()?;
    let driver = LaunchctlDriver::system();

    for id in discover_ids(&scope) {
        stop_one(&scope, &driver, &id).await?;
    }

    remove_dir_if_present(&scope.socket_dir())?;
    remove_dir_if_present(&scope.plist_dir())?;

    println!("{}", output::success("cleaned mcpli state for this directory"));
    Ok(())
}

/// `daemon logs`: follow the OS log for this directory's daemons.
pub(crate) async fn daemon_logs(id: Option<&str>, _flags: GlobalFlags) -> CliResult<()> {
    let scope = current_scope()?;
    stream_os_log(&scope, id, true, None).await
}

/// `daemon log`: show a non-interactive window of the OS log.
pub(crate) async fn daemon_log(
    id: Option<&str>,
    last: Option<&str>,
    _flags: GlobalFlags,
) -> CliResult<()> {
    let scope = current_scope()?;
    stream_os_log(&scope, id, false, Some(last.unwrap_or("10m"))).await
}

/// Stop one daemon: bootout, then remove plist, socket, and diagnostics.
async fn stop_one(scope: &Scope, driver: &LaunchctlDriver, id: &str) -> CliResult<()> {
    let label = scope.label(id)?;
    driver.bootout(&label).await;

    safe_unlink(&scope.plist_path(id)?)?;
    safe_unlink(&scope.socket_path(id)?)?;
    safe_unlink(&scope.diagnostic_path(id)?)?;

    debug!(id, label, "daemon artifacts removed");
    Ok(())
}

/// Discover daemon ids from the plist directory, filtered to this cwd's
/// label namespace and valid id suffixes.
fn discover_ids(scope: &Scope) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(scope.plist_dir()) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let label = name.strip_suffix(".plist")?;
            scope.id_from_label(label)
        })
        .collect();
    ids.sort();
    ids
}

/// `daemon start`/`restart` receive the server spec as trailing tokens,
/// with or without the leading `--` clap already consumed.
fn parse_server_tokens(tokens: &[String]) -> CliResult<ServerSpec> {
    let tokens = match tokens.first() {
        Some(first) if first == "--" => &tokens[1..],
        _ => tokens,
    };
    ServerSpec::parse(tokens)
}

fn remove_dir_if_present(path: &Path) -> CliResult<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CliError::Core(mcpli_core::CoreError::io(path, e))),
    }
}

/// Invoke the macOS unified log tool with a predicate scoped to this
/// directory's daemons (or one specific id).
async fn stream_os_log(
    scope: &Scope,
    id: Option<&str>,
    follow: bool,
    last: Option<&str>,
) -> CliResult<()> {
    if !Path::new(LOG_TOOL).exists() {
        println!(
            "{}",
            output::warning("OS log streaming requires the macOS `log` tool")
        );
        return Ok(());
    }

    let filter = match id {
        Some(id) => scope.label(id)?,
        None => scope.label_prefix(),
    };
    let predicate = format!("process == \"mcpli\" AND eventMessage CONTAINS \"{filter}\"");

    let mut cmd = tokio::process::Command::new(LOG_TOOL);
    if follow {
        cmd.args(["stream", "--style", "compact", "--predicate", &predicate]);
    } else {
        cmd.args([
            "show",
            "--style",
            "compact",
            "--last",
            last.unwrap_or("10m"),
            "--predicate",
            &predicate,
        ]);
    }

    let status = cmd
        .status()
        .await
        .map_err(|e| CliError::Usage(format!("failed to run {LOG_TOOL}: {e}")))?;
    if !status.success() {
        return Err(CliError::Usage(format!(
            "{LOG_TOOL} exited with {}",
            status.code().unwrap_or(-1)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_tokens_tolerate_leading_separator() {
        let with = ["--", "node", "server.js"].map(String::from);
        let without = ["node", "server.js"].map(String::from);
        assert_eq!(
            parse_server_tokens(&with).unwrap(),
            parse_server_tokens(&without).unwrap()
        );
    }

    #[test]
    fn discover_ids_filters_foreign_labels() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::with_runtime_base(dir.path().join("p"), dir.path().join("t")).unwrap();
        std::fs::create_dir_all(scope.plist_dir()).unwrap();

        let mine = scope.label("cafe0123").unwrap();
        std::fs::write(
            scope.plist_dir().join(format!("{mine}.plist")),
            b"<plist/>",
        )
        .unwrap();
        // Foreign namespace and junk suffix must both be ignored.
        std::fs::write(
            scope.plist_dir().join("com.other.app.plist"),
            b"<plist/>",
        )
        .unwrap();
        std::fs::write(scope.plist_dir().join("README.md"), b"#").unwrap();

        assert_eq!(discover_ids(&scope), vec!["cafe0123".to_string()]);
    }
}
