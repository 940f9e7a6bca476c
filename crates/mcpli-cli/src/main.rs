//! mcpli - MCP servers as persistent command-line tools.
//!
//! The CLI is a thin client: every invocation reconciles the daemon's
//! service definition (ensure), connects to its Unix socket, sends one
//! framed request, and renders the result. launchd owns the socket and
//! spawns the daemon lazily on first connection.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod invocation;
mod output;

use commands::{GlobalFlags, daemon, run};
use error::{CliError, CliResult};

/// mcpli - run MCP server tools as first-class CLI commands
#[derive(Parser)]
#[command(name = "mcpli")]
#[command(author, version, about, long_about = None)]
#[command(override_usage = "mcpli [OPTIONS] <tool> [tool-args...] -- [KEY=VAL ...] <command> [args...]\n       mcpli daemon <COMMAND>")]
struct Cli {
    /// Print raw JSON results
    #[arg(long, global = true)]
    raw: bool,

    /// Enable daemon debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Verbose output
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Daemon inactivity timeout in seconds
    #[arg(long, global = true, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Per-tool-call timeout in seconds
    #[arg(long = "tool-timeout", global = true, value_name = "SECONDS")]
    tool_timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage background daemons for this directory
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Run the daemon wrapper in the foreground (invoked by launchd)
    #[command(hide = true)]
    Run,

    /// Load the service definition and start the daemon now
    Start {
        /// Server spec: [KEY=VAL ...] <command> [args...]
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        server: Vec<String>,
    },

    /// Stop one daemon by id, or all daemons for this directory
    Stop {
        /// Daemon id (8 hex chars); omit to stop all
        id: Option<String>,
    },

    /// Restart the daemon for a server spec
    Restart {
        /// Server spec: [KEY=VAL ...] <command> [args...]
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        server: Vec<String>,
    },

    /// Show daemon status for this directory
    Status,

    /// Stop everything and remove all mcpli state for this directory
    Clean,

    /// Follow daemon logs (interactive)
    Logs {
        /// Restrict to one daemon id
        #[arg(long)]
        id: Option<String>,
    },

    /// Show a window of daemon logs
    Log {
        /// Restrict to one daemon id
        #[arg(long)]
        id: Option<String>,

        /// Window to show (e.g. 10m, 1h)
        #[arg(long, default_value = "10m")]
        last: String,
    },
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let code = match dispatch(&args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", output::error(&e.to_string()));
            e.exit_code()
        },
    };
    std::process::exit(code);
}

fn dispatch(args: &[String]) -> CliResult<()> {
    // The freeform tool invocation cannot round-trip through clap: clap
    // consumes the first `--`, which is the tool/server separator. Route
    // tool calls through a manual parse and keep clap for everything else.
    if is_tool_call(args) {
        let (flags, rest) = extract_global_flags(args)?;
        init_client_tracing(flags.debug);
        return runtime()?.block_on(run::run_tool(&rest, flags));
    }

    let cli = Cli::parse_from(std::iter::once("mcpli".to_string()).chain(args.iter().cloned()));
    let flags = GlobalFlags {
        raw: cli.raw,
        debug: cli.debug,
        verbose: cli.verbose,
        quiet: cli.quiet,
        timeout: cli.timeout,
        tool_timeout: cli.tool_timeout,
    };

    match cli.command {
        None => {
            // Plain `mcpli`: nothing to do but point at the usage.
            Err(CliError::Usage(
                "nothing to run; see `mcpli --help`".to_string(),
            ))
        },
        Some(Commands::Daemon { command }) => {
            let rt = runtime()?;
            match command {
                DaemonCommands::Run => {
                    init_daemon_tracing();
                    install_panic_hook();
                    rt.block_on(daemon::daemon_run())
                },
                DaemonCommands::Start { server } => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_start(&server, flags))
                },
                DaemonCommands::Stop { id } => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_stop(id.as_deref(), flags))
                },
                DaemonCommands::Restart { server } => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_restart(&server, flags))
                },
                DaemonCommands::Status => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_status(flags))
                },
                DaemonCommands::Clean => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_clean(flags))
                },
                DaemonCommands::Logs { id } => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_logs(id.as_deref(), flags))
                },
                DaemonCommands::Log { id, last } => {
                    init_client_tracing(flags.debug);
                    rt.block_on(daemon::daemon_log(id.as_deref(), Some(&last), flags))
                },
            }
        },
    }
}

/// A tool call is anything with a `--` separator, or a first positional
/// that is not the `daemon` subcommand, unless the user asked for
/// help/version, which clap should render.
fn is_tool_call(args: &[String]) -> bool {
    if args
        .iter()
        .any(|a| a == "--help" || a == "-h" || a == "--version" || a == "-V")
    {
        return false;
    }
    if args.iter().any(|a| a == "--") {
        return true;
    }
    matches!(
        args.iter().find(|a| !a.starts_with('-')),
        Some(first) if first != "daemon"
    )
}

/// Pull recognized global flags off the front of a tool invocation.
///
/// Flags after the tool name deliberately stay in the invocation: they are
/// tool arguments there.
fn extract_global_flags(args: &[String]) -> CliResult<(GlobalFlags, Vec<String>)> {
    let mut flags = GlobalFlags::default();
    let mut index = 0;

    while let Some(token) = args.get(index) {
        match token.as_str() {
            "--raw" => flags.raw = true,
            "--debug" => flags.debug = true,
            "--verbose" => flags.verbose = true,
            "--quiet" => flags.quiet = true,
            "--timeout" => {
                index = index.saturating_add(1);
                flags.timeout = Some(parse_seconds("--timeout", args.get(index))?);
            },
            "--tool-timeout" => {
                index = index.saturating_add(1);
                flags.tool_timeout = Some(parse_seconds("--tool-timeout", args.get(index))?);
            },
            token if token.starts_with("--timeout=") => {
                let value = token.split_once('=').map(|(_, v)| v.to_string());
                flags.timeout = Some(parse_seconds("--timeout", value.as_ref())?);
            },
            token if token.starts_with("--tool-timeout=") => {
                let value = token.split_once('=').map(|(_, v)| v.to_string());
                flags.tool_timeout = Some(parse_seconds("--tool-timeout", value.as_ref())?);
            },
            _ => break,
        }
        index = index.saturating_add(1);
    }

    Ok((flags, args[index..].to_vec()))
}

fn parse_seconds(flag: &str, value: Option<&String>) -> CliResult<u64> {
    let value =
        value.ok_or_else(|| CliError::Usage(format!("{flag} requires a value in seconds")))?;
    value
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| CliError::Usage(format!("{flag} must be a positive number of seconds")))
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Other(anyhow::anyhow!("failed to start runtime: {e}")))
}

/// Client-side tracing: quiet by default, `MCPLI_LOG` or `--debug` raise it.
fn init_client_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("MCPLI_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Daemon-side tracing: level follows the diagnostic config written by the
/// client before ensure; stderr flows to the OS log by inheritance.
fn init_daemon_tracing() {
    let diagnostics = daemon_diagnostics();
    let default = if diagnostics.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("MCPLI_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Locate this daemon's diagnostic config from the reserved environment.
fn daemon_diagnostics() -> mcpli_core::DiagnosticConfig {
    let cwd = std::env::var(mcpli_core::env::ENV_CWD).ok();
    let id = std::env::var(mcpli_core::env::ENV_ID_EXPECTED).ok();
    if let (Some(cwd), Some(id)) = (cwd, id) {
        if let Ok(scope) = mcpli_core::Scope::new(cwd) {
            if let Ok(path) = scope.diagnostic_path(&id) {
                return mcpli_core::DiagnosticConfig::read_or_default(&path);
            }
        }
    }
    mcpli_core::DiagnosticConfig::default()
}

/// Panics anywhere in the wrapper are logged before the process dies so
/// the OS log has a trace of why the daemon went away.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "daemon panicked; shutting down");
        default_hook(info);
    }));
}
