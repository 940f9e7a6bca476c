//! The primary invocation path: ensure the daemon, then call a tool.

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mcpli_core::DiagnosticConfig;
use mcpli_core::identity::DaemonIdentity;
use mcpli_core::timeout::{TimeoutConfig, TimeoutOverrides};
use mcpli_ipc::{ConnectBudget, IpcClient, IpcMethod, IpcRequest};
use mcpli_launchd::{EnsureOptions, EnsureOutcome};

use crate::commands::{GlobalFlags, current_scope, system_engine};
use crate::error::{CliError, CliResult};
use crate::invocation::{ServerSpec, ToolInvocation, split_invocation};
use crate::output;

/// Execute `mcpli <tool> [...] -- [KEY=VAL ...] <command> [args...]`.
///
/// Without a tool name the daemon's tool list is rendered instead.
pub(crate) async fn run_tool(tokens: &[String], flags: GlobalFlags) -> CliResult<()> {
    let (left, right) = split_invocation(tokens)?;
    let invocation = ToolInvocation::parse(left)?;
    let spec = ServerSpec::parse(right)?;

    let (outcome, timeouts) = ensure_daemon(&spec, flags, false).await?;

    let budget = if outcome.update_action.reloaded() || outcome.started {
        ConnectBudget::after_reload()
    } else {
        ConnectBudget::standard()
    };
    let client = IpcClient::new(&outcome.socket_path).with_connect_budget(budget);

    match invocation.tool {
        None => list_tools(&client, &timeouts, flags).await,
        Some(tool) => call_tool(&client, &timeouts, flags, &tool, invocation.arguments).await,
    }
}

/// Run ensure for a server spec; shared with `daemon start`/`restart`.
pub(crate) async fn ensure_daemon(
    spec: &ServerSpec,
    flags: GlobalFlags,
    prefer_immediate_start: bool,
) -> CliResult<(EnsureOutcome, TimeoutConfig)> {
    let scope = current_scope()?;
    let identity = DaemonIdentity::derive(&spec.command, &spec.args, &spec.env, scope.cwd())?;

    // Diagnostics are written before ensure so a freshly activated wrapper
    // already sees the requested verbosity.
    let diagnostics = DiagnosticConfig {
        debug: flags.debug,
        logs: false,
        verbose: flags.verbose,
        quiet: flags.quiet,
    };
    diagnostics.write(&scope.diagnostic_path(&identity.id)?)?;

    let overrides = TimeoutOverrides {
        inactivity: flags.inactivity(),
        tool: flags.tool(),
        ipc: None,
        connect_retry_budget: None,
    };
    let timeouts = TimeoutConfig::resolve(&overrides);

    let engine = system_engine(scope)?;
    let outcome = engine
        .ensure(
            &identity,
            &EnsureOptions {
                prefer_immediate_start,
                inactivity_timeout: overrides.inactivity,
            },
        )
        .await?;

    debug!(id = outcome.id, action = ?outcome.update_action, "daemon ensured");
    Ok((outcome, timeouts))
}

async fn list_tools(
    client: &IpcClient,
    timeouts: &TimeoutConfig,
    flags: GlobalFlags,
) -> CliResult<()> {
    let request = IpcRequest::new(IpcMethod::ListTools, None);
    let response = client
        .request(&request, timeouts.list_tools_ipc_timeout())
        .await?;

    if let Some(error) = response.error {
        return Err(CliError::Ipc(mcpli_ipc::IpcError::Daemon(error)));
    }
    let result = response.result.unwrap_or(Value::Null);

    if flags.raw {
        println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
        return Ok(());
    }

    let Some(tools) = result.get("tools").and_then(Value::as_array) else {
        println!("{}", output::warning("server exposes no tools"));
        return Ok(());
    };

    println!("{}", output::header("Available tools"));
    for tool in tools {
        let name = tool.get("name").and_then(Value::as_str).unwrap_or("?");
        match tool.get("description").and_then(Value::as_str) {
            Some(description) => println!("  {name}  {description}"),
            None => println!("  {name}"),
        }
    }
    Ok(())
}

async fn call_tool(
    client: &IpcClient,
    timeouts: &TimeoutConfig,
    flags: GlobalFlags,
    tool: &str,
    arguments: serde_json::Map<String, Value>,
) -> CliResult<()> {
    let params = json!({
        "name": tool,
        "arguments": if arguments.is_empty() { Value::Null } else { Value::Object(arguments) },
    });
    let request = IpcRequest::new(IpcMethod::CallTool, Some(params));

    // Ctrl-C mid-call turns into a cancelCall on a secondary connection.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let response = client
        .request_with_cancel(&request, timeouts.call_tool_ipc_timeout(), &cancel)
        .await?;

    if let Some(error) = response.error {
        return Err(CliError::Ipc(mcpli_ipc::IpcError::Daemon(error)));
    }
    let result = response.result.unwrap_or(Value::Null);

    if flags.raw {
        println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    } else {
        let text = output::tool_result_text(&result);
        if !text.is_empty() {
            println!("{text}");
        }
    }

    // MCP tool-level failures surface with their own exit code, message
    // preserved verbatim.
    if output::tool_result_is_error(&result) {
        return Err(CliError::Tool(output::tool_result_text(&result)));
    }
    Ok(())
}
