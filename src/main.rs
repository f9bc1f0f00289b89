use anyhow::Context;
use clap::Parser;

use warden::cli::{Cli, Commands, SocketCommands};
use warden::config::{self, AppConfig};
use warden::error::LaunchError;
use warden::orchestration::{advertise_registry, spawn_with_debug_socket, stop_all_commands};
use warden::sockets::{EntryState, SocketRegistry};
use warden::tracker::{
    OutputChannels, ProcessTracker, SpawnSpec, StateLayout, StdioMode, TerminationReason,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli)?;
    tracing::debug!(
        workspace = %config.workspace.display(),
        state_dir = %config.state_dir.display(),
        "Config loaded"
    );

    match cli.command {
        Commands::Run {
            code,
            detach,
            debug,
            forbid_env,
            command,
        } => run_command(&config, code, detach, debug, forbid_env, command).await,
        Commands::Stop { code } => {
            let tracker = build_tracker(&config, OutputChannels::default())?;
            let outcome = tracker.stop_process(&code).await?;
            println!("{code}: {outcome:?}");
            Ok(())
        }
        Commands::StopAll => {
            let tracker = build_tracker(&config, OutputChannels::default())?;
            let report = stop_all_commands(&tracker).await?;
            if report.results.is_empty() {
                println!("Nothing running.");
            }
            for (code, result) in &report.results {
                match result {
                    Ok(outcome) => println!("{code}: {outcome:?}"),
                    Err(e) => println!("{code}: failed: {e}"),
                }
            }
            if !report.all_stopped() {
                anyhow::bail!("Some commands did not stop");
            }
            Ok(())
        }
        Commands::List => {
            let tracker = build_tracker(&config, OutputChannels::default())?;
            for code in tracker.list_running_codes().await? {
                let pid = tracker.get_running_pid(&code).await?;
                match pid {
                    Some(pid) => println!("{code}\t{pid}"),
                    // Exited between listing and lookup.
                    None => continue,
                }
            }
            Ok(())
        }
        Commands::Status { code } => {
            let tracker = build_tracker(&config, OutputChannels::default())?;
            let pid = tracker.get_running_pid(&code).await?;
            let reason = tracker.termination_reason(&code).await?;
            match pid {
                Some(pid) => println!("{code}: running (pid {pid})"),
                None => println!("{code}: not running"),
            }
            if reason != TerminationReason::None {
                println!("last termination: {reason}");
            }
            Ok(())
        }
        Commands::ClearReason { code, all } => {
            let tracker = build_tracker(&config, OutputChannels::default())?;
            if all {
                let cleared = tracker.clear_all_termination_reasons().await?;
                println!("Cleared {cleared} termination reason(s).");
            } else if let Some(code) = code {
                tracker.clear_termination_reason(&code).await?;
            }
            Ok(())
        }
        Commands::Sockets { action } => sockets_command(&config, action).await,
    }
}

fn build_tracker(config: &AppConfig, outputs: OutputChannels) -> anyhow::Result<ProcessTracker> {
    let layout = StateLayout::for_workspace(&config.state_dir, &config.workspace)
        .with_context(|| format!("Failed to resolve workspace {}", config.workspace.display()))?;
    tracing::debug!(namespace = layout.namespace(), root = %layout.root().display(), "State layout");
    Ok(ProcessTracker::builder(layout)
        .settings(config.tracker_settings())
        .outputs(outputs)
        .build())
}

async fn run_command(
    config: &AppConfig,
    code: String,
    detach: bool,
    debug: bool,
    forbid_env: Vec<String>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let outputs = if detach {
        OutputChannels::in_memory(config.output_capacity)
    } else {
        OutputChannels::console()
    };
    let tracker = build_tracker(config, outputs)?;

    let mut parts = command.into_iter();
    let program = parts.next().context("No program given")?;
    let mut spec = SpawnSpec::new(code.clone(), program)
        .args(parts)
        .cwd(&config.workspace);
    if detach {
        spec = spec.stdio(StdioMode::Null);
    }
    for name in forbid_env {
        spec = spec.forbid_var(name);
    }

    let process = if debug {
        let registry = SocketRegistry::new(&config.socket_dir, &config.socket_prefix)?;
        let spec = advertise_registry(spec, &registry);
        match spawn_with_debug_socket(
            &tracker,
            &registry,
            spec,
            config.socket_pid_retries,
            config.socket_poll_interval(),
        )
        .await
        {
            Ok(launch) => {
                println!("{code}: debug socket {}", launch.socket.display());
                launch.process
            }
            Err(LaunchError::SocketMissing { pid, source, .. }) => {
                anyhow::bail!(
                    "{code}: no debug socket appeared ({source}); pid {pid} is still running, use `warden stop {code}` to end it"
                )
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        tracker.spawn_and_track(spec).await?
    };
    if detach {
        println!("{code}: started (pid {})", process.pid());
        return Ok(());
    }

    tokio::select! {
        exit = process.wait() => {
            let reason = tracker.termination_reason(&code).await?;
            match exit {
                Some(exit) if reason == TerminationReason::Crashed => {
                    anyhow::bail!("{code}: {}", exit.marker_line())
                }
                Some(exit) => println!("{code}: {}", exit.marker_line()),
                None => println!("{code}: exit not observed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // The child runs in its own process group and keeps going.
            println!("\n{code}: detached (pid {}); use `warden stop {code}` to end it", process.pid());
        }
    }
    Ok(())
}

async fn sockets_command(config: &AppConfig, action: SocketCommands) -> anyhow::Result<()> {
    let registry = SocketRegistry::new(&config.socket_dir, &config.socket_prefix)?;

    match action {
        SocketCommands::List => {
            for entry in registry.list_entries().await? {
                let name = entry
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match registry.parser().parse(&name) {
                    Some(parsed) => println!("{}\t{}\t{}", parsed.pid, parsed.label, entry.display()),
                    None => println!("?\t?\t{}", entry.display()),
                }
            }
        }
        SocketCommands::Reclaim => {
            let report = registry.reclaim_all_stale().await?;
            for entry in &report.reclaimed {
                println!("reclaimed {}", entry.display());
            }
            for (entry, e) in &report.failed {
                println!("failed {}: {e}", entry.display());
            }
            println!(
                "{} reclaimed, {} in use, {} failed",
                report.reclaimed.len(),
                report.in_use.len(),
                report.failed.len()
            );
            if !report.failed.is_empty() {
                anyhow::bail!("Some stale entries could not be removed");
            }
        }
        SocketCommands::Find { label } => match registry.find_for_session(&label).await? {
            Some(entry) => match registry.check_and_reclaim(&entry).await? {
                EntryState::InUse { pid } => println!("{}\t(pid {pid})", entry.display()),
                EntryState::Reclaimed { .. } => {
                    anyhow::bail!("Entry for `{label}` was stale and has been removed")
                }
            },
            None => anyhow::bail!("No entry for session `{label}`"),
        },
        SocketCommands::Wait {
            label,
            timeout_ms,
            poll_ms,
        } => {
            let timeout = timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.socket_timeout());
            let poll = poll_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.socket_poll_interval());
            let entry = registry.wait_for_session(&label, timeout, poll).await?;
            println!("{}", entry.display());
        }
    }
    Ok(())
}
