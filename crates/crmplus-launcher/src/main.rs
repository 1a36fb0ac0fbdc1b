// Copyright (c) 2025 digimine9
//
// This file is part of CRM Plus.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, see <https://github.com/digimine9/CRMPlus>.

//! CRM Plus launcher - command-line entry point

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use crmplus_launcher::config::{self, LauncherConfig};
use crmplus_launcher::events::{self, AppEvent, EventReceiver, EventSink, LogSource};
use crmplus_launcher::prompt::{AutoConfirm, Confirmer, StdinConfirmer};
use crmplus_launcher::update::checker::UpdateChecker;
use crmplus_launcher::update::{UpdateOutcome, Updater, applier};
use crmplus_launcher::{
    CURRENT_VERSION, LaunchConfig, LaunchCoordinator, ProcessSupervisor, ProxyCommand, ProxyState,
    Status, setup,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{info, warn};

const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "crmplus")]
#[command(version, about = "Launch a game through a local mitmproxy and keep CRM Plus up to date")]
struct Cli {
    /// Settings file (default: launcher.json next to the executable)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Defaults to `launch`, which is also how the restart script starts a new build
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Commands {
    /// Start the proxy, launch the target through it, and keep the proxy up until Ctrl-C
    Launch {
        /// Override the configured target executable
        #[arg(long, value_name = "PATH")]
        target: Option<PathBuf>,
    },

    /// Run only the proxy and stream its output until Ctrl-C
    Proxy,

    /// Check for a new release and install it
    Update {
        /// Answer yes to every question
        #[arg(long)]
        yes: bool,
    },

    /// Report whether the proxy tool, its script and the target are in place
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting CRM Plus v{CURRENT_VERSION}");

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let (sink, rx) = events::channel();
    let pump = tokio::spawn(pump_events(rx));

    let command = cli.command.unwrap_or(Commands::Launch { target: None });
    let result = run(command, &config, sink).await;

    // Every sink is gone once `run` returns, so the pump sees the channel close
    if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, pump).await.is_err() {
        warn!("Event pump did not drain in time");
    }

    result
}

async fn run(command: Commands, config: &LauncherConfig, sink: EventSink) -> anyhow::Result<()> {
    match command {
        Commands::Launch { target } => {
            setup::check_setup(config, &sink);
            let update_check = spawn_update_check(config, &sink);

            let mut launch_config = LaunchConfig::from_config(config);
            if let Some(target) = target {
                launch_config.target_executable = target;
            }

            let (supervisor, coordinator) = coordinator(config, &sink);
            let launched = coordinator.launch(&launch_config).await;
            if launched.is_ok() {
                info!("Proxy stays up while the game runs; press Ctrl-C to stop it");
                wait_for_shutdown(&supervisor).await;
            }
            supervisor.shutdown().await;
            if let Some(check) = update_check {
                check.abort();
            }
            launched.context("Launch failed")?;
        }
        Commands::Proxy => {
            setup::check_setup(config, &sink);
            let update_check = spawn_update_check(config, &sink);

            let (supervisor, coordinator) = coordinator(config, &sink);
            let ready = coordinator.ensure_proxy().await;
            if ready.is_ok() {
                sink.status(Status::Running);
                info!("Proxy is listening on {}:{}", config.proxy_host, config.proxy_port);
                wait_for_shutdown(&supervisor).await;
            } else {
                sink.status(Status::ProxyFailed);
            }
            supervisor.shutdown().await;
            if let Some(check) = update_check {
                check.abort();
            }
            ready.context("Proxy failed to start")?;
        }
        Commands::Update { yes } => {
            let confirmer: Arc<dyn Confirmer> = if yes {
                Arc::new(AutoConfirm::yes())
            } else {
                Arc::new(StdinConfirmer)
            };
            let checker = UpdateChecker::new(&config.manifest_url, CURRENT_VERSION, sink.clone())?;
            let updater = Updater::new(
                checker,
                applier::current_executable()?,
                confirmer,
                sink.clone(),
            )?;

            match updater.run().await.context("Update failed")? {
                UpdateOutcome::RestartRequested => info!("Exiting to finish the update"),
                UpdateOutcome::Unavailable => warn!("Update server is unavailable, try again later"),
                outcome @ (UpdateOutcome::UpToDate
                | UpdateOutcome::Declined
                | UpdateOutcome::OpenedDownloadPage
                | UpdateOutcome::Downloaded(_)) => {
                    tracing::debug!("Update cycle finished: {outcome:?}");
                }
            }
        }
        Commands::Check => {
            let report = setup::check_setup(config, &sink);
            if !report.is_complete() {
                bail!("Setup is incomplete");
            }
            sink.status(Status::Ready);
        }
    }

    Ok(())
}

fn coordinator(
    config: &LauncherConfig,
    sink: &EventSink,
) -> (Arc<ProcessSupervisor>, LaunchCoordinator) {
    let supervisor = Arc::new(ProcessSupervisor::new(sink.clone()));
    let coordinator = LaunchCoordinator::new(
        Arc::clone(&supervisor),
        ProxyCommand::from_config(config),
        config.grace_period(),
        sink.clone(),
    );
    (supervisor, coordinator)
}

/// Announce a newer release in the background; installing it is left to `update`
fn spawn_update_check(config: &LauncherConfig, sink: &EventSink) -> Option<AbortHandle> {
    match UpdateChecker::new(&config.manifest_url, CURRENT_VERSION, sink.clone()) {
        Ok(checker) => Some(checker.spawn_check().abort_handle()),
        Err(e) => {
            warn!("Skipping update check: {e}");
            None
        }
    }
}

/// Return on Ctrl-C, or when the proxy exits on its own
async fn wait_for_shutdown(supervisor: &ProcessSupervisor) {
    let mut state = supervisor.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutdown signal received");
        }
        _ = state.wait_for(|s| *s == ProxyState::Stopped) => {
            warn!("Proxy is no longer running");
        }
    }
}

/// Print what the tracing layer does not already show
#[expect(clippy::wildcard_enum_match_arm)]
async fn pump_events(mut rx: EventReceiver) {
    while let Some(record) = rx.recv().await {
        let at = record.at.with_timezone(&chrono::Local).format("%H:%M:%S");
        match record.event {
            AppEvent::Log {
                source: LogSource::ProxyStdout,
                message,
                ..
            } => println!("[{at}] OUTPUT: {message}"),
            AppEvent::Log {
                source: LogSource::ProxyStderr,
                message,
                ..
            } => eprintln!("[{at}] ERROR: {message}"),
            AppEvent::Status(status) => println!("[{at}] Status: {status}"),
            AppEvent::UpdateAvailable(notification) => {
                println!(
                    "[{at}] Version {} is available (running {}); run `crmplus update` to get it",
                    notification.version, notification.current_version
                );
                if !notification.patch_notes.is_empty() {
                    println!("[{at}] Patch notes for {}:", notification.version);
                    for line in notification.patch_notes.lines() {
                        println!("    {line}");
                    }
                }
            }
            _ => {}
        }
    }
}
