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

//! Process supervisor for the intercepting proxy
//!
//! The spawned [`Child`] lives inside a watcher task. The supervisor keeps the
//! only channel that can ask that task to terminate it; everybody else gets a
//! [`ProxyProcessHandle`], which can observe liveness but never signal.

use crate::error::{LauncherError, Result};
use crate::events::{AppEvent, EventSink};
use crate::monitor::{MonitorHandles, OutputStreamMonitor, ReadinessCallback};
use crate::state::ProxyState;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Status(ExitStatus),
    /// The exit status could not be collected
    Unknown,
}

/// Read-only view of a supervised process
#[derive(Debug, Clone)]
pub struct ProxyProcessHandle {
    pid: u32,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProxyProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    /// Wait until the process has exited and been reaped
    pub async fn wait_exit(&self) -> ProcessExit {
        let mut rx = self.exit.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or(ProcessExit::Unknown),
            // Watcher dropped without reporting
            Err(_) => ProcessExit::Unknown,
        }
    }
}

struct LiveProcess {
    handle: ProxyProcessHandle,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: JoinHandle<()>,
    streams: MonitorHandles,
}

/// State shared with the readiness callback and the watcher task
struct Shared {
    state_tx: watch::Sender<ProxyState>,
    /// Incremented on every start so stale signals from earlier processes are ignored
    cycle: AtomicU64,
    sink: EventSink,
}

impl Shared {
    fn set_state(&self, state: ProxyState) {
        if self.state_tx.send_replace(state) != state {
            self.sink.emit(AppEvent::ProxyState(state));
        }
    }

    /// Transition `from` -> `to` only if still in `from` and `cycle` is current
    fn transition_if(&self, cycle: u64, from: &[ProxyState], to: ProxyState) -> bool {
        let changed = self.state_tx.send_if_modified(|state| {
            if from.contains(state) && self.cycle.load(Ordering::SeqCst) == cycle {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            self.sink.emit(AppEvent::ProxyState(to));
        }
        changed
    }
}

/// Process supervisor for the proxy child process
///
/// `start` and `stop` are serialized by one async mutex, so a stop issued
/// while a start is in flight is applied after the start completes.
pub struct ProcessSupervisor {
    live: Mutex<Option<LiveProcess>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(sink: EventSink) -> Self {
        let (state_tx, _) = watch::channel(ProxyState::Stopped);
        Self {
            live: Mutex::new(None),
            shared: Arc::new(Shared {
                state_tx,
                cycle: AtomicU64::new(0),
                sink,
            }),
        }
    }

    pub fn state(&self) -> ProxyState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver for observing state changes
    pub fn subscribe(&self) -> watch::Receiver<ProxyState> {
        self.shared.state_tx.subscribe()
    }

    /// Handle of the current process, if one was started and not yet stopped
    pub async fn handle(&self) -> Option<ProxyProcessHandle> {
        self.live.lock().await.as_ref().map(|p| p.handle.clone())
    }

    /// Spawn the proxy and hand its output to an [`OutputStreamMonitor`].
    ///
    /// Fails with [`LauncherError::NotFound`] without spawning anything if
    /// `executable` does not exist. If a live process already exists its
    /// handle is returned unchanged.
    pub async fn start<I, S>(
        &self,
        executable: &Path,
        args: I,
        working_dir: &Path,
        readiness_marker: &str,
    ) -> Result<ProxyProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut live = self.live.lock().await;

        if let Some(existing) = live.as_ref() {
            if existing.handle.is_alive() {
                tracing::warn!("Proxy is already running (PID {})", existing.handle.pid());
                return Ok(existing.handle.clone());
            }
            if let Some(stale) = live.take() {
                reap(stale).await;
            }
        }

        if !executable.exists() {
            let err = LauncherError::not_found("proxy executable", executable);
            self.shared.sink.error(format!("Failed to start proxy: {err}"));
            return Err(err);
        }

        self.shared.sink.info("Starting proxy...");

        let mut command = Command::new(executable);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        new_process_group(&mut command);

        let mut child = command
            .spawn()
            .map_err(|source| {
                let err = LauncherError::ProcessStart {
                    path: executable.to_path_buf(),
                    source,
                };
                self.shared.sink.error(format!("Failed to start proxy: {err}"));
                err
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(LauncherError::ProcessStart {
                path: executable.to_path_buf(),
                source: std::io::Error::other("child output was not captured"),
            });
        };

        let pid = child.id().unwrap_or_default();
        let cycle = self.shared.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(ProxyState::Starting);
        self.shared
            .sink
            .info(format!("Proxy started with PID {pid}"));

        let monitor = OutputStreamMonitor::new(
            self.shared.sink.clone(),
            readiness_marker,
            self.readiness_callback(cycle),
        );
        let streams = monitor.spawn(stdout, stderr);

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_process(
            child,
            kill_rx,
            exit_tx,
            Arc::clone(&self.shared),
            cycle,
        ));

        let handle = ProxyProcessHandle { pid, exit: exit_rx };
        *live = Some(LiveProcess {
            handle: handle.clone(),
            kill_tx: Some(kill_tx),
            watcher,
            streams,
        });

        Ok(handle)
    }

    /// Terminate the live process and wait for it to be reaped.
    ///
    /// No-op when nothing is running.
    pub async fn stop(&self) {
        let mut live = self.live.lock().await;
        let Some(mut process) = live.take() else {
            tracing::debug!("Stop requested but no proxy is running");
            self.shared.set_state(ProxyState::Stopped);
            return;
        };

        tracing::info!("Stopping proxy (PID {})", process.handle.pid());
        self.shared.set_state(ProxyState::Stopping);

        if let Some(kill_tx) = process.kill_tx.take() {
            // Err means the watcher already saw the process exit
            let _ = kill_tx.send(());
        }
        reap(process).await;

        self.shared.set_state(ProxyState::Stopped);
        self.shared.sink.info("Proxy stopped");
    }

    /// Forced teardown on application exit
    pub async fn shutdown(&self) {
        if self.state().is_active() {
            tracing::info!("Shutting down proxy");
        }
        self.stop().await;
    }

    /// Wait for the Starting -> Running transition.
    ///
    /// Returns false on timeout, or as soon as the process is found stopped.
    pub async fn wait_until_running(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, ProxyState::Running | ProxyState::Stopped)),
        )
        .await;

        match waited {
            Ok(Ok(state)) => *state == ProxyState::Running,
            Ok(Err(_)) | Err(_) => false,
        }
    }

    fn readiness_callback(&self, cycle: u64) -> ReadinessCallback {
        let shared = Arc::clone(&self.shared);
        Arc::new(move || {
            if shared.transition_if(cycle, &[ProxyState::Starting], ProxyState::Running) {
                shared.sink.info("Proxy is ready");
            }
        })
    }
}

async fn reap(process: LiveProcess) {
    if let Err(e) = process.watcher.await {
        tracing::warn!("Proxy watcher task failed: {e}");
    }
    if tokio::time::timeout(STREAM_DRAIN_TIMEOUT, process.streams.join())
        .await
        .is_err()
    {
        tracing::debug!("Proxy output streams still open after exit");
    }
}

/// Owns the child until it exits on its own or termination is requested
async fn watch_process(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    shared: Arc<Shared>,
    cycle: u64,
) {
    let exit = tokio::select! {
        status = child.wait() => {
            let exit = match status {
                Ok(status) => ProcessExit::Status(status),
                Err(e) => {
                    tracing::warn!("Error waiting for proxy: {e}");
                    ProcessExit::Unknown
                }
            };
            let was_live = shared.transition_if(
                cycle,
                &[ProxyState::Starting, ProxyState::Running],
                ProxyState::Stopped,
            );
            if was_live {
                shared.sink.warn(format!("Proxy exited unexpectedly ({})", describe(exit)));
            }
            exit
        }
        // A dropped sender also lands here, so the process never outlives its supervisor
        _ = kill_rx => terminate(&mut child).await,
    };

    exit_tx.send_replace(Some(exit));
}

/// Graceful stop: SIGTERM -> timeout -> kill
async fn terminate(child: &mut Child) -> ProcessExit {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!("Failed to send SIGTERM: {e}");
            }
            match tokio::time::timeout(GRACEFUL_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!("Proxy stopped gracefully");
                    return ProcessExit::Status(status);
                }
                Ok(Err(e)) => tracing::warn!("Error waiting for proxy: {e}"),
                Err(_) => tracing::warn!("Proxy did not stop gracefully, killing"),
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill proxy: {e}");
    }
    match child.wait().await {
        Ok(status) => ProcessExit::Status(status),
        Err(_) => ProcessExit::Unknown,
    }
}

fn describe(exit: ProcessExit) -> String {
    match exit {
        ProcessExit::Status(status) => status.to_string(),
        ProcessExit::Unknown => "unknown status".to_owned(),
    }
}

/// Put the child in its own process group so a terminal Ctrl-C reaches only
/// the launcher
pub(crate) fn new_process_group(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(not(any(unix, windows)))]
    let _ = command;
}
