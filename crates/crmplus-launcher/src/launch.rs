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

//! Launches the target application behind the local proxy

use crate::config::LauncherConfig;
use crate::error::{LauncherError, Result};
use crate::events::{EventSink, Status};
use crate::proxy_options::ProxyOptions;
use crate::state::ProxyState;
use crate::supervisor::{self, ProcessSupervisor};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// One launch attempt's inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub target_executable: PathBuf,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub no_proxy: String,
}

impl LaunchConfig {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            target_executable: config.target_executable.clone(),
            proxy_host: config.proxy_host.clone(),
            proxy_port: config.proxy_port,
            no_proxy: config.no_proxy.clone(),
        }
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.proxy_host, self.proxy_port)
    }

    /// Variables routing HTTP and HTTPS through the proxy
    pub fn proxy_env(&self) -> [(&'static str, String); 3] {
        let url = self.proxy_url();
        [
            ("http_proxy", url.clone()),
            ("https_proxy", url),
            ("NO_PROXY", self.no_proxy.clone()),
        ]
    }
}

/// Everything needed to (re)start the proxy
#[derive(Debug, Clone)]
pub struct ProxyCommand {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    pub readiness_marker: String,
    /// Written to the working directory before every start
    pub options: ProxyOptions,
}

impl ProxyCommand {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            executable: config.proxy_executable_path(),
            args: config.proxy_args(),
            working_dir: config.base_dir(),
            readiness_marker: config.readiness_marker.clone(),
            options: config.proxy_options,
        }
    }
}

#[derive(Debug)]
pub struct LaunchCoordinator {
    supervisor: Arc<ProcessSupervisor>,
    proxy: ProxyCommand,
    grace_period: Duration,
    sink: EventSink,
}

impl LaunchCoordinator {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        proxy: ProxyCommand,
        grace_period: Duration,
        sink: EventSink,
    ) -> Self {
        Self {
            supervisor,
            proxy,
            grace_period,
            sink,
        }
    }

    /// Start the proxy if needed and wait for its readiness marker.
    ///
    /// Fails with [`LauncherError::ProxyUnavailable`] if the proxy is not
    /// running once the grace period has elapsed.
    pub async fn ensure_proxy(&self) -> Result<()> {
        match self.supervisor.state() {
            ProxyState::Running => return Ok(()),
            // Someone else already started it; just wait below
            ProxyState::Starting => {}
            ProxyState::Stopped | ProxyState::Stopping => {
                let options_path = self.proxy.options.write_to(&self.proxy.working_dir)?;
                self.sink
                    .info(format!("Config written to {}", options_path.display()));
                self.supervisor
                    .start(
                        &self.proxy.executable,
                        &self.proxy.args,
                        &self.proxy.working_dir,
                        &self.proxy.readiness_marker,
                    )
                    .await?;
            }
        }

        if self.supervisor.wait_until_running(self.grace_period).await {
            Ok(())
        } else {
            Err(LauncherError::ProxyUnavailable {
                timeout_secs: self.grace_period.as_secs(),
            })
        }
    }

    /// Launch the target through the proxy; returns the target's PID.
    ///
    /// The target is not supervised: no output capture, no handle retained.
    pub async fn launch(&self, config: &LaunchConfig) -> Result<u32> {
        self.sink.status(Status::Launching);

        match self.try_launch(config).await {
            Ok(pid) => {
                self.sink
                    .info(format!("Target launched with PID {pid}"));
                self.sink.status(Status::Running);
                Ok(pid)
            }
            Err(err) => {
                self.sink.error(format!("Launch failed: {err}"));
                let status = if matches!(err, LauncherError::ProxyUnavailable { .. }) {
                    Status::ProxyFailed
                } else {
                    Status::Error
                };
                self.sink.status(status);
                Err(err)
            }
        }
    }

    async fn try_launch(&self, config: &LaunchConfig) -> Result<u32> {
        self.ensure_proxy().await?;

        if !config.target_executable.exists() {
            return Err(LauncherError::TargetNotFound(
                config.target_executable.clone(),
            ));
        }

        let mut command = Command::new(&config.target_executable);
        command
            .envs(config.proxy_env())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        supervisor::new_process_group(&mut command);
        if let Some(dir) = config.target_executable.parent() {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|source| LauncherError::ProcessStart {
                path: config.target_executable.clone(),
                source,
            })?;

        // Dropping the handle leaves the target running on its own, and its
        // own process group keeps it out of the launcher's Ctrl-C
        Ok(child.id().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, AppEvent, EventReceiver};
    use std::path::Path;
    use tempfile::TempDir;

    const MARKER: &str = "Proxy server started";

    fn drain(rx: &mut EventReceiver) -> Vec<AppEvent> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|r| r.event)
            .collect()
    }

    fn launch_config(target: &Path) -> LaunchConfig {
        LaunchConfig {
            target_executable: target.to_path_buf(),
            proxy_host: "localhost".to_owned(),
            proxy_port: 8080,
            no_proxy: "127.0.0.1,localhost".to_owned(),
        }
    }

    #[cfg(unix)]
    fn sh_proxy(dir: &Path, script: &str) -> ProxyCommand {
        ProxyCommand {
            executable: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            working_dir: dir.to_path_buf(),
            readiness_marker: MARKER.to_owned(),
            options: ProxyOptions::default(),
        }
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_proxy_env() {
        let config = launch_config(Path::new("/bin/true"));
        let env = config.proxy_env();
        assert_eq!(env[0], ("http_proxy", "http://localhost:8080".to_owned()));
        assert_eq!(env[1], ("https_proxy", "http://localhost:8080".to_owned()));
        assert_eq!(env[2], ("NO_PROXY", "127.0.0.1,localhost".to_owned()));
    }

    #[test]
    fn test_launch_config_from_config() {
        let config = LauncherConfig {
            proxy_port: 9000,
            ..Default::default()
        };
        let launch = LaunchConfig::from_config(&config);
        assert_eq!(launch.proxy_url(), "http://localhost:9000");
        assert_eq!(launch.target_executable, config.target_executable);
    }

    #[tokio::test]
    async fn test_missing_proxy_reports_error_status() {
        let dir = TempDir::new().unwrap();
        let (sink, mut rx) = events::channel();
        let supervisor = Arc::new(ProcessSupervisor::new(sink.clone()));
        let proxy = ProxyCommand {
            executable: dir.path().join("missing-mitmproxy"),
            args: Vec::new(),
            working_dir: dir.path().to_path_buf(),
            readiness_marker: MARKER.to_owned(),
            options: ProxyOptions::default(),
        };
        let coordinator =
            LaunchCoordinator::new(supervisor, proxy, Duration::from_millis(200), sink);

        let err = coordinator
            .launch(&launch_config(Path::new("/bin/true")))
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::NotFound { .. }));
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(AppEvent::Status(Status::Error))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_proxy_never_ready_does_not_launch_target() {
        let dir = TempDir::new().unwrap();
        let marker_file = dir.path().join("launched");
        let target = write_script(
            dir.path(),
            "target.sh",
            &format!("touch '{}'", marker_file.display()),
        );

        let (sink, mut rx) = events::channel();
        let supervisor = Arc::new(ProcessSupervisor::new(sink.clone()));
        let coordinator = LaunchCoordinator::new(
            Arc::clone(&supervisor),
            sh_proxy(dir.path(), "echo 'loading'; exec sleep 30"),
            Duration::from_millis(300),
            sink,
        );

        let err = coordinator.launch(&launch_config(&target)).await.unwrap_err();
        assert!(matches!(err, LauncherError::ProxyUnavailable { .. }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker_file.exists());
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(AppEvent::Status(Status::ProxyFailed))
        ));

        supervisor.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_target_after_proxy_ready() {
        let dir = TempDir::new().unwrap();
        let (sink, _rx) = events::channel();
        let supervisor = Arc::new(ProcessSupervisor::new(sink.clone()));
        let coordinator = LaunchCoordinator::new(
            Arc::clone(&supervisor),
            sh_proxy(dir.path(), &format!("echo '{MARKER}'; exec sleep 30")),
            Duration::from_secs(5),
            sink,
        );

        let err = coordinator
            .launch(&launch_config(&dir.path().join("no-such-game")))
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::TargetNotFound(_)));
        assert_eq!(supervisor.state(), ProxyState::Running);
        assert!(dir.path().join("config.json").exists());

        supervisor.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_target_receives_proxy_environment() {
        let dir = TempDir::new().unwrap();
        let env_dump = dir.path().join("env.txt");
        let target = write_script(
            dir.path(),
            "target.sh",
            &format!(
                "echo \"$http_proxy|$https_proxy|$NO_PROXY\" > '{}'",
                env_dump.display()
            ),
        );

        let (sink, _rx) = events::channel();
        let supervisor = Arc::new(ProcessSupervisor::new(sink.clone()));
        let coordinator = LaunchCoordinator::new(
            Arc::clone(&supervisor),
            sh_proxy(dir.path(), &format!("echo '{MARKER}'; exec sleep 30")),
            Duration::from_secs(5),
            sink,
        );

        let pid = coordinator.launch(&launch_config(&target)).await.unwrap();
        assert!(pid > 0);

        // The target runs detached; poll for its output
        let mut contents = String::new();
        for _ in 0..50 {
            if let Ok(c) = std::fs::read_to_string(&env_dump)
                && c.ends_with('\n')
            {
                contents = c;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(
            contents.trim(),
            "http://localhost:8080|http://localhost:8080|127.0.0.1,localhost"
        );

        // A second launch reuses the running proxy
        let handle = supervisor.handle().await.unwrap();
        coordinator.launch(&launch_config(&target)).await.unwrap();
        assert_eq!(supervisor.handle().await.unwrap().pid(), handle.pid());

        supervisor.shutdown().await;
    }

    #[cfg(unix)]
    async fn read_when_written(path: &Path) -> String {
        for _ in 0..50 {
            if let Ok(c) = std::fs::read_to_string(path)
                && c.ends_with('\n')
            {
                return c;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} was never written", path.display());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_children_leave_the_launcher_process_group() {
        let dir = TempDir::new().unwrap();
        let target_pgid = dir.path().join("target_pgid");
        let proxy_pgid = dir.path().join("proxy_pgid");
        let target = write_script(
            dir.path(),
            "target.sh",
            &format!("ps -o pgid= -p $$ > '{}'", target_pgid.display()),
        );

        let (sink, _rx) = events::channel();
        let supervisor = Arc::new(ProcessSupervisor::new(sink.clone()));
        let coordinator = LaunchCoordinator::new(
            Arc::clone(&supervisor),
            sh_proxy(
                dir.path(),
                &format!(
                    "ps -o pgid= -p $$ > '{}'; echo '{MARKER}'; exec sleep 30",
                    proxy_pgid.display()
                ),
            ),
            Duration::from_secs(5),
            sink,
        );

        coordinator.launch(&launch_config(&target)).await.unwrap();

        let own = nix::unistd::getpgrp().as_raw();
        let target_group: i32 = read_when_written(&target_pgid).await.trim().parse().unwrap();
        let proxy_group: i32 = read_when_written(&proxy_pgid).await.trim().parse().unwrap();
        assert_ne!(target_group, own);
        assert_ne!(proxy_group, own);

        supervisor.shutdown().await;
    }
}
