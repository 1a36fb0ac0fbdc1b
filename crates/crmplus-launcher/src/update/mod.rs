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

//! Self-update pipeline
//!
//! [`Updater::run`] performs one cycle: fetch the manifest, compare versions,
//! ask the user, then either point them at the download page (major release)
//! or download the new binary next to the running one and hand the swap to a
//! restart script (minor release).

pub mod applier;
pub mod checker;
pub mod downloader;

use crate::error::{LauncherError, Result};
use crate::events::{AppEvent, EventSink, Status};
use crate::prompt::{Confirmer, Prompt};
use applier::ApplyOutcome;
use checker::UpdateChecker;
use downloader::{DownloadProgress, Downloader};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

pub use checker::{UpdateManifest, decide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateKind {
    /// Major release: the user downloads it from the release page
    Manual,
    /// Minor release: downloaded and swapped in place
    Automatic,
}

/// A newer release the user should hear about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateNotification {
    pub kind: UpdateKind,
    pub current_version: String,
    pub version: String,
    pub download_url: String,
    pub patch_notes: String,
}

impl UpdateNotification {
    fn prompt(&self) -> Prompt {
        let mut message = format!(
            "A new version ({}) is available. You are running {}.",
            self.version, self.current_version
        );
        if !self.patch_notes.is_empty() {
            message.push_str("\n\nWhat's new:\n");
            message.push_str(&self.patch_notes);
        }

        match self.kind {
            UpdateKind::Manual => {
                message.push_str(
                    "\n\nThis is a major update and must be downloaded manually.\n\
                     Visit the download page now?",
                );
                Prompt::new("Major Update Available", message)
            }
            UpdateKind::Automatic => {
                message.push_str("\n\nDownload and install it now?");
                Prompt::new("Update Available", message)
            }
        }
    }
}

/// How an update cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    /// The manifest could not be retrieved (non-success HTTP status)
    Unavailable,
    /// The user said no to the update
    Declined,
    OpenedDownloadPage,
    /// New binary in place but no restart yet
    Downloaded(ApplyOutcome),
    /// Restart script launched; the caller should exit now
    RestartRequested,
}

pub struct Updater {
    checker: UpdateChecker,
    downloader: Downloader,
    confirmer: Arc<dyn Confirmer>,
    current_exe: PathBuf,
    sink: EventSink,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("checker", &self.checker)
            .field("current_exe", &self.current_exe)
            .finish_non_exhaustive()
    }
}

impl Updater {
    pub fn new(
        checker: UpdateChecker,
        current_exe: PathBuf,
        confirmer: Arc<dyn Confirmer>,
        sink: EventSink,
    ) -> Result<Self> {
        Ok(Self {
            checker,
            downloader: Downloader::new()?,
            confirmer,
            current_exe,
            sink,
        })
    }

    /// Run one full update cycle
    pub async fn run(&self) -> Result<UpdateOutcome> {
        let Some(manifest) = self.checker.check().await? else {
            return Ok(UpdateOutcome::Unavailable);
        };
        let Some(notification) = self.checker.dispatch(&manifest) else {
            return Ok(UpdateOutcome::UpToDate);
        };

        if !self.confirmer.confirm(&notification.prompt()).await {
            self.sink
                .info(format!("Update to {} postponed", notification.version));
            return Ok(UpdateOutcome::Declined);
        }

        match notification.kind {
            UpdateKind::Manual => {
                if let Err(e) = open_in_browser(&notification.download_url) {
                    self.sink.error(format!(
                        "Failed to open download page ({e}). Please visit: {}",
                        notification.download_url
                    ));
                }
                Ok(UpdateOutcome::OpenedDownloadPage)
            }
            UpdateKind::Automatic => self.install(&notification).await,
        }
    }

    async fn install(&self, notification: &UpdateNotification) -> Result<UpdateOutcome> {
        let destination = applier::new_executable_path(&self.current_exe);

        let applied = match self.download(&notification.download_url, &destination).await {
            Ok(()) => applier::apply(&destination, &self.current_exe),
            Err(e) => Err(e),
        };
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(e) => {
                self.sink.error(format!("Update failed: {e}"));
                self.sink.status(Status::UpdateFailed);
                return Err(e);
            }
        };

        self.sink.status(Status::UpdateDownloaded);
        self.sink.emit(AppEvent::UpdateApplied(outcome.clone()));

        match &outcome {
            ApplyOutcome::RestartReady { script, .. } => {
                let restart = Prompt::new(
                    "Update Complete",
                    "Update downloaded successfully!\n\n\
                     Would you like to restart the application now to complete the update?",
                );
                if self.confirmer.confirm(&restart).await {
                    applier::launch_script(script)?;
                    return Ok(UpdateOutcome::RestartRequested);
                }
                self.sink
                    .info("The update will be applied the next time the restart script runs");
            }
            ApplyOutcome::ManualReplace { new_binary } => {
                self.sink.info(format!(
                    "Update downloaded to {}. Please close this application and run the new version.",
                    new_binary.display()
                ));
            }
        }

        Ok(UpdateOutcome::Downloaded(outcome))
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.sink.info(format!("Downloading update from {url}"));
        self.sink.status(Status::Downloading { percent: None });

        let sink = self.sink.clone();
        let mut report = move |progress: DownloadProgress| {
            sink.status(Status::Downloading {
                percent: Some(progress.percent_complete),
            });
            sink.emit(AppEvent::DownloadProgress(progress));
        };

        let bytes = self
            .downloader
            .download(url, destination, Some(&mut report))
            .await?;
        self.sink.info(format!(
            "Downloaded {bytes} bytes to {}",
            destination.display()
        ));
        Ok(())
    }
}

/// Open `url` in the system browser. Only http(s) URLs are accepted.
pub fn open_in_browser(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(LauncherError::Config(format!(
            "refusing to open non-http URL: {url}"
        )));
    }

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/c", "start", ""]).arg(url);
        c
    } else if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg(url);
        c
    } else {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };

    let program = PathBuf::from(command.get_program());
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| LauncherError::ProcessStart {
            path: program,
            source,
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::AutoConfirm;

    #[test]
    fn test_prompt_mentions_patch_notes() {
        let notification = UpdateNotification {
            kind: UpdateKind::Automatic,
            current_version: "1.3".to_owned(),
            version: "1.4".to_owned(),
            download_url: "https://example.com/CRMPlus.exe".to_owned(),
            patch_notes: "Faster startup".to_owned(),
        };

        let prompt = notification.prompt();
        assert_eq!(prompt.title, "Update Available");
        assert!(prompt.message.contains("1.4"));
        assert!(prompt.message.contains("Faster startup"));

        let major = UpdateNotification {
            kind: UpdateKind::Manual,
            patch_notes: String::new(),
            ..notification
        };
        let prompt = major.prompt();
        assert_eq!(prompt.title, "Major Update Available");
        assert!(!prompt.message.contains("What's new"));
    }

    #[test]
    fn test_open_in_browser_rejects_other_schemes() {
        assert!(matches!(
            open_in_browser("file:///etc/passwd"),
            Err(LauncherError::Config(_))
        ));
        assert!(open_in_browser("javascript:alert(1)").is_err());
    }

    #[tokio::test]
    async fn test_major_update_declined() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/crmplus.json")
            .with_status(200)
            .with_body(
                r#"{"version": "2.0", "majorUpdate": true, "downloadUrl": "https://example.com/dl"}"#,
            )
            .create_async()
            .await;

        let confirmer = Arc::new(AutoConfirm::no());
        let checker = UpdateChecker::new(
            format!("{}/crmplus.json", server.url()),
            "1.3",
            EventSink::detached(),
        )
        .unwrap();
        let updater = Updater::new(
            checker,
            PathBuf::from("/nonexistent/CRMPlus.exe"),
            Arc::clone(&confirmer) as Arc<dyn Confirmer>,
            EventSink::detached(),
        )
        .unwrap();

        assert_eq!(updater.run().await.unwrap(), UpdateOutcome::Declined);
        let asked = confirmer.asked();
        assert_eq!(asked.len(), 1);
        assert_eq!(asked[0].title, "Major Update Available");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unavailable_manifest() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/crmplus.json")
            .with_status(503)
            .create_async()
            .await;

        let checker = UpdateChecker::new(
            format!("{}/crmplus.json", server.url()),
            "1.3",
            EventSink::detached(),
        )
        .unwrap();
        let updater = Updater::new(
            checker,
            PathBuf::from("/nonexistent/CRMPlus.exe"),
            Arc::new(AutoConfirm::yes()),
            EventSink::detached(),
        )
        .unwrap();

        assert_eq!(updater.run().await.unwrap(), UpdateOutcome::Unavailable);
    }
}
