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

//! Remote manifest checking

use super::{UpdateKind, UpdateNotification};
use crate::error::{LauncherError, Result};
use crate::events::{AppEvent, EventSink};
use crate::version;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("crmplus-launcher/", env!("CARGO_PKG_VERSION"));

/// Latest release as published in the remote manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub version: String,
    pub major_update: bool,
    pub download_url: String,
    #[serde(default)]
    pub patch_notes: String,
}

/// Classify a manifest against the running version.
///
/// `None` when the remote version is not newer.
pub fn decide(current_version: &str, manifest: &UpdateManifest) -> Option<UpdateNotification> {
    if !version::is_newer(current_version, &manifest.version) {
        return None;
    }

    let kind = if manifest.major_update {
        UpdateKind::Manual
    } else {
        UpdateKind::Automatic
    };

    Some(UpdateNotification {
        kind,
        current_version: current_version.to_owned(),
        version: manifest.version.clone(),
        download_url: manifest.download_url.clone(),
        patch_notes: manifest.patch_notes.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct UpdateChecker {
    client: reqwest::Client,
    manifest_url: String,
    current_version: String,
    sink: EventSink,
}

impl UpdateChecker {
    pub fn new(
        manifest_url: impl Into<String>,
        current_version: impl Into<String>,
        sink: EventSink,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| LauncherError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            manifest_url: manifest_url.into(),
            current_version: current_version.into(),
            sink,
        })
    }

    /// Fetch and parse the manifest.
    ///
    /// A non-success HTTP status is logged and yields `Ok(None)`. Transport
    /// and parse failures are logged and returned.
    pub async fn check(&self) -> Result<Option<UpdateManifest>> {
        tracing::debug!("Checking for updates at {}", self.manifest_url);

        match self.fetch().await {
            Ok(manifest) => Ok(manifest),
            Err(e) => {
                self.sink.error(format!("Update check failed: {e}"));
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<Option<UpdateManifest>> {
        let response = self.client.get(&self.manifest_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            self.sink
                .warn(format!("Update check failed: HTTP {status}"));
            return Ok(None);
        }

        let body = response.text().await?;
        let manifest: UpdateManifest = serde_json::from_str(&body)?;
        Ok(Some(manifest))
    }

    /// Announce the outcome of a check.
    ///
    /// Emits [`AppEvent::UpdateAvailable`] for a newer version, otherwise a
    /// single "up to date" log line.
    pub fn dispatch(&self, manifest: &UpdateManifest) -> Option<UpdateNotification> {
        if !version::both_numeric(&self.current_version, &manifest.version) {
            self.sink.error(format!(
                "Invalid version format (local: {}, remote: {}), comparing as strings",
                self.current_version, manifest.version
            ));
        }

        match decide(&self.current_version, manifest) {
            Some(notification) => {
                self.sink
                    .emit(AppEvent::UpdateAvailable(notification.clone()));
                Some(notification)
            }
            None => {
                self.sink.info(format!(
                    "You are running the latest version ({})",
                    self.current_version
                ));
                None
            }
        }
    }

    /// Check and announce in the background without asking the user anything.
    ///
    /// Failures are already reported by [`Self::check`]; the task then
    /// resolves to `None`.
    pub fn spawn_check(self) -> JoinHandle<Option<UpdateNotification>> {
        tokio::spawn(async move {
            match self.check().await {
                Ok(Some(manifest)) => self.dispatch(&manifest),
                Ok(None) | Err(_) => None,
            }
        })
    }
}
