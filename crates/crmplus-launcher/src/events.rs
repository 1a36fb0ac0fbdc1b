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

//! Event channel between the core and whatever presents it
//!
//! Every component reports through an [`EventSink`]. The front end owns the
//! matching [`EventReceiver`] and drains it on a single task, so log lines and
//! status changes arrive in order without the core knowing about any UI.

use crate::state::ProxyState;
use crate::update::applier::ApplyOutcome;
use crate::update::downloader::DownloadProgress;
use crate::update::UpdateNotification;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogSource {
    Launcher,
    ProxyStdout,
    ProxyStderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Short user-facing status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Status {
    Ready,
    Launching,
    Running,
    Error,
    ProxyFailed,
    Downloading { percent: Option<u8> },
    UpdateDownloaded,
    UpdateFailed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::Launching => f.write_str("Launching..."),
            Self::Running => f.write_str("Running"),
            Self::Error => f.write_str("Error"),
            Self::ProxyFailed => f.write_str("Proxy Failed"),
            Self::Downloading { percent: None } => f.write_str("Downloading update..."),
            Self::Downloading {
                percent: Some(percent),
            } => write!(f, "Downloading: {percent}%"),
            Self::UpdateDownloaded => f.write_str("Update downloaded!"),
            Self::UpdateFailed => f.write_str("Update failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum AppEvent {
    Log {
        source: LogSource,
        level: LogLevel,
        message: String,
    },
    Status(Status),
    ProxyState(ProxyState),
    UpdateAvailable(UpdateNotification),
    DownloadProgress(DownloadProgress),
    UpdateApplied(ApplyOutcome),
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    pub event: AppEvent,
}

pub type EventReceiver = mpsc::UnboundedReceiver<EventRecord>;

/// Cloneable sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EventRecord>>,
}

/// Create a connected sink/receiver pair
pub fn channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx: Some(tx) }, rx)
}

impl EventSink {
    /// Sink that only traces; nothing receives its events
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AppEvent) {
        trace_event(&event);
        if let Some(tx) = &self.tx {
            // A dropped receiver means the front end is gone; tracing already has it.
            let _ = tx.send(EventRecord {
                at: Utc::now(),
                event,
            });
        }
    }

    pub fn log(&self, source: LogSource, level: LogLevel, message: impl Into<String>) {
        self.emit(AppEvent::Log {
            source,
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogSource::Launcher, LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogSource::Launcher, LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogSource::Launcher, LogLevel::Error, message);
    }

    pub fn status(&self, status: Status) {
        self.emit(AppEvent::Status(status));
    }
}

fn trace_event(event: &AppEvent) {
    match event {
        AppEvent::Log {
            source: LogSource::Launcher,
            level,
            message,
        } => match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        },
        AppEvent::Log {
            source, message, ..
        } => tracing::debug!(target: "crmplus::proxy", ?source, "{message}"),
        AppEvent::Status(status) => tracing::debug!("Status: {status}"),
        AppEvent::ProxyState(state) => tracing::debug!("Proxy state: {state}"),
        AppEvent::DownloadProgress(progress) => {
            tracing::debug!("Download progress: {}%", progress.percent_complete);
        }
        AppEvent::UpdateAvailable(notification) => {
            tracing::info!("Update available: {notification:?}");
        }
        AppEvent::UpdateApplied(outcome) => tracing::info!("Update applied: {outcome:?}"),
    }
}
