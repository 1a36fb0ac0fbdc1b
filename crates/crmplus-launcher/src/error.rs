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

//! Error types for the launcher crate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherError {
    /// A required executable or script is missing on disk. Never retried.
    #[error("{what} not found at {}", .path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to start {}: {source}", .path.display())]
    ProcessStart {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stream} read failed: {source}")]
    StreamRead {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy did not become ready within {timeout_secs}s")]
    ProxyUnavailable { timeout_secs: u64 },

    #[error("target executable not found at {}", .0.display())]
    TargetNotFound(PathBuf),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse update manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LauncherError {
    pub(crate) fn not_found(what: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            what,
            path: path.into(),
        }
    }

    /// True for errors caused by a missing file rather than a runtime failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Config(_) | Self::TargetNotFound(_)
        )
    }
}

impl From<reqwest::Error> for LauncherError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;
