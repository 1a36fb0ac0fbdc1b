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

//! Lifecycle state of the proxy process

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyState {
    #[default]
    Stopped,
    /// Spawned, readiness marker not seen yet
    Starting,
    Running,
    Stopping,
}

impl ProxyState {
    /// A process exists (or is being torn down) in this state
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(ProxyState::default(), ProxyState::Stopped);
        assert!(!ProxyState::Stopped.is_active());
        assert!(ProxyState::Starting.is_active());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ProxyState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(ProxyState::Stopping.to_string(), "stopping");
    }
}
