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

//! Start-up check that the files the launcher depends on are in place

use crate::config::LauncherConfig;
use crate::events::EventSink;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupItem {
    pub name: &'static str,
    pub path: PathBuf,
    pub found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub proxy_script: SetupItem,
    pub proxy_executable: SetupItem,
    pub target_executable: SetupItem,
}

impl SetupReport {
    pub fn items(&self) -> [&SetupItem; 3] {
        [
            &self.proxy_script,
            &self.proxy_executable,
            &self.target_executable,
        ]
    }

    /// Everything needed for a launch exists
    pub fn is_complete(&self) -> bool {
        self.items().iter().all(|item| item.found)
    }
}

fn inspect(name: &'static str, path: PathBuf) -> SetupItem {
    let found = path.exists();
    SetupItem { name, path, found }
}

/// Check for the proxy script, the proxy tool and the target, logging each result
pub fn check_setup(config: &LauncherConfig, sink: &EventSink) -> SetupReport {
    sink.info("Checking setup...");

    let report = SetupReport {
        proxy_script: inspect("Proxy script", config.proxy_script_path()),
        proxy_executable: inspect("mitmproxy", config.proxy_executable_path()),
        target_executable: inspect("Target executable", config.target_executable.clone()),
    };

    for item in report.items() {
        if item.found {
            sink.info(format!("{} found at {}", item.name, item.path.display()));
        } else {
            sink.error(format!("{} not found at {}", item.name, item.path.display()));
        }
    }

    report
}
