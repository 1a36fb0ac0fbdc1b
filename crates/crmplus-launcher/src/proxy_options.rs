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

//! Option file consumed by the proxy script

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name the proxy script reads from its working directory
pub const OPTIONS_FILE: &str = "config.json";

fn default_true() -> bool {
    true
}

/// Cosmetic unlock flags passed to the proxy script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    #[serde(default = "default_true")]
    pub enable_all_skins: bool,
    #[serde(default = "default_true")]
    pub enable_all_backblings: bool,
    #[serde(default = "default_true")]
    pub enable_all_pickaxes: bool,
    #[serde(default = "default_true")]
    pub enable_all_emotes: bool,
    #[serde(default = "default_true")]
    pub enable_all_wraps: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            enable_all_skins: true,
            enable_all_backblings: true,
            enable_all_pickaxes: true,
            enable_all_emotes: true,
            enable_all_wraps: true,
        }
    }
}

impl ProxyOptions {
    /// Write `config.json` into `dir`, returning the written path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(OPTIONS_FILE);
        std::fs::write(&path, serde_json::to_string(self)?)?;
        Ok(path)
    }
}
