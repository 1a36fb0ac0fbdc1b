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

//! Configuration module for the launcher

use crate::error::{LauncherError, Result};
use crate::proxy_options::ProxyOptions;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file name, stored next to the executable by default
pub const CONFIG_FILE: &str = "launcher.json";

/// Raw manifest describing the latest release
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/digimine9/CRMPlus/main/crmplus.json";

/// mitmproxy prints this once its listener is up
pub const DEFAULT_READINESS_MARKER: &str = "Proxy server started";

fn default_proxy_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("mitmproxy.exe")
    } else {
        PathBuf::from("/usr/local/bin/mitmproxy")
    }
}

fn default_proxy_script() -> PathBuf {
    PathBuf::from("proxy").join("proxy_script.py")
}

fn default_proxy_host() -> String {
    "localhost".to_owned()
}

fn default_8080() -> u16 {
    8080
}

fn default_no_proxy() -> String {
    "127.0.0.1,localhost".to_owned()
}

fn default_target_executable() -> PathBuf {
    PathBuf::from(
        r"C:\Program Files\Epic Games\Fortnite\FortniteGame\Binaries\Win64\FortniteLauncher.exe",
    )
}

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_owned()
}

fn default_readiness_marker() -> String {
    DEFAULT_READINESS_MARKER.to_owned()
}

fn default_10() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// mitmproxy executable; relative paths resolve against `base_dir`
    #[serde(default = "default_proxy_executable")]
    pub proxy_executable: PathBuf,

    /// Addon script passed to mitmproxy with `-s`
    #[serde(default = "default_proxy_script")]
    pub proxy_script: PathBuf,

    /// Working directory of the proxy; defaults to the executable's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,

    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,

    #[serde(default = "default_8080")]
    pub proxy_port: u16,

    /// Comma separated hosts that bypass the proxy
    #[serde(default = "default_no_proxy")]
    pub no_proxy: String,

    /// Application launched through the proxy
    #[serde(default = "default_target_executable")]
    pub target_executable: PathBuf,

    /// Update manifest location (overridable for testing)
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Substring in proxy stdout that signals readiness
    #[serde(default = "default_readiness_marker")]
    pub readiness_marker: String,

    /// How long to wait for the readiness marker after starting the proxy
    #[serde(default = "default_10")]
    pub grace_period_secs: u64,

    #[serde(default)]
    pub proxy_options: ProxyOptions,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            proxy_executable: default_proxy_executable(),
            proxy_script: default_proxy_script(),
            base_dir: None,
            proxy_host: default_proxy_host(),
            proxy_port: 8080,
            no_proxy: default_no_proxy(),
            target_executable: default_target_executable(),
            manifest_url: default_manifest_url(),
            readiness_marker: default_readiness_marker(),
            grace_period_secs: 10,
            proxy_options: ProxyOptions::default(),
        }
    }
}

impl LauncherConfig {
    /// Directory the proxy runs in and writes its option file to
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(executable_dir)
    }

    pub fn proxy_executable_path(&self) -> PathBuf {
        self.base_dir().join(&self.proxy_executable)
    }

    pub fn proxy_script_path(&self) -> PathBuf {
        self.base_dir().join(&self.proxy_script)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Arguments for `mitmproxy -s <script> --set block_global=false`
    pub fn proxy_args(&self) -> Vec<OsString> {
        vec![
            "-s".into(),
            self.proxy_script_path().into_os_string(),
            "--set".into(),
            "block_global=false".into(),
        ]
    }
}

/// Directory containing the running executable, or the working directory as a fallback
pub fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path() -> PathBuf {
    executable_dir().join(CONFIG_FILE)
}

/// Load config from `path`, creating it with defaults if it does not exist
pub fn load_config(path: &Path) -> Result<LauncherConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LauncherError::Config(format!("Failed to parse {}: {e}", path.display())))
    } else {
        let config = LauncherConfig::default();
        save_config(path, &config)?;
        tracing::info!("Created default config at {}", path.display());
        Ok(config)
    }
}

pub fn save_config(path: &Path, config: &LauncherConfig) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = LauncherConfig::default();
        assert_eq!(config.proxy_host, "localhost");
        assert_eq!(config.proxy_port, 8080);
        assert_eq!(config.no_proxy, "127.0.0.1,localhost");
        assert_eq!(config.readiness_marker, "Proxy server started");
        assert_eq!(config.grace_period(), Duration::from_secs(10));
        assert_eq!(config.manifest_url, DEFAULT_MANIFEST_URL);
        assert!(config.base_dir.is_none());
    }

    #[test]
    fn test_paths_resolve_against_base_dir() {
        let config = LauncherConfig {
            base_dir: Some(PathBuf::from("/opt/crm")),
            proxy_executable: PathBuf::from("bin/mitmproxy"),
            ..Default::default()
        };
        assert_eq!(
            config.proxy_executable_path(),
            PathBuf::from("/opt/crm/bin/mitmproxy")
        );
        assert_eq!(
            config.proxy_script_path(),
            PathBuf::from("/opt/crm/proxy/proxy_script.py")
        );

        let absolute = LauncherConfig {
            base_dir: Some(PathBuf::from("/opt/crm")),
            proxy_executable: PathBuf::from("/usr/bin/mitmproxy"),
            ..Default::default()
        };
        assert_eq!(
            absolute.proxy_executable_path(),
            PathBuf::from("/usr/bin/mitmproxy")
        );
    }

    #[test]
    fn test_proxy_args() {
        let config = LauncherConfig {
            base_dir: Some(PathBuf::from("/opt/crm")),
            ..Default::default()
        };
        let args = config.proxy_args();
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], "-s");
        assert_eq!(
            PathBuf::from(&args[1]),
            PathBuf::from("/opt/crm/proxy/proxy_script.py")
        );
        assert_eq!(args[2], "--set");
        assert_eq!(args[3], "block_global=false");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.proxy_port, 8080);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = LauncherConfig {
            proxy_port: 9090,
            grace_period_secs: 3,
            target_executable: PathBuf::from("/usr/bin/game"),
            ..Default::default()
        };

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.proxy_port, 9090);
        assert_eq!(loaded.grace_period_secs, 3);
        assert_eq!(loaded.target_executable, PathBuf::from("/usr/bin/game"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"proxy_port": 8888}"#).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.proxy_port, 8888);
        assert_eq!(loaded.proxy_host, "localhost");
        assert!(loaded.proxy_options.enable_all_skins);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(load_config(&path), Err(LauncherError::Config(_))));
    }
}
