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

//! Swapping the running executable for a downloaded one
//!
//! A running binary cannot replace itself on every platform, so the swap is
//! handed to a small script that waits for this process to exit, deletes the
//! old file, moves the new one into place, relaunches it and removes itself.

use crate::error::{LauncherError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Base name of the generated restart script
const SCRIPT_STEM: &str = "update_crm";

/// Seconds the script waits for the old process to exit
const RESTART_DELAY_SECS: u32 = 3;

/// Used when the running executable cannot be determined
pub const DEFAULT_EXECUTABLE_NAME: &str = "CRMPlus.exe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ApplyOutcome {
    /// Restart script written; run it and exit to finish the update
    RestartReady { script: PathBuf, new_binary: PathBuf },
    /// No script support on this platform; the user replaces the file
    ManualReplace { new_binary: PathBuf },
}

impl ApplyOutcome {
    pub fn new_binary(&self) -> &Path {
        match self {
            Self::RestartReady { new_binary, .. } | Self::ManualReplace { new_binary } => {
                new_binary
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// Windows `cmd` batch file
    Batch,
    /// POSIX `sh`
    Shell,
}

impl ScriptFlavor {
    /// Script flavor for the current OS, if it has one
    pub fn native() -> Option<Self> {
        if cfg!(windows) {
            Some(Self::Batch)
        } else if cfg!(unix) {
            Some(Self::Shell)
        } else {
            None
        }
    }

    pub fn file_name(self) -> String {
        match self {
            Self::Batch => format!("{SCRIPT_STEM}.bat"),
            Self::Shell => format!("{SCRIPT_STEM}.sh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateScript {
    pub path: PathBuf,
    pub content: String,
}

impl UpdateScript {
    fn write(&self) -> Result<()> {
        std::fs::write(&self.path, &self.content)?;
        set_executable(&self.path)?;
        tracing::info!("Created update script: {}", self.path.display());
        Ok(())
    }
}

/// Path of the running executable
pub fn current_executable() -> Result<PathBuf> {
    std::env::current_exe().map_err(|e| {
        LauncherError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot determine current executable path: {e}"),
        ))
    })
}

/// `CRMPlus.exe` -> `CRMPlus_new.exe`, `crmplus` -> `crmplus_new`
pub fn new_executable_name(current: &str) -> String {
    match current.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = current.split_at(dot);
            format!("{stem}_new{ext}")
        }
        Some(_) | None => format!("{current}_new"),
    }
}

/// Sibling of `current` where the download is stored
pub fn new_executable_path(current: &Path) -> PathBuf {
    let name = current
        .file_name()
        .map_or_else(|| DEFAULT_EXECUTABLE_NAME.into(), |n| n.to_string_lossy());
    current.with_file_name(new_executable_name(&name))
}

/// Build the restart script for `current`, placed in the same directory
pub fn render_script(flavor: ScriptFlavor, current: &Path, new_binary: &Path) -> UpdateScript {
    let dir = current.parent().unwrap_or_else(|| Path::new("."));
    let content = match flavor {
        ScriptFlavor::Batch => render_batch(current, new_binary),
        ScriptFlavor::Shell => render_shell(current, new_binary),
    };
    UpdateScript {
        path: dir.join(flavor.file_name()),
        content,
    }
}

fn render_batch(current: &Path, new_binary: &Path) -> String {
    let current_name = current
        .file_name()
        .map_or_else(|| DEFAULT_EXECUTABLE_NAME.into(), |n| n.to_string_lossy());
    let current = current.display();
    let new_binary = new_binary.display();
    // `ping -n N` waits N-1 seconds
    let pings = RESTART_DELAY_SECS + 1;

    [
        "@echo off".to_owned(),
        "echo Updating CRM Plus...".to_owned(),
        format!("ping -n {pings} 127.0.0.1 > nul"),
        format!("if exist \"{current}\" ("),
        format!("    del \"{current}\""),
        ")".to_owned(),
        format!("if exist \"{new_binary}\" ("),
        format!("    rename \"{new_binary}\" \"{current_name}\""),
        format!("    start \"\" \"{current}\""),
        ")".to_owned(),
        "del \"%~f0\"".to_owned(),
        String::new(),
    ]
    .join("\r\n")
}

fn render_shell(current: &Path, new_binary: &Path) -> String {
    let current = shell_quote(current);
    let new_binary = shell_quote(new_binary);

    format!(
        "#!/bin/sh\n\
         echo 'Updating CRM Plus...'\n\
         sleep {RESTART_DELAY_SECS}\n\
         if [ -e {current} ]; then\n    rm -f {current}\nfi\n\
         if [ -e {new_binary} ]; then\n    mv {new_binary} {current}\n    {current} >/dev/null 2>&1 &\nfi\n\
         rm -f \"$0\"\n"
    )
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    let _ = path;
    Ok(())
}

/// Prepare the swap of `current` for `downloaded` using the native script flavor
pub fn apply(downloaded: &Path, current: &Path) -> Result<ApplyOutcome> {
    apply_with(ScriptFlavor::native(), downloaded, current)
}

pub fn apply_with(
    flavor: Option<ScriptFlavor>,
    downloaded: &Path,
    current: &Path,
) -> Result<ApplyOutcome> {
    if !downloaded.exists() {
        return Err(LauncherError::not_found("downloaded update", downloaded));
    }
    set_executable(downloaded)?;

    let Some(flavor) = flavor else {
        tracing::info!(
            "Update saved to {}; replace {} manually",
            downloaded.display(),
            current.display()
        );
        return Ok(ApplyOutcome::ManualReplace {
            new_binary: downloaded.to_path_buf(),
        });
    };

    let script = render_script(flavor, current, downloaded);
    script.write()?;

    Ok(ApplyOutcome::RestartReady {
        script: script.path,
        new_binary: downloaded.to_path_buf(),
    })
}

/// Start the restart script detached from this process.
///
/// The caller is expected to exit right after so the script can replace the
/// executable.
pub fn launch_script(script: &Path) -> Result<()> {
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/c").arg("start").arg("").arg(script);
        c
    } else {
        let mut c = Command::new("/bin/sh");
        c.arg(script);
        c
    };

    if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
        command.current_dir(dir);
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| LauncherError::ProcessStart {
            path: script.to_path_buf(),
            source,
        })?;

    tracing::info!("Launched update script {}", script.display());
    Ok(())
}
