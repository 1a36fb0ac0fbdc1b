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

//! CRM Plus launcher - runs a target application behind a supervised local
//! mitmproxy and keeps itself up to date from a remote manifest.
//!
//! The core reports through an [`events::EventSink`] and asks the user through
//! a [`prompt::Confirmer`]; it never talks to a terminal or window directly.

pub mod config;
pub mod error;
pub mod events;
pub mod launch;
pub mod monitor;
pub mod prompt;
pub mod proxy_options;
pub mod setup;
pub mod state;
pub mod supervisor;
pub mod update;
pub mod version;

pub use config::{LauncherConfig, load_config};
pub use error::{LauncherError, Result};
pub use events::{AppEvent, EventSink, Status};
pub use launch::{LaunchConfig, LaunchCoordinator, ProxyCommand};
pub use state::ProxyState;
pub use supervisor::{ProcessSupervisor, ProxyProcessHandle};
pub use update::{UpdateOutcome, Updater};
pub use version::{CURRENT_VERSION, is_newer};
