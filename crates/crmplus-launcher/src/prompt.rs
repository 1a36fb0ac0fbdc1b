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

//! Yes/no decisions delegated to the user

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::io::{BufRead, Write};

/// A question the core needs answered before continuing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub message: String,
}

impl Prompt {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\n{}", self.title, self.message)
    }
}

/// Front-end hook for confirmations
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Ask the user; `true` means proceed
    async fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Answers every prompt the same way and remembers what was asked
#[derive(Debug, Default)]
pub struct AutoConfirm {
    answer: bool,
    asked: Mutex<Vec<Prompt>>,
}

impl AutoConfirm {
    pub fn yes() -> Self {
        Self {
            answer: true,
            asked: Mutex::default(),
        }
    }

    pub fn no() -> Self {
        Self::default()
    }

    /// Prompts seen so far, oldest first
    pub fn asked(&self) -> Vec<Prompt> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        tracing::debug!("Auto-answering '{}' with {}", prompt.title, self.answer);
        self.asked.lock().push(prompt.clone());
        self.answer
    }
}

/// Reads `y/N` from standard input
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        let text = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{text}\n[y/N] ");
            let _ = stdout.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                tracing::warn!("Failed to read answer: {e}");
                false
            }
            Err(e) => {
                tracing::warn!("Prompt task failed: {e}");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
