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

//! Streaming binary downloader with progress reporting

use crate::error::{LauncherError, Result};
use futures_util::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Progress is reported each time the percentage advances by this much
const PROGRESS_STEP: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub bytes_read: u64,
    pub total_bytes: u64,
    /// Always within 0..=100
    pub percent_complete: u8,
}

impl DownloadProgress {
    fn new(bytes_read: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            100
        } else {
            #[expect(clippy::integer_division)]
            let whole = u128::from(bytes_read) * 100 / u128::from(total_bytes);
            whole.min(100)
        };
        Self {
            bytes_read,
            total_bytes,
            percent_complete: u8::try_from(percent).unwrap_or(100),
        }
    }
}

pub type ProgressCallback<'a> = &'a mut (dyn FnMut(DownloadProgress) + Send);

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crmplus-launcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| LauncherError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Download `url` into `destination`, returning the number of bytes written.
    ///
    /// With a known content length `on_progress` fires every 5 percentage
    /// points. Without one the body is copied and no progress is reported.
    /// On failure the partial file is left where it is.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        mut on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::Network(format!(
                "Download failed with status: {status}"
            )));
        }

        let total = response.content_length().filter(|&len| len > 0);
        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut bytes_read: u64 = 0;
        let mut last_reported: u8 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes_read += chunk.len() as u64;

            if let (Some(total), Some(callback)) = (total, on_progress.as_mut()) {
                let progress = DownloadProgress::new(bytes_read, total);
                if progress.percent_complete >= last_reported + PROGRESS_STEP {
                    last_reported = progress.percent_complete;
                    callback(progress);
                }
            }
        }

        file.flush().await?;
        tracing::debug!("Downloaded {bytes_read} bytes to {}", destination.display());
        Ok(bytes_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(DownloadProgress::new(50, 100).percent_complete, 50);
        assert_eq!(DownloadProgress::new(150, 100).percent_complete, 100);
        assert_eq!(DownloadProgress::new(0, 0).percent_complete, 100);
        assert_eq!(
            DownloadProgress::new(u64::MAX, u64::MAX).percent_complete,
            100
        );
    }

    #[tokio::test]
    async fn test_known_length_writes_all_bytes_with_progress() {
        let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/CRMPlus.exe")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("CRMPlus_new.exe");
        let mut seen = Vec::new();
        let mut record = |p: DownloadProgress| seen.push(p);

        let written = Downloader::new()
            .unwrap()
            .download(
                &format!("{}/CRMPlus.exe", server.url()),
                &dest,
                Some(&mut record),
            )
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0].percent_complete <= w[1].percent_complete));
        assert!(seen.iter().all(|p| p.percent_complete <= 100));
        assert!(seen.iter().all(|p| p.total_bytes == body.len() as u64));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_length_copies_without_progress() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/CRMPlus.exe")
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(b"first chunk ")?;
                w.write_all(b"second chunk")
            })
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("CRMPlus_new.exe");
        let mut calls = 0;
        let mut count = |_: DownloadProgress| calls += 1;

        let written = Downloader::new()
            .unwrap()
            .download(
                &format!("{}/CRMPlus.exe", server.url()),
                &dest,
                Some(&mut count),
            )
            .await
            .unwrap();

        assert_eq!(written, 24);
        assert_eq!(std::fs::read(&dest).unwrap(), b"first chunk second chunk");
        assert_eq!(calls, 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_is_network_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.exe")
            .with_status(404)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.exe");
        let result = Downloader::new()
            .unwrap()
            .download(&format!("{}/missing.exe", server.url()), &dest, None)
            .await;

        assert!(matches!(result, Err(LauncherError::Network(_))));
        assert!(!dest.exists());
        mock.assert_async().await;
    }
}
