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

//! Line pumps for the proxy's stdout and stderr

use crate::error::LauncherError;
use crate::events::{EventSink, LogLevel, LogSource};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Invoked every time a stdout line contains the readiness marker
pub type ReadinessCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    fn source(self) -> LogSource {
        match self {
            Self::Stdout => LogSource::ProxyStdout,
            Self::Stderr => LogSource::ProxyStderr,
        }
    }

    fn level(self) -> LogLevel {
        match self {
            Self::Stdout => LogLevel::Info,
            Self::Stderr => LogLevel::Warn,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Forwards child output to the event sink and watches stdout for the readiness marker.
///
/// Each stream gets its own task, so a silent stderr never holds back stdout.
pub struct OutputStreamMonitor {
    sink: EventSink,
    marker: Arc<str>,
    on_ready: ReadinessCallback,
}

impl fmt::Debug for OutputStreamMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStreamMonitor")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

/// Join handles of the two reader tasks
#[derive(Debug)]
pub struct MonitorHandles {
    pub stdout: JoinHandle<()>,
    pub stderr: JoinHandle<()>,
}

impl MonitorHandles {
    /// Wait until both streams reached end-of-stream or failed
    pub async fn join(self) {
        let _ = tokio::join!(self.stdout, self.stderr);
    }
}

impl OutputStreamMonitor {
    pub fn new(sink: EventSink, marker: impl Into<Arc<str>>, on_ready: ReadinessCallback) -> Self {
        Self {
            sink,
            marker: marker.into(),
            on_ready,
        }
    }

    /// Start one reader task per stream
    pub fn spawn<O, E>(&self, stdout: O, stderr: E) -> MonitorHandles
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        MonitorHandles {
            stdout: self.watch(stdout, Channel::Stdout),
            stderr: self.watch(stderr, Channel::Stderr),
        }
    }

    /// Start a reader task for a single stream
    pub fn watch<R>(&self, reader: R, channel: Channel) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = self.sink.clone();
        let readiness = match channel {
            Channel::Stdout => Some((Arc::clone(&self.marker), Arc::clone(&self.on_ready))),
            Channel::Stderr => None,
        };

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        tracing::debug!("Proxy {channel} closed");
                        break;
                    }
                    Ok(_) => {
                        let line = decode_line(&buf);
                        if let Some((marker, on_ready)) = &readiness
                            && line.contains(marker.as_ref())
                        {
                            on_ready();
                        }
                        sink.log(channel.source(), channel.level(), line);
                    }
                    Err(source) => {
                        let err = LauncherError::StreamRead {
                            stream: channel.name(),
                            source,
                        };
                        sink.error(format!("Proxy output error: {err}"));
                        break;
                    }
                }
            }
        })
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8
fn decode_line(buf: &[u8]) -> String {
    let trimmed = buf
        .strip_suffix(b"\n")
        .map(|b| b.strip_suffix(b"\r").unwrap_or(b))
        .unwrap_or(buf);
    String::from_utf8_lossy(trimmed).into_owned()
}
