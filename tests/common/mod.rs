#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for channel integration tests.
//!
//! Provides a scripted [`MockConnector`]: each dial either fails or yields
//! a [`MockTransport`] that replays frames at fixed offsets from the moment
//! the connection opened. Every dial is logged (URL, paused-clock instant,
//! sent messages) so tests can assert on redial schedules and outgoing
//! traffic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bingo_channel_client::{ChannelError, Connector, Transport};

// ── Scripted frames ─────────────────────────────────────────────────

/// One step in a connection's inbound script, due `after_ms` after the
/// connection opened. `frame: None` closes the connection.
pub struct ScriptedFrame {
    pub after_ms: u64,
    pub frame: Option<Result<String, ChannelError>>,
}

/// A text frame delivered `after_ms` after the connection opened.
pub fn msg(after_ms: u64, raw: impl Into<String>) -> ScriptedFrame {
    ScriptedFrame {
        after_ms,
        frame: Some(Ok(raw.into())),
    }
}

/// A transport error surfaced `after_ms` after the connection opened.
pub fn recv_err(after_ms: u64, text: &str) -> ScriptedFrame {
    ScriptedFrame {
        after_ms,
        frame: Some(Err(ChannelError::TransportReceive(text.into()))),
    }
}

/// A server-side close `after_ms` after the connection opened.
pub fn close(after_ms: u64) -> ScriptedFrame {
    ScriptedFrame {
        after_ms,
        frame: None,
    }
}

// ── Wire payload helpers ────────────────────────────────────────────

pub fn system_json(text: &str) -> String {
    format!(r#"{{"type":"system","data":{{"text":"{text}"}}}}"#)
}

pub fn chat_json(content: &str) -> String {
    format!(r#"{{"type":"message","data":{{"content":"{content}"}}}}"#)
}

// ── MockConnector ───────────────────────────────────────────────────

/// Outcome of one scripted dial.
pub enum DialScript {
    /// Accept the dial; the transport replays these frames, then idles.
    Accept(Vec<ScriptedFrame>),
    /// Refuse the dial with a connection error.
    Refuse,
}

/// Log entry for one dial the channel performed.
#[derive(Clone)]
pub struct DialLog {
    pub url: String,
    pub at: tokio::time::Instant,
    /// Messages the channel transmitted over this connection.
    pub sent: Arc<StdMutex<Vec<String>>>,
}

/// A [`Connector`] that records dials and follows a per-dial script.
///
/// Dials beyond the script are accepted with an empty frame list (the
/// connection opens and stays silent). Cloning yields another handle to
/// the same script and dial log, so a test keeps one handle for
/// inspection and hands the other to the channel.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    scripts: StdMutex<VecDeque<DialScript>>,
    dials: StdMutex<Vec<DialLog>>,
}

impl MockConnector {
    pub fn new(scripts: Vec<DialScript>) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                dials: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.inner.dials.lock().unwrap().len()
    }

    pub fn dial(&self, index: usize) -> DialLog {
        self.inner.dials.lock().unwrap()[index].clone()
    }

    /// Millisecond offsets of every dial relative to the first.
    pub fn dial_offsets_ms(&self) -> Vec<u64> {
        let dials = self.inner.dials.lock().unwrap();
        let Some(first) = dials.first() else {
            return Vec::new();
        };
        dials
            .iter()
            .map(|d| (d.at - first.at).as_millis() as u64)
            .collect()
    }

    /// Spin (on the paused clock) until `n` dials have been recorded.
    pub async fn wait_for_dials(&self, n: usize) {
        for _ in 0..200_000 {
            if self.dial_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {n} dials, saw only {}", self.dial_count());
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, url: &str) -> Result<MockTransport, ChannelError> {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let script = {
            let mut scripts = self.inner.scripts.lock().unwrap();
            self.inner.dials.lock().unwrap().push(DialLog {
                url: url.to_string(),
                at: tokio::time::Instant::now(),
                sent: Arc::clone(&sent),
            });
            scripts.pop_front()
        };
        match script.unwrap_or(DialScript::Accept(Vec::new())) {
            DialScript::Accept(frames) => Ok(MockTransport {
                opened_at: tokio::time::Instant::now(),
                frames: VecDeque::from(frames),
                sent,
            }),
            DialScript::Refuse => Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "dial refused by script",
            ))),
        }
    }
}

// ── MockTransport ───────────────────────────────────────────────────

/// Replays its script relative to `opened_at`, then idles forever.
pub struct MockTransport {
    opened_at: tokio::time::Instant,
    frames: VecDeque<ScriptedFrame>,
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        // Absolute deadline keeps this cancel-safe: a re-polled recv waits
        // for the same instant instead of restarting its delay.
        let deadline = match self.frames.front() {
            Some(step) => self.opened_at + Duration::from_millis(step.after_ms),
            None => return std::future::pending().await,
        };
        tokio::time::sleep_until(deadline).await;
        match self.frames.pop_front() {
            Some(step) => step.frame,
            None => None,
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}
