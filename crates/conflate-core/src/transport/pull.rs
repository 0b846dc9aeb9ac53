// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pull strategy: poll an ordered list of HTTP endpoints.
//!
//! Each pass walks the endpoints in order. A GET that completes without
//! error ends the pass early, so the next pass starts again at the first
//! endpoint. Passes are separated by `poll_retry_delay`.
//!
//! A response may stream several payloads over one long-lived request.
//! A payload ends where the received bytes end with [`END_OF_MESSAGE`];
//! whatever is left when the body completes is one more payload.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::{LinkState, stopped};
use crate::dispatch::AgentContext;
use crate::error::Result;
use crate::kvlist::KvList;

/// Key under which a pulled payload is delivered.
pub const CONFIG_KEY: &str = "rest";

/// Marks the end of one payload in a streamed response.
pub const END_OF_MESSAGE: &[u8] = b"\n\n\n\n";

/// Size of one response buffer segment.
pub const SEGMENT_SIZE: usize = 1024;

/// A response body held in fixed-size segments.
///
/// Appending never moves bytes already received; a full segment is
/// followed by a fresh one.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    segments: Vec<BytesMut>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let full = self
                .segments
                .last()
                .is_none_or(|segment| segment.len() == SEGMENT_SIZE);
            if full {
                self.segments.push(BytesMut::with_capacity(SEGMENT_SIZE));
            }
            if let Some(segment) = self.segments.last_mut() {
                let n = (SEGMENT_SIZE - segment.len()).min(data.len());
                segment.extend_from_slice(&data[..n]);
                data = &data[n..];
            }
        }
    }

    /// True when the buffered bytes end with `pattern`, wherever the
    /// segment boundaries fall.
    pub fn ends_with(&self, pattern: &[u8]) -> bool {
        let mut tail = self
            .segments
            .iter()
            .rev()
            .flat_map(|segment| segment.iter().rev());
        pattern.iter().rev().all(|byte| tail.next() == Some(byte))
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(BytesMut::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Concatenate and release every segment, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        let mut assembled = BytesMut::with_capacity(self.len());
        for segment in self.segments.drain(..) {
            assembled.extend_from_slice(&segment);
        }
        assembled.freeze()
    }
}

/// Turn an assembled payload into a configuration.
///
/// The end-of-message marker is stripped. An empty payload, or one that is
/// not valid UTF-8, yields `None`.
pub fn payload_config(payload: &[u8]) -> Option<KvList> {
    let body = payload.strip_suffix(END_OF_MESSAGE).unwrap_or(payload);
    if body.is_empty() {
        return None;
    }
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(e) => {
            warn!(bytes = body.len(), error = %e, "Skipping payload that is not valid UTF-8");
            return None;
        }
    };
    KvList::make(CONFIG_KEY, [text]).ok()
}

pub(crate) struct PullLoop {
    pub ctx: AgentContext,
    pub client: reqwest::Client,
    pub endpoints: Vec<String>,
    /// Basic auth user and password, if any.
    pub auth: Option<(String, String)>,
    pub retry_delay: Duration,
    pub state: watch::Sender<LinkState>,
}

impl PullLoop {
    /// Poll until shutdown.
    #[instrument(skip_all, fields(endpoints = self.endpoints.len()))]
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        'passes: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let mut succeeded = false;
            for endpoint in &self.endpoints {
                self.state.send_replace(LinkState::Fetching);
                let fetched = tokio::select! {
                    biased;
                    _ = stopped(&mut shutdown_rx) => break 'passes,
                    result = self.fetch(endpoint) => result,
                };

                match fetched {
                    Ok(delivered) => {
                        debug!(%endpoint, delivered, "Endpoint completed");
                        succeeded = true;
                        break;
                    }
                    Err(e) => warn!(%endpoint, error = %e, "Endpoint failed"),
                }
            }

            self.state.send_replace(LinkState::Idle);
            if !succeeded {
                warn!("Could not contact any configuration endpoint");
            }
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        self.state.send_replace(LinkState::Stopped);
        info!("Pull strategy stopped");
    }

    /// GET one endpoint, applying every payload it delivers.
    ///
    /// Returns the number of payloads applied.
    async fn fetch(&self, endpoint: &str) -> Result<usize> {
        let mut request = self.client.get(endpoint);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let mut response = request.send().await?.error_for_status()?;

        // Owned by this request only.
        let mut buffer = ResponseBuffer::new();
        let mut delivered = 0;
        while let Some(chunk) = response.chunk().await? {
            buffer.append(&chunk);
            if buffer.ends_with(END_OF_MESSAGE) && self.deliver(buffer.take()).await {
                delivered += 1;
            }
        }
        if self.deliver(buffer.take()).await {
            delivered += 1;
        }
        Ok(delivered)
    }

    async fn deliver(&self, payload: Bytes) -> bool {
        let Some(config) = payload_config(&payload) else {
            return false;
        };
        self.state.send_replace(LinkState::Assembling);
        info!(bytes = payload.len(), "Received configuration payload");
        self.ctx.apply_config(&config).await;
        self.state.send_replace(LinkState::Fetching);
        true
    }
}
