// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery strategies.
//!
//! Exactly one strategy runs per agent:
//!
//! - [`push`]: a persistent authenticated session; the controller sends
//!   commands and the agent replies. Reconnects forever after a fixed delay.
//! - [`pull`]: repeated or streaming HTTP GETs over an ordered endpoint
//!   list. Payloads are applied as configuration; nothing is replied.

pub mod forms;
pub mod pull;
pub mod push;

use tokio::sync::watch;

/// Observable state of the running strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Restoring the stored configuration.
    Starting,
    // Push
    Disconnected,
    Connecting,
    Connected,
    // Pull
    Idle,
    Fetching,
    Assembling,
    /// The strategy loop has exited.
    Stopped,
}

/// Resolves once shutdown was requested or the runtime handle is gone.
pub(crate) async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
