// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session abstraction used by the agent's push runtime.
//!
//! The runtime only sees [`Transport`] and [`Session`]; the QUIC client in
//! [`crate::client`] is one implementation, test doubles are another.

use std::fmt;

use async_trait::async_trait;

use crate::client::ClientError;
use crate::stanza::Stanza;

/// Credentials presented when a session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub jid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(jid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
        }
    }

    /// The domain part of the jid (`user@domain/resource` -> `domain`).
    pub fn domain(&self) -> &str {
        let rest = self.jid.split_once('@').map_or(self.jid.as_str(), |(_, d)| d);
        rest.split('/').next().unwrap_or(rest)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("jid", &self.jid)
            .field("password", &"***")
            .finish()
    }
}

/// Opens authenticated sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session and authenticate with `credentials`.
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Session>, ClientError>;
}

/// One authenticated, bidirectional stanza session.
#[async_trait]
pub trait Session: Send {
    /// The jid this session authenticated as.
    fn local_jid(&self) -> &str;

    async fn send(&mut self, stanza: &Stanza) -> Result<(), ClientError>;

    /// Send a protocol-level no-op.
    async fn send_keepalive(&mut self) -> Result<(), ClientError>;

    /// Receive the next inbound stanza.
    ///
    /// Returns `Ok(None)` once the peer has ended the session. Cancel-safe:
    /// dropping the future never loses a stanza.
    async fn recv(&mut self) -> Result<Option<Stanza>, ClientError>;

    /// End the session. Errors while closing are ignored.
    async fn close(&mut self);
}
