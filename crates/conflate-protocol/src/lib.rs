// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conflate Protocol - QUIC + stanza communication layer
//!
//! This crate provides the wire protocol between configuration agents and
//! the controller that manages them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    conflate-protocol                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Sessions: Transport / Session traits, auth handshake       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: stanza trees as JSON (serde)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn), one bidirectional stream          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use conflate_protocol::{Credentials, QuicTransport, Stanza, Transport};
//!
//! let transport = QuicTransport::insecure("127.0.0.1:5222")?;
//! let mut session = transport
//!     .connect(&Credentials::new("agent@example.com/box", "secret"))
//!     .await?;
//!
//! session
//!     .send(&Stanza::new("presence").with_child(Stanza::new("priority").with_text("5")))
//!     .await?;
//!
//! while let Some(stanza) = session.recv().await? {
//!     // dispatch
//! }
//! ```

pub mod client;
pub mod frame;
pub mod server;
pub mod session;
pub mod stanza;

pub use client::{ClientError, ConflateClientConfig, QuicSession, QuicTransport};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use server::{ConflateServer, ConflateServerConfig, ServerError, ServerSession};
pub use session::{Credentials, Session, Transport};
pub use stanza::{ErrorCondition, Stanza, StanzaError};
