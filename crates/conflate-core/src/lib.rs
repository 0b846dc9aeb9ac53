// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conflate Core - Configuration Distribution Agent
//!
//! This crate is embedded in an application to receive configuration from a
//! central controller, answer management commands, raise alarms, and keep
//! the last applied configuration on disk for restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │       Controller         │        │   HTTP config endpoints  │
//! │  (commands, pubsub)      │        │   (single-shot/stream)   │
//! └──────────────────────────┘        └──────────────────────────┘
//!              │ push                              │ pull
//!              ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AgentRuntime task                       │
//! │   PushLoop (session, keepalive, alarms) | PullLoop (GETs)   │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │     CommandRegistry      │───────►│     Store (SQLite)       │
//! │  serverlist, stats, ...  │        │  keys / vals / private   │
//! └──────────────────────────┘        └──────────────────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │   AgentHost callbacks    │        │       AlarmQueue         │
//! │   (the application)      │───────►│  (raised by any thread)  │
//! └──────────────────────────┘        └──────────────────────────┘
//! ```
//!
//! # Strategy selection
//!
//! A `host` whose first `|`-separated entry starts with `http:` or `https:`
//! selects the pull strategy; anything else, including no host, selects
//! the push strategy.
//!
//! # Commands
//!
//! | Command | Reply | Description |
//! |---------|-------|-------------|
//! | `serverlist` | empty | Persist and apply a new configuration |
//! | `client_stats` | stats form | Host statistics, optionally typed by `-subtype-` |
//! | `reset_stats` | empty | Reset host statistics |
//! | `ping_test` | one field-set per server | Probe each entry of `servers` |
//! | `version` | `name`, `version` | Software identification |
//! | `alarm` | `sequence` | Queue an alarm (`name`, `msg`) |
//!
//! # Configuration
//!
//! See [`config::AgentConfig::from_env`] for the environment variables.

pub mod alarm;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod kvlist;
pub mod persistence;
pub mod runtime;
pub mod transport;

pub use alarm::{Alarm, AlarmQueue, QueueState};
pub use config::{AgentConfig, ConfigError, Strategy};
pub use dispatch::{AgentContext, Command, CommandHandler, CommandRegistry, FieldSet, ResultBuilder};
pub use error::{CoreError, Result};
pub use host::AgentHost;
pub use kvlist::{KvList, KvPair};
pub use persistence::{SqliteStore, Store};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, AgentRuntimeConfig};
pub use transport::LinkState;
