// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for conflate-core.
//!
//! Two independent data sets are stored:
//! - the last applied configuration snapshot, rewritten whole on every save
//! - a private key/value table for agent-internal state

pub mod sqlite;

pub use self::sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::kvlist::KvList;

/// Persistence interface used by the runtime and command handlers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the stored configuration snapshot, `None` when nothing is stored.
    async fn load_config(&self) -> Result<Option<KvList>, CoreError>;

    /// Atomically replace the stored snapshot with `config`.
    async fn save_config(&self, config: &KvList) -> Result<(), CoreError>;

    async fn get_private(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Insert or replace a private value.
    async fn set_private(&self, key: &str, value: &str) -> Result<(), CoreError>;

    /// Delete a private value, returning the number of rows removed.
    ///
    /// Deleting a missing key succeeds with 0.
    async fn delete_private(&self, key: &str) -> Result<u64, CoreError>;
}
