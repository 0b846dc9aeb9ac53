// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store.
//!
//! Every operation opens its own connection and closes it before returning;
//! nothing is held between calls. Tables are created on first use when
//! missing, existing tables are never altered.

use std::path::{Path, PathBuf};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};
use tracing::{debug, error, info, instrument};

use crate::error::CoreError;
use crate::kvlist::{KvList, KvPair};

use super::Store;

/// Path value that selects a private in-memory database per call.
pub const IN_MEMORY: &str = ":memory:";

/// Tables this store owns, with the statement creating each.
const SCHEMA: [(&str, &str); 3] = [
    (
        "keys",
        "create table keys (id integer primary key, name varchar(32))",
    ),
    ("vals", "create table vals (key_id integer, value varchar(64))"),
    (
        "private",
        "create table private (key varchar(256) primary key on conflict replace, value text not null)",
    ),
];

/// SQLite-backed [`Store`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Create a store for the database file at `path`.
    ///
    /// The file is created on first use. [`IN_MEMORY`] gives every call a
    /// fresh, empty database.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, CoreError> {
        let options = if self.path == Path::new(IN_MEMORY) {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };

        let mut conn = options.connect().await.map_err(|e| {
            error!(path = %self.path.display(), error = %e, "cannot open store");
            CoreError::storage("open", e)
        })?;

        ensure_schema(&mut conn).await?;
        Ok(conn)
    }
}

/// Create whichever owned tables are missing.
async fn ensure_schema(conn: &mut SqliteConnection) -> Result<(), CoreError> {
    let existing: Vec<String> =
        sqlx::query_scalar("select name from sqlite_master where type = 'table'")
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| CoreError::storage("list tables", e))?;

    for name in &existing {
        if SCHEMA.iter().any(|(table, _)| *table == name.as_str()) {
            debug!(table = %name, "found existing table");
        } else {
            debug!(table = %name, "ignoring unknown table");
        }
    }

    for (table, ddl) in SCHEMA {
        if existing.iter().any(|name| name == table) {
            continue;
        }
        sqlx::query(ddl)
            .execute(&mut *conn)
            .await
            .map_err(|e| CoreError::storage(format!("create table {}", table), e))?;
        info!(table, "created table");
    }

    Ok(())
}

/// Log a storage failure and hand it back for propagation.
fn logged(operation: &str, err: sqlx::Error) -> CoreError {
    error!(operation, error = %err, "store operation failed");
    CoreError::storage(operation, err)
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load_config(&self) -> Result<Option<KvList>, CoreError> {
        let mut conn = self.connect().await?;

        let rows = sqlx::query(
            r#"
            SELECT k.id, k.name, v.value
            FROM keys k LEFT JOIN vals v ON (k.id = v.key_id)
            ORDER BY k.id DESC, v.rowid
            "#,
        )
        .fetch_all(&mut conn)
        .await
        .map_err(|e| logged("load config", e))?;

        // Keys arrive last-saved first, so head insertion restores saved order.
        let mut config = KvList::new();
        let mut current: Option<i64> = None;
        for row in rows {
            let id: i64 = row.try_get(0).map_err(|e| logged("load config", e))?;
            let name: String = row.try_get(1).map_err(|e| logged("load config", e))?;
            let value: Option<String> = row.try_get(2).map_err(|e| logged("load config", e))?;

            if current != Some(id) {
                current = Some(id);
                config.push_front(KvPair::new(name, Vec::<String>::new())?);
            }
            if let (Some(value), Some(pair)) = (value, config.front_mut()) {
                pair.append_value(value);
            }
        }

        let _ = conn.close().await;

        if config.is_empty() {
            debug!("no stored configuration");
            Ok(None)
        } else {
            debug!(entries = config.len(), "loaded stored configuration");
            Ok(Some(config))
        }
    }

    #[instrument(skip(self, config), fields(path = %self.path.display()))]
    async fn save_config(&self, config: &KvList) -> Result<(), CoreError> {
        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await.map_err(|e| logged("begin", e))?;

        sqlx::query("DELETE FROM vals")
            .execute(&mut *tx)
            .await
            .map_err(|e| logged("clear vals", e))?;
        sqlx::query("DELETE FROM keys")
            .execute(&mut *tx)
            .await
            .map_err(|e| logged("clear keys", e))?;

        for pair in config {
            let key_id = sqlx::query("INSERT INTO keys (name) VALUES (?)")
                .bind(pair.key())
                .execute(&mut *tx)
                .await
                .map_err(|e| logged("insert key", e))?
                .last_insert_rowid();

            for value in pair.values() {
                sqlx::query("INSERT INTO vals (key_id, value) VALUES (?, ?)")
                    .bind(key_id)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| logged("insert value", e))?;
            }
        }

        tx.commit().await.map_err(|e| logged("commit", e))?;
        let _ = conn.close().await;

        debug!(entries = config.len(), "saved configuration");
        Ok(())
    }

    async fn get_private(&self, key: &str) -> Result<Option<String>, CoreError> {
        let mut conn = self.connect().await?;
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM private WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut conn)
            .await
            .map_err(|e| logged("get private", e))?;
        let _ = conn.close().await;
        Ok(value)
    }

    async fn set_private(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut conn = self.connect().await?;
        sqlx::query("INSERT INTO private (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut conn)
            .await
            .map_err(|e| logged("set private", e))?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn delete_private(&self, key: &str) -> Result<u64, CoreError> {
        let mut conn = self.connect().await?;
        let removed = sqlx::query("DELETE FROM private WHERE key = ?")
            .bind(key)
            .execute(&mut conn)
            .await
            .map_err(|e| logged("delete private", e))?
            .rows_affected();
        let _ = conn.close().await;
        Ok(removed)
    }
}
