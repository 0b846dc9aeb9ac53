// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callbacks supplied by the embedding application.
//!
//! All callbacks run on the agent's runtime task, between protocol I/O
//! steps. They must return promptly.

use crate::dispatch::ResultBuilder;
use crate::kvlist::KvList;

/// The embedding application's side of the agent.
pub trait AgentHost: Send + Sync {
    /// A configuration was received or restored from storage.
    fn on_config(&self, config: &KvList);

    /// Report statistics of the given kind into `stats`.
    ///
    /// `kind` is the `-subtype-` argument, `form` the full argument list.
    fn on_get_stats(&self, kind: Option<&str>, form: &KvList, stats: &mut ResultBuilder) {
        let _ = (kind, form, stats);
    }

    /// Reset statistics of the given kind.
    fn on_reset_stats(&self, kind: Option<&str>, form: &KvList) {
        let _ = (kind, form);
    }

    /// Probe `server` and report the outcome into `report`.
    ///
    /// Called once per server of a ping test, each time inside a fresh
    /// field-set already tagged with the server name.
    fn ping_server(&self, server: &str, form: &KvList, report: &mut ResultBuilder) {
        let _ = (server, form, report);
    }
}
