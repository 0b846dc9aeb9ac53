// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conflate Agent - demo agent
//!
//! Runs the agent against the configured controller or HTTP endpoints and
//! logs every configuration it receives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tracing::{error, info};

use conflate_core::dispatch::ResultBuilder;
use conflate_core::{AgentConfig, AgentHost, AgentRuntime, KvList};

/// Logs applied configuration and serves sample stats.
#[derive(Default)]
struct LoggingHost {
    configs_applied: AtomicU64,
}

impl AgentHost for LoggingHost {
    fn on_config(&self, config: &KvList) {
        let n = self.configs_applied.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation = n, entries = config.len(), "Received configuration");
        for pair in config {
            info!(key = %pair.key(), values = ?pair.values(), "  config entry");
        }
    }

    fn on_get_stats(&self, kind: Option<&str>, _form: &KvList, stats: &mut ResultBuilder) {
        info!(kind = ?kind, "Stats requested");
        stats
            .add_field("kind", kind.unwrap_or("all"))
            .add_field(
                "configs_applied",
                self.configs_applied.load(Ordering::Relaxed).to_string(),
            );
    }

    fn on_reset_stats(&self, kind: Option<&str>, _form: &KvList) {
        info!(kind = ?kind, "Stats reset");
        self.configs_applied.store(0, Ordering::Relaxed);
    }

    fn ping_server(&self, server: &str, _form: &KvList, report: &mut ResultBuilder) {
        info!(%server, "Ping test");
        report.add_field("status", "skipped");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conflate_core=info".parse()?),
        )
        .init();

    info!("Starting Conflate Agent");

    // Load configuration
    let config = AgentConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        jid = %config.jid,
        strategy = ?config.strategy(),
        save_path = %config.save_path.display(),
        "Configuration loaded"
    );

    let runtime = AgentRuntime::builder()
        .config(config)
        .host(Arc::new(LoggingHost::default()))
        .build()?
        .start()
        .await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
