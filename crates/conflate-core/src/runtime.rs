// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable agent runtime.
//!
//! This module provides [`AgentRuntime`], which runs the configured delivery
//! strategy on one spawned task inside an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conflate_core::{AgentConfig, AgentHost, AgentRuntime, KvList};
//!
//! struct App;
//!
//! impl AgentHost for App {
//!     fn on_config(&self, config: &KvList) {
//!         // apply the server list ...
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AgentConfig::new("agent@example.com/box", "secret", "/var/lib/agent.db")
//!         .with_host("controller.example.com");
//!
//!     let runtime = AgentRuntime::builder()
//!         .config(config)
//!         .host(Arc::new(App))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.raise_alarm("disk", "disk almost full")?;
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use conflate_protocol::{ConflateClientConfig, Credentials, QuicTransport, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alarm::AlarmQueue;
use crate::config::{AgentConfig, Strategy};
use crate::dispatch::{AgentContext, CommandRegistry};
use crate::host::AgentHost;
use crate::persistence::{SqliteStore, Store};
use crate::transport::LinkState;
use crate::transport::pull::PullLoop;
use crate::transport::push::PushLoop;

/// Builder for creating an [`AgentRuntime`].
#[derive(Default)]
pub struct AgentRuntimeBuilder {
    config: Option<AgentConfig>,
    host: Option<Arc<dyn AgentHost>>,
    store: Option<Arc<dyn Store>>,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<CommandRegistry>,
    alarms: Option<Arc<AlarmQueue>>,
}

impl std::fmt::Debug for AgentRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntimeBuilder")
            .field("config", &self.config)
            .field("host", &self.host.as_ref().map(|_| "..."))
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("transport", &self.transport.as_ref().map(|_| "..."))
            .field("registry", &self.registry)
            .finish()
    }
}

impl AgentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent configuration (required).
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the application callbacks (required).
    pub fn host(mut self, host: Arc<dyn AgentHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Set the persistence layer.
    ///
    /// Default: [`SqliteStore`] at the configured `save_path`
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the session transport used by the push strategy.
    ///
    /// Default: [`QuicTransport`] configured from the agent configuration
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the command table.
    ///
    /// Default: [`CommandRegistry::with_builtins`]
    pub fn registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an existing alarm queue.
    pub fn alarms(mut self, alarms: Arc<AlarmQueue>) -> Self {
        self.alarms = Some(alarms);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<AgentRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let host = self
            .host
            .ok_or_else(|| anyhow::anyhow!("host is required"))?;

        let strategy = config.strategy();

        Ok(AgentRuntimeConfig {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(SqliteStore::new(&config.save_path))),
            registry: self.registry.unwrap_or_else(CommandRegistry::with_builtins),
            alarms: self.alarms.unwrap_or_default(),
            transport: self.transport,
            strategy,
            config,
            host,
        })
    }
}

/// Configuration for an [`AgentRuntime`].
pub struct AgentRuntimeConfig {
    config: AgentConfig,
    strategy: Strategy,
    host: Arc<dyn AgentHost>,
    store: Arc<dyn Store>,
    transport: Option<Arc<dyn Transport>>,
    registry: CommandRegistry,
    alarms: Arc<AlarmQueue>,
}

impl std::fmt::Debug for AgentRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntimeConfig")
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .field("registry", &self.registry)
            .finish()
    }
}

impl AgentRuntimeConfig {
    /// Start the runtime, spawning the strategy task.
    ///
    /// The stored configuration is handed to the host on that task before
    /// any network activity.
    pub async fn start(self) -> Result<AgentRuntime> {
        let ctx = AgentContext {
            store: self.store.clone(),
            alarms: self.alarms.clone(),
            host: self.host,
            software: self.config.software.clone(),
            version: self.config.version.clone(),
        };
        let (state_tx, state_rx) = watch::channel(LinkState::Starting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = match &self.strategy {
            Strategy::Push { server } => {
                let transport: Arc<dyn Transport> = match self.transport {
                    Some(transport) => transport,
                    None => Arc::new(QuicTransport::new(client_config(&self.config, server))?),
                };
                let push = PushLoop {
                    ctx: ctx.clone(),
                    registry: Arc::new(self.registry),
                    transport,
                    credentials: Credentials::new(&self.config.jid, &self.config.password),
                    reconnect_delay: self.config.reconnect_delay,
                    keepalive_interval: self.config.keepalive_interval,
                    alarm_interval: self.config.alarm_interval,
                    state: state_tx,
                };
                tokio::spawn(async move {
                    restore_config(&ctx).await;
                    push.run(shutdown_rx).await;
                })
            }
            Strategy::Pull { endpoints } => {
                let client = reqwest::Client::builder()
                    .connect_timeout(self.config.connect_timeout)
                    .build()?;
                let auth = (!self.config.jid.is_empty())
                    .then(|| (self.config.jid.clone(), self.config.password.clone()));
                let pull = PullLoop {
                    ctx: ctx.clone(),
                    client,
                    endpoints: endpoints.clone(),
                    auth,
                    retry_delay: self.config.poll_retry_delay,
                    state: state_tx,
                };
                tokio::spawn(async move {
                    restore_config(&ctx).await;
                    pull.run(shutdown_rx).await;
                })
            }
        };

        info!(strategy = ?self.strategy, "AgentRuntime started");

        Ok(AgentRuntime {
            handle,
            shutdown_tx,
            state: state_rx,
            strategy: self.strategy,
            alarms: self.alarms,
            store: self.store,
        })
    }
}

fn client_config(config: &AgentConfig, server: &Option<String>) -> ConflateClientConfig {
    ConflateClientConfig {
        server: server.clone(),
        dangerous_skip_cert_verification: config.dangerous_skip_cert_verification,
        connect_timeout_ms: config.connect_timeout.as_millis() as u64,
        ..Default::default()
    }
}

/// Hand the last stored configuration to the host, if there is one.
async fn restore_config(ctx: &AgentContext) {
    match ctx.store.load_config().await {
        Ok(Some(config)) => {
            info!(entries = config.len(), "Restored stored configuration");
            ctx.host.on_config(&config);
        }
        Ok(None) => debug!("No stored configuration"),
        Err(e) => warn!(error = %e, "Failed to load stored configuration"),
    }
}

/// A running agent.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Dropping
/// the handle also stops the strategy task at its next checkpoint.
pub struct AgentRuntime {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    state: watch::Receiver<LinkState>,
    strategy: Strategy,
    alarms: Arc<AlarmQueue>,
    store: Arc<dyn Store>,
}

impl AgentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new()
    }

    /// The delivery strategy selected at startup.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// The alarm queue drained by the push strategy.
    pub fn alarms(&self) -> &Arc<AlarmQueue> {
        &self.alarms
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Current strategy state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// A receiver following strategy state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Queue an alarm for delivery, returning its sequence number.
    pub fn raise_alarm(&self, name: &str, message: &str) -> crate::error::Result<u64> {
        self.alarms.enqueue(name, message)
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the strategy task to stop and waits for it to complete. An
    /// in-flight connect or GET is abandoned.
    pub async fn shutdown(self) -> Result<()> {
        info!("AgentRuntime shutting down...");

        // Signal shutdown
        let _ = self.shutdown_tx.send(true);

        match self.handle.await {
            Ok(()) => {
                info!("AgentRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("AgentRuntime task panicked: {}", e);
                Err(anyhow::anyhow!("agent task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
