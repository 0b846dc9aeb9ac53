// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote command dispatch for conflate-core.
//!
//! Commands are looked up by name in a [`CommandRegistry`] and run against a
//! shared [`AgentContext`]. Handlers report results through a
//! [`ResultBuilder`], which the push strategy turns into a data form reply.
//!
//! Built-in commands:
//!
//! | name           | reply required | effect                                   |
//! |----------------|----------------|------------------------------------------|
//! | `serverlist`   | no             | persist and apply the argument list      |
//! | `client_stats` | yes            | host stats, typed by `-subtype-`         |
//! | `reset_stats`  | no             | host stats reset, typed by `-subtype-`   |
//! | `ping_test`    | yes            | one field-set per entry of `servers`     |
//! | `version`      | no             | software name and version                |
//! | `alarm`        | no             | enqueue alarm `name` with message `msg`  |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::alarm::AlarmQueue;
use crate::error::{CoreError, Result};
use crate::host::AgentHost;
use crate::kvlist::KvList;
use crate::persistence::Store;

/// Field naming a field-set.
pub const SET_FIELD: &str = "-set-";

/// Argument carrying the stat type of `client_stats`/`reset_stats`.
pub const SUBTYPE_ARG: &str = "-subtype-";

pub const CMD_SERVERLIST: &str = "serverlist";
pub const CMD_CLIENT_STATS: &str = "client_stats";
pub const CMD_RESET_STATS: &str = "reset_stats";
pub const CMD_PING_TEST: &str = "ping_test";
pub const CMD_VERSION: &str = "version";
pub const CMD_ALARM: &str = "alarm";

/// Alarm name used when the `alarm` command carries none.
pub const DEFAULT_ALARM_NAME: &str = "alarm";

// ============================================================================
// Commands and results
// ============================================================================

/// A decoded remote command.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub args: KvList,
    /// True when the caller waits for a reply.
    pub direct: bool,
}

impl Command {
    /// A command expecting a reply.
    pub fn direct(name: impl Into<String>, args: KvList) -> Self {
        Self {
            name: name.into(),
            args,
            direct: true,
        }
    }

    /// A fire-and-forget command.
    pub fn notification(name: impl Into<String>, args: KvList) -> Self {
        Self {
            name: name.into(),
            args,
            direct: false,
        }
    }

    fn require_direct(&self) -> Result<()> {
        if self.direct {
            Ok(())
        } else {
            Err(CoreError::invalid_argument(
                "direct",
                format!("{} requires a reply channel", self.name),
            ))
        }
    }
}

/// One group of result fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<(String, Vec<String>)>,
}

impl FieldSet {
    pub fn fields(&self) -> &[(String, Vec<String>)] {
        &self.fields
    }

    /// Values of the first field named `key`.
    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The `-set-` tag, if any.
    pub fn name(&self) -> Option<&str> {
        self.value(SET_FIELD)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Accumulates the reply of one command.
///
/// Fields land in the top-level set until [`next_fieldset`](Self::next_fieldset)
/// opens a nested one; from then on they land in the newest set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultBuilder {
    top: FieldSet,
    sets: Vec<FieldSet>,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.current().fields.push((key.into(), vec![value.into()]));
        self
    }

    pub fn add_field_multi<I, V>(&mut self, key: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.current().fields.push((key.into(), values));
        self
    }

    /// Start a new field-set.
    pub fn next_fieldset(&mut self) -> &mut Self {
        self.sets.push(FieldSet::default());
        self
    }

    /// Fields added before the first field-set was opened.
    pub fn top(&self) -> &FieldSet {
        &self.top
    }

    /// Field-sets opened with `next_fieldset`, in order.
    pub fn fieldsets(&self) -> &[FieldSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.sets.is_empty()
    }

    fn current(&mut self) -> &mut FieldSet {
        match self.sets.last_mut() {
            Some(set) => set,
            None => &mut self.top,
        }
    }
}

// ============================================================================
// Handler context
// ============================================================================

/// Dependencies shared by every command handler.
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn Store>,
    pub alarms: Arc<AlarmQueue>,
    pub host: Arc<dyn AgentHost>,
    /// Software name reported by `version`.
    pub software: String,
    /// Software version reported by `version`.
    pub version: String,
}

impl AgentContext {
    /// Persist `config` and hand it to the host.
    ///
    /// A storage failure is logged; the configuration is applied regardless.
    pub async fn apply_config(&self, config: &KvList) {
        if let Err(e) = self.store.save_config(config).await {
            warn!(error = %e, "Failed to persist configuration, applying it anyway");
        }
        self.host.on_config(config);
        info!(entries = config.len(), "Configuration applied");
    }
}

impl fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentContext")
            .field("store", &"...")
            .field("alarms", &self.alarms.len())
            .field("host", &"...")
            .field("software", &self.software)
            .field("version", &self.version)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A remote command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &AgentContext,
        command: &Command,
        result: &mut ResultBuilder,
    ) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&AgentContext, &Command, &mut ResultBuilder) -> Result<()> + Send + Sync,
{
    async fn handle(
        &self,
        ctx: &AgentContext,
        command: &Command,
        result: &mut ResultBuilder,
    ) -> Result<()> {
        (self.0)(ctx, command, result)
    }
}

struct RegisteredCommand {
    description: String,
    handler: Arc<dyn CommandHandler>,
}

/// Name to handler table.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in commands.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(CMD_SERVERLIST, "Configure the server list", ServerList)
            .register(CMD_CLIENT_STATS, "Retrieves stats from the agent", ClientStats)
            .register(CMD_RESET_STATS, "Reset stats on the agent", ResetStats)
            .register(CMD_PING_TEST, "Perform a ping test", PingTest)
            .register(CMD_VERSION, "Report the agent software version", Version)
            .register(CMD_ALARM, "Create an alarm", RaiseAlarm);
        registry
    }

    /// Register `handler` under `name`, replacing any previous entry.
    pub fn register<H>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: H,
    ) -> &mut Self
    where
        H: CommandHandler + 'static,
    {
        let name = name.into();
        let entry = RegisteredCommand {
            description: description.into(),
            handler: Arc::new(handler),
        };
        if self.commands.insert(name.clone(), entry).is_some() {
            debug!(command = %name, "Replaced command handler");
        }
        self
    }

    /// Register a synchronous closure as a command.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&AgentContext, &Command, &mut ResultBuilder) -> Result<()> + Send + Sync + 'static,
    {
        self.register(name, description, FnHandler(handler))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(|c| c.description.as_str())
    }

    /// `(name, description)` pairs sorted by name.
    pub fn commands(&self) -> Vec<(&str, &str)> {
        let mut commands: Vec<(&str, &str)> = self
            .commands
            .iter()
            .map(|(name, c)| (name.as_str(), c.description.as_str()))
            .collect();
        commands.sort_unstable();
        commands
    }

    /// Run `command` and return what its handler reported.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unregistered name
    /// - whatever the handler returns
    #[instrument(skip(self, ctx, command), fields(command = %command.name, direct = command.direct))]
    pub async fn dispatch(&self, ctx: &AgentContext, command: &Command) -> Result<ResultBuilder> {
        let handler = self
            .commands
            .get(&command.name)
            .map(|c| c.handler.clone())
            .ok_or_else(|| CoreError::not_found(command.name.clone()))?;

        let mut result = ResultBuilder::new();
        handler.handle(ctx, command, &mut result).await?;
        debug!("Command completed");
        Ok(result)
    }

    /// Run a command nobody waits on. Failures are logged and dropped.
    pub async fn notify(&self, ctx: &AgentContext, command: &Command) {
        match self.dispatch(ctx, command).await {
            Ok(_) => {}
            Err(CoreError::NotFound { .. }) => {
                warn!(command = %command.name, "Unknown command in notification, dropping");
            }
            Err(e) => {
                warn!(command = %command.name, error = %e, "Notification failed, dropping");
            }
        }
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.commands().into_iter().map(|(name, _)| name))
            .finish()
    }
}

// ============================================================================
// Built-in commands
// ============================================================================

struct ServerList;

#[async_trait]
impl CommandHandler for ServerList {
    async fn handle(&self, ctx: &AgentContext, command: &Command, _: &mut ResultBuilder) -> Result<()> {
        ctx.apply_config(&command.args).await;
        Ok(())
    }
}

struct ClientStats;

#[async_trait]
impl CommandHandler for ClientStats {
    async fn handle(
        &self,
        ctx: &AgentContext,
        command: &Command,
        result: &mut ResultBuilder,
    ) -> Result<()> {
        command.require_direct()?;
        let kind = command.args.simple_value(SUBTYPE_ARG);
        ctx.host.on_get_stats(kind, &command.args, result);
        Ok(())
    }
}

struct ResetStats;

#[async_trait]
impl CommandHandler for ResetStats {
    async fn handle(&self, ctx: &AgentContext, command: &Command, _: &mut ResultBuilder) -> Result<()> {
        let kind = command.args.simple_value(SUBTYPE_ARG);
        ctx.host.on_reset_stats(kind, &command.args);
        Ok(())
    }
}

struct PingTest;

#[async_trait]
impl CommandHandler for PingTest {
    async fn handle(
        &self,
        ctx: &AgentContext,
        command: &Command,
        result: &mut ResultBuilder,
    ) -> Result<()> {
        command.require_direct()?;
        let servers = command
            .args
            .find("servers")
            .ok_or_else(|| CoreError::invalid_argument("servers", "required"))?;

        for server in servers.values() {
            result.next_fieldset().add_field(SET_FIELD, server.as_str());
            ctx.host.ping_server(server, &command.args, result);
        }
        Ok(())
    }
}

struct Version;

#[async_trait]
impl CommandHandler for Version {
    async fn handle(&self, ctx: &AgentContext, _: &Command, result: &mut ResultBuilder) -> Result<()> {
        result
            .add_field("name", ctx.software.as_str())
            .add_field("version", ctx.version.as_str());
        Ok(())
    }
}

struct RaiseAlarm;

#[async_trait]
impl CommandHandler for RaiseAlarm {
    async fn handle(
        &self,
        ctx: &AgentContext,
        command: &Command,
        result: &mut ResultBuilder,
    ) -> Result<()> {
        let name = command.args.simple_value("name").unwrap_or(DEFAULT_ALARM_NAME);
        let message = command.args.simple_value("msg").unwrap_or_default();
        let sequence = ctx.alarms.enqueue(name, message)?;
        result.add_field("sequence", sequence.to_string());
        Ok(())
    }
}
