// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Push strategy: a persistent session with reconnect-after-delay.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> (delay) -> Connecting ...
//! ```
//!
//! While connected, one task multiplexes inbound stanzas, the keepalive
//! tick and the alarm drain tick.

use std::sync::Arc;
use std::time::Duration;

use conflate_protocol::{ClientError, Credentials, ErrorCondition, Session, Stanza, Transport};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use super::forms::{self, Route};
use super::{LinkState, stopped};
use crate::dispatch::{AgentContext, CommandRegistry};

/// Shortest keepalive or alarm period accepted.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Why a session ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Lost(String),
}

pub(crate) struct PushLoop {
    pub ctx: AgentContext,
    pub registry: Arc<CommandRegistry>,
    pub transport: Arc<dyn Transport>,
    pub credentials: Credentials,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
    pub alarm_interval: Duration,
    pub state: watch::Sender<LinkState>,
}

impl PushLoop {
    /// Connect, serve, and reconnect until shutdown.
    #[instrument(skip_all, fields(jid = %self.credentials.jid))]
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.state.send_replace(LinkState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                result = self.transport.connect(&self.credentials) => result,
            };

            match connected {
                Ok(mut session) => {
                    info!(local_jid = %session.local_jid(), "Connected");
                    self.state.send_replace(LinkState::Connected);

                    let end = self.serve(session.as_mut(), &mut shutdown_rx).await;
                    session.close().await;
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => warn!(%reason, "Session lost"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Connection failed");
                }
            }

            self.state.send_replace(LinkState::Disconnected);
            debug!(delay_ms = self.reconnect_delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.state.send_replace(LinkState::Stopped);
        info!("Push strategy stopped");
    }

    async fn serve(
        &self,
        session: &mut dyn Session,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        if let Err(e) = session.send(&forms::presence()).await {
            return SessionEnd::Lost(e.to_string());
        }

        let now = Instant::now();
        let keepalive_period = self.keepalive_interval.max(MIN_TICK);
        let mut keepalive = interval_at(now + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let alarm_period = self.alarm_interval.max(MIN_TICK);
        let mut alarm_tick = interval_at(now + alarm_period, alarm_period);
        alarm_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;

                _ = stopped(shutdown_rx) => return SessionEnd::Shutdown,

                inbound = session.recv() => match inbound {
                    Ok(Some(stanza)) => self.handle_stanza(session, &stanza).await,
                    Ok(None) => return SessionEnd::Lost("session closed by peer".to_string()),
                    Err(e) => Err(e),
                },

                _ = keepalive.tick() => session.send_keepalive().await,

                _ = alarm_tick.tick() => self.drain_alarms(session).await,
            };

            if let Err(e) = step {
                return SessionEnd::Lost(e.to_string());
            }
        }
    }

    async fn handle_stanza(
        &self,
        session: &mut dyn Session,
        stanza: &Stanza,
    ) -> Result<(), ClientError> {
        match forms::route(stanza) {
            Route::Version => {
                debug!(from = ?stanza.attr("from"), "Version query");
                let reply = forms::version_reply(stanza, &self.ctx.software, &self.ctx.version);
                session.send(&reply).await
            }
            Route::Disco => {
                let jid = session.local_jid().to_string();
                let commands = self.registry.commands();
                session
                    .send(&forms::disco_reply(stanza, &jid, &commands))
                    .await
            }
            Route::Command => {
                let reply = match forms::command_from_iq(stanza) {
                    Some(command) => match self.registry.dispatch(&self.ctx, &command).await {
                        Ok(result) => forms::command_reply(stanza, &result),
                        Err(e) => {
                            warn!(command = %command.name, error = %e, "Command failed");
                            Stanza::error_for(stanza, e.condition())
                        }
                    },
                    None => {
                        warn!("Command request without a node");
                        Stanza::error_for(stanza, ErrorCondition::BAD_REQUEST)
                    }
                };
                session.send(&reply).await
            }
            Route::Event => {
                match forms::command_from_event(stanza) {
                    Some(command) => {
                        info!(command = %command.name, "Pubsub command");
                        self.registry.notify(&self.ctx, &command).await;
                    }
                    None => debug!(from = ?stanza.attr("from"), "Message without a command item, ignoring"),
                }
                Ok(())
            }
            Route::Ignore => {
                debug!(name = %stanza.name, "Ignoring stanza");
                Ok(())
            }
        }
    }

    /// Send every queued alarm to the controller's domain.
    async fn drain_alarms(&self, session: &mut dyn Session) -> Result<(), ClientError> {
        loop {
            let alarm = self.ctx.alarms.dequeue();
            if !alarm.open {
                return Ok(());
            }
            debug!(sequence = alarm.sequence, name = %alarm.name, "Sending alarm");
            let message = forms::alarm_message(&alarm, self.credentials.domain());
            if let Err(e) = session.send(&message).await {
                warn!(
                    sequence = alarm.sequence,
                    name = %alarm.name,
                    error = %e,
                    "Alarm lost, send failed"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmQueue;
    use crate::host::AgentHost;
    use crate::kvlist::KvList;
    use crate::persistence::SqliteStore;
    use crate::persistence::sqlite::IN_MEMORY;
    use async_trait::async_trait;

    struct NullHost;

    impl AgentHost for NullHost {
        fn on_config(&self, _config: &KvList) {}
    }

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn connect(&self, _credentials: &Credentials) -> Result<Box<dyn Session>, ClientError> {
            Err(ClientError::SessionClosed)
        }
    }

    /// Accepts `accept` sends, then fails every later one.
    struct FlakySession {
        accept: usize,
        sent: Vec<Stanza>,
    }

    #[async_trait]
    impl Session for FlakySession {
        fn local_jid(&self) -> &str {
            "agent@example.com/box"
        }

        async fn send(&mut self, stanza: &Stanza) -> Result<(), ClientError> {
            if self.sent.len() == self.accept {
                return Err(ClientError::SessionClosed);
            }
            self.sent.push(stanza.clone());
            Ok(())
        }

        async fn send_keepalive(&mut self) -> Result<(), ClientError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Stanza>, ClientError> {
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    fn push_loop(alarms: Arc<AlarmQueue>) -> PushLoop {
        let (state, _) = watch::channel(LinkState::Starting);
        PushLoop {
            ctx: AgentContext {
                store: Arc::new(SqliteStore::new(IN_MEMORY)),
                alarms,
                host: Arc::new(NullHost),
                software: "memcached".to_string(),
                version: "1.4.0".to_string(),
            },
            registry: Arc::new(CommandRegistry::with_builtins()),
            transport: Arc::new(NoTransport),
            credentials: Credentials::new("agent@example.com/box", "secret"),
            reconnect_delay: Duration::from_millis(10),
            keepalive_interval: Duration::from_secs(60),
            alarm_interval: Duration::from_secs(60),
            state,
        }
    }

    #[tokio::test]
    async fn test_drain_sends_every_queued_alarm() {
        let alarms = Arc::new(AlarmQueue::default());
        alarms.enqueue("svc1", "disk full").unwrap();
        alarms.enqueue("svc2", "oom").unwrap();
        let push = push_loop(alarms.clone());

        let mut session = FlakySession {
            accept: usize::MAX,
            sent: Vec::new(),
        };
        push.drain_alarms(&mut session).await.unwrap();

        assert_eq!(session.sent.len(), 2);
        assert_eq!(session.sent[0].attr("to"), Some("example.com"));
        assert!(alarms.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_stops_drain_and_keeps_later_alarms() {
        let alarms = Arc::new(AlarmQueue::default());
        for name in ["a", "b", "c"] {
            alarms.enqueue(name, "msg").unwrap();
        }
        let push = push_loop(alarms.clone());

        let mut session = FlakySession {
            accept: 1,
            sent: Vec::new(),
        };
        let result = push.drain_alarms(&mut session).await;
        assert!(matches!(result, Err(ClientError::SessionClosed)));
        assert_eq!(session.sent.len(), 1);

        // The alarm whose send failed is gone; the rest wait for the next session
        assert_eq!(alarms.len(), 1);
        let next = alarms.dequeue();
        assert!(next.open);
        assert_eq!(next.sequence, 2);
        assert_eq!(next.name, "c");
    }
}
