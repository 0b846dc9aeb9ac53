// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for conflate-core runtime tests.
//!
//! Provides a channel-backed transport whose sessions are driven from the
//! test as if it were the controller, and a host that records callbacks.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use conflate_core::dispatch::ResultBuilder;
use conflate_core::{AgentConfig, AgentHost, KvList};
use conflate_protocol::{ClientError, Credentials, Session, Stanza, Transport};

/// How long a test waits for the agent before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// Ordered record of callbacks and connection attempts.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// What the agent wrote to a session.
#[derive(Debug)]
pub enum Sent {
    Stanza(Stanza),
    Keepalive,
    Closed,
}

/// The controller's end of one mock session.
pub struct ControllerEnd {
    pub jid: String,
    to_agent: mpsc::UnboundedSender<Stanza>,
    from_agent: mpsc::UnboundedReceiver<Sent>,
}

impl ControllerEnd {
    pub fn send(&self, stanza: Stanza) {
        self.to_agent
            .send(stanza)
            .expect("Failed to send to agent session");
    }

    /// Next raw item written by the agent.
    pub async fn next(&mut self) -> Option<Sent> {
        tokio::time::timeout(WAIT, self.from_agent.recv())
            .await
            .expect("Timed out waiting for the agent")
    }

    /// Next stanza written by the agent, skipping keepalives.
    pub async fn next_stanza(&mut self) -> Stanza {
        loop {
            match self.next().await {
                Some(Sent::Stanza(stanza)) => return stanza,
                Some(Sent::Keepalive) => continue,
                other => panic!("Agent session ended: {:?}", other),
            }
        }
    }
}

pub struct MockSession {
    jid: String,
    inbound: mpsc::UnboundedReceiver<Stanza>,
    outbound: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl Session for MockSession {
    fn local_jid(&self) -> &str {
        &self.jid
    }

    async fn send(&mut self, stanza: &Stanza) -> Result<(), ClientError> {
        self.outbound
            .send(Sent::Stanza(stanza.clone()))
            .map_err(|_| ClientError::SessionClosed)
    }

    async fn send_keepalive(&mut self) -> Result<(), ClientError> {
        self.outbound
            .send(Sent::Keepalive)
            .map_err(|_| ClientError::SessionClosed)
    }

    async fn recv(&mut self) -> Result<Option<Stanza>, ClientError> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) {
        let _ = self.outbound.send(Sent::Closed);
    }
}

/// Transport handing each accepted session's controller end to the test.
pub struct MockTransport {
    pub attempts: AtomicUsize,
    fail_first: usize,
    accepted: mpsc::UnboundedSender<ControllerEnd>,
    log: EventLog,
}

impl MockTransport {
    /// A transport whose first `fail_first` connects are rejected.
    pub fn new(
        fail_first: usize,
        log: EventLog,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ControllerEnd>) {
        let (accepted, sessions) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            fail_first,
            accepted,
            log,
        });
        (transport, sessions)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Session>, ClientError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(format!("connect:{}", attempt));
        if attempt <= self.fail_first {
            return Err(ClientError::AuthenticationFailed("not-authorized".to_string()));
        }

        let (to_agent, inbound) = mpsc::unbounded_channel();
        let (outbound, from_agent) = mpsc::unbounded_channel();
        self.accepted
            .send(ControllerEnd {
                jid: credentials.jid.clone(),
                to_agent,
                from_agent,
            })
            .map_err(|_| ClientError::SessionClosed)?;

        Ok(Box::new(MockSession {
            jid: credentials.jid.clone(),
            inbound,
            outbound,
        }))
    }
}

/// Host recording every callback.
#[derive(Default)]
pub struct RecordingHost {
    pub log: EventLog,
    pub configs: Mutex<Vec<KvList>>,
}

impl RecordingHost {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn config_count(&self) -> usize {
        self.configs.lock().unwrap().len()
    }

    pub fn configs(&self) -> Vec<KvList> {
        self.configs.lock().unwrap().clone()
    }
}

impl AgentHost for RecordingHost {
    fn on_config(&self, config: &KvList) {
        self.log
            .lock()
            .unwrap()
            .push(format!("config:{}", config.len()));
        self.configs.lock().unwrap().push(config.clone());
    }

    fn on_get_stats(&self, kind: Option<&str>, _form: &KvList, stats: &mut ResultBuilder) {
        stats.add_field("kind", kind.unwrap_or("all"));
    }

    fn ping_server(&self, server: &str, _form: &KvList, report: &mut ResultBuilder) {
        report.add_field("status", format!("{} ok", server));
    }
}

/// A push configuration with short timers.
pub fn push_config(save_path: &std::path::Path) -> AgentConfig {
    let mut config = AgentConfig::new("agent@example.com/box", "secret", save_path)
        .with_host("controller.example.com");
    config.software = "memcached".to_string();
    config.version = "1.4.0".to_string();
    config.reconnect_delay = Duration::from_millis(20);
    config.keepalive_interval = Duration::from_secs(60);
    config.alarm_interval = Duration::from_secs(60);
    config
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future` with the test timeout.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("Timed out")
}
