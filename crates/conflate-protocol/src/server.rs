// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server side of the session protocol.
//!
//! Controllers use this to accept agent sessions; the agent's integration
//! tests use it as a loopback peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, Endpoint, RecvStream, SendStream, ServerConfig, TransportConfig};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::frame::{Frame, FrameError, FramedStream};
use crate::session::Credentials;
use crate::stanza::Stanza;

/// Errors that can occur in the QUIC server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("authentication rejected for {0}")]
    Rejected(String),

    #[error("peer sent <{0}> before authenticating")]
    NotAuthenticated(String),

    #[error("server closed")]
    Closed,
}

/// Configuration for the QUIC server
#[derive(Debug, Clone)]
pub struct ConflateServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM format)
    pub cert_pem: Vec<u8>,
    /// TLS private key (PEM format)
    pub key_pem: Vec<u8>,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
}

impl Default for ConflateServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::client::DEFAULT_PORT)),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            idle_timeout_ms: 180_000,
        }
    }
}

/// QUIC server accepting agent sessions
pub struct ConflateServer {
    endpoint: Endpoint,
}

impl ConflateServer {
    /// Create a new server with the given configuration
    pub fn new(config: ConflateServerConfig) -> Result<Self, ServerError> {
        let server_config = Self::build_server_config(&config)?;
        let endpoint = Endpoint::server(server_config, config.bind_addr)?;

        info!(addr = %config.bind_addr, "QUIC server bound");

        Ok(Self { endpoint })
    }

    /// Create a server with a self-signed certificate for local development
    pub fn localhost(bind_addr: SocketAddr) -> Result<Self, ServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        Self::new(ConflateServerConfig {
            bind_addr,
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: cert.key_pair.serialize_pem().into_bytes(),
            ..Default::default()
        })
    }

    fn build_server_config(config: &ConflateServerConfig) -> Result<ServerConfig, ServerError> {
        let certs = rustls_pemfile::certs(&mut config.cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Tls(format!("failed to parse certificates: {}", e)))?;

        let key = rustls_pemfile::private_key(&mut config.key_pem.as_slice())
            .map_err(|e| ServerError::Tls(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

        let crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        let idle_timeout = Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .map_err(|_| ServerError::Tls("idle timeout out of range".to_string()))?;
        transport.max_idle_timeout(Some(idle_timeout));

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| ServerError::Tls(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(transport));

        Ok(server_config)
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accept the next agent session.
    ///
    /// Waits for a connection and for the agent to open its session stream.
    #[instrument(skip(self))]
    pub async fn accept(&self) -> Result<ServerSession, ServerError> {
        loop {
            let incoming = self.endpoint.accept().await.ok_or(ServerError::Closed)?;
            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };
            debug!(remote = %connection.remote_address(), "accepted connection");

            let (send, recv) = connection.accept_bi().await?;
            return Ok(ServerSession {
                connection,
                send: FramedStream::new(send),
                recv: FramedStream::new(recv),
            });
        }
    }

    /// Close the server
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"server closing");
    }
}

/// The controller's end of one agent session.
pub struct ServerSession {
    connection: Connection,
    send: FramedStream<SendStream>,
    recv: FramedStream<RecvStream>,
}

impl ServerSession {
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Read the agent's `auth` stanza and answer it.
    ///
    /// `check` decides whether the presented credentials are accepted.
    pub async fn authenticate<F>(&mut self, check: F) -> Result<Credentials, ServerError>
    where
        F: FnOnce(&Credentials) -> bool,
    {
        let auth = self.recv.read_stanza().await?.ok_or(ServerError::Closed)?;
        if auth.name != "auth" {
            return Err(ServerError::NotAuthenticated(auth.name));
        }

        let credentials = Credentials::new(
            auth.attr("jid").unwrap_or_default(),
            auth.text().unwrap_or_default(),
        );

        if check(&credentials) {
            self.send(&Stanza::new("success")).await?;
            Ok(credentials)
        } else {
            self.send(&Stanza::new("failure").with_text("not-authorized"))
                .await?;
            Err(ServerError::Rejected(credentials.jid))
        }
    }

    pub async fn send(&mut self, stanza: &Stanza) -> Result<(), ServerError> {
        Ok(self.send.write_stanza(stanza).await?)
    }

    /// Read the next raw frame, keepalives included.
    pub async fn recv_frame(&mut self) -> Result<Frame, ServerError> {
        Ok(self.recv.read_frame().await?)
    }

    /// Read the next stanza, skipping keepalives. `None` once the agent left.
    pub async fn recv(&mut self) -> Result<Option<Stanza>, ServerError> {
        Ok(self.recv.read_stanza().await?)
    }

    /// End the session from the controller side.
    pub async fn close(&mut self) {
        let _ = self.send.write_frame(&Frame::close()).await;
        let _ = self.send.get_mut().finish();
        self.connection.close(0u32.into(), b"controller closing");
    }
}
