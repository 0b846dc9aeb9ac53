// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC client transport for agents connecting to a controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, TransportConfig};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::frame::{Frame, FrameError, FramedStream};
use crate::session::{Credentials, Session, Transport};
use crate::stanza::Stanza;

/// Default controller port when none is configured.
pub const DEFAULT_PORT: u16 = 5222;

/// Inbound stanzas buffered between the reader task and the session.
const INBOUND_BUFFER: usize = 64;

/// Errors that can occur in the QUIC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed: {0}")]
    ClosedStream(#[from] quinn::ClosedStream),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("session closed by peer")]
    SessionClosed,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for the QUIC client
#[derive(Debug, Clone)]
pub struct ConflateClientConfig {
    /// Controller address as `host[:port]`. Derived from the jid domain when unset.
    pub server: Option<String>,
    /// Server name for TLS verification. Defaults to the host part of the address.
    pub server_name: Option<String>,
    /// Skip certificate verification (for development only!)
    pub dangerous_skip_cert_verification: bool,
    /// Transport keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection and authentication timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConflateClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            server_name: None,
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 0,
            idle_timeout_ms: 180_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConflateClientConfig {
    /// `(host, port)` to dial for the given credentials.
    pub fn target(&self, credentials: &Credentials) -> (String, u16) {
        let server = self.server.as_deref().unwrap_or_else(|| credentials.domain());
        match server.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                match port.parse() {
                    Ok(port) => (host.trim_matches(['[', ']']).to_string(), port),
                    Err(_) => (server.to_string(), DEFAULT_PORT),
                }
            }
            _ => (server.to_string(), DEFAULT_PORT),
        }
    }
}

/// Opens authenticated QUIC sessions to a controller.
pub struct QuicTransport {
    endpoint: Endpoint,
    config: ConflateClientConfig,
}

impl QuicTransport {
    /// Create a new transport with the given configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ConflateClientConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;

        let client_config = Self::build_client_config(&config)?;
        endpoint.set_default_client_config(client_config);

        Ok(Self { endpoint, config })
    }

    /// Create a transport that trusts any certificate, for local development.
    pub fn insecure(server: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ConflateClientConfig {
            server: Some(server.into()),
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &ConflateClientConfig {
        &self.config
    }

    fn build_client_config(config: &ConflateClientConfig) -> Result<ClientConfig, ClientError> {
        let crypto = if config.dangerous_skip_cert_verification {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        let mut transport = TransportConfig::default();
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        let idle_timeout = Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .map_err(|_| ClientError::InvalidConfig("idle timeout out of range".to_string()))?;
        transport.max_idle_timeout(Some(idle_timeout));

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ClientError::Tls(e.to_string()))?;
        let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, ClientError> {
        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| ClientError::Resolve(format!("{}:{}", host, port)))
    }

    async fn open(&self, credentials: &Credentials) -> Result<QuicSession, ClientError> {
        let (host, port) = self.config.target(credentials);
        let addr = self.resolve(&host, port).await?;
        let server_name = self.config.server_name.clone().unwrap_or(host);

        info!(%addr, server_name = %server_name, "connecting to controller");

        let connection = self.endpoint.connect(addr, &server_name)?.await?;
        let (send, recv) = connection.open_bi().await?;
        let mut send = FramedStream::new(send);
        let mut recv = FramedStream::new(recv);

        let auth = Stanza::new("auth")
            .with_attr("mechanism", "PLAIN")
            .with_attr("jid", credentials.jid.as_str())
            .with_text(credentials.password.as_str());
        send.write_stanza(&auth).await?;

        match recv.read_stanza().await? {
            Some(reply) if reply.name == "success" => {}
            Some(reply) if reply.name == "failure" => {
                connection.close(1u32.into(), b"authentication failed");
                return Err(ClientError::AuthenticationFailed(
                    reply.text().unwrap_or("not authorized").to_string(),
                ));
            }
            Some(reply) => {
                connection.close(1u32.into(), b"unexpected reply");
                return Err(ClientError::AuthenticationFailed(format!(
                    "unexpected <{}> during authentication",
                    reply.name
                )));
            }
            None => return Err(ClientError::SessionClosed),
        }

        info!(jid = %credentials.jid, "session authenticated");

        let (tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_inbound(recv, tx));

        Ok(QuicSession {
            connection,
            send,
            inbound,
            reader,
            jid: credentials.jid.clone(),
        })
    }
}

#[async_trait]
impl Transport for QuicTransport {
    #[instrument(skip(self, credentials), fields(jid = %credentials.jid))]
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Session>, ClientError> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let session = tokio::time::timeout(timeout, self.open(credentials))
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;
        Ok(Box::new(session))
    }
}

/// Forward decoded stanzas into the session's channel until the stream ends.
async fn read_inbound(
    mut recv: FramedStream<RecvStream>,
    tx: mpsc::Sender<Result<Stanza, FrameError>>,
) {
    loop {
        match recv.read_stanza().await {
            Ok(Some(stanza)) => {
                if tx.send(Ok(stanza)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("controller ended the session");
                break;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

/// An authenticated session over one bidirectional QUIC stream.
pub struct QuicSession {
    connection: Connection,
    send: FramedStream<SendStream>,
    inbound: mpsc::Receiver<Result<Stanza, FrameError>>,
    reader: JoinHandle<()>,
    jid: String,
}

#[async_trait]
impl Session for QuicSession {
    fn local_jid(&self) -> &str {
        &self.jid
    }

    async fn send(&mut self, stanza: &Stanza) -> Result<(), ClientError> {
        Ok(self.send.write_stanza(stanza).await?)
    }

    async fn send_keepalive(&mut self) -> Result<(), ClientError> {
        Ok(self.send.write_frame(&Frame::keepalive()).await?)
    }

    async fn recv(&mut self) -> Result<Option<Stanza>, ClientError> {
        match self.inbound.recv().await {
            Some(Ok(stanza)) => Ok(Some(stanza)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.send.write_frame(&Frame::close()).await {
            debug!("close frame not delivered: {}", e);
        }
        let _ = self.send.get_mut().finish();
        self.reader.abort();
        self.connection.close(0u32.into(), b"agent closing");
    }
}

impl Drop for QuicSession {
    fn drop(&mut self) {
        self.reader.abort();
        if self.connection.close_reason().is_none() {
            warn!("session dropped without close");
            self.connection.close(0u32.into(), b"session dropped");
        }
    }
}

/// Accepts any server certificate. Development only.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
