// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback session tests: QUIC client transport against the QUIC server.

use conflate_protocol::{
    ClientError, ConflateServer, Credentials, MessageType, QuicTransport, Session, Stanza,
    Transport,
};

fn bind_server() -> Option<ConflateServer> {
    // Sandboxed CI hosts may not allow UDP sockets.
    ConflateServer::localhost("127.0.0.1:0".parse().unwrap()).ok()
}

#[tokio::test]
async fn test_session_exchanges_stanzas() {
    let Some(server) = bind_server() else {
        return;
    };
    let addr = server.local_addr().unwrap();

    let controller = tokio::spawn(async move {
        let mut session = server.accept().await.unwrap();
        let creds = session
            .authenticate(|c| c.jid == "agent@example.com" && c.password == "secret")
            .await
            .unwrap();
        assert_eq!(creds.jid, "agent@example.com");

        let presence = session.recv().await.unwrap().unwrap();
        assert_eq!(presence.name, "presence");

        let keepalive = session.recv_frame().await.unwrap();
        assert_eq!(keepalive.message_type, MessageType::Keepalive);

        session
            .send(&Stanza::new("iq").with_attr("id", "1"))
            .await
            .unwrap();

        // Wait for the agent to leave before tearing the connection down
        let _ = session.recv().await;
    });

    let transport = QuicTransport::insecure(addr.to_string()).unwrap();
    let mut session = transport
        .connect(&Credentials::new("agent@example.com", "secret"))
        .await
        .unwrap();
    assert_eq!(session.local_jid(), "agent@example.com");

    session.send(&Stanza::new("presence")).await.unwrap();
    session.send_keepalive().await.unwrap();

    let iq = session.recv().await.unwrap().unwrap();
    assert_eq!(iq.id(), Some("1"));

    session.close().await;
    controller.await.unwrap();
}

#[tokio::test]
async fn test_rejected_credentials() {
    let Some(server) = bind_server() else {
        return;
    };
    let addr = server.local_addr().unwrap();

    let controller = tokio::spawn(async move {
        let mut session = server.accept().await.unwrap();
        let result = session.authenticate(|_| false).await;
        // Hand the session back so the connection outlives the failure reply
        (result.is_err(), session)
    });

    let transport = QuicTransport::insecure(addr.to_string()).unwrap();
    let result = transport
        .connect(&Credentials::new("agent@example.com", "wrong"))
        .await;

    assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    let (rejected, _session) = controller.await.unwrap();
    assert!(rejected);
}
