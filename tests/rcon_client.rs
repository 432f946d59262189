//! RCON client against an in-process server.

mod common;

use common::FakeRcon;
use gso::rcon::{RconClient, RconError, SessionRegistry, SessionState};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_login_and_command() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    assert!(client.is_authenticated().await);
    let reply = client.execute("list").await.unwrap();
    assert!(reply.starts_with("There are 3 of a max of 20"));
    assert_eq!(client.execute("say hi").await.unwrap(), "echo say hi");
}

#[tokio::test]
async fn test_wrong_password_fails() {
    let server = FakeRcon::default().spawn().await;
    let result = RconClient::connect("127.0.0.1", server.port, "guess", TIMEOUT).await;
    assert!(matches!(result, Err(RconError::AuthenticationFailed)));
}

#[tokio::test]
async fn test_empty_packet_before_auth_reply() {
    let server = FakeRcon {
        empty_before_auth: true,
        ..Default::default()
    }
    .spawn()
    .await;

    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(client.execute("ping").await.unwrap(), "echo ping");

    let rejected = RconClient::connect("127.0.0.1", server.port, "nope", TIMEOUT).await;
    assert!(matches!(rejected, Err(RconError::AuthenticationFailed)));
}

#[tokio::test]
async fn test_foreign_ids_are_skipped() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(client.execute("stale").await.unwrap(), "fresh");
}

#[tokio::test]
async fn test_timeout_keeps_session_usable() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    let result = client
        .execute_with_timeout("slow", Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(RconError::Timeout(_))));
    assert_eq!(client.state().await, SessionState::Authenticated);

    // the late reply to "slow" is discarded by id
    assert_eq!(client.execute("ping").await.unwrap(), "echo ping");
}

#[tokio::test]
async fn test_commands_are_serialized() {
    let server = FakeRcon::default().spawn().await;
    let client = Arc::new(
        RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
            .await
            .unwrap(),
    );

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { (i, client.execute(&format!("cmd{}", i)).await) })
        })
        .collect();

    for handle in handles {
        let (i, reply) = handle.await.unwrap();
        assert_eq!(reply.unwrap(), format!("echo cmd{}", i));
    }
}

#[tokio::test]
async fn test_lost_connection_disconnects() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    let result = client.execute("quit").await;
    assert!(matches!(result, Err(RconError::Io(_))));
    assert_eq!(client.state().await, SessionState::Disconnected);
    assert!(matches!(
        client.execute("list").await,
        Err(RconError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    client.disconnect().await;
    client.disconnect().await;
    assert_eq!(client.state().await, SessionState::Disconnected);
    assert!(matches!(
        client.execute("list").await,
        Err(RconError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn test_command_too_long() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    let result = client.execute(&"x".repeat(5000)).await;
    assert!(matches!(result, Err(RconError::CommandTooLong { .. })));
    assert!(client.is_authenticated().await);
}

#[tokio::test]
async fn test_registry_reuses_sessions() {
    let server = FakeRcon::default().spawn().await;
    let registry = SessionRegistry::new(TIMEOUT);

    let first = registry
        .get_or_connect("abc123", "127.0.0.1", server.port, "secret")
        .await
        .unwrap();
    let second = registry
        .get_or_connect("abc123", "127.0.0.1", server.port, "secret")
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);

    registry.disconnect_all().await;
    assert!(registry.is_empty());
    assert_eq!(first.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_connection_refused() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = RconClient::connect("127.0.0.1", port, "secret", TIMEOUT).await;
    assert!(matches!(result, Err(RconError::Io(_))));
}

#[tokio::test]
async fn test_concurrent_connects_share_one_session() {
    let server = FakeRcon::default().spawn().await;
    let registry = SessionRegistry::new(TIMEOUT);

    let (a, b) = tokio::join!(
        registry.get_or_connect("i1", "127.0.0.1", server.port, "secret"),
        registry.get_or_connect("i1", "127.0.0.1", server.port, "secret"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(server.connections.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(a.execute("list").await.is_ok());
    assert!(b.execute("list").await.is_ok());
}

#[tokio::test]
async fn test_bad_length_is_malformed_and_session_recovers() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    let result = client.execute("garbled").await;
    assert!(matches!(result, Err(RconError::Malformed(_))));
    assert_eq!(client.state().await, SessionState::Authenticated);

    assert_eq!(client.execute("ping").await.unwrap(), "echo ping");
}

#[tokio::test]
async fn test_missing_terminator_is_malformed_and_session_recovers() {
    let server = FakeRcon::default().spawn().await;
    let client = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT)
        .await
        .unwrap();

    let result = client.execute("unterminated").await;
    assert!(matches!(result, Err(RconError::Malformed(_))));
    assert_eq!(client.state().await, SessionState::Authenticated);

    assert_eq!(client.execute("ping").await.unwrap(), "echo ping");
}

#[tokio::test]
async fn test_missing_login_reply_fails_authentication() {
    let server = FakeRcon {
        ignore_auth: true,
        ..Default::default()
    }
    .spawn()
    .await;

    let result =
        RconClient::connect("127.0.0.1", server.port, "secret", Duration::from_millis(100)).await;
    assert!(matches!(result, Err(RconError::AuthenticationFailed)));
}

#[tokio::test]
async fn test_closed_during_login_fails_authentication() {
    let server = FakeRcon {
        close_on_auth: true,
        ..Default::default()
    }
    .spawn()
    .await;

    let result = RconClient::connect("127.0.0.1", server.port, "secret", TIMEOUT).await;
    assert!(matches!(result, Err(RconError::AuthenticationFailed)));
}
