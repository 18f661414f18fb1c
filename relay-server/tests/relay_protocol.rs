//! # Relay Protocol Integration Tests
//!
//! Purpose: Drive a running server over real TCP and UDP sockets.
//!
//! ## Design Principles
//!
//! 1. **End-to-End**: Exercise accept loops, sessions and the datagram path
//!    exactly as a remote client would.
//! 2. **Bounded Waits**: Every read is wrapped in a timeout so a missing
//!    reply fails the test instead of hanging it.
//! 3. **Isolated Server**: Bind to ephemeral ports per test.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use tokio::time::timeout;

use relay_client::{RelayClient, request_refresh};
use relay_common::{Message, User};
use relay_server::{BoundAddrs, Server, ServerConfig};
use relay_store::{MemoryStore, SqliteStore};

const WAIT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(200);

async fn spawn_test_server() -> Result<(Server, BoundAddrs)> {
    let server = Server::new(ServerConfig::ephemeral(), Arc::new(MemoryStore::new()));
    let addrs = server.start().await?;
    Ok((server, addrs))
}

fn message(sender: &str, text: &str, secs: i64) -> Message {
    Message::broadcast(sender, text, Utc.timestamp_opt(secs, 0).unwrap())
}

#[tokio::test]
async fn credentials_flow() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut client = RelayClient::connect(addrs.stream).await?;
    let user = User::new("Nick", "secret");

    assert!(!timeout(WAIT, client.sign_in(&user)).await??);
    assert!(timeout(WAIT, client.sign_up(&user)).await??);
    assert!(!timeout(WAIT, client.sign_up(&user)).await??);
    assert!(timeout(WAIT, client.sign_in(&user)).await??);
    assert!(!timeout(WAIT, client.sign_in(&User::new("Nick", "wrong"))).await??);

    client.quit().await?;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn posted_message_is_visible_to_other_sessions() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut poster = RelayClient::connect(addrs.stream).await?;
    let mut reader = RelayClient::connect(addrs.stream).await?;

    poster
        .send_raw(
            "003{\"senderNickname\":\"Nick\",\"receiverNickname\":\"Mike\",\"text\":\"hi\",\"postedAt\":\"2024-01-01T00:00:00Z\"}\n",
        )
        .await?;
    let reply = timeout(WAIT, poster.read_response()).await??.expect("reply");
    assert_eq!(reply.payload(), "true");

    let chat = timeout(WAIT, reader.update_chat()).await??;
    let expected = Message::direct(
        "Nick",
        "Mike",
        "hi",
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    );
    assert_eq!(chat.last(), Some(&expected));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn quit_closes_without_reply() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut client = RelayClient::connect(addrs.stream).await?;

    client.send_raw("010\n").await?;
    assert!(timeout(WAIT, client.read_response()).await??.is_none());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn unknown_header_keeps_session_open() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut client = RelayClient::connect(addrs.stream).await?;

    client.send_raw("099\n").await?;
    assert!(timeout(SILENCE, client.read_response()).await.is_err());

    let chat = timeout(WAIT, client.update_chat()).await??;
    assert!(chat.is_empty());
    assert_eq!(server.metrics().frames_unknown, 1);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn malformed_payload_closes_only_that_session() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut broken = RelayClient::connect(addrs.stream).await?;
    let mut healthy = RelayClient::connect(addrs.stream).await?;

    broken.send_raw("002{not json\n").await?;
    assert!(timeout(WAIT, broken.read_response()).await??.is_none());

    assert!(timeout(WAIT, healthy.sign_up(&User::new("Mike", "pw"))).await??);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_posts_all_become_visible() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;

    let posters: Vec<_> = (0..8)
        .map(move |i: i64| {
            tokio::spawn(async move {
                let mut client = RelayClient::connect(addrs.stream).await?;
                let posted = client
                    .post_message(&message(&format!("user{i}"), "hello", i))
                    .await?;
                client.quit().await?;
                anyhow::Ok(posted)
            })
        })
        .collect();
    for poster in posters {
        assert!(timeout(WAIT, poster).await???);
    }

    let mut client = RelayClient::connect(addrs.stream).await?;
    let chat = timeout(WAIT, client.update_chat()).await??;
    assert_eq!(chat.len(), 8);
    assert!(chat.windows(2).all(|pair| pair[0].posted_at <= pair[1].posted_at));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn datagram_refresh_returns_snapshot() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut client = RelayClient::connect(addrs.stream).await?;
    let posted = message("Nick", "over udp", 42);
    assert!(timeout(WAIT, client.post_message(&posted)).await??);

    let chat = request_refresh(addrs.datagram, WAIT).await?;
    assert_eq!(chat, vec![posted]);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_closes_listeners_but_not_live_sessions() -> Result<()> {
    let (server, addrs) = spawn_test_server().await?;
    let mut client = RelayClient::connect(addrs.stream).await?;
    // A reply proves the accept loop handed the connection to a session.
    assert!(timeout(WAIT, client.update_chat()).await??.is_empty());
    assert_eq!(server.metrics().sessions_opened, 1);

    server.stop().await;
    assert!(RelayClient::connect(addrs.stream).await.is_err());

    // The session outlives stop(); the disconnected store answers negatively.
    assert!(!timeout(WAIT, client.sign_up(&User::new("Late", "pw"))).await??);
    Ok(())
}

#[tokio::test]
async fn max_sessions_defers_extra_connections() -> Result<()> {
    let mut config = ServerConfig::ephemeral();
    config.max_sessions = Some(1);
    let server = Server::new(config, Arc::new(MemoryStore::new()));
    let addrs = server.start().await?;

    let first = RelayClient::connect(addrs.stream).await?;
    // Give the accept loop time to hand the only permit to the first client.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut second = RelayClient::connect(addrs.stream).await?;
    second.send_raw("004\n").await?;
    assert!(timeout(SILENCE, second.read_response()).await.is_err());

    first.quit().await?;
    let reply = timeout(WAIT, second.read_response()).await??.expect("reply");
    assert_eq!(reply.payload(), "[]");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn preloaded_history_is_served_and_extended() -> Result<()> {
    let earlier = message("Mike", "before start", 1);
    let store = Arc::new(MemoryStore::with_messages(vec![earlier.clone()]));
    let server = Server::new(ServerConfig::ephemeral(), store.clone());
    let addrs = server.start().await?;

    let mut client = RelayClient::connect(addrs.stream).await?;
    let later = message("Nick", "after start", 2);
    assert!(timeout(WAIT, client.post_message(&later)).await??);

    assert_eq!(timeout(WAIT, client.update_chat()).await??, vec![earlier, later]);
    assert_eq!(store.message_count(), 2);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn sqlite_history_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = ServerConfig::ephemeral();
    config.database = Some(dir.path().join("relay.db"));
    let posted = message("Nick", "persisted", 7);

    let server = Server::new(config.clone(), config.open_store());
    let addrs = server.start().await?;
    let mut client = RelayClient::connect(addrs.stream).await?;
    assert!(timeout(WAIT, client.post_message(&posted)).await??);
    client.quit().await?;
    server.stop().await;

    let reopened = Arc::new(SqliteStore::new(dir.path().join("relay.db")));
    let server = Server::new(config, reopened);
    server.start().await?;
    assert_eq!(&*server.cache().snapshot(), &[posted]);
    server.stop().await;
    Ok(())
}
