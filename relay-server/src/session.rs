//! # Session Handler
//!
//! Drives one accepted stream connection: read a query line, dispatch it,
//! write exactly one response (or none for `Quit` and unknown commands),
//! then read the next line.
//!
//! ## Design Principles
//!
//! 1. **Strict Turn-Taking**: No pipelining. A frame is fully answered before
//!    the next one is read.
//! 2. **Localized Failure**: Transport and payload errors end this session
//!    only; they are logged here and never reach the accept loop.
//! 3. **Transport Agnostic**: The loop is generic over async reader/writer
//!    halves, so tests can drive it through an in-memory duplex pipe.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use relay_common::{FrameError, Message, Query, QueryHeader, Response, User, decode_query};

use crate::cache::MessageCache;
use crate::error::SessionError;
use crate::gateway::StoreGateway;
use crate::metrics::{FrameOutcome, RelayMetrics};

/// Shared state every session needs. Cloning is cheap.
#[derive(Clone)]
pub struct SessionContext {
    pub gateway: StoreGateway,
    pub cache: Arc<MessageCache>,
    pub metrics: Arc<RelayMetrics>,
}

/// Why a session left the `Active` state without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `Quit`.
    Quit,
    /// The peer closed the stream or sent an empty line.
    PeerClosed,
}

/// What to do after dispatching one query.
#[derive(Debug)]
enum Step {
    Reply(Response),
    Skip,
    Quit,
}

/// Runs a session over an accepted TCP connection and closes it afterwards.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: SessionContext) {
    ctx.metrics.session_opened();
    info!(%peer, "session opened");

    let (reader, mut writer) = stream.into_split();
    let reader = BufReader::new(reader);

    match run_session(reader, &mut writer, &ctx).await {
        Ok(end) => info!(%peer, ?end, "session closed"),
        Err(err) => error!(%peer, error = %err, category = ?err.category(), "session terminated"),
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%peer, error = %err, "failed to shut down session stream");
    }
    ctx.metrics.session_closed();
}

/// Reads, dispatches and answers frames until the session terminates.
pub async fn run_session<R, W>(
    mut reader: R,
    writer: &mut W,
    ctx: &SessionContext,
) -> Result<SessionEnd, SessionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(SessionEnd::PeerClosed);
        }

        let started = Instant::now();
        let query = match decode_query(&line) {
            Ok(Some(query)) => query,
            Ok(None) => return Ok(SessionEnd::PeerClosed),
            Err(err) if err.is_recoverable() => {
                log_unknown_command(&err);
                ctx.metrics.record_frame(FrameOutcome::Unknown, started.elapsed());
                continue;
            }
            Err(err) => {
                ctx.metrics.record_frame(FrameOutcome::Failed, started.elapsed());
                return Err(err.into());
            }
        };

        let step = match dispatch(&query, ctx).await {
            Ok(step) => step,
            Err(err) => {
                ctx.metrics.record_frame(FrameOutcome::Failed, started.elapsed());
                return Err(err);
            }
        };

        match step {
            Step::Reply(response) => {
                write_response(writer, &response).await?;
                ctx.metrics.record_frame(FrameOutcome::Dispatched, started.elapsed());
            }
            Step::Skip => {
                ctx.metrics.record_frame(FrameOutcome::Unknown, started.elapsed());
            }
            Step::Quit => {
                ctx.metrics.record_frame(FrameOutcome::Dispatched, started.elapsed());
                return Ok(SessionEnd::Quit);
            }
        }
    }
}

async fn dispatch(query: &Query, ctx: &SessionContext) -> Result<Step, SessionError> {
    debug!(header = query.header().as_u8(), "dispatching query");

    let response = match query.header() {
        QueryHeader::SignIn => {
            let user: User = query.parse_payload()?;
            Response::json(&ctx.gateway.user_exists(user).await)?
        }
        QueryHeader::SignUp => {
            let user: User = query.parse_payload()?;
            Response::json(&ctx.gateway.create_user(user).await)?
        }
        QueryHeader::PostMessage => {
            let message: Message = query.parse_payload()?;
            Response::json(&post_message(message, ctx).await)?
        }
        QueryHeader::UpdateChat => Response::json(&*ctx.cache.snapshot())?,
        QueryHeader::Quit => return Ok(Step::Quit),
        QueryHeader::None => {
            warn!(header = query.header().as_u8(), "unknown command received");
            return Ok(Step::Skip);
        }
    };

    Ok(Step::Reply(response))
}

/// Stores the message and, on success, reloads the cache from the store.
async fn post_message(message: Message, ctx: &SessionContext) -> bool {
    let stored = ctx.gateway.post_message(message).await;
    if stored {
        // A failed reload leaves the old history visible; the post itself
        // already succeeded, so the client still gets `true`.
        ctx.cache.refresh_from(&ctx.gateway).await;
    } else {
        warn!("store rejected posted message");
    }
    stored
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let frame = response.encode()?;
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn log_unknown_command(err: &FrameError) {
    match err {
        FrameError::UnknownHeader(code) => warn!(header = code, "unknown command received"),
        other => warn!(error = %other, "unrecognized frame"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use relay_store::{ChatStore, MemoryStore, StoreResult};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};
    use tokio::task::JoinHandle;

    use super::*;

    fn test_context() -> SessionContext {
        let store = Arc::new(MemoryStore::new());
        store.connect().unwrap();
        SessionContext {
            gateway: StoreGateway::new(store),
            cache: Arc::new(MessageCache::new()),
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    /// Accepts every post but cannot reload the history afterwards.
    struct ReloadFailsStore;

    impl ChatStore for ReloadFailsStore {
        fn connect(&self) -> StoreResult<()> {
            Ok(())
        }

        fn user_exists(&self, _user: &User) -> bool {
            false
        }

        fn create_user(&self, _user: &User) -> bool {
            false
        }

        fn all_messages(&self) -> Option<Vec<Message>> {
            None
        }

        fn post_message(&self, _message: &Message) -> bool {
            true
        }

        fn disconnect(&self) {}
    }

    type ClientSide = (BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>);

    fn spawn_session(ctx: SessionContext) -> (ClientSide, JoinHandle<Result<SessionEnd, SessionError>>) {
        let (client, server) = duplex(64 * 1024);
        let (server_read, mut server_write) = split(server);
        let handle = tokio::spawn(async move {
            run_session(BufReader::new(server_read), &mut server_write, &ctx).await
        });
        let (client_read, client_write) = split(client);
        ((BufReader::new(client_read), client_write), handle)
    }

    async fn exchange(client: &mut ClientSide, frame: &str) -> String {
        client.1.write_all(frame.as_bytes()).await.unwrap();
        let mut line = String::new();
        client.0.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn sign_in_and_sign_up_flow() {
        let (mut client, _session) = spawn_session(test_context());
        let user = r#"{"nickname":"Nick","password":"pw"}"#;

        assert_eq!(exchange(&mut client, &format!("001{user}\n")).await, "false\n");
        assert_eq!(exchange(&mut client, &format!("002{user}\n")).await, "true\n");
        assert_eq!(exchange(&mut client, &format!("002{user}\n")).await, "false\n");
        assert_eq!(exchange(&mut client, &format!("001{user}\n")).await, "true\n");
    }

    #[tokio::test]
    async fn post_then_update_chat_sees_message() {
        let ctx = test_context();
        let cache = Arc::clone(&ctx.cache);
        let (mut client, _session) = spawn_session(ctx);
        let payload = r#"{"senderNickname":"Nick","receiverNickname":"Mike","text":"hi","postedAt":"2024-01-01T00:00:00Z"}"#;

        assert_eq!(exchange(&mut client, &format!("003{payload}\n")).await, "true\n");
        let chat = exchange(&mut client, "004\n").await;

        let messages: Vec<Message> = serde_json::from_str(chat.trim_end()).unwrap();
        let expected = Message::direct(
            "Nick",
            "Mike",
            "hi",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        assert_eq!(messages.last(), Some(&expected));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_reload_still_acknowledges_post() {
        let earlier = Message::broadcast("Mike", "earlier", Utc.timestamp_opt(1, 0).unwrap());
        let ctx = SessionContext {
            gateway: StoreGateway::new(Arc::new(ReloadFailsStore)),
            cache: Arc::new(MessageCache::new()),
            metrics: Arc::new(RelayMetrics::new()),
        };
        ctx.cache.replace_all(vec![earlier.clone()]);
        let cache = Arc::clone(&ctx.cache);
        let (mut client, _session) = spawn_session(ctx);
        let payload = r#"{"senderNickname":"Nick","receiverNickname":"","text":"hi","postedAt":"2024-01-01T00:00:00Z"}"#;

        assert_eq!(exchange(&mut client, &format!("003{payload}\n")).await, "true\n");
        assert_eq!(&*cache.snapshot(), &[earlier]);
        assert_eq!(cache.version(), 1);
    }

    #[tokio::test]
    async fn unknown_header_is_skipped_without_reply() {
        let ctx = test_context();
        let metrics = Arc::clone(&ctx.metrics);
        let (mut client, _session) = spawn_session(ctx);

        // The unknown frame gets no reply, so the next line read answers 004.
        client.1.write_all(b"099\n000\n").await.unwrap();
        assert_eq!(exchange(&mut client, "004\n").await, "[]\n");
        assert_eq!(metrics.snapshot().frames_unknown, 2);
    }

    #[tokio::test]
    async fn quit_ends_session_without_reply() {
        let (mut client, session) = spawn_session(test_context());
        client.1.write_all(b"010\n").await.unwrap();

        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Quit);
        let mut rest = String::new();
        assert_eq!(client.0.read_line(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bad_payload_terminates_session() {
        let (mut client, session) = spawn_session(test_context());
        client.1.write_all(b"001not json\n").await.unwrap();

        assert!(matches!(session.await.unwrap(), Err(SessionError::Payload(_))));
    }

    #[tokio::test]
    async fn malformed_header_terminates_session() {
        let (mut client, session) = spawn_session(test_context());
        client.1.write_all(b"abc\n").await.unwrap();

        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::Frame(FrameError::MalformedHeader(_)))
        ));
    }

    #[tokio::test]
    async fn peer_close_and_empty_line_end_session() {
        let (mut client, session) = spawn_session(test_context());
        client.1.write_all(b"\n").await.unwrap();
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::PeerClosed);

        let (client, session) = spawn_session(test_context());
        drop(client);
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::PeerClosed);
    }
}
