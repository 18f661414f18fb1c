//! # Relay Client
//!
//! Async client for the chat relay's line protocol.
//!
//! ## Design Principles
//!
//! 1. **One Call, One Frame**: Each request method writes one query and,
//!    where the protocol defines one, reads exactly one response.
//! 2. **Typed Payloads**: JSON conversion happens here so callers work
//!    with [`User`] and [`Message`] values.
//! 3. **Raw Escape Hatch**: `send_raw` lets tests and tools put arbitrary
//!    frames on the wire.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use relay_common::{
    FrameError, Message, Query, QueryHeader, Response, User, decode_response, encode_query,
};

/// Largest refresh reply the client will accept.
const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("bad payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A session with the relay over the stream transport.
pub struct RelayClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RelayClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(RelayClient {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Returns true if the nickname/password pair is registered.
    pub async fn sign_in(&mut self, user: &User) -> ClientResult<bool> {
        self.request(&Query::json(QueryHeader::SignIn, user)?).await
    }

    /// Returns true if the user was created.
    pub async fn sign_up(&mut self, user: &User) -> ClientResult<bool> {
        self.request(&Query::json(QueryHeader::SignUp, user)?).await
    }

    /// Returns true if the server stored the message.
    pub async fn post_message(&mut self, message: &Message) -> ClientResult<bool> {
        self.request(&Query::json(QueryHeader::PostMessage, message)?).await
    }

    /// Fetches the full conversation.
    pub async fn update_chat(&mut self) -> ClientResult<Vec<Message>> {
        self.request(&Query::bare(QueryHeader::UpdateChat)).await
    }

    /// Writes a pre-encoded frame verbatim.
    pub async fn send_raw(&mut self, frame: &str) -> ClientResult<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads the next response line; `None` once the server has closed.
    pub async fn read_response(&mut self) -> ClientResult<Option<Response>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(decode_response(&line))
    }

    /// Sends `Quit` and waits for the server to close the connection.
    pub async fn quit(mut self) -> ClientResult<()> {
        self.send_raw(&encode_query(QueryHeader::Quit, "")?).await?;
        match self.read_response().await? {
            None => Ok(()),
            Some(response) => {
                debug!(payload = response.payload(), "unexpected reply to quit");
                Ok(())
            }
        }
    }

    async fn request<T: DeserializeOwned>(&mut self, query: &Query) -> ClientResult<T> {
        self.send_raw(&query.encode()?).await?;
        let response = self.read_response().await?.ok_or(ClientError::Closed)?;
        Ok(response.parse_payload()?)
    }
}

/// Asks the datagram endpoint for the conversation from a fresh socket.
pub async fn request_refresh(server: SocketAddr, wait: Duration) -> ClientResult<Vec<Message>> {
    let bind: SocketAddr = match server {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).await?;
    socket
        .send_to(encode_query(QueryHeader::UpdateChat, "")?.as_bytes(), server)
        .await?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, _) = timeout(wait, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ClientError::Timeout(wait))??;

    let raw = String::from_utf8_lossy(&buf[..len]);
    let response = decode_response(&raw).ok_or(ClientError::Closed)?;
    Ok(response.parse_payload()?)
}
