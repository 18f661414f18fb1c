//! Stateless handler for the refresh-only datagram protocol.
//!
//! Each packet is answered from a fresh, unconnected socket that is dropped
//! on every exit path; the listening socket is never used for replies.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use relay_common::{FrameError, QueryHeader, Response, decode_query};

use crate::cache::MessageCache;
use crate::error::DatagramError;
use crate::metrics::RelayMetrics;

/// Answers one packet. Failures are logged and never propagated.
pub async fn handle_datagram(
    packet: Bytes,
    source: SocketAddr,
    cache: Arc<MessageCache>,
    metrics: Arc<RelayMetrics>,
) {
    metrics.record_datagram();
    match respond(&packet, source, &cache).await {
        Ok(Some(sent)) => debug!(%source, bytes = sent, "sent chat snapshot"),
        Ok(None) => {}
        Err(DatagramError::Frame(FrameError::UnknownHeader(code))) => {
            warn!(%source, header = code, "unknown command received");
        }
        Err(err) => warn!(%source, error = %err, "failed to answer datagram"),
    }
}

/// Returns the number of bytes sent, or `None` if the packet needs no reply.
async fn respond(
    packet: &[u8],
    source: SocketAddr,
    cache: &MessageCache,
) -> Result<Option<usize>, DatagramError> {
    let raw = std::str::from_utf8(packet)?;
    let Some(query) = decode_query(raw)? else {
        return Ok(None);
    };
    if query.header() != QueryHeader::UpdateChat {
        warn!(%source, header = query.header().as_u8(), "unknown command received");
        return Ok(None);
    }

    let frame = Response::json(&*cache.snapshot())?.encode()?;
    let socket = UdpSocket::bind(unspecified_for(source)).await?;
    let sent = socket.send_to(frame.as_bytes(), source).await?;
    Ok(Some(sent))
}

/// Ephemeral bind address in the same family as `peer`.
fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}
