//! # Relay Server
//!
//! Owns both listening sockets, the message cache and the store gateway,
//! and fans every accepted connection or received datagram out to its own
//! task.
//!
//! ## Design Principles
//!
//! 1. **Explicit Lifecycle**: `Stopped -> Starting -> Running -> Stopping ->
//!    Stopped`, guarded by a mutex so concurrent `start`/`stop` calls agree.
//! 2. **Fail Before Running**: Store connection, initial load and socket
//!    binding all happen before `Running`; any failure is returned.
//! 3. **Fire-and-Forget Handlers**: Accept loops never wait for the tasks
//!    they spawn, and `stop` only waits for the loops themselves.
//! 4. **Shutdown Channel**: The running flag is a `watch` channel so the
//!    loops wake up on `stop` instead of polling a lock.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::select;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use relay_store::ChatStore;

use crate::cache::MessageCache;
use crate::config::ServerConfig;
use crate::datagram::handle_datagram;
use crate::error::ServerError;
use crate::gateway::StoreGateway;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::session::{SessionContext, handle_connection};

/// Pending-connection queue length for the stream listener.
const LISTEN_BACKLOG: i32 = 1024;

/// Largest datagram the refresh socket will read.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Pause after the first failed accept or receive; doubles per consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Upper bound on the pause between failed accepts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Addresses the server actually bound, useful with ephemeral ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub stream: SocketAddr,
    pub datagram: SocketAddr,
}

pub struct Server {
    config: ServerConfig,
    gateway: StoreGateway,
    cache: Arc<MessageCache>,
    metrics: Arc<RelayMetrics>,
    state: Mutex<ServerState>,
    running: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<dyn ChatStore>) -> Self {
        let (running, _) = watch::channel(false);
        Server {
            config,
            gateway: StoreGateway::new(store),
            cache: Arc::new(MessageCache::new()),
            metrics: Arc::new(RelayMetrics::new()),
            state: Mutex::new(ServerState::Stopped),
            running,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Connects the store, loads the cache, binds both sockets and spawns
    /// the accept loops. Returns once the server is `Running`.
    pub async fn start(&self) -> Result<BoundAddrs, ServerError> {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Stopped {
                return Err(ServerError::NotStopped(*state));
            }
            *state = ServerState::Starting;
        }
        info!("server starting");

        match self.start_inner().await {
            Ok(addrs) => {
                *self.state.lock() = ServerState::Running;
                info!(stream = %addrs.stream, datagram = %addrs.datagram, "server running");
                Ok(addrs)
            }
            Err(err) => {
                self.gateway.disconnect().await;
                self.cache.discard();
                *self.state.lock() = ServerState::Stopped;
                Err(err)
            }
        }
    }

    async fn start_inner(&self) -> Result<BoundAddrs, ServerError> {
        self.gateway.connect().await?;
        let initial = self
            .gateway
            .all_messages()
            .await
            .ok_or(ServerError::InitialLoad)?;
        self.cache.load(initial)?;

        let listener = bind_stream_listener(self.config.stream_addr).map_err(|source| {
            ServerError::Bind {
                transport: "stream",
                addr: self.config.stream_addr,
                source,
            }
        })?;
        let datagrams = bind_datagram_socket(self.config.datagram_addr).map_err(|source| {
            ServerError::Bind {
                transport: "datagram",
                addr: self.config.datagram_addr,
                source,
            }
        })?;
        let addrs = BoundAddrs {
            stream: local_addr(listener.local_addr(), "stream", self.config.stream_addr)?,
            datagram: local_addr(datagrams.local_addr(), "datagram", self.config.datagram_addr)?,
        };

        self.running.send_replace(true);
        let ctx = SessionContext {
            gateway: self.gateway.clone(),
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
        };
        let limiter = self.config.max_sessions.map(|max| Arc::new(Semaphore::new(max)));

        let stream_loop = tokio::spawn(stream_accept_loop(
            listener,
            ctx,
            limiter,
            self.running.subscribe(),
        ));
        let datagram_loop = tokio::spawn(datagram_accept_loop(
            datagrams,
            Arc::clone(&self.cache),
            Arc::clone(&self.metrics),
            self.running.subscribe(),
        ));
        self.loops.lock().extend([stream_loop, datagram_loop]);

        Ok(addrs)
    }

    /// Clears the running flag, waits for both accept loops to drop their
    /// sockets, then releases the store. In-flight handlers are left alone.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != ServerState::Running {
                return;
            }
            *state = ServerState::Stopping;
        }
        info!("server stopping");

        self.running.send_replace(false);
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(err) = handle.await {
                warn!(error = %err, "accept loop ended abnormally");
            }
        }

        self.gateway.disconnect().await;
        self.cache.discard();
        *self.state.lock() = ServerState::Stopped;
        info!("server stopped");
    }

    /// Starts the server, runs until `shutdown` resolves, then stops it.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<BoundAddrs, ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let addrs = self.start().await?;
        shutdown.await;
        self.stop().await;
        Ok(addrs)
    }

    pub async fn run_until_ctrl_c(&self) -> Result<BoundAddrs, ServerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn stream_accept_loop(
    listener: TcpListener,
    ctx: SessionContext,
    limiter: Option<Arc<Semaphore>>,
    mut running: watch::Receiver<bool>,
) {
    let mut failures = 0u32;
    while *running.borrow() {
        let permit = match &limiter {
            Some(limiter) => select! {
                _ = stopped(&mut running) => break,
                permit = Arc::clone(limiter).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let backoff = select! {
            _ = stopped(&mut running) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures = 0;
                    spawn_session(stream, peer, &ctx, permit);
                    None
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %err, failures, "failed to accept connection");
                    Some(accept_backoff(failures))
                }
            },
        };
        if let Some(delay) = backoff {
            select! {
                _ = stopped(&mut running) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    info!("stream accept loop stopped");
}

/// Delay before retrying after `failures` consecutive socket errors.
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    ACCEPT_BACKOFF_MIN.saturating_mul(factor).min(ACCEPT_BACKOFF_MAX)
}

/// Resolves once the running flag is cleared or the server is dropped.
async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}

fn spawn_session(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
    permit: Option<OwnedSemaphorePermit>,
) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        handle_connection(stream, peer, ctx).await;
        drop(permit);
    });
}

async fn datagram_accept_loop(
    socket: UdpSocket,
    cache: Arc<MessageCache>,
    metrics: Arc<RelayMetrics>,
    mut running: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut failures = 0u32;
    while *running.borrow() {
        let backoff = select! {
            _ = stopped(&mut running) => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, source)) => {
                    failures = 0;
                    let packet = Bytes::copy_from_slice(&buf[..len]);
                    tokio::spawn(handle_datagram(
                        packet,
                        source,
                        Arc::clone(&cache),
                        Arc::clone(&metrics),
                    ));
                    None
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %err, failures, "failed to receive datagram");
                    Some(accept_backoff(failures))
                }
            },
        };
        if let Some(delay) = backoff {
            select! {
                _ = stopped(&mut running) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    info!("datagram accept loop stopped");
}

fn bind_stream_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

fn bind_datagram_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

fn local_addr(
    result: io::Result<SocketAddr>,
    transport: &'static str,
    addr: SocketAddr,
) -> Result<SocketAddr, ServerError> {
    result.map_err(|source| ServerError::Bind {
        transport,
        addr,
        source,
    })
}
