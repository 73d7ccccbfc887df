//! # UDP Server
//!
//! Socket loop that routes each datagram to its peer's handshake session.
//!
//! - One worker task per peer address consumes an ordered, bounded queue, so a peer's
//!   stages run to completion one after another while peers proceed concurrently.
//! - A single writer task owns the socket sink; workers hand it outgoing datagrams.
//! - Stale sessions are swept periodically: those that made no handshake progress within
//!   the idle timeout and those whose worker has finished. A full table refuses new peers.
//! - Transitions run on the blocking pool, since puzzle verification and key derivation
//!   are CPU bound.
//! - Shutdown via ctrl-c ([`UdpServer::run`]) or an external channel
//!   ([`UdpServer::run_with_shutdown`]).
//!
//! ```ignore
//! let config = NetworkConfig::from_file("server.toml")?;
//! let identity = Arc::new(ServerIdentity::from_config(&config.handshake)?);
//! UdpServer::bind(&config, identity).await?.run().await?;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::BytesCodec;
use tokio_util::udp::UdpFramed;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{NetworkConfig, ServerConfig};
use crate::core::command::Command;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::Session;
use crate::protocol::identity::ServerIdentity;
use crate::transport::sessions::SessionTable;
use crate::utils::metrics::global_metrics;

/// Capacity of the queue between workers and the writer task.
const OUTBOUND_QUEUE: usize = 1024;

/// Lower bound for the idle sweep period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// A handshake that reached `clientinit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedHandshake {
    pub peer: SocketAddr,
    pub command: Command,
}

type PeerQueue = mpsc::Sender<BytesMut>;

/// State shared by every peer worker.
#[derive(Clone)]
struct PeerContext {
    sessions: SessionTable<PeerQueue>,
    identity: Arc<ServerIdentity>,
    puzzle_level: u32,
    outbound: mpsc::Sender<(Bytes, SocketAddr)>,
    completed: Option<mpsc::Sender<CompletedHandshake>>,
    active_workers: Arc<AtomicUsize>,
}

/// Bound UDP handshake server.
pub struct UdpServer {
    socket: UdpSocket,
    identity: Arc<ServerIdentity>,
    server: ServerConfig,
    puzzle_level: u32,
    completed: Option<mpsc::Sender<CompletedHandshake>>,
}

impl UdpServer {
    /// Bind the configured address.
    pub async fn bind(config: &NetworkConfig, identity: Arc<ServerIdentity>) -> Result<Self> {
        let socket = UdpSocket::bind(&config.server.address).await?;
        Ok(Self::from_socket(socket, config, identity))
    }

    /// Serve on an already bound socket.
    pub fn from_socket(
        socket: UdpSocket,
        config: &NetworkConfig,
        identity: Arc<ServerIdentity>,
    ) -> Self {
        Self {
            socket,
            identity,
            server: config.server.clone(),
            puzzle_level: config.handshake.puzzle_level,
            completed: None,
        }
    }

    /// Forward every completed handshake to `tx`.
    pub fn with_completion_channel(mut self, tx: mpsc::Sender<CompletedHandshake>) -> Self {
        self.completed = Some(tx);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Run until `shutdown_rx` yields (or its sender is dropped).
    #[instrument(skip_all, fields(address = ?self.socket.local_addr().ok()))]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let UdpServer {
            socket,
            identity,
            server,
            puzzle_level,
            completed,
        } = self;
        info!(
            max_sessions = server.max_sessions,
            puzzle_level, "Listening for handshakes"
        );

        let framed = UdpFramed::new(socket, BytesCodec::new());
        let (mut sink, mut stream) = framed.split();

        // Writer task: sole owner of the socket sink
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<(Bytes, SocketAddr)>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some((datagram, peer)) = outbound_rx.recv().await {
                let len = datagram.len() as u64;
                match sink.send((datagram, peer)).await {
                    Ok(()) => global_metrics().datagram_sent(len),
                    Err(e) => warn!(%peer, error = %e, "Failed to send datagram"),
                }
            }
        });

        let sessions: SessionTable<PeerQueue> =
            SessionTable::new(server.max_sessions, server.session_idle_timeout)
                .with_finished_check(|queue: &PeerQueue| queue.is_closed());
        let context = PeerContext {
            sessions: sessions.clone(),
            identity,
            puzzle_level,
            outbound: outbound_tx,
            completed,
            active_workers: Arc::new(AtomicUsize::new(0)),
        };

        let sweep_period = (server.session_idle_timeout / 2).max(MIN_SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval(sweep_period);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for sessions to close...");
                    break;
                }

                _ = sweep.tick() => {
                    for peer in sessions.evict_stale().await {
                        global_metrics().session_evicted();
                        debug!(%peer, "Stale session evicted");
                    }
                }

                received = stream.next() => match received {
                    Some(Ok((datagram, peer))) => {
                        route_datagram(&context, server.backpressure_limit, datagram, peer).await;
                    }
                    Some(Err(e)) => {
                        // ICMP errors surface here on some platforms; the socket stays usable
                        debug!(error = %e, "Socket receive error");
                    }
                    None => {
                        error!("Socket stream ended");
                        break;
                    }
                },
            }
        }

        // Dropping the queues ends every worker
        let closed = sessions.clear().await;
        for _ in 0..closed {
            global_metrics().session_evicted();
        }
        wait_for_workers(&context.active_workers, server.shutdown_timeout).await;

        drop(context);
        if tokio::time::timeout(server.shutdown_timeout, writer)
            .await
            .is_err()
        {
            warn!("Writer task did not finish before the shutdown timeout");
        }
        global_metrics().log_metrics();
        info!("Server stopped");
        Ok(())
    }
}

/// Bind from configuration and serve until ctrl-c.
pub async fn start_server(config: &NetworkConfig) -> Result<()> {
    config.validate_strict()?;
    let identity = Arc::new(ServerIdentity::from_config(&config.handshake)?);
    UdpServer::bind(config, identity).await?.run().await
}

/// Bind from configuration and serve until `shutdown_rx` yields.
pub async fn start_server_with_shutdown(
    config: &NetworkConfig,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    config.validate_strict()?;
    let identity = Arc::new(ServerIdentity::from_config(&config.handshake)?);
    UdpServer::bind(config, identity)
        .await?
        .run_with_shutdown(shutdown_rx)
        .await
}

async fn route_datagram(
    context: &PeerContext,
    backpressure_limit: usize,
    datagram: BytesMut,
    peer: SocketAddr,
) {
    let metrics = global_metrics();
    metrics.datagram_received(datagram.len() as u64);

    let lookup = context
        .sessions
        .get_or_insert_with(peer, || {
            let (tx, rx) = mpsc::channel(backpressure_limit);
            spawn_worker(peer, rx, context.clone());
            tx
        })
        .await;

    let queue = match lookup {
        Ok(lookup) => {
            for evicted in &lookup.evicted {
                metrics.session_evicted();
                debug!(peer = %evicted, "Stale session evicted to make room");
            }
            if lookup.created {
                metrics.session_created();
                info!(%peer, "New session");
            }
            lookup.value
        }
        Err(e) => {
            metrics.session_rejected();
            debug!(%peer, error = %e, "Datagram refused");
            return;
        }
    };

    match queue.try_send(datagram) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            metrics.datagram_dropped();
            trace!(%peer, "Peer queue full, datagram dropped");
        }
        // The worker stopped after a terminal state; the next sweep frees the entry
        Err(TrySendError::Closed(_)) => {
            metrics.datagram_dropped();
            trace!(%peer, "Session finished, datagram dropped");
        }
    }
}

fn spawn_worker(peer: SocketAddr, rx: mpsc::Receiver<BytesMut>, context: PeerContext) {
    context.active_workers.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        run_peer(peer, rx, &context).await;
        context.active_workers.fetch_sub(1, Ordering::SeqCst);
    });
}

#[instrument(level = "debug", skip_all, fields(%peer))]
async fn run_peer(peer: SocketAddr, mut rx: mpsc::Receiver<BytesMut>, context: &PeerContext) {
    let metrics = global_metrics();
    let mut session = Session::new(context.puzzle_level);

    while let Some(datagram) = rx.recv().await {
        let before = session.state();
        let identity = Arc::clone(&context.identity);
        let span = tracing::Span::current();
        let handled = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let result = session.handle(&identity, &datagram);
            (session, result)
        })
        .await;
        let result = match handled {
            Ok((returned, result)) => {
                session = returned;
                result
            }
            Err(e) => {
                error!(error = %e, "Handshake transition task failed");
                return;
            }
        };

        if session.state() != before {
            context.sessions.touch(&peer).await;
        }

        match result {
            Ok(step) => {
                for reply in step.datagrams {
                    if context.outbound.send((Bytes::from(reply), peer)).await.is_err() {
                        return;
                    }
                }
                if let Some(command) = step.completed {
                    metrics.handshake_completed();
                    info!(command = %command.name, "Handshake completed");
                    if let Some(tx) = &context.completed {
                        let _ = tx.send(CompletedHandshake { peer, command }).await;
                    }
                }
            }
            Err(err) => {
                metrics.record_error(&err);
                if matches!(err, ProtocolError::SessionAborted) {
                    return;
                }
            }
        }

        if session.state().is_terminal() {
            debug!(state = %session.state(), "Session finished");
            return;
        }
    }
}

async fn wait_for_workers(active_workers: &AtomicUsize, timeout: Duration) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(
                    workers = active_workers.load(Ordering::SeqCst),
                    "Shutdown timeout reached, forcing exit"
                );
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(20)) => {
                if active_workers.load(Ordering::SeqCst) == 0 {
                    info!("All sessions closed");
                    return;
                }
            }
        }
    }
}
