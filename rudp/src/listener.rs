//! Server side: one socket, many sessions.
//!
//! A background demux task reads every datagram arriving on the bound
//! socket and routes it by source address:
//!
//! ```text
//!                ┌──────────────── peers ────────────────┐
//!  recv_from ──▶ │ 10.0.0.7:5000 ──▶ Connection (tasks)  │
//!                │ 10.0.0.9:6100 ──▶ Connection (tasks)  │
//!                └───────────────────────────────────────┘
//!                     unknown address ──▶ new Connection ──▶ accept()
//! ```
//!
//! A session removes its own entry when its tasks stop, so a later datagram
//! from the same address starts a fresh session.  When the accept backlog is
//! full a new peer is refused with a single CORRUPT record instead of a
//! session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connection::{ConnError, Connection};
use crate::packet::Record;
use crate::socket::Socket;

type PeerMap = Arc<RwLock<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>>;

/// Default backlog of sessions waiting for `accept`.
pub const ACCEPT_BACKLOG: usize = 128;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// A session's entry in the peer map; removing it on drop.
#[derive(Debug)]
pub(crate) struct Registration {
    peers: PeerMap,
    addr: SocketAddr,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut peers = self.peers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        peers.remove(&self.addr);
        log::debug!("[rudp:listen] {} deregistered ({} active)", self.addr, peers.len());
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Accepts sessions from any number of peers on one UDP socket.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    peers: PeerMap,
    accept_rx: mpsc::Receiver<Connection>,
    demux: JoinHandle<()>,
    /// Flipped to `true` to close every session.
    closing: watch::Sender<bool>,
}

impl Listener {
    /// Bind `addr` and start routing datagrams.
    pub async fn bind(addr: SocketAddr, config: Config) -> Result<Self, ConnError> {
        Self::bind_with_backlog(addr, config, ACCEPT_BACKLOG).await
    }

    /// Like [`Listener::bind`], holding at most `backlog` sessions that have
    /// not been accepted yet.
    pub async fn bind_with_backlog(
        addr: SocketAddr,
        config: Config,
        backlog: usize,
    ) -> Result<Self, ConnError> {
        config.validate()?;
        let socket = Arc::new(Socket::bind(addr).await?);
        let local_addr = socket.local_addr;
        log::info!("[rudp:listen] listening on {local_addr} (backlog {backlog})");

        let peers: PeerMap = Arc::default();
        let (accept_tx, accept_rx) = mpsc::channel(backlog.max(1));
        let (closing, terminate) = watch::channel(false);
        let demux = tokio::spawn(demux_loop(Demux {
            socket,
            config,
            peers: Arc::clone(&peers),
            accept_tx,
            terminate,
        }));

        Ok(Self {
            local_addr,
            peers,
            accept_rx,
            demux,
            closing,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of sessions currently routed by this listener.
    pub fn session_count(&self) -> usize {
        self.peers.read().map(|peers| peers.len()).unwrap_or(0)
    }

    /// Wait for the next peer to start a session.
    pub async fn accept(&mut self) -> Result<Connection, ConnError> {
        self.accept_rx.recv().await.ok_or(ConnError::Closed)
    }

    /// Stop accepting and close every session, accepted or not.
    ///
    /// Each session flushes what it has queued and sends EOF, so its peer
    /// sees a remote close; the local side reports [`crate::Error::LocalClose`].
    /// Dropping the listener does the same.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.closing.send_replace(true);
        self.demux.abort();
        let mut peers = self.peers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !peers.is_empty() {
            log::info!("[rudp:listen] closing {} sessions on {}", peers.len(), self.local_addr);
        }
        peers.clear();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Demux task
// ---------------------------------------------------------------------------

struct Demux {
    socket: Arc<Socket>,
    config: Config,
    peers: PeerMap,
    accept_tx: mpsc::Sender<Connection>,
    terminate: watch::Receiver<bool>,
}

async fn demux_loop(demux: Demux) {
    let Demux {
        socket,
        config,
        peers,
        accept_tx,
        terminate,
    } = demux;

    loop {
        let (datagram, from) = match socket.recv_from().await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("[rudp:listen] receive failed: {e}");
                break;
            }
        };

        let known = peers
            .read()
            .ok()
            .and_then(|peers| peers.get(&from).cloned());
        let route = match known {
            Some(route) => route,
            None => {
                // Reserve first so a full backlog never blocks routing.
                let slot = match accept_tx.try_reserve() {
                    Ok(slot) => slot,
                    Err(TrySendError::Full(())) => {
                        log::warn!("[rudp:listen] accept backlog full, refusing {from}");
                        refuse(&socket, from).await;
                        continue;
                    }
                    Err(TrySendError::Closed(())) => break,
                };

                let (tx, rx) = mpsc::channel(config.queue_capacity);
                let registration = Registration {
                    peers: Arc::clone(&peers),
                    addr: from,
                };
                if let Ok(mut map) = peers.write() {
                    map.insert(from, tx.clone());
                }
                let conn = match Connection::spawn(
                    Arc::clone(&socket),
                    from,
                    config.clone(),
                    rx,
                    Some(registration),
                    Some(terminate.clone()),
                ) {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::warn!("[rudp:listen] cannot start session for {from}: {e}");
                        continue;
                    }
                };
                log::debug!("[rudp:listen] new session from {from}");
                slot.send(conn);
                tx
            }
        };

        if route.try_send(datagram).is_err() {
            log::debug!("[rudp:listen] dropped datagram for busy or closed session {from}");
        }
    }
}

/// Tell `peer` to abort without creating a session for it.
async fn refuse(socket: &Socket, peer: SocketAddr) {
    let mut datagram = Vec::with_capacity(1);
    Record::Corrupt.encode(&mut datagram);
    if let Err(e) = socket.send_to(&datagram, peer).await {
        log::debug!("[rudp:listen] refusal to {peer} not sent: {e}");
    }
}
