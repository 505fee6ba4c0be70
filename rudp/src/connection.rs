//! Async session driver: one [`Engine`] per peer, run on two tokio tasks.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send / write                         recv / read ▲
//!      ▼                                                   │
//!  send_tx (channel)                          recv_rx (channel)
//!      │                                                   │
//!  ┌───▼───────────────────┐             ┌─────────────────┴──┐
//!  │ outbound task         │             │ inbound task       │
//!  │  interval(tick) ──▶   │  Engine     │  datagram ──▶      │
//!  │  Outbound::update(1)  │◀──halves───▶│  Inbound::input    │
//!  │  Outbound::send       │             │  Inbound::recv     │
//!  └───┬───────────────────┘             └─────────▲──────────┘
//!      │ datagrams                                  │ datagrams
//!  ┌───▼──────────────────────────────────────────┴──┐
//!  │ Socket (shared; demultiplexed by the Listener   │
//!  │ on the server side, filtered by peer on clients)│
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! There is no handshake: a client starts emitting PINGs on its first tick
//! and the server creates a session for every new source address.
//!
//! # Shutdown
//!
//! [`Connection::close`] (or dropping the connection) closes the send
//! channel.  The outbound task then packetizes everything still pending,
//! sends EOF, and tells the inbound task to stop.  A listener being closed
//! triggers the same sequence for every session it owns.  A session that
//! ends for any other reason surfaces the cause from the next `recv`.
//!
//! # Backpressure
//!
//! The inbound task never waits on the application.  In-order payloads are
//! moved out of the engine into a task-local backlog and handed over as
//! channel capacity frees up, so a slow reader does not stop datagram input
//! (and with it the liveness check).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, ConfigError};
use crate::engine::{Engine, Inbound, Outbound};
use crate::error::Error;
use crate::listener::Registration;
use crate::socket::{Socket, SocketError};
use crate::state::{CloseReason, Status};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by [`Connection`] and [`crate::listener::Listener`].
#[derive(Error, Debug)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Engine(#[from] Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The session's tasks have stopped.
    #[error("connection closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A reliable, ordered message session with one peer.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    local_addr: SocketAddr,
    max_payload: usize,

    send_tx: mpsc::Sender<Vec<u8>>,
    recv_rx: mpsc::Receiver<Result<Vec<u8>, ConnError>>,

    /// Unread tail of the last message handed out by `read`.
    partial: Vec<u8>,
    partial_pos: usize,

    outbound_task: JoinHandle<()>,
}

impl Connection {
    /// Open a session to `peer` from a fresh ephemeral socket.
    pub async fn connect(peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = Arc::new(Socket::bind(local).await?);
        log::debug!("[rudp:conn] {} → {peer}", socket.local_addr);

        let (datagram_tx, datagram_rx) = mpsc::channel(config.queue_capacity);
        let conn = Self::spawn(Arc::clone(&socket), peer, config, datagram_rx, None, None)?;

        // The reader stops once the session's inbound side hangs up.
        tokio::spawn(forward_from_peer(socket, peer, datagram_tx));
        Ok(conn)
    }

    /// Start the session tasks for `peer`.
    ///
    /// `datagrams` supplies everything the peer sends us.  `registration`,
    /// when present, is released as soon as the session ends.  Once
    /// `terminate` turns `true` the session closes as if the application had
    /// called [`Connection::close`].
    pub(crate) fn spawn(
        socket: Arc<Socket>,
        peer: SocketAddr,
        config: Config,
        datagrams: mpsc::Receiver<Vec<u8>>,
        registration: Option<Registration>,
        terminate: Option<watch::Receiver<bool>>,
    ) -> Result<Self, ConnError> {
        let engine = Engine::new(config.clone())?;
        let (inbound, outbound) = engine.split();

        let (send_tx, send_rx) = mpsc::channel(config.queue_capacity);
        let (recv_tx, recv_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(inbound_loop(inbound, datagrams, recv_tx.clone(), shutdown_rx));
        let outbound_task = tokio::spawn(outbound_loop(OutboundTask {
            outbound,
            socket: Arc::clone(&socket),
            peer,
            app_rx: send_rx,
            errors: recv_tx,
            shutdown: shutdown_tx,
            terminate,
            _registration: registration,
        }));

        Ok(Self {
            peer,
            local_addr: socket.local_addr,
            max_payload: config.max_payload,
            send_tx,
            recv_rx,
            partial: Vec::new(),
            partial_pos: 0,
            outbound_task,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue one message.  Messages arrive at the peer whole and in order.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), ConnError> {
        if payload.len() > self.max_payload {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload,
            }
            .into());
        }
        self.send_tx
            .send(payload)
            .await
            .map_err(|_| ConnError::Closed)
    }

    /// Receive the next message from the peer.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ConnError> {
        self.recv_rx.recv().await.unwrap_or(Err(ConnError::Closed))
    }

    /// Send `data` as a sequence of messages of at most `max_payload` bytes.
    pub async fn write(&self, data: &[u8]) -> Result<usize, ConnError> {
        for chunk in data.chunks(self.max_payload) {
            self.send(chunk.to_vec()).await?;
        }
        Ok(data.len())
    }

    /// Copy received bytes into `buf`, stream style.
    ///
    /// A message larger than `buf` is handed out over several calls.
    /// Returns `Ok(0)` once the peer has closed the session.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.partial_pos >= self.partial.len() {
            match self.recv().await {
                Ok(message) => {
                    self.partial = message;
                    self.partial_pos = 0;
                }
                Err(ConnError::Engine(Error::RemoteClose)) | Err(ConnError::Closed) => return Ok(0),
                Err(e) => return Err(e),
            }
        }

        let available = &self.partial[self.partial_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.partial_pos += n;
        Ok(n)
    }

    /// Flush queued messages, send EOF, and wait for the session to stop.
    pub async fn close(self) -> Result<(), ConnError> {
        let Self {
            send_tx,
            outbound_task,
            ..
        } = self;
        drop(send_tx);
        outbound_task.await.map_err(|_| ConnError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Inbound task
// ---------------------------------------------------------------------------

async fn inbound_loop(
    mut inbound: Inbound,
    mut datagrams: mpsc::Receiver<Vec<u8>>,
    app_tx: mpsc::Sender<Result<Vec<u8>, ConnError>>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Delivered by the engine, not yet taken by the application.
    let mut backlog: VecDeque<Vec<u8>> = VecDeque::new();

    loop {
        let outcome = tokio::select! {
            permit = app_tx.reserve(), if !backlog.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(payload) = backlog.pop_front() {
                        permit.send(Ok(payload));
                    }
                    Ok(())
                }
                Err(_) => return,
            },
            received = datagrams.recv() => match received {
                Some(datagram) => inbound
                    .input(&datagram)
                    .and_then(|()| collect_ready(&mut inbound, &mut backlog)),
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        if let Err(e) = outcome {
            log::debug!("[rudp:conn] inbound stopped: {e}");
            // Whatever arrived before the session ended is still owed.
            for payload in backlog.drain(..) {
                if app_tx.send(Ok(payload)).await.is_err() {
                    return;
                }
            }
            let _ = app_tx.send(Err(e.into())).await;
            return;
        }
    }
}

fn collect_ready(inbound: &mut Inbound, backlog: &mut VecDeque<Vec<u8>>) -> Result<(), Error> {
    while let Some(payload) = inbound.recv()? {
        backlog.push_back(payload);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbound task
// ---------------------------------------------------------------------------

struct OutboundTask {
    outbound: Outbound,
    socket: Arc<Socket>,
    peer: SocketAddr,
    app_rx: mpsc::Receiver<Vec<u8>>,
    errors: mpsc::Sender<Result<Vec<u8>, ConnError>>,
    shutdown: watch::Sender<bool>,
    /// Set by the owning listener when it closes.
    terminate: Option<watch::Receiver<bool>>,
    // Dropped when the task ends.
    _registration: Option<Registration>,
}

async fn outbound_loop(mut task: OutboundTask) {
    let mut ticker = tokio::time::interval(task.outbound.config().tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let datagrams = task.outbound.update(1);
                if let Err(e) = transmit(&task.socket, task.peer, &datagrams).await {
                    log::warn!("[rudp:conn] send to {} failed: {e}", task.peer);
                    let _ = task.errors.try_send(Err(e.into()));
                    break;
                }
                if let Status::Corrupt(reason) = task.outbound.status() {
                    if reason == CloseReason::TimedOut {
                        log::warn!("[rudp:conn] {} timed out", task.peer);
                        let _ = task.errors.try_send(Err(Error::TimedOut.into()));
                    }
                    break;
                }
            }

            payload = task.app_rx.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = task.outbound.send(payload) {
                        let _ = task.errors.try_send(Err(e.into()));
                        if !task.outbound.status().is_active() {
                            break;
                        }
                    }
                }
                None => {
                    close_gracefully(&mut task).await;
                    break;
                }
            },

            _ = terminated(&mut task.terminate) => {
                log::debug!("[rudp:conn] closing {} for listener shutdown", task.peer);
                close_gracefully(&mut task).await;
                let _ = task.errors.try_send(Err(Error::LocalClose.into()));
                break;
            }
        }
    }

    let _ = task.shutdown.send(true);
    log::debug!("[rudp:conn] session with {} ended", task.peer);
}

/// Push out everything still pending, then EOF.
async fn close_gracefully(task: &mut OutboundTask) {
    while task.outbound.status().is_active() {
        let datagrams = task.outbound.flush();
        if transmit(&task.socket, task.peer, &datagrams).await.is_err() {
            return;
        }
        if task.outbound.queue().pending_len() == 0 {
            break;
        }
    }
    if !task.outbound.status().is_active() {
        return;
    }
    let eof = task.outbound.close();
    let _ = task.socket.send_to(&eof, task.peer).await;
}

/// Resolves once `signal` is `true`; never for a session without one.
async fn terminated(signal: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = signal else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn transmit(socket: &Socket, peer: SocketAddr, datagrams: &[Vec<u8>]) -> Result<(), SocketError> {
    for datagram in datagrams {
        socket.send_to(datagram, peer).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Client-side reader
// ---------------------------------------------------------------------------

/// Forward datagrams from `peer` until the session stops listening.
async fn forward_from_peer(socket: Arc<Socket>, peer: SocketAddr, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        let received = tokio::select! {
            received = socket.recv_from() => received,
            _ = tx.closed() => break,
        };
        match received {
            Ok((datagram, from)) if from == peer => {
                if tx.send(datagram).await.is_err() {
                    break;
                }
            }
            Ok((_, from)) => log::debug!("[rudp:conn] ignoring datagram from {from}"),
            Err(e) => {
                log::warn!("[rudp:conn] receive failed: {e}");
                break;
            }
        }
    }
}
