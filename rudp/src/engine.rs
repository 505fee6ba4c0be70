//! The protocol engine: a tick-driven, I/O-free state machine.
//!
//! # Architecture
//!
//! ```text
//!   datagrams in                                   datagrams out
//!        │                                              ▲
//!   ┌────▼─────────────┐   requests (gaps)      ┌──────┴───────────┐
//!   │  Inbound         │ ─────────────────────▶ │  Outbound        │
//!   │  input / recv    │   replies (REQUEST)    │  send / update   │
//!   │  RecvWindow      │ ─────────────────────▶ │  SendQueue       │
//!   └────────┬─────────┘                        └────────┬─────────┘
//!            │              SharedStatus                 │
//!            └──────────────(atomic, sticky)─────────────┘
//! ```
//!
//! Each half exclusively owns the state of its side, so the two can run on
//! different tasks after [`Engine::split`].  The only cross-side traffic goes
//! through two bounded [`ExchangeQueue`]s, the atomic status, and an
//! "input seen" flag used for the liveness check.
//!
//! # Usage
//!
//! ```
//! use rudp::{Config, Engine};
//!
//! let mut a = Engine::new(Config::default()).unwrap();
//! let mut b = Engine::new(Config::default()).unwrap();
//!
//! a.send(b"hello".to_vec()).unwrap();
//! for datagram in a.update(1) {
//!     b.input(&datagram).unwrap();
//! }
//! assert_eq!(b.recv().unwrap(), Some(b"hello".to_vec()));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ConfigError};
use crate::error::{Error, Result};
use crate::packet::{Decoder, Packetizer, Record};
use crate::queue::ExchangeQueue;
use crate::receiver::RecvWindow;
use crate::sender::SendQueue;
use crate::seq::{self, IdRange, WireRange};
use crate::state::{CloseReason, SharedStatus, Status};
use crate::timer::{Clock, SystemClock};

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// State touched by both halves.
#[derive(Debug)]
struct Shared {
    status: SharedStatus,
    /// Gaps detected by the inbound half, to be sent as REQUEST records.
    requests: ExchangeQueue<IdRange>,
    /// REQUEST ranges received from the peer, still in wire form.
    replies: ExchangeQueue<WireRange>,
    /// Set by every `input`, cleared by the liveness check in `update`.
    input_seen: AtomicBool,
}

impl Shared {
    fn new(queue_capacity: usize) -> Self {
        Self {
            status: SharedStatus::new(),
            requests: ExchangeQueue::with_capacity(queue_capacity),
            replies: ExchangeQueue::with_capacity(queue_capacity),
            input_seen: AtomicBool::new(false),
        }
    }

    fn check_active(&self) -> Result<()> {
        match self.status.get() {
            Status::Active => Ok(()),
            Status::Corrupt(reason) => Err(reason.into()),
        }
    }

    /// Transition to corrupt and return the error for whichever reason stuck.
    fn corrupt(&self, reason: CloseReason) -> Error {
        self.status.corrupt(reason);
        match self.status.get() {
            Status::Corrupt(actual) => actual.into(),
            Status::Active => reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A complete session engine for single-threaded use.
///
/// Call [`Engine::split`] to drive the two sides from separate tasks.
#[derive(Debug)]
pub struct Engine {
    inbound: Inbound,
    outbound: Outbound,
}

impl Engine {
    /// Create an engine that debounces gaps with the system clock.
    pub fn new(config: Config) -> std::result::Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit clock for gap debouncing.
    pub fn with_clock(
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config.queue_capacity));
        Ok(Self {
            inbound: Inbound {
                window: RecvWindow::new(),
                clock,
                debounce: config.gap_debounce,
                shared: Arc::clone(&shared),
            },
            outbound: Outbound {
                queue: SendQueue::new(),
                config,
                shared,
                current_tick: 0,
                last_send_tick: 0,
                last_expired_tick: 0,
                last_input_tick: 0,
            },
        })
    }

    /// Separate the receive and send halves.
    pub fn split(self) -> (Inbound, Outbound) {
        (self.inbound, self.outbound)
    }

    pub fn status(&self) -> Status {
        self.outbound.status()
    }

    pub fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// See [`Outbound::send`].
    pub fn send(&mut self, payload: impl Into<Vec<u8>>) -> Result<u64> {
        self.outbound.send(payload)
    }

    /// See [`Inbound::recv`].
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        self.inbound.recv()
    }

    /// See [`Inbound::input`].
    pub fn input(&mut self, datagram: &[u8]) -> Result<()> {
        self.inbound.input(datagram)
    }

    /// See [`Outbound::update`].
    pub fn update(&mut self, ticks: u64) -> Vec<Vec<u8>> {
        self.outbound.update(ticks)
    }

    /// See [`Outbound::flush`].
    pub fn flush(&mut self) -> Vec<Vec<u8>> {
        self.outbound.flush()
    }

    /// See [`Outbound::close`].
    pub fn close(&mut self) -> Vec<u8> {
        self.outbound.close()
    }

    /// See [`Outbound::abort`].
    pub fn abort(&mut self) -> Vec<u8> {
        self.outbound.abort()
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Receive half: parses datagrams and hands out in-order payloads.
#[derive(Debug)]
pub struct Inbound {
    window: RecvWindow,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    shared: Arc<Shared>,
}

impl Inbound {
    pub fn status(&self) -> Status {
        self.shared.status.get()
    }

    /// Receive window, for inspection.
    pub fn window(&self) -> &RecvWindow {
        &self.window
    }

    /// Pop the next in-order payload.
    ///
    /// `Ok(None)` means the next expected id has not arrived yet, even if
    /// later ids are buffered.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        self.shared.check_active()?;
        Ok(self.window.pop_ready())
    }

    /// Apply every record of one received datagram.
    ///
    /// A structurally invalid record or an EOF / CORRUPT record ends the
    /// session; records before it have already taken effect.
    pub fn input(&mut self, datagram: &[u8]) -> Result<()> {
        self.shared.check_active()?;
        self.shared.input_seen.store(true, Ordering::Release);

        for record in Decoder::new(datagram) {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("[rudp:rx] malformed datagram ({} bytes): {e}", datagram.len());
                    return Err(self.shared.corrupt(CloseReason::MalformedInput));
                }
            };
            match record {
                Record::Ping => {}
                Record::Eof => {
                    log::debug!("[rudp:rx] ← EOF");
                    return Err(self.shared.corrupt(CloseReason::RemoteClose));
                }
                Record::Corrupt => {
                    log::debug!("[rudp:rx] ← CORRUPT");
                    return Err(self.shared.corrupt(CloseReason::Aborted));
                }
                Record::Request(range) => {
                    log::debug!("[rudp:rx] ← REQUEST {}..={}", range.min, range.max);
                    if self.shared.replies.push(range) {
                        log::debug!(
                            "[rudp:rx] reply queue full, dropped oldest ({} so far)",
                            self.shared.replies.evictions()
                        );
                    }
                }
                Record::Missing(range) => self.on_missing(range),
                Record::Data { id, payload } => self.on_data(id, payload),
            }
        }

        self.detect_gap(false);
        Ok(())
    }

    fn on_data(&mut self, wire_id: u16, payload: &[u8]) {
        let Some(id) = seq::resolve(wire_id, self.window.id_max) else {
            log::debug!("[rudp:rx] stale DATA wire id {wire_id}");
            return;
        };
        let stored = self.window.insert_message(id, payload);
        log::debug!(
            "[rudp:rx] ← DATA id={id} len={} stored={stored}",
            payload.len()
        );
    }

    fn on_missing(&mut self, wire: WireRange) {
        let Some(range) = wire.resolve(self.window.id_max) else {
            return;
        };
        if self.window.skip_missing(range) {
            log::debug!(
                "[rudp:rx] ← MISSING {}..={}; skipped to {}",
                range.min,
                range.max,
                self.window.id_min
            );
            self.detect_gap(true);
        }
    }

    fn detect_gap(&mut self, forced: bool) {
        let now = self.clock.now();
        if let Some(gap) = self.window.detect_gap(now, self.debounce, forced) {
            log::debug!("[rudp:rx] gap {}..={} queued for REQUEST", gap.min, gap.max);
            if self.shared.requests.push(gap) {
                log::debug!(
                    "[rudp:rx] request queue full, dropped oldest ({} so far)",
                    self.shared.requests.evictions()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Send half: queues payloads and produces datagrams on each tick.
#[derive(Debug)]
pub struct Outbound {
    queue: SendQueue,
    config: Config,
    shared: Arc<Shared>,
    current_tick: u64,
    last_send_tick: u64,
    last_expired_tick: u64,
    last_input_tick: u64,
}

impl Outbound {
    pub fn status(&self) -> Status {
        self.shared.status.get()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Logical time, in ticks, since the session started.
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Send-side lists, for inspection.
    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    /// Queue a payload for transmission and return its logical id.
    ///
    /// Oversized payloads are rejected with [`Error::PayloadTooLarge`]
    /// without affecting the session.
    pub fn send(&mut self, payload: impl Into<Vec<u8>>) -> Result<u64> {
        self.shared.check_active()?;
        let payload = payload.into();
        if payload.len() > self.config.max_payload {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_payload,
            });
        }
        Ok(self.queue.push(payload, self.current_tick))
    }

    /// Advance logical time by `ticks`.
    ///
    /// Returns the datagrams to transmit, in order.  The list is empty when
    /// the send interval has not elapsed yet or the session is corrupt.
    pub fn update(&mut self, ticks: u64) -> Vec<Vec<u8>> {
        if !self.status().is_active() {
            return Vec::new();
        }
        self.current_tick += ticks;

        if self.shared.input_seen.swap(false, Ordering::AcqRel) {
            self.last_input_tick = self.current_tick;
        } else if self.config.corrupt_timeout > 0
            && self.current_tick - self.last_input_tick > self.config.corrupt_timeout
        {
            log::warn!(
                "[rudp:tx] no input for {} ticks; giving up",
                self.current_tick - self.last_input_tick
            );
            self.shared.corrupt(CloseReason::TimedOut);
            return Vec::new();
        }

        if self.current_tick >= self.last_expired_tick + self.config.expiry_interval {
            let dropped = self.queue.expire_before(self.last_expired_tick);
            if dropped > 0 {
                log::debug!(
                    "[rudp:tx] expired {dropped} message(s) older than tick {}",
                    self.last_expired_tick
                );
            }
            self.last_expired_tick = self.current_tick;
        }

        if self.current_tick >= self.last_send_tick + self.config.send_interval {
            self.last_send_tick = self.current_tick;
            return self.packetize();
        }
        Vec::new()
    }

    /// Packetize immediately, ignoring the send interval.
    pub fn flush(&mut self) -> Vec<Vec<u8>> {
        if !self.status().is_active() {
            return Vec::new();
        }
        self.last_send_tick = self.current_tick;
        self.packetize()
    }

    /// Close the session locally and return the EOF datagram for the peer.
    pub fn close(&mut self) -> Vec<u8> {
        self.shared.corrupt(CloseReason::LocalClose);
        log::debug!("[rudp:tx] → EOF");
        encode_single(Record::Eof)
    }

    /// Close the session locally and return a CORRUPT datagram that makes the
    /// peer abort.
    pub fn abort(&mut self) -> Vec<u8> {
        self.shared.corrupt(CloseReason::LocalClose);
        log::debug!("[rudp:tx] → CORRUPT");
        encode_single(Record::Corrupt)
    }

    /// Drain, in order: our REQUESTs, answers to the peer's REQUESTs, new
    /// data.  Falls back to a single PING so every round emits something.
    fn packetize(&mut self) -> Vec<Vec<u8>> {
        let mut packer = Packetizer::new(self.config.max_datagram);

        for gap in self.shared.requests.drain() {
            log::debug!("[rudp:tx] → REQUEST {}..={}", gap.min, gap.max);
            packer.push(&Record::Request(gap.to_wire()));
        }

        for wire in self.shared.replies.drain() {
            let Some(range) = wire.resolve(self.queue.send_id) else {
                continue;
            };
            let reply = self.queue.reply(range);
            if let Some(missing) = reply.missing {
                log::debug!("[rudp:tx] → MISSING {}..={}", missing.min, missing.max);
                packer.push(&Record::Missing(missing.to_wire()));
            }
            for message in reply.resend {
                packer.push(&Record::Data {
                    id: seq::truncate(message.id),
                    payload: &message.payload,
                });
            }
        }

        let limit = self.config.max_records_per_flush;
        for message in self.queue.peek_pending(limit) {
            packer.push(&Record::Data {
                id: seq::truncate(message.id),
                payload: &message.payload,
            });
        }
        let moved = self.queue.commit_pending(limit);

        if packer.is_empty() {
            packer.push(&Record::Ping);
        }
        let datagrams = packer.finish();
        log::debug!(
            "[rudp:tx] tick={} new={moved} datagrams={}",
            self.current_tick,
            datagrams.len()
        );
        datagrams
    }
}

fn encode_single(record: Record<'_>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record.encoded_len());
    record.encode(&mut buf);
    buf
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
