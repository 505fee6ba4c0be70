//! `rudp` — reliable, ordered message delivery over unreliable UDP datagrams.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────┐
//!  │  Listener / Connection  (tokio tasks)        │
//!  └────┬──────────────────────────────▲──────────┘
//!       │ send / update(1)             │ input / recv
//!  ┌────▼──────────────┐        ┌──────┴────────────┐
//!  │  Outbound         │◀───────│  Inbound          │
//!  │  SendQueue        │ queues │  RecvWindow       │
//!  └────┬──────────────┘        └──────▲────────────┘
//!       │ records                      │ records
//!  ┌────▼──────────────────────────────┴──────────┐
//!  │  packet: Packetizer / Decoder                │
//!  └────┬──────────────────────────────▲──────────┘
//!       │ raw UDP datagrams            │
//!  ┌────▼──────────────────────────────┴──────────┐
//!  │  Socket  (thin async wrapper around tokio)   │
//!  └──────────────────────────────────────────────┘
//! ```
//!
//! The engine itself ([`Engine`]) performs no I/O and never reads the clock
//! for anything but gap debouncing; time advances through `update(ticks)`.
//! Loss recovery is receiver-driven: the receiver asks for gaps with REQUEST
//! records, and the sender either resends from its history or answers
//! MISSING once the history has expired.
//!
//! Each module has a single responsibility:
//! - [`seq`]         — 16-bit wire ids and their resolution to logical ids
//! - [`message`]     — owned messages and the ordered message list
//! - [`receiver`]    — receive window, reordering buffer, gap detection
//! - [`sender`]      — pending list, retransmission history, expiry
//! - [`packet`]      — wire format and datagram packing
//! - [`queue`]       — bounded hand-off between the engine halves
//! - [`state`]       — session status and its atomic cell
//! - [`engine`]      — the `Engine` façade and its `Inbound` / `Outbound` halves
//! - [`config`]      — session tunables
//! - [`error`]       — engine error taxonomy
//! - [`timer`]       — injectable monotonic clocks
//! - [`simulator`]   — seeded lossy datagram path for testing
//! - [`socket`]      — async UDP socket abstraction
//! - [`connection`]  — per-peer async session driver
//! - [`listener`]    — server-side demultiplexing by peer address

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod listener;
pub mod message;
pub mod packet;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{Config, ConfigError};
pub use connection::{ConnError, Connection};
pub use engine::{Engine, Inbound, Outbound};
pub use error::{Error, Result};
pub use listener::Listener;
pub use state::{CloseReason, Status};
