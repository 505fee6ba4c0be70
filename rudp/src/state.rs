//! Session status types.
//!
//! A session is either [`Status::Active`] or terminally
//! [`Status::Corrupt`] with the [`CloseReason`] that ended it.  There is no
//! way back: once corrupt, `send`/`recv` report the reason and `update`
//! produces nothing.
//!
//! ```text
//!   ACTIVE ──local close───────▶ CORRUPT(LocalClose)
//!      │ ───EOF record─────────▶ CORRUPT(RemoteClose)
//!      │ ───CORRUPT record─────▶ CORRUPT(Aborted)
//!      │ ───bad record─────────▶ CORRUPT(MalformedInput)
//!      └ ───no input for long──▶ CORRUPT(TimedOut)
//! ```
//!
//! The status is read and written from both the inbound and the outbound
//! half, so it lives in a [`SharedStatus`] atomic.  The first transition
//! wins; later ones are ignored.

use std::sync::atomic::{AtomicU8, Ordering};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The local user closed the session.
    LocalClose,
    /// The peer sent EOF.
    RemoteClose,
    /// The peer sent CORRUPT.
    Aborted,
    /// A received datagram could not be parsed.
    MalformedInput,
    /// No input arrived within the corrupt timeout.
    TimedOut,
}

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Active,
    Corrupt(CloseReason),
}

impl Status {
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active)
    }

    fn to_code(self) -> u8 {
        match self {
            Status::Active => 0,
            Status::Corrupt(CloseReason::LocalClose) => 1,
            Status::Corrupt(CloseReason::RemoteClose) => 2,
            Status::Corrupt(CloseReason::Aborted) => 3,
            Status::Corrupt(CloseReason::MalformedInput) => 4,
            Status::Corrupt(CloseReason::TimedOut) => 5,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => Status::Active,
            1 => Status::Corrupt(CloseReason::LocalClose),
            2 => Status::Corrupt(CloseReason::RemoteClose),
            3 => Status::Corrupt(CloseReason::Aborted),
            4 => Status::Corrupt(CloseReason::MalformedInput),
            _ => Status::Corrupt(CloseReason::TimedOut),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Active => write!(f, "active"),
            Status::Corrupt(reason) => write!(f, "corrupt ({reason:?})"),
        }
    }
}

/// Status cell shared by both halves of a session.
#[derive(Debug, Default)]
pub struct SharedStatus {
    code: AtomicU8,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Status {
        Status::from_code(self.code.load(Ordering::Acquire))
    }

    /// Move from `Active` to `Corrupt(reason)`.
    ///
    /// Returns `false` (and changes nothing) if the session was already
    /// corrupt.
    pub fn corrupt(&self, reason: CloseReason) -> bool {
        self.code
            .compare_exchange(
                Status::Active.to_code(),
                Status::Corrupt(reason).to_code(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
