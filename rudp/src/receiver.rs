//! Receive-side window and loss detection.
//!
//! [`RecvWindow`] holds everything the inbound path mutates:
//!
//! - `id_min`: next id to hand to the application (never decreases).
//! - `id_max`: highest id observed so far.
//! - the receive buffer, sorted ascending, every entry `>= id_min`.
//! - the gap tracker used to debounce retransmission requests.
//!
//! ```text
//!    id_min            head          id_max
//!      │   <── gap ──▶  │               │
//!  ────┼────────────────┼───────────────┼──────▶ id space
//!      │ (missing)      │ <─ buffered ─▶│
//! ```
//!
//! A gap is first *observed* and only *requested* once it has persisted for
//! the debounce interval, so ordinary reordering on the path does not cause
//! spurious REQUEST records.  A MISSING report from the peer is the only way
//! the window skips ids it never received.
//!
//! This module only manages state; decoding and queueing belong to
//! [`crate::engine`].

use std::time::{Duration, Instant};

use crate::message::{Inserted, Message, MessageList};
use crate::seq::IdRange;

// ---------------------------------------------------------------------------
// GapTracker
// ---------------------------------------------------------------------------

/// Remembers when the current stall of `id_min` was first seen.
#[derive(Debug, Default)]
struct GapTracker {
    /// `(stalled id_min, first observed at)`.  At most one stall is active.
    stalled: Option<(u64, Instant)>,
}

impl GapTracker {
    fn clear(&mut self) {
        self.stalled = None;
    }

    fn clear_if(&mut self, id: u64) {
        if matches!(self.stalled, Some((stalled, _)) if stalled == id) {
            self.stalled = None;
        }
    }
}

// ---------------------------------------------------------------------------
// RecvWindow
// ---------------------------------------------------------------------------

/// Receive-side state for one session.
#[derive(Debug)]
pub struct RecvWindow {
    /// Next id to deliver.
    pub id_min: u64,
    /// Highest id observed.
    pub id_max: u64,
    buffer: MessageList,
    gaps: GapTracker,
}

impl Default for RecvWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvWindow {
    pub fn new() -> Self {
        Self {
            id_min: 0,
            id_max: 0,
            buffer: MessageList::new(),
            gaps: GapTracker::default(),
        }
    }

    /// Number of buffered, not yet delivered messages.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Lowest buffered id.
    pub fn head_id(&self) -> Option<u64> {
        self.buffer.front().map(|m| m.id)
    }

    /// Store an inbound data record.
    ///
    /// Returns `false` when the record was dropped as stale (`id < id_min`)
    /// or as a duplicate of an id already buffered.
    pub fn insert_message(&mut self, id: u64, payload: &[u8]) -> bool {
        if id < self.id_min {
            return false;
        }
        let message = Message {
            id,
            payload: payload.to_vec(),
            tick: 0,
        };
        let stored = if self.buffer.is_empty() || id > self.id_max {
            self.buffer.push_back(message);
            self.id_max = id;
            true
        } else {
            self.buffer.insert_ordered(message) != Inserted::Duplicate
        };
        self.gaps.clear_if(id);
        stored
    }

    /// Pop the payload with id `id_min`, if it is buffered.
    pub fn pop_ready(&mut self) -> Option<Vec<u8>> {
        let message = self.buffer.pop_front_if(self.id_min)?;
        self.id_min += 1;
        Some(message.payload)
    }

    /// Apply a MISSING report: the peer will never resend `range`.
    ///
    /// Only a range that covers `id_min` has an effect; the window then skips
    /// to `range.max + 1`, discarding anything buffered below it.  Returns
    /// whether the window moved.
    pub fn skip_missing(&mut self, range: IdRange) -> bool {
        if range.max < self.id_min || range.min > self.id_min {
            return false;
        }
        self.id_min = range.max + 1;
        self.id_max = self.id_max.max(range.max);
        let floor = self.id_min;
        self.buffer.drop_front_while(|m| m.id < floor);
        self.gaps.clear();
        true
    }

    /// Debounced gap detection.
    ///
    /// Looks at the distance between `id_min` and the lowest buffered id.  A
    /// fresh stall is only recorded.  Once the same stall has lasted at least
    /// `debounce` (or immediately when `forced`), the tracker is reset and the
    /// missing range is returned for the caller to request.
    pub fn detect_gap(&mut self, now: Instant, debounce: Duration, forced: bool) -> Option<IdRange> {
        let head = match self.head_id() {
            Some(head) if head > self.id_min => head,
            _ => {
                self.gaps.clear();
                return None;
            }
        };
        let gap = IdRange::new(self.id_min, head - 1);

        if forced {
            self.gaps.clear();
            return Some(gap);
        }

        match self.gaps.stalled {
            Some((stalled, since)) if stalled == self.id_min => {
                if now.saturating_duration_since(since) >= debounce {
                    self.gaps.clear();
                    Some(gap)
                } else {
                    None
                }
            }
            _ => {
                self.gaps.stalled = Some((self.id_min, now));
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
