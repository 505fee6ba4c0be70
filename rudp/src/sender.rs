//! Send-side message bookkeeping.
//!
//! [`SendQueue`] owns two lists:
//!
//! ```text
//!   pending  ──packetize──▶  history  ──expire──▶  (dropped)
//!   (FIFO, not yet sent)     (sent, kept for resends, ascending id)
//! ```
//!
//! Every message gets the next logical id when it is queued.  After its first
//! transmission it moves into the history, where it stays available for
//! retransmission until an expiry sweep drops it.  A peer asking for an id
//! that has already expired gets a MISSING answer instead.
//!
//! This module only manages state; encoding lives in [`crate::packet`] and
//! the drain order in [`crate::engine`].

use crate::message::{Message, MessageList};
use crate::seq::IdRange;

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// How to answer one REQUEST range.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply<'a> {
    /// Sub-range that can no longer be resent.
    pub missing: Option<IdRange>,
    /// Retained messages inside the requested range, ascending.
    pub resend: Vec<&'a Message>,
}

// ---------------------------------------------------------------------------
// SendQueue
// ---------------------------------------------------------------------------

/// Send-side state for one session.
#[derive(Debug, Default)]
pub struct SendQueue {
    /// Id the next queued message will get.
    pub send_id: u64,
    pending: MessageList,
    history: MessageList,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `payload` for the next packetizing round and return its id.
    pub fn push(&mut self, payload: Vec<u8>, tick: u64) -> u64 {
        let id = self.send_id;
        self.pending.push_back(Message { id, payload, tick });
        self.send_id += 1;
        id
    }

    /// Messages queued but not yet transmitted.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Messages retained for retransmission.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The next `limit` pending messages, in send order.
    pub fn peek_pending(&self, limit: usize) -> impl Iterator<Item = &Message> {
        self.pending.iter().take(limit)
    }

    /// Move up to `limit` pending messages into the history.
    ///
    /// Call after the messages returned by [`peek_pending`] have been
    /// encoded.  Returns the number moved.
    ///
    /// [`peek_pending`]: SendQueue::peek_pending
    pub fn commit_pending(&mut self, limit: usize) -> usize {
        self.history.append(&mut self.pending, limit)
    }

    /// Drop history entries created before `tick`.
    ///
    /// Ids ascend with creation time, so the sweep stops at the first entry
    /// still inside the retention window.  Returns the number dropped.
    pub fn expire_before(&mut self, tick: u64) -> usize {
        self.history.drop_front_while(|m| m.tick < tick)
    }

    /// Work out the answer to a peer's REQUEST for `range`.
    ///
    /// - Nothing retained at or below `range.max`: the whole range is
    ///   reported missing.
    /// - Otherwise every retained id inside the range is resent, and the ids
    ///   below the first match (already expired) are reported missing.
    /// - A range entirely above the history (not sent yet) gets no answer.
    pub fn reply(&self, range: IdRange) -> Reply<'_> {
        match self.history.front() {
            Some(oldest) if oldest.id <= range.max => {}
            _ => {
                return Reply {
                    missing: Some(range),
                    resend: Vec::new(),
                }
            }
        }

        let resend: Vec<&Message> = self.history.range(range.min, range.max).collect();
        let missing = match resend.first() {
            Some(first) if first.id > range.min => Some(IdRange::new(range.min, first.id - 1)),
            _ => None,
        };
        Reply { missing, resend }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Queue `n` one-byte messages at `tick` and move them into the history.
    fn sent(q: &mut SendQueue, n: usize, tick: u64) {
        for _ in 0..n {
            let id = q.send_id;
            q.push(vec![id as u8], tick);
        }
        q.commit_pending(n);
    }

    fn oldest_retained(q: &SendQueue) -> Option<u64> {
        q.history.front().map(|m| m.id)
    }

    fn ids(reply: &Reply<'_>) -> Vec<u64> {
        reply.resend.iter().map(|m| m.id).collect()
    }

    #[test]
    fn initial_state() {
        let q = SendQueue::new();
        assert_eq!(q.send_id, 0);
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.history_len(), 0);
        assert_eq!(oldest_retained(&q), None);
    }

    #[test]
    fn push_assigns_sequential_ids() {
        let mut q = SendQueue::new();
        assert_eq!(q.push(b"a".to_vec(), 0), 0);
        assert_eq!(q.push(b"b".to_vec(), 0), 1);
        assert_eq!(q.send_id, 2);
        assert_eq!(q.pending_len(), 2);
    }

    #[test]
    fn commit_respects_limit() {
        let mut q = SendQueue::new();
        for i in 0..5u8 {
            q.push(vec![i], 0);
        }
        let peeked: Vec<u64> = q.peek_pending(3).map(|m| m.id).collect();
        assert_eq!(peeked, vec![0, 1, 2]);
        assert_eq!(q.commit_pending(3), 3);
        assert_eq!(q.pending_len(), 2);
        assert_eq!(q.history_len(), 3);
        assert_eq!(oldest_retained(&q), Some(0));
    }

    #[test]
    fn expire_drops_only_old_entries() {
        let mut q = SendQueue::new();
        sent(&mut q, 3, 10);
        sent(&mut q, 2, 20);
        assert_eq!(q.expire_before(10), 0);
        assert_eq!(q.expire_before(15), 3);
        assert_eq!(oldest_retained(&q), Some(3));
        assert_eq!(q.expire_before(100), 2);
        assert_eq!(q.history_len(), 0);
    }

    #[test]
    fn reply_resends_matching_ids() {
        let mut q = SendQueue::new();
        sent(&mut q, 4, 0);
        let reply = q.reply(IdRange::new(1, 2));
        assert_eq!(ids(&reply), vec![1, 2]);
        assert_eq!(reply.missing, None);
    }

    #[test]
    fn reply_on_empty_history_is_missing() {
        let q = SendQueue::new();
        let reply = q.reply(IdRange::new(0, 3));
        assert_eq!(reply.missing, Some(IdRange::new(0, 3)));
        assert!(reply.resend.is_empty());
    }

    #[test]
    fn reply_for_fully_expired_range_is_missing() {
        let mut q = SendQueue::new();
        sent(&mut q, 3, 0);
        sent(&mut q, 3, 50);
        q.expire_before(10);
        let reply = q.reply(IdRange::new(0, 2));
        assert_eq!(reply.missing, Some(IdRange::new(0, 2)));
        assert!(reply.resend.is_empty());
    }

    #[test]
    fn reply_for_partially_expired_range() {
        let mut q = SendQueue::new();
        sent(&mut q, 3, 0);
        sent(&mut q, 3, 50);
        q.expire_before(10); // ids 0..=2 gone
        let reply = q.reply(IdRange::new(1, 4));
        assert_eq!(reply.missing, Some(IdRange::new(1, 2)));
        assert_eq!(ids(&reply), vec![3, 4]);
    }

    #[test]
    fn reply_for_unsent_range_is_empty() {
        let mut q = SendQueue::new();
        sent(&mut q, 2, 0);
        q.push(b"pending".to_vec(), 0);
        let reply = q.reply(IdRange::new(2, 9));
        assert_eq!(reply, Reply::default());
    }
}
