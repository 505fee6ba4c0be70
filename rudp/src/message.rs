//! Message containers shared by the send and receive sides.
//!
//! A [`MessageList`] is an owned FIFO of [`Message`]s.  The pending-send list
//! only ever appends and pops from the front; the history list and the
//! receive buffer are additionally kept sorted by id, which makes ordered
//! insertion a binary search followed by a shift.  Since ids almost always
//! arrive in send order, the common case is a plain append.
//!
//! Nodes are moved between lists, never shared: packetizing transfers every
//! pending message into the history with [`MessageList::append`].

use std::collections::VecDeque;

/// One application payload tagged with its logical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Logical (untruncated) sequence number.
    pub id: u64,
    /// Application bytes.
    pub payload: Vec<u8>,
    /// Logical tick at which the message was created.
    pub tick: u64,
}

/// Result of [`MessageList::insert_ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// Appended at the tail (new highest id).
    Tail,
    /// Slotted in ahead of a higher id.
    Middle,
    /// An entry with the same id already exists; nothing changed.
    Duplicate,
}

/// Ordered container of messages (front = lowest / oldest).
#[derive(Debug, Default)]
pub struct MessageList {
    entries: VecDeque<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lowest (or oldest) entry.
    pub fn front(&self) -> Option<&Message> {
        self.entries.front()
    }

    pub fn push_back(&mut self, message: Message) {
        self.entries.push_back(message);
    }

    /// Pop the front entry only if its id equals `id`.
    pub fn pop_front_if(&mut self, id: u64) -> Option<Message> {
        match self.entries.front() {
            Some(m) if m.id == id => self.entries.pop_front(),
            _ => None,
        }
    }

    /// Insert keeping ascending id order; an existing id is left untouched.
    pub fn insert_ordered(&mut self, message: Message) -> Inserted {
        let is_tail = self.entries.back().map_or(true, |last| last.id < message.id);
        if is_tail {
            self.entries.push_back(message);
            return Inserted::Tail;
        }
        match self.entries.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => Inserted::Duplicate,
            Err(pos) => {
                self.entries.insert(pos, message);
                Inserted::Middle
            }
        }
    }

    /// Move up to `limit` entries from the front of `other` onto the back of
    /// `self`.  Returns the number moved.
    pub fn append(&mut self, other: &mut MessageList, limit: usize) -> usize {
        let n = limit.min(other.entries.len());
        self.entries.extend(other.entries.drain(..n));
        n
    }

    /// Drop leading entries while `pred` holds.  Returns the number dropped.
    pub fn drop_front_while(&mut self, mut pred: impl FnMut(&Message) -> bool) -> usize {
        let mut dropped = 0;
        while let Some(front) = self.entries.front() {
            if !pred(front) {
                break;
            }
            self.entries.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Iterate from front to back.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    /// Entries whose id lies in `min..=max`, assuming ascending order.
    pub fn range(&self, min: u64, max: u64) -> impl Iterator<Item = &Message> {
        let start = self.entries.partition_point(|m| m.id < min);
        self.entries
            .range(start..)
            .take_while(move |m| m.id <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u64) -> Message {
        Message {
            id,
            payload: vec![id as u8],
            tick: 0,
        }
    }

    fn ids(list: &MessageList) -> Vec<u64> {
        list.iter().map(|m| m.id).collect()
    }

    #[test]
    fn insert_in_order_appends() {
        let mut l = MessageList::new();
        assert_eq!(l.insert_ordered(msg(1)), Inserted::Tail);
        assert_eq!(l.insert_ordered(msg(2)), Inserted::Tail);
        assert_eq!(ids(&l), vec![1, 2]);
    }

    #[test]
    fn insert_out_of_order_sorts() {
        let mut l = MessageList::new();
        l.insert_ordered(msg(5));
        l.insert_ordered(msg(9));
        assert_eq!(l.insert_ordered(msg(7)), Inserted::Middle);
        assert_eq!(l.insert_ordered(msg(1)), Inserted::Middle);
        assert_eq!(ids(&l), vec![1, 5, 7, 9]);
    }

    #[test]
    fn duplicate_does_not_overwrite() {
        let mut l = MessageList::new();
        l.insert_ordered(msg(3));
        l.insert_ordered(msg(4));
        let dup = Message {
            id: 3,
            payload: b"other".to_vec(),
            tick: 9,
        };
        assert_eq!(l.insert_ordered(dup), Inserted::Duplicate);
        assert_eq!(l.front().unwrap().payload, vec![3]);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn pop_front_if_requires_matching_id() {
        let mut l = MessageList::new();
        l.push_back(msg(4));
        assert!(l.pop_front_if(3).is_none());
        assert_eq!(l.pop_front_if(4).unwrap().id, 4);
        assert!(l.is_empty());
    }

    #[test]
    fn append_moves_with_limit() {
        let mut pending = MessageList::new();
        for id in 0..5 {
            pending.push_back(msg(id));
        }
        let mut history = MessageList::new();
        assert_eq!(history.append(&mut pending, 3), 3);
        assert_eq!(ids(&history), vec![0, 1, 2]);
        assert_eq!(ids(&pending), vec![3, 4]);
        assert_eq!(history.append(&mut pending, 10), 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn drop_front_while_stops_at_first_miss() {
        let mut l = MessageList::new();
        for id in [1, 2, 3, 10, 4] {
            l.push_back(msg(id));
        }
        assert_eq!(l.drop_front_while(|m| m.id < 4), 3);
        assert_eq!(ids(&l), vec![10, 4]);
    }

    #[test]
    fn range_selects_inclusive_window() {
        let mut l = MessageList::new();
        for id in [2, 3, 5, 8, 9] {
            l.push_back(msg(id));
        }
        let got: Vec<u64> = l.range(3, 8).map(|m| m.id).collect();
        assert_eq!(got, vec![3, 5, 8]);
        assert_eq!(l.range(10, 20).count(), 0);
    }
}
