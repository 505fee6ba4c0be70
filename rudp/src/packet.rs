//! Wire-format definitions and datagram packing.
//!
//! A datagram is a plain concatenation of **records**; there is no datagram
//! header.  This module is responsible for:
//! - Defining the on-wire layout of each [`Record`].
//! - Serialising records and bin-packing them into datagrams no larger than
//!   the configured maximum ([`Packetizer`]).
//! - Parsing a received datagram back into records ([`Decoder`]), returning
//!   errors for truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Every record starts with a
//! tag value that occupies one byte when below 128 and two bytes otherwise:
//!
//! ```text
//!  short tag:   0 v v v v v v v                       (value < 128)
//!  long tag:    1 v v v v v v v   v v v v v v v v     (15-bit value)
//!
//!  PING      tag=0
//!  EOF       tag=1
//!  CORRUPT   tag=2
//!  REQUEST   tag=3  | min (2) | max (2) |
//!  MISSING   tag=4  | min (2) | max (2) |
//!  DATA      tag=NORMAL_BASE+len | id (2) | payload (len) |
//! ```
//!
//! Ids are the low 16 bits of the logical id (see [`crate::seq`]).

use thiserror::Error;

use crate::seq::WireRange;

/// Record tag values.
pub mod tags {
    /// Keep-alive; carries nothing.
    pub const PING: u16 = 0;
    /// Graceful close of the sending side.
    pub const EOF: u16 = 1;
    /// Abort; the receiver must tear down the session.
    pub const CORRUPT: u16 = 2;
    /// Ask the peer to resend an id range.
    pub const REQUEST: u16 = 3;
    /// Tell the peer an id range will never be resent.
    pub const MISSING: u16 = 4;
    /// Tags at or above this value are data records of length `tag - NORMAL_BASE`.
    pub const NORMAL_BASE: u16 = 5;
}

/// Largest value a record tag can carry (15 bits).
pub const MAX_TAG: u16 = 0x7fff;

/// Largest payload a single data record can carry.
pub const MAX_PAYLOAD: usize = (MAX_TAG - tags::NORMAL_BASE) as usize;

/// Tag values below this fit in one byte.
const SHORT_TAG_LIMIT: u16 = 0x80;
const LONG_TAG_FLAG: u8 = 0x80;

/// Bytes following a REQUEST / MISSING tag.
const RANGE_LEN: usize = 4;
/// Bytes of truncated id following a data tag.
const ID_LEN: usize = 2;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One decoded (or to-be-encoded) record.  Data payloads borrow from the
/// datagram or from the sender's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Ping,
    Eof,
    Corrupt,
    Request(WireRange),
    Missing(WireRange),
    Data { id: u16, payload: &'a [u8] },
}

impl Record<'_> {
    fn tag(&self) -> u16 {
        match self {
            Record::Ping => tags::PING,
            Record::Eof => tags::EOF,
            Record::Corrupt => tags::CORRUPT,
            Record::Request(_) => tags::REQUEST,
            Record::Missing(_) => tags::MISSING,
            Record::Data { payload, .. } => tags::NORMAL_BASE + payload.len() as u16,
        }
    }

    /// Number of bytes [`Record::encode`] appends.
    pub fn encoded_len(&self) -> usize {
        let tag = self.tag();
        let tag_len = if tag < SHORT_TAG_LIMIT { 1 } else { 2 };
        tag_len
            + match self {
                Record::Ping | Record::Eof | Record::Corrupt => 0,
                Record::Request(_) | Record::Missing(_) => RANGE_LEN,
                Record::Data { payload, .. } => ID_LEN + payload.len(),
            }
    }

    /// Append the serialised record to `buf`.
    ///
    /// Data payloads must not exceed [`MAX_PAYLOAD`]; callers enforce this
    /// when messages are accepted.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        debug_assert!(
            !matches!(self, Record::Data { payload, .. } if payload.len() > MAX_PAYLOAD),
            "data record over MAX_PAYLOAD"
        );
        write_tag(buf, self.tag());
        match self {
            Record::Ping | Record::Eof | Record::Corrupt => {}
            Record::Request(range) | Record::Missing(range) => {
                buf.extend_from_slice(&range.min.to_be_bytes());
                buf.extend_from_slice(&range.max.to_be_bytes());
            }
            Record::Data { id, payload } => {
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(payload);
            }
        }
    }
}

fn write_tag(buf: &mut Vec<u8>, tag: u16) {
    if tag < SHORT_TAG_LIMIT {
        buf.push(tag as u8);
    } else {
        buf.push(((tag >> 8) as u8 & 0x7f) | LONG_TAG_FLAG);
        buf.push((tag & 0xff) as u8);
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Structural errors found while parsing a datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A long tag's second byte is missing.
    #[error("long tag truncated at offset {offset}")]
    TruncatedTag { offset: usize },
    /// A REQUEST / MISSING record has fewer than four bytes after its tag.
    #[error("range record at offset {offset} needs 4 bytes, {remaining} left")]
    TruncatedRange { offset: usize, remaining: usize },
    /// A data record declares more bytes than the datagram holds.
    #[error("data record at offset {offset} declares {declared} bytes, {remaining} left")]
    TruncatedData {
        offset: usize,
        declared: usize,
        remaining: usize,
    },
}

/// Iterator over the records of one datagram.
///
/// Yields `Err` once on the first structural violation and then stops.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    fn next_record(&mut self) -> Result<Record<'a>, DecodeError> {
        let offset = self.pos;
        let first = self.buf[self.pos];
        let tag = if first & LONG_TAG_FLAG == 0 {
            self.pos += 1;
            u16::from(first)
        } else {
            let second = *self
                .buf
                .get(self.pos + 1)
                .ok_or(DecodeError::TruncatedTag { offset })?;
            self.pos += 2;
            (u16::from(first & 0x7f) << 8) | u16::from(second)
        };
        let rest = &self.buf[self.pos..];

        match tag {
            tags::PING => Ok(Record::Ping),
            tags::EOF => Ok(Record::Eof),
            tags::CORRUPT => Ok(Record::Corrupt),
            tags::REQUEST | tags::MISSING => {
                if rest.len() < RANGE_LEN {
                    return Err(DecodeError::TruncatedRange {
                        offset,
                        remaining: rest.len(),
                    });
                }
                let range = WireRange {
                    min: u16::from_be_bytes([rest[0], rest[1]]),
                    max: u16::from_be_bytes([rest[2], rest[3]]),
                };
                self.pos += RANGE_LEN;
                Ok(if tag == tags::REQUEST {
                    Record::Request(range)
                } else {
                    Record::Missing(range)
                })
            }
            _ => {
                let len = usize::from(tag - tags::NORMAL_BASE);
                if rest.len() < ID_LEN + len {
                    return Err(DecodeError::TruncatedData {
                        offset,
                        declared: len,
                        remaining: rest.len(),
                    });
                }
                let id = u16::from_be_bytes([rest[0], rest[1]]);
                let payload = &rest[ID_LEN..ID_LEN + len];
                self.pos += ID_LEN + len;
                Ok(Record::Data { id, payload })
            }
        }
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Record<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let item = self.next_record();
        self.failed = item.is_err();
        Some(item)
    }
}

// ---------------------------------------------------------------------------
// Packetizer
// ---------------------------------------------------------------------------

/// Bin-packs records into datagrams of at most `max_datagram` bytes.
///
/// Records are never split.  A record that is larger than `max_datagram` on
/// its own is emitted as a datagram by itself.
#[derive(Debug)]
pub struct Packetizer {
    max_datagram: usize,
    current: Vec<u8>,
    done: Vec<Vec<u8>>,
    records: usize,
}

impl Packetizer {
    pub fn new(max_datagram: usize) -> Self {
        Self {
            max_datagram,
            current: Vec::with_capacity(max_datagram),
            done: Vec::new(),
            records: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn push(&mut self, record: &Record<'_>) {
        let len = record.encoded_len();
        if len > self.max_datagram {
            self.flush();
            let mut own = Vec::with_capacity(len);
            record.encode(&mut own);
            self.done.push(own);
        } else {
            if self.current.len() + len > self.max_datagram {
                self.flush();
            }
            record.encode(&mut self.current);
        }
        self.records += 1;
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            let full = std::mem::replace(&mut self.current, Vec::with_capacity(self.max_datagram));
            self.done.push(full);
        }
    }

    /// Close the open datagram and return all datagrams in emission order.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        self.done
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
