//! Session tunables.
//!
//! A [`Config`] is handed to [`crate::engine::Engine::new`] and stays fixed
//! for the lifetime of the session.  Tick-based values count calls to
//! `update(1)`; the collaborator layer turns ticks into wall-clock time with
//! [`Config::tick`].

use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;

/// Smallest datagram limit that still fits a range record plus some data.
pub const MIN_DATAGRAM: usize = 16;

/// Adjustable session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Ticks without any input before the session is declared dead.
    /// `0` disables the check.
    pub corrupt_timeout: u64,
    /// Ticks between sweeps of the retransmission history.
    pub expiry_interval: u64,
    /// Ticks between packetizing rounds.
    pub send_interval: u64,
    /// How long a gap must persist before it is requested.
    pub gap_debounce: Duration,
    /// Upper bound on a packed datagram.  Only a single oversized record
    /// can exceed it.
    pub max_datagram: usize,
    /// Largest payload accepted by `send`.
    pub max_payload: usize,
    /// New data records packetized per send interval.
    pub max_records_per_flush: usize,
    /// Capacity of each inbound-to-outbound exchange queue.
    pub queue_capacity: usize,
    /// Wall-clock length of one tick, used by the connection driver.
    pub tick: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corrupt_timeout: 500,
            // 5 minutes at the default tick.
            expiry_interval: 30_000,
            send_interval: 1,
            gap_debounce: Duration::from_millis(10),
            // Fits the 1280-byte IPv6 minimum MTU after IP/UDP headers.
            max_datagram: 1200,
            max_payload: MAX_PAYLOAD,
            max_records_per_flush: 500,
            queue_capacity: 1024,
            tick: Duration::from_millis(10),
        }
    }
}

/// Rejected configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("send_interval must be at least 1 tick")]
    ZeroSendInterval,
    #[error("expiry_interval must be at least 1 tick")]
    ZeroExpiryInterval,
    #[error("max_datagram {0} is below the minimum of {}", MIN_DATAGRAM)]
    DatagramTooSmall(usize),
    #[error("max_payload {0} is outside 1..={}", MAX_PAYLOAD)]
    PayloadLimit(usize),
    #[error("max_records_per_flush must be at least 1")]
    ZeroFlushLimit,
    #[error("queue_capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("tick must be non-zero")]
    ZeroTick,
}

impl Config {
    /// Check every field for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_interval == 0 {
            return Err(ConfigError::ZeroSendInterval);
        }
        if self.expiry_interval == 0 {
            return Err(ConfigError::ZeroExpiryInterval);
        }
        if self.max_datagram < MIN_DATAGRAM {
            return Err(ConfigError::DatagramTooSmall(self.max_datagram));
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::PayloadLimit(self.max_payload));
        }
        if self.max_records_per_flush == 0 {
            return Err(ConfigError::ZeroFlushLimit);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn default_payload_limit_matches_wire_limit() {
        assert_eq!(Config::default().max_payload, 0x7fff - 5);
    }

    #[test]
    fn rejects_zero_intervals() {
        let c = Config {
            send_interval: 0,
            ..Config::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::ZeroSendInterval));

        let c = Config {
            expiry_interval: 0,
            ..Config::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::ZeroExpiryInterval));
    }

    #[test]
    fn rejects_payload_beyond_wire_limit() {
        let c = Config {
            max_payload: MAX_PAYLOAD + 1,
            ..Config::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::PayloadLimit(MAX_PAYLOAD + 1)));
    }

    #[test]
    fn rejects_tiny_datagrams() {
        let c = Config {
            max_datagram: 4,
            ..Config::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::DatagramTooSmall(4)));
    }
}
