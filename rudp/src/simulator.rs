//! Lossy network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! recovery paths without depending on actual network conditions, a
//! [`Simulator`] stands in for the wire between two engines and applies a
//! configurable fault model:
//!
//! | Fault        | Description                                           |
//! |--------------|-------------------------------------------------------|
//! | Loss         | Drop a datagram with probability `loss_rate`.         |
//! | Duplication  | Deliver a datagram twice.                             |
//! | Reordering   | Hold a datagram back one round so later ones overtake.|
//!
//! The fault sequence is drawn from a seeded `StdRng`, so a failing test
//! replays identically.

use std::mem;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is delayed by one delivery round.
    pub reorder_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters for what the simulator did to the traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

/// One direction of a simulated datagram path.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    /// Delivered on the next `deliver`.
    ready: Vec<Vec<u8>>,
    /// Held back during the previous round; delivered after `ready`.
    held: Vec<Vec<u8>>,
    /// Held back during this round.
    held_next: Vec<Vec<u8>>,
    stats: SimStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            ready: Vec::new(),
            held: Vec::new(),
            held_next: Vec::new(),
            stats: SimStats::default(),
        }
    }

    /// A fault-free path.
    pub fn lossless() -> Self {
        Self::new(SimulatorConfig::default())
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Datagrams accepted but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.ready.len() + self.held.len() + self.held_next.len()
    }

    /// Put one datagram on the wire, applying the fault model.
    pub fn transmit(&mut self, datagram: Vec<u8>) {
        self.stats.sent += 1;
        if self.rng.gen_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            return;
        }
        if self.rng.gen_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.ready.push(datagram.clone());
        }
        if self.rng.gen_bool(self.config.reorder_rate) {
            self.stats.reordered += 1;
            self.held_next.push(datagram);
        } else {
            self.ready.push(datagram);
        }
    }

    pub fn transmit_all(&mut self, datagrams: impl IntoIterator<Item = Vec<u8>>) {
        for datagram in datagrams {
            self.transmit(datagram);
        }
    }

    /// Everything arriving this round, in arrival order.
    ///
    /// Datagrams held back last round arrive after this round's traffic.
    pub fn deliver(&mut self) -> Vec<Vec<u8>> {
        let mut arrived = mem::take(&mut self.ready);
        arrived.append(&mut self.held);
        self.held = mem::take(&mut self.held_next);
        arrived
    }
}
