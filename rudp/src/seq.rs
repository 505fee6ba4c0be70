//! Sequence-number truncation and wrap-around resolution.
//!
//! Logical message ids are unbounded (`u64`), but only their low 16 bits
//! travel on the wire.  A receiver rebuilds the logical id by choosing the
//! representative of the truncated value that lies **nearest** a reference id
//! it already trusts (the relevant window edge):
//!
//! ```text
//!   candidate = wire | (reference & !0xFFFF)
//!   candidate < reference - 0x8000  =>  candidate + 0x10000
//!   candidate > reference + 0x8000  =>  candidate - 0x10000
//! ```
//!
//! The result is exact as long as the true distance between the id and the
//! reference stays below [`HALF_SPACE`].  Keeping the outstanding window well
//! under that bound is the caller's responsibility.

/// Number of distinct wire ids.
pub const ID_SPACE: u64 = 0x1_0000;

/// Largest distance at which resolution is still unambiguous.
pub const HALF_SPACE: u64 = 0x8000;

const HIGH_MASK: u64 = !(ID_SPACE - 1);

/// Low 16 bits of a logical id, as written on the wire.
#[inline]
pub fn truncate(id: u64) -> u16 {
    (id & (ID_SPACE - 1)) as u16
}

/// Rebuild the logical id nearest `reference` whose low 16 bits equal `wire`.
///
/// Returns `None` when the nearest representative would fall below id 0,
/// which can only happen for stale or forged records near the start of a
/// session.
pub fn resolve(wire: u16, reference: u64) -> Option<u64> {
    let candidate = u64::from(wire) | (reference & HIGH_MASK);
    if candidate.saturating_add(HALF_SPACE) < reference {
        candidate.checked_add(ID_SPACE)
    } else if candidate > reference.saturating_add(HALF_SPACE) {
        candidate.checked_sub(ID_SPACE)
    } else {
        Some(candidate)
    }
}

/// Inclusive range of logical ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u64,
    pub max: u64,
}

impl IdRange {
    pub fn new(min: u64, max: u64) -> Self {
        debug_assert!(min <= max, "inverted id range {min}..={max}");
        Self { min, max }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.min <= id && id <= self.max
    }

    /// Truncate both ends for transmission.
    pub fn to_wire(self) -> WireRange {
        WireRange {
            min: truncate(self.min),
            max: truncate(self.max),
        }
    }
}

/// Inclusive range as carried by REQUEST / MISSING records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireRange {
    pub min: u16,
    pub max: u16,
}

impl WireRange {
    /// Resolve both ends against `reference`.
    ///
    /// A lower bound that resolves below zero is clamped to 0.  Returns `None`
    /// when the upper bound does not resolve or the ends come out inverted.
    pub fn resolve(self, reference: u64) -> Option<IdRange> {
        let max = resolve(self.max, reference)?;
        let min = resolve(self.min, reference).unwrap_or(0);
        (min <= max).then(|| IdRange { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_low_bits() {
        assert_eq!(truncate(0), 0);
        assert_eq!(truncate(0xFFFF), 0xFFFF);
        assert_eq!(truncate(0x1_0003), 3);
        assert_eq!(truncate(0x7_ABCD), 0xABCD);
    }

    #[test]
    fn resolves_within_same_block() {
        assert_eq!(resolve(10, 5), Some(10));
        assert_eq!(resolve(5, 10), Some(5));
    }

    #[test]
    fn resolves_forward_across_wrap() {
        // Reference just below a 64 Ki boundary, id just above it.
        let reference = 0xFFF0;
        let id = 0x1_0005;
        assert_eq!(resolve(truncate(id), reference), Some(id));
    }

    #[test]
    fn resolves_backward_across_wrap() {
        let reference = 0x2_0004;
        let id = 0x1_FFF8;
        assert_eq!(resolve(truncate(id), reference), Some(id));
    }

    #[test]
    fn below_zero_is_none() {
        // 0xFFFF is nearest to reference 3 as "-1".
        assert_eq!(resolve(0xFFFF, 3), None);
    }

    #[test]
    fn nearby_ids_recover_exactly() {
        let references = [0u64, 1, 0x7FFF, 0x8000, 0xFFFF, 0x1_0000, 0x12_3456];
        let offsets: [i64; 9] = [-0x7FFF, -0x4000, -300, -1, 0, 1, 300, 0x4000, 0x7FFF];
        for &a in &references {
            for &d in &offsets {
                let b = a as i64 + d;
                if b < 0 {
                    continue;
                }
                let b = b as u64;
                assert_eq!(resolve(truncate(b), a), Some(b), "a={a:#x} b={b:#x}");
            }
        }
    }

    #[test]
    fn wire_range_clamps_negative_min() {
        let range = WireRange { min: 0xFFFE, max: 2 };
        assert_eq!(range.resolve(1), Some(IdRange::new(0, 2)));
    }

    #[test]
    fn wire_range_rejects_inverted() {
        let range = WireRange { min: 9, max: 4 };
        assert_eq!(range.resolve(6), None);
    }

    #[test]
    fn id_range_contains_is_inclusive() {
        let r = IdRange::new(3, 5);
        assert!(!r.contains(2));
        assert!(r.contains(3));
        assert!(r.contains(5));
        assert!(!r.contains(6));
    }
}
