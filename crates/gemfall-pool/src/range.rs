//! Identifier ranges, round-robin cursors and reservation accumulators.
//!
//! Every pool category owns four [`IdentifierRange`]s: local node ids, local
//! component ids, replicated node ids and replicated component ids. A range
//! is cut into fixed-width *slots*, one per pooled instance, where the width
//! is the number of identifiers one instance consumes. Slot `n` of a range
//! with stride `s` starts at `first + n * s`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// IdentifierRange
// ---------------------------------------------------------------------------

/// A contiguous `[first, last]` block of identifiers.
///
/// The range stores its start and length. `last` is always derived, and an
/// empty range has no `last`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IdentifierRange {
    first: u32,
    count: u32,
}

impl IdentifierRange {
    /// A range of `count` identifiers starting at `first`.
    ///
    /// `first + count` must not exceed `u32::MAX + 1`; [`IdAccumulator`]
    /// enforces this when reserving.
    pub const fn new(first: u32, count: u32) -> Self {
        Self { first, count }
    }

    /// An empty range anchored at `first`.
    pub const fn empty(first: u32) -> Self {
        Self { first, count: 0 }
    }

    /// First identifier of the range (the anchor, for an empty range).
    pub fn first(self) -> u32 {
        self.first
    }

    /// Last identifier of the range, or `None` when empty.
    pub fn last(self) -> Option<u32> {
        if self.count == 0 {
            None
        } else {
            Some(self.first + (self.count - 1))
        }
    }

    /// Number of identifiers in the range.
    pub fn count(self) -> u32 {
        self.count
    }

    /// Whether the range holds no identifiers.
    pub fn is_empty(self) -> bool {
        self.count == 0
    }

    /// One past the last identifier, widened so it cannot overflow.
    pub fn end(self) -> u64 {
        self.first as u64 + self.count as u64
    }

    /// Whether `id` lies inside the range.
    pub fn contains(self, id: u32) -> bool {
        id >= self.first && (id as u64) < self.end()
    }

    /// Whether the two ranges share at least one identifier.
    pub fn overlaps(self, other: IdentifierRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.first as u64) < other.end()
            && (other.first as u64) < self.end()
    }

    /// Number of whole slots of width `stride` in the range.
    pub fn slots(self, stride: u32) -> u32 {
        if stride == 0 {
            0
        } else {
            self.count / stride
        }
    }

    /// First identifier of slot `slot`, if that slot lies inside the range.
    pub fn slot_start(self, slot: u32, stride: u32) -> Option<u32> {
        if slot >= self.slots(stride) {
            return None;
        }
        Some(self.first + slot * stride)
    }

    /// Slot whose first identifier is `id`. Returns `None` for ids outside
    /// the range and for ids that do not start a slot.
    pub fn slot_of(self, id: u32, stride: u32) -> Option<u32> {
        if stride == 0 || !self.contains(id) {
            return None;
        }
        let offset = id - self.first;
        if offset % stride != 0 {
            return None;
        }
        let slot = offset / stride;
        (slot < self.slots(stride)).then_some(slot)
    }
}

impl fmt::Debug for IdentifierRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentifierRange({self})")
    }
}

impl fmt::Display for IdentifierRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last() {
            Some(last) => write!(f, "{}->{}", self.first, last),
            None => write!(f, "{}->(empty)", self.first),
        }
    }
}

// ---------------------------------------------------------------------------
// SlotCursor
// ---------------------------------------------------------------------------

/// Round-robin cursor over the slots of a range.
///
/// `next_slot` is the slot the next automatic assignment hands out. It wraps
/// to slot 0 after the last slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotCursor {
    next: u32,
    slots: u32,
}

impl SlotCursor {
    /// A cursor over `slots` slots, positioned at slot 0.
    pub fn new(slots: u32) -> Self {
        Self { next: 0, slots }
    }

    /// Number of slots the cursor cycles over.
    pub fn slots(self) -> u32 {
        self.slots
    }

    /// Slot the next call to [`take`](Self::take) returns.
    pub fn peek(self) -> Option<u32> {
        (self.slots > 0).then_some(self.next)
    }

    /// Hand out the current slot and step past it.
    pub fn take(&mut self) -> Option<u32> {
        let slot = self.peek()?;
        self.next = (slot + 1) % self.slots;
        Some(slot)
    }

    /// Continue after `slot`, so the next assignment is `slot + 1` (wrapping).
    pub fn continue_after(&mut self, slot: u32) {
        if self.slots > 0 {
            self.next = (slot % self.slots + 1) % self.slots;
        }
    }

    /// Position the cursor so `slot` is handed out next.
    pub fn seek(&mut self, slot: u32) {
        if self.slots > 0 {
            self.next = slot % self.slots;
        }
    }

    /// Back to slot 0.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

// ---------------------------------------------------------------------------
// LocalIds
// ---------------------------------------------------------------------------

/// The local identifiers an instance wore before it was moved into the
/// replicated namespace. Stored in the category's reverse map, keyed by the
/// replicated node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalIds {
    /// Original local node id of the instance root.
    pub node_id: u32,
    /// Original first local component id of the instance.
    pub component_base: u32,
}

// ---------------------------------------------------------------------------
// IdAccumulator
// ---------------------------------------------------------------------------

/// Packs consecutive ranges from a base during the reservation pass.
///
/// The high-water mark only moves forward, and everything packed so far
/// always fits one [`IdentifierRange`]: at most `u32::MAX` identifiers, none
/// past `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAccumulator {
    base: u32,
    next: u64,
}

impl IdAccumulator {
    /// An accumulator that starts packing at `base`.
    pub fn new(base: u32) -> Self {
        Self {
            base,
            next: base as u64,
        }
    }

    /// Carve the next `count` identifiers. Returns `None` when the block
    /// would run past `u32::MAX` or the span would outgrow a range.
    pub fn reserve(&mut self, count: u64) -> Option<IdentifierRange> {
        let end = self.next.checked_add(count)?;
        if end > u32::MAX as u64 + 1 || end - self.base as u64 > u32::MAX as u64 {
            return None;
        }
        let count = u32::try_from(count).ok()?;
        let range = IdentifierRange::new(self.next as u32, count);
        self.next = end;
        Some(range)
    }

    /// Everything reserved so far, as one range.
    pub fn span(self) -> IdentifierRange {
        let count = u32::try_from(self.next - self.base as u64).unwrap_or(u32::MAX);
        IdentifierRange::new(self.base, count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_is_derived_and_empty_has_none() {
        let r = IdentifierRange::new(100, 3);
        assert_eq!(r.last(), Some(102));
        assert_eq!(IdentifierRange::empty(7).last(), None);
        assert!(IdentifierRange::empty(7).is_empty());
    }

    #[test]
    fn contains_and_overlap() {
        let a = IdentifierRange::new(10, 5); // 10..=14
        let b = IdentifierRange::new(15, 5); // 15..=19
        let c = IdentifierRange::new(14, 1);
        assert!(a.contains(14));
        assert!(!a.contains(15));
        assert!(!a.overlaps(b));
        assert!(a.overlaps(c));
        assert!(!a.overlaps(IdentifierRange::empty(12)));
    }

    #[test]
    fn range_touching_u32_max() {
        let r = IdentifierRange::new(u32::MAX - 1, 2);
        assert_eq!(r.last(), Some(u32::MAX));
        assert!(r.contains(u32::MAX));
        assert_eq!(r.end(), u32::MAX as u64 + 1);
    }

    #[test]
    fn slots_are_aligned_blocks() {
        let r = IdentifierRange::new(100, 9); // 3 slots of 3
        assert_eq!(r.slots(3), 3);
        assert_eq!(r.slot_start(2, 3), Some(106));
        assert_eq!(r.slot_start(3, 3), None);
        assert_eq!(r.slot_of(103, 3), Some(1));
        assert_eq!(r.slot_of(104, 3), None, "mid-slot id");
        assert_eq!(r.slot_of(109, 3), None, "past the end");
    }

    #[test]
    fn cursor_wraps_after_last_slot() {
        let mut c = SlotCursor::new(3);
        let taken: Vec<u32> = (0..4).filter_map(|_| c.take()).collect();
        assert_eq!(taken, vec![0, 1, 2, 0]);
        c.continue_after(2);
        assert_eq!(c.peek(), Some(0));
        c.seek(1);
        assert_eq!(c.take(), Some(1));
        c.reset();
        assert_eq!(c.peek(), Some(0));
    }

    #[test]
    fn empty_cursor_hands_out_nothing() {
        let mut c = SlotCursor::new(0);
        assert_eq!(c.take(), None);
        c.seek(4);
        assert_eq!(c.peek(), None);
    }

    #[test]
    fn accumulator_packs_contiguously() {
        let mut acc = IdAccumulator::new(0x20);
        let a = acc.reserve(6).unwrap();
        let b = acc.reserve(0).unwrap();
        let c = acc.reserve(4).unwrap();
        assert_eq!(a, IdentifierRange::new(0x20, 6));
        assert_eq!(b, IdentifierRange::empty(0x26));
        assert_eq!(c, IdentifierRange::new(0x26, 4));
        assert_eq!(acc.span(), IdentifierRange::new(0x20, 10));
    }

    #[test]
    fn accumulator_refuses_overflow() {
        let mut acc = IdAccumulator::new(u32::MAX - 3);
        assert!(acc.reserve(4).is_some());
        assert!(acc.reserve(1).is_none());
        assert_eq!(acc.span().last(), Some(u32::MAX));
    }

    #[test]
    fn accumulator_from_zero_stops_short_of_the_whole_space() {
        let mut acc = IdAccumulator::new(0);
        let all_but_one = acc.reserve(u32::MAX as u64).unwrap();
        assert_eq!(all_but_one.last(), Some(u32::MAX - 1));
        assert!(acc.reserve(1).is_none(), "span would not fit a range");
        assert_eq!(acc.span(), IdentifierRange::new(0, u32::MAX));
        assert_eq!(acc.reserve(0), Some(IdentifierRange::empty(u32::MAX)));
    }
}
