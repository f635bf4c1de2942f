//! Fixed Intervals
//!
//! Where a physical register is pinned by the instruction stream itself:
//! call arguments and clobbers, return values, division operands. The
//! allocator treats these ranges as already occupied.

use crate::backend::lifetime::position::BlockPosition;
use crate::backend::lifetime::ranges::{LinearLiveRanges, LiveRange};
use crate::backend::registers::Amd64Register;

/// Occupied ranges of one physical register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedInterval {
    pub register: Amd64Register,
    pub ranges: LinearLiveRanges,
}

impl FixedInterval {
    pub fn new(register: Amd64Register) -> Self {
        Self {
            register,
            ranges: LinearLiveRanges::new(),
        }
    }

    /// Record a write, cutting the range that reaches it to start there.
    pub fn add_def(&mut self, position: BlockPosition) {
        match self.ranges.range_containing(position) {
            Some(range) => {
                self.ranges.remove(&range);
                self.ranges.add(range.with_from(position.pos));
            }
            None => self.ranges.add(LiveRange::new(position.block, position.pos, position.pos)),
        }
    }

    /// Record a read; the register is occupied from the block start unless
    /// a later write already claimed the range.
    pub fn add_use(&mut self, position: BlockPosition) {
        if !self.ranges.covers(position) {
            self.ranges.add(LiveRange::new(position.block, 0, position.pos));
        }
    }
}
