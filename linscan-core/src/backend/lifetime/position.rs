//! Block Positions
//!
//! A program point is a block plus a slot inside it. Slots interleave uses
//! and definitions so that a value read by instruction `i` and a value
//! written by the same instruction never share a point:
//!
//! ```text
//! slot:   0     1      2     3      4    ...  2n-1    2n
//!         phi   use 0  def 0 use 1  def 1     use n-1 def n-1   (2n+1 = end)
//! ```
//!
//! Slot 0 holds phi definitions, instruction `i` reads at `2(i+1)-1` and
//! writes at `2(i+1)`, and the end of a block with `n` instructions is the
//! use slot of a virtual instruction `n` (`2n+1`), which is where phi inputs
//! of successors are read.

use crate::backend::block::BlockId;
use std::fmt;

/// A totally ordered program point: block linearization order first, slot second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPosition {
    pub block: BlockId,
    pub pos: u32,
}

impl BlockPosition {
    #[inline]
    pub fn new(block: BlockId, pos: u32) -> Self {
        Self { block, pos }
    }

    /// Slot of phi definitions, the first point of a block.
    #[inline]
    pub fn begin_of(block: BlockId) -> Self {
        Self::new(block, 0)
    }

    /// Use slot of the virtual instruction after the last one.
    #[inline]
    pub fn end_of(block: BlockId, instruction_count: usize) -> Self {
        Self::used_by(block, instruction_count)
    }

    #[inline]
    pub fn defined_by(block: BlockId, index: usize) -> Self {
        Self::new(block, Self::def_slot(index))
    }

    #[inline]
    pub fn used_by(block: BlockId, index: usize) -> Self {
        Self::new(block, Self::use_slot(index))
    }

    #[inline]
    pub fn def_slot(index: usize) -> u32 {
        2 * (index as u32 + 1)
    }

    #[inline]
    pub fn use_slot(index: usize) -> u32 {
        2 * (index as u32 + 1) - 1
    }

    #[inline]
    pub fn is_def(&self) -> bool {
        self.pos % 2 == 0
    }

    #[inline]
    pub fn is_use(&self) -> bool {
        !self.is_def()
    }

    /// The following slot in the same block.
    #[inline]
    pub fn next(&self) -> Self {
        Self::new(self.block, self.pos + 1)
    }
}

impl fmt::Display for BlockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.pos)
    }
}
