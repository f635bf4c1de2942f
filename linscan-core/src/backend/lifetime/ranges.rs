//! Live Ranges
//!
//! `LiveRange` is an inclusive slot interval inside one block and
//! `LinearLiveRanges` a disjoint, start-ordered set of them describing the
//! complete liveness of one register.
//!
//! # Algorithm
//! `first_intersection_with` is the query the allocator runs for every
//! register against every candidate interval. Both sets are walked in
//! lock step, each starting at the range covering the later of the two
//! start positions, always advancing the range that ends first.

use crate::backend::block::BlockId;
use crate::backend::lifetime::position::BlockPosition;
use std::collections::BTreeMap;
use std::fmt;

/// Slots `from..=to` of `block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveRange {
    pub block: BlockId,
    pub from: u32,
    pub to: u32,
}

impl LiveRange {
    #[inline]
    pub fn new(block: BlockId, from: u32, to: u32) -> Self {
        debug_assert!(from <= to, "live range {}..={} is reversed", from, to);
        Self { block, from, to }
    }

    /// The whole block, from the phi slot to the end slot.
    #[inline]
    pub fn everywhere(block: BlockId, instruction_count: usize) -> Self {
        Self::new(block, 0, BlockPosition::end_of(block, instruction_count).pos)
    }

    #[inline]
    pub fn from_position(&self) -> BlockPosition {
        BlockPosition::new(self.block, self.from)
    }

    #[inline]
    pub fn to_position(&self) -> BlockPosition {
        BlockPosition::new(self.block, self.to)
    }

    #[inline]
    pub fn contains(&self, position: BlockPosition) -> bool {
        position.block == self.block && self.from <= position.pos && position.pos <= self.to
    }

    #[inline]
    pub fn with_from(&self, from: u32) -> Self {
        Self::new(self.block, from, self.to)
    }

    #[inline]
    pub fn with_to(&self, to: u32) -> Self {
        Self::new(self.block, self.from, to)
    }

    /// The overlap of both ranges, if any.
    pub fn intersection_with(&self, other: &LiveRange) -> Option<LiveRange> {
        if self.block != other.block {
            return None;
        }
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        (from <= to).then(|| LiveRange::new(self.block, from, to))
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[{},{}]", self.block, self.from, self.to)
    }
}

/// The two halves of something cut at a position.
///
/// `before` holds everything strictly before the position, `after` the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<T> {
    pub before: T,
    pub after: T,
}

/// Disjoint live ranges keyed by start position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearLiveRanges {
    ranges: BTreeMap<BlockPosition, u32>,
}

impl LinearLiveRanges {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Start of the first range.
    #[inline]
    pub fn from(&self) -> Option<BlockPosition> {
        self.ranges.keys().next().copied()
    }

    /// End of the last range.
    #[inline]
    pub fn to(&self) -> Option<BlockPosition> {
        self.ranges
            .iter()
            .next_back()
            .map(|(start, to)| BlockPosition::new(start.block, *to))
    }

    pub fn iter(&self) -> impl Iterator<Item = LiveRange> + '_ {
        self.ranges
            .iter()
            .map(|(start, to)| LiveRange::new(start.block, start.pos, *to))
    }

    /// Ranges starting in `block`, in order.
    pub fn ranges_in_block(&self, block: BlockId) -> impl Iterator<Item = LiveRange> + '_ {
        self.ranges
            .range(BlockPosition::begin_of(block)..=BlockPosition::new(block, u32::MAX))
            .map(|(start, to)| LiveRange::new(start.block, start.pos, *to))
    }

    /// The range covering `position`, if any.
    pub fn range_containing(&self, position: BlockPosition) -> Option<LiveRange> {
        self.ranges
            .range(..=position)
            .next_back()
            .map(|(start, to)| LiveRange::new(start.block, start.pos, *to))
            .filter(|range| range.contains(position))
    }

    #[inline]
    pub fn covers(&self, position: BlockPosition) -> bool {
        self.range_containing(position).is_some()
    }

    /// Insert a range that intersects none of the present ones.
    pub fn add(&mut self, range: LiveRange) {
        debug_assert!(
            self.range_containing(range.from_position()).is_none()
                && self
                    .ranges
                    .range(range.from_position()..=range.to_position())
                    .next()
                    .is_none(),
            "live range {} overlaps an existing range",
            range
        );
        self.ranges.insert(range.from_position(), range.to);
    }

    /// Remove exactly `range`.
    pub fn remove(&mut self, range: &LiveRange) {
        let removed = self.ranges.remove(&range.from_position());
        debug_assert_eq!(removed, Some(range.to), "live range {} was not present", range);
    }

    /// Remove every range of `block`.
    pub fn remove_block(&mut self, block: BlockId) {
        let starts: Vec<BlockPosition> = self.ranges_in_block(block).map(|range| range.from_position()).collect();
        for start in starts {
            self.ranges.remove(&start);
        }
    }

    /// Cut the set before `position`; a range covering `position` is divided
    /// into `[from, position - 1]` and `[position, to]`.
    pub fn split_before(mut self, position: BlockPosition) -> Split<LinearLiveRanges> {
        let mut after = self.ranges.split_off(&position);
        if let Some(range) = self.range_containing(position) {
            self.ranges.insert(range.from_position(), position.pos - 1);
            after.insert(position, range.to);
        }
        Split {
            before: self,
            after: LinearLiveRanges { ranges: after },
        }
    }

    /// Union with `other` and merge ranges that touch inside a block.
    pub fn add_all(&mut self, other: &LinearLiveRanges) {
        for range in other.iter() {
            self.add(range);
        }
        self.coalesce();
    }

    fn coalesce(&mut self) {
        let mut merged: BTreeMap<BlockPosition, u32> = BTreeMap::new();
        let mut current: Option<LiveRange> = None;
        for range in self.iter() {
            current = match current {
                Some(open) if open.block == range.block && open.to + 1 == range.from => Some(open.with_to(range.to)),
                Some(open) => {
                    merged.insert(open.from_position(), open.to);
                    Some(range)
                }
                None => Some(range),
            };
        }
        if let Some(open) = current {
            merged.insert(open.from_position(), open.to);
        }
        self.ranges = merged;
    }

    /// Ranges from the one covering `start` (or the first one after it) onwards.
    fn iter_from(&self, start: BlockPosition) -> impl Iterator<Item = LiveRange> + '_ {
        let first = self
            .range_containing(start)
            .map(|range| range.from_position())
            .unwrap_or(start);
        self.ranges
            .range(first..)
            .map(|(start, to)| LiveRange::new(start.block, start.pos, *to))
    }

    /// First position covered by both sets.
    pub fn first_intersection_with(&self, other: &LinearLiveRanges) -> Option<BlockPosition> {
        let start = self.from()?.max(other.from()?);
        let mut mine = self.iter_from(start).peekable();
        let mut theirs = other.iter_from(start).peekable();
        while let (Some(a), Some(b)) = (mine.peek(), theirs.peek()) {
            if let Some(overlap) = a.intersection_with(b) {
                return Some(overlap.from_position());
            }
            if a.to_position() < b.to_position() {
                mine.next();
            } else {
                theirs.next();
            }
        }
        None
    }
}

impl fmt::Display for LinearLiveRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for range in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", range)?;
            first = false;
        }
        Ok(())
    }
}
