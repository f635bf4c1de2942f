//! Lifetime Intervals
//!
//! A `LifetimeInterval` is everything the allocator knows about one virtual
//! register (or one split of it): where it is live, where it is defined and
//! used, and which other registers it would like to share a physical
//! register with.

use crate::backend::block::BlockId;
use crate::backend::error::BackendError;
use crate::backend::lifetime::position::BlockPosition;
use crate::backend::lifetime::ranges::{LinearLiveRanges, LiveRange, Split};
use crate::backend::registers::{Register, VirtualRegister};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A def or use of the interval's register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseSite {
    pub position: BlockPosition,
    /// The instruction can access the register's stack slot directly.
    pub may_be_memory: bool,
}

/// Live ranges, def/use sites and coalescing hints of a virtual register.
///
/// `from_hints` are registers connected to this one where it starts (the
/// source of a move defining it), `to_hints` those connected where it ends
/// (the destination of a move consuming it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifetimeInterval {
    pub register: VirtualRegister,
    pub ranges: LinearLiveRanges,
    sites: BTreeMap<BlockPosition, bool>,
    pub from_hints: BTreeSet<Register>,
    pub to_hints: BTreeSet<Register>,
}

impl LifetimeInterval {
    pub fn new(register: VirtualRegister) -> Self {
        Self {
            register,
            ranges: LinearLiveRanges::new(),
            sites: BTreeMap::new(),
            from_hints: BTreeSet::new(),
            to_hints: BTreeSet::new(),
        }
    }

    /// First live position.
    #[inline]
    pub fn from(&self) -> BlockPosition {
        self.ranges.from().unwrap_or_default()
    }

    /// Last live position.
    #[inline]
    pub fn to(&self) -> BlockPosition {
        self.ranges.to().unwrap_or_default()
    }

    /// Defs and uses in program order.
    pub fn sites(&self) -> impl Iterator<Item = UseSite> + '_ {
        self.sites.iter().map(|(position, may_be_memory)| UseSite {
            position: *position,
            may_be_memory: *may_be_memory,
        })
    }

    #[inline]
    pub fn has_sites(&self) -> bool {
        !self.sites.is_empty()
    }

    /// First def or use.
    #[inline]
    pub fn first_site(&self) -> Option<BlockPosition> {
        self.sites.keys().next().copied()
    }

    /// First def or use at or after `position`.
    #[inline]
    pub fn next_use_after(&self, position: BlockPosition) -> Option<BlockPosition> {
        self.sites.range(position..).next().map(|(position, _)| *position)
    }

    /// First def or use that cannot be served from memory.
    pub fn first_site_needing_register(&self) -> Option<BlockPosition> {
        self.sites
            .iter()
            .find(|(_, may_be_memory)| !**may_be_memory)
            .map(|(position, _)| *position)
    }

    /// Last definition, if the interval contains one.
    pub fn last_def(&self) -> Option<BlockPosition> {
        self.sites.keys().rev().find(|position| position.is_def()).copied()
    }

    /// First site if it is a use rather than a definition.
    pub fn first_use(&self) -> Option<BlockPosition> {
        self.first_site().filter(BlockPosition::is_use)
    }

    #[inline]
    pub fn covers(&self, position: BlockPosition) -> bool {
        self.ranges.covers(position)
    }

    /// Whether the interval is over before `position`.
    #[inline]
    pub fn ends_before(&self, position: BlockPosition) -> bool {
        self.to() < position
    }

    /// The (single, during analysis) range of `block`.
    #[inline]
    pub fn range_in_block(&self, block: BlockId) -> Option<LiveRange> {
        self.ranges.ranges_in_block(block).next()
    }

    pub fn make_alive_in_whole_block(&mut self, block: BlockId, instruction_count: usize) {
        self.ranges.remove_block(block);
        self.ranges.add(LiveRange::everywhere(block, instruction_count));
    }

    fn add_site(&mut self, position: BlockPosition, may_be_memory: bool) {
        self.sites
            .entry(position)
            .and_modify(|existing| *existing &= may_be_memory)
            .or_insert(may_be_memory);
    }

    /// Record a definition, narrowing the block's range to start there.
    ///
    /// A definition nothing reads gets a range covering just itself.
    pub fn set_def(&mut self, position: BlockPosition, may_be_memory: bool) {
        match self.range_in_block(position.block) {
            Some(range) => {
                debug_assert!(position.pos <= range.to, "definition at {} after the live range {}", position, range);
                self.ranges.remove(&range);
                self.ranges.add(range.with_from(position.pos));
            }
            None => self.ranges.add(LiveRange::new(position.block, position.pos, position.pos)),
        }
        self.add_site(position, may_be_memory);
    }

    /// Record a use, making the value live from the block's start up to it
    /// unless a range already reaches back to it.
    pub fn add_use(&mut self, position: BlockPosition, may_be_memory: bool) {
        match self.range_in_block(position.block) {
            Some(range) if range.from > position.pos => {
                self.ranges.remove(&range);
                self.ranges.add(range.with_from(0));
            }
            Some(_) => {}
            None => self.ranges.add(LiveRange::new(position.block, 0, position.pos)),
        }
        self.add_site(position, may_be_memory);
    }

    /// Cut the interval before `position`.
    ///
    /// The first half keeps the `from_hints`, the second half the `to_hints`.
    ///
    /// # Errors
    /// Returns `BackendError::InvalidSplit` if either half would be empty.
    pub fn split_before(self, position: BlockPosition) -> Result<Split<LifetimeInterval>, BackendError> {
        if position <= self.from() || self.to() < position {
            return Err(BackendError::InvalidSplit {
                register: self.register,
                position,
                from: self.from(),
                to: self.to(),
            });
        }
        let LifetimeInterval {
            register,
            ranges,
            mut sites,
            from_hints,
            to_hints,
        } = self;
        let after_sites = sites.split_off(&position);
        let ranges = ranges.split_before(position);
        Ok(Split {
            before: LifetimeInterval {
                register,
                ranges: ranges.before,
                sites,
                from_hints,
                to_hints: BTreeSet::new(),
            },
            after: LifetimeInterval {
                register,
                ranges: ranges.after,
                sites: after_sites,
                from_hints: BTreeSet::new(),
                to_hints,
            },
        })
    }

    /// Merge consecutive splits of one register back into one interval.
    pub fn coalesce<'a>(splits: impl IntoIterator<Item = &'a LifetimeInterval>) -> Option<LifetimeInterval> {
        let mut splits = splits.into_iter();
        let mut merged = splits.next()?.clone();
        for split in splits {
            debug_assert_eq!(merged.register, split.register);
            merged.ranges.add_all(&split.ranges);
            for site in split.sites() {
                merged.add_site(site.position, site.may_be_memory);
            }
            merged.to_hints = split.to_hints.clone();
        }
        Some(merged)
    }
}

impl fmt::Display for LifetimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.register, self.ranges)
    }
}
