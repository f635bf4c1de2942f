//! Linear Scan Register Allocator
//!
//! Assigns physical registers to lifetime intervals in order of their start
//! position, splitting intervals where a register runs out and keeping the
//! parts without a register in stack slots.
//!
//! # Algorithm
//! For every interval `current`, in start order:
//! 1. Retire `active` intervals that ended, park those in a lifetime hole in
//!    `inactive`, and wake `inactive` ones covering the start again
//! 2. **Free register**: rank registers by how long they stay free of fixed
//!    ranges, `active` owners and overlapping `inactive` owners. Take the
//!    longest-free one (preferring hinted registers), splitting `current`
//!    before the conflict if it does not last to the end
//! 3. **Blocked register**: rank registers by the next use of their current
//!    owners and evict the owners of the one used farthest away, unless
//!    `current` itself is needed later than that, in which case `current`
//!    waits in memory until its first use that needs a register
//!
//! Split tails go back into `unhandled`. Every interval lives in one arena
//! and is referred to by `IntervalId`; splitting replaces the arena entry
//! with the first half and appends the second.

use crate::backend::allocation::conflict::{ConflictMap, ConflictSite};
use crate::backend::allocation::result::{AllocationResult, IntervalId};
use crate::backend::allocation::spill_slots::SpillSlotAllocator;
use crate::backend::config::TargetConfig;
use crate::backend::error::BackendError;
use crate::backend::lifetime::analysis::LifetimeAnalysisResult;
use crate::backend::lifetime::fixed::FixedInterval;
use crate::backend::lifetime::interval::LifetimeInterval;
use crate::backend::lifetime::position::BlockPosition;
use crate::backend::registers::{Amd64Register, Register, VirtualRegister};
use std::collections::{BTreeMap, BTreeSet};

/// Ordering key of `unhandled`: start, then first def/use, then register id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct UnhandledEntry {
    start: BlockPosition,
    first_site: ConflictSite,
    register: u32,
    id: IntervalId,
}

/// Linear scan allocator state for one function.
pub struct LinearScanAllocator<'a> {
    config: &'a TargetConfig,
    fixed: &'a BTreeMap<Amd64Register, FixedInterval>,
    intervals: Vec<LifetimeInterval>,
    allocation: Vec<Option<Amd64Register>>,
    unhandled: BTreeSet<UnhandledEntry>,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
    split_lifetimes: BTreeMap<VirtualRegister, Vec<IntervalId>>,
    /// Whole lifetime of every register, for spill slot reuse.
    lifetimes: BTreeMap<VirtualRegister, (BlockPosition, BlockPosition)>,
    spill_slots: SpillSlotAllocator,
}

impl<'a> LinearScanAllocator<'a> {
    /// Allocate registers for the intervals of one function.
    ///
    /// # Arguments
    /// * `lifetimes` - Output of lifetime analysis
    /// * `config` - Target register file
    ///
    /// # Returns
    /// `Result<AllocationResult, BackendError>` - Assignment, splits, spill slots and events
    ///
    /// # Errors
    /// Returns an error only if an internal invariant is violated; every
    /// valid input can be allocated since spilling has no capacity limit.
    pub fn allocate(lifetimes: &'a LifetimeAnalysisResult, config: &'a TargetConfig) -> Result<AllocationResult, BackendError> {
        let mut allocator = Self::new(lifetimes, config);
        let mut last_start = BlockPosition::default();
        while let Some(entry) = allocator.unhandled.pop_first() {
            debug_assert!(entry.start >= last_start, "unhandled intervals went backwards");
            last_start = entry.start;
            allocator.allocate_interval(entry.id)?;
        }
        allocator.merge_and_unassign_intervals_without_sites();

        let LinearScanAllocator {
            intervals,
            allocation,
            split_lifetimes,
            spill_slots,
            ..
        } = allocator;
        AllocationResult::new(intervals, allocation, split_lifetimes, spill_slots.into_slots(), config)
    }

    fn new(lifetimes: &'a LifetimeAnalysisResult, config: &'a TargetConfig) -> Self {
        let intervals: Vec<LifetimeInterval> = lifetimes
            .virtual_intervals
            .values()
            .filter(|interval| !interval.ranges.is_empty())
            .cloned()
            .collect();
        let mut allocator = Self {
            config,
            fixed: &lifetimes.fixed_intervals,
            allocation: vec![None; intervals.len()],
            lifetimes: intervals
                .iter()
                .map(|interval| (interval.register, (interval.from(), interval.to())))
                .collect(),
            intervals,
            unhandled: BTreeSet::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            split_lifetimes: BTreeMap::new(),
            spill_slots: SpillSlotAllocator::new(),
        };
        for index in 0..allocator.intervals.len() {
            allocator.enqueue(IntervalId(index as u32));
        }
        allocator
    }

    #[inline]
    fn interval(&self, id: IntervalId) -> &LifetimeInterval {
        &self.intervals[id.index()]
    }

    #[inline]
    fn assigned(&self, id: IntervalId) -> Option<Amd64Register> {
        self.allocation[id.index()]
    }

    fn enqueue(&mut self, id: IntervalId) {
        let interval = self.interval(id);
        let entry = UnhandledEntry {
            start: interval.from(),
            first_site: interval.first_site().into(),
            register: interval.register.id,
            id,
        };
        self.unhandled.insert(entry);
    }

    fn allocate_interval(&mut self, id: IntervalId) -> Result<(), BackendError> {
        let start = self.interval(id).from();
        self.move_handled_and_inactive_from_active(start);
        self.move_handled_and_active_from_inactive(start);
        self.spill_slots.release_ended(start);

        if !self.try_allocate_free_register(id)? {
            self.allocate_blocked_register(id)?;
        }
        Ok(())
    }

    fn move_handled_and_inactive_from_active(&mut self, start: BlockPosition) {
        let mut still_active = Vec::with_capacity(self.active.len());
        for id in std::mem::take(&mut self.active) {
            let interval = self.interval(id);
            if interval.ends_before(start) {
                continue;
            }
            if interval.covers(start) {
                still_active.push(id);
            } else {
                self.inactive.push(id);
            }
        }
        self.active = still_active;
    }

    fn move_handled_and_active_from_inactive(&mut self, start: BlockPosition) {
        let mut still_inactive = Vec::with_capacity(self.inactive.len());
        for id in std::mem::take(&mut self.inactive) {
            let interval = self.interval(id);
            if interval.ends_before(start) {
                continue;
            }
            if interval.covers(start) {
                self.active.push(id);
            } else {
                still_inactive.push(id);
            }
        }
        self.inactive = still_inactive;
    }

    fn fixed_conflicts(&self, id: IntervalId) -> ConflictMap {
        let current = self.interval(id);
        let mut conflicts = ConflictMap::new(&self.config.allocatable);
        for (register, fixed) in self.fixed {
            if let Some(position) = fixed.ranges.first_intersection_with(&current.ranges) {
                conflicts.put_earliest(*register, ConflictSite::At(position));
            }
        }
        conflicts
    }

    /// Returns whether `id` got a register without evicting anything.
    fn try_allocate_free_register(&mut self, id: IntervalId) -> Result<bool, BackendError> {
        let current = self.interval(id);
        let start = current.from();
        let mut free_until = self.fixed_conflicts(id);
        for &other in &self.active {
            if let Some(register) = self.assigned(other) {
                free_until.put_earliest(register, ConflictSite::At(start));
            }
        }
        for &other in &self.inactive {
            let Some(register) = self.assigned(other) else {
                continue;
            };
            if let Some(position) = self.interval(other).ranges.first_intersection_with(&current.ranges) {
                free_until.put_earliest(register, ConflictSite::At(position));
            }
        }

        let Some((register, conflict)) = self.determine_best_candidate(&free_until, id) else {
            return Ok(false);
        };
        if conflict <= ConflictSite::At(start) {
            return Ok(false);
        }
        if ConflictSite::At(current.to()) < conflict {
            log::trace!("{} gets {} for its whole lifetime", current, register);
            self.assign_register(id, register)?;
        } else {
            log::trace!("{} gets {} until {}", current, register, conflict);
            self.spill_split_and_suspend_before_conflict(id, conflict)?;
            self.assign_register(id, register)?;
        }
        Ok(true)
    }

    fn allocate_blocked_register(&mut self, id: IntervalId) -> Result<(), BackendError> {
        let current = self.interval(id);
        let start = current.from();
        let mut next_uses = self.fixed_conflicts(id);
        for &other in self.active.iter().chain(&self.inactive) {
            let Some(register) = self.assigned(other) else {
                continue;
            };
            let interval = self.interval(other);
            if interval.ranges.first_intersection_with(&current.ranges).is_none() {
                continue;
            }
            // Owners without a further use can give up their register for free.
            if let Some(next_use) = interval.next_use_after(start) {
                next_uses.put_earliest(register, ConflictSite::At(next_use));
            }
        }

        let Some((register, farthest)) = self.determine_best_candidate(&next_uses, id) else {
            return Ok(());
        };

        if farthest <= ConflictSite::At(start) {
            // Every register is needed right here: wait in memory until the next use.
            log::debug!("{} starts with every register in use, spilling until its next use", current);
            let next_use = ConflictSite::from(current.next_use_after(start.next()));
            self.spill_split_and_suspend_before_conflict(id, next_use)?;
            self.record_split(id);
            return Ok(());
        }

        let first_site = ConflictSite::from(current.first_site());
        if first_site == ConflictSite::Never {
            self.spill_split_and_suspend_before_conflict(id, ConflictSite::Never)?;
            self.record_split(id);
            return Ok(());
        }
        let first_register_site = ConflictSite::from(current.first_site_needing_register());
        if first_site > farthest || (first_site == farthest && first_register_site > farthest) {
            log::trace!("{} is needed last, spilling until {}", current, first_register_site);
            self.spill_split_and_suspend_before_conflict(id, first_register_site)?;
            self.record_split(id);
            return Ok(());
        }

        log::trace!("{} evicts the owners of {} (next use {})", current, register, farthest);
        let owners: Vec<IntervalId> = self
            .active
            .iter()
            .copied()
            .filter(|other| self.assigned(*other) == Some(register))
            .collect();
        for other in owners {
            if self.interval(other).from() < start {
                self.spill_split_and_suspend_before_conflict(other, ConflictSite::At(start))?;
            } else {
                // Starts here too, so nothing is left to keep the register for.
                self.allocation[other.index()] = None;
                self.active.retain(|active| *active != other);
                let next_use = ConflictSite::from(self.interval(other).next_use_after(start));
                self.spill_split_and_suspend_before_conflict(other, next_use)?;
            }
        }
        let sleeping_owners: Vec<IntervalId> = self
            .inactive
            .iter()
            .copied()
            .filter(|other| self.assigned(*other) == Some(register))
            .collect();
        for other in sleeping_owners {
            let conflict = self
                .interval(other)
                .ranges
                .first_intersection_with(&self.interval(id).ranges);
            if let Some(position) = conflict {
                self.spill_split_and_suspend_before_conflict(other, ConflictSite::At(position))?;
            }
        }

        self.assign_register(id, register)?;
        let fixed_conflict = self
            .fixed
            .get(&register)
            .and_then(|fixed| fixed.ranges.first_intersection_with(&self.interval(id).ranges));
        if let Some(position) = fixed_conflict {
            self.spill_split_and_suspend_before_conflict(id, ConflictSite::At(position))?;
        }
        Ok(())
    }

    /// Pick the best register of `conflicts` for `id`, letting a hinted
    /// register win if it is free for long enough.
    fn determine_best_candidate(&self, conflicts: &ConflictMap, id: IntervalId) -> Option<(Amd64Register, ConflictSite)> {
        let best = conflicts.best()?;
        let current = self.interval(id);
        for hint in self.locked_hints(id) {
            let Some(conflict) = conflicts.get(hint) else {
                continue;
            };
            let good_enough = match conflict {
                ConflictSite::Never => true,
                ConflictSite::At(position) => current.ends_before(position),
            };
            if good_enough || conflict == best.1 {
                return Some((hint, conflict));
            }
        }
        Some(best)
    }

    /// Physical registers the hints of `id` currently resolve to; hints on
    /// both ends first, then those at the end, then those at the start.
    fn locked_hints(&self, id: IntervalId) -> Vec<Amd64Register> {
        let current = self.interval(id);
        let resolve = |hint: &Register, last_split: bool| -> Option<Amd64Register> {
            match hint {
                Register::Physical(register) => Some(*register),
                Register::Virtual(register) if register.id != current.register.id => {
                    let splits = self.split_lifetimes.get(register)?;
                    let split = if last_split { splits.last() } else { splits.first() }?;
                    self.assigned(*split)
                }
                Register::Virtual(_) => None,
            }
        };
        let from: BTreeSet<Amd64Register> = current.from_hints.iter().filter_map(|hint| resolve(hint, true)).collect();
        let to: BTreeSet<Amd64Register> = current.to_hints.iter().filter_map(|hint| resolve(hint, false)).collect();

        let mut locked: Vec<Amd64Register> = from.intersection(&to).copied().collect();
        locked.extend(to.difference(&from).copied());
        locked.extend(from.difference(&to).copied());
        locked
    }

    fn assign_register(&mut self, id: IntervalId, register: Amd64Register) -> Result<(), BackendError> {
        if self.assigned(id).is_some() {
            let interval = self.interval(id);
            return Err(BackendError::RegisterReassigned {
                register: interval.register,
                position: interval.from(),
                physical: register,
            });
        }
        self.allocation[id.index()] = Some(register);
        self.record_split(id);
        let allocation = &self.allocation;
        self.active.retain(|other| allocation[other.index()] != Some(register));
        self.active.push(id);
        Ok(())
    }

    /// Add `id` to its register's splits, keeping them in program order.
    fn record_split(&mut self, id: IntervalId) {
        let interval = &self.intervals[id.index()];
        let splits = self.split_lifetimes.entry(interval.register).or_default();
        if splits.contains(&id) {
            return;
        }
        let intervals = &self.intervals;
        let index = splits.partition_point(|other| intervals[other.index()].from() < interval.from());
        splits.insert(index, id);
    }

    /// Give the register of `id` a spill slot, cut `id` before `conflict`
    /// and queue the tail. `id` keeps the first half.
    fn spill_split_and_suspend_before_conflict(&mut self, id: IntervalId, conflict: ConflictSite) -> Result<(), BackendError> {
        let register = self.interval(id).register;
        let (from, to) = self
            .lifetimes
            .get(&register)
            .copied()
            .unwrap_or((self.interval(id).from(), self.interval(id).to()));
        self.spill_slots.allocate(register, from, to);

        let ConflictSite::At(position) = conflict else {
            return Ok(());
        };
        if self.interval(id).to() < position {
            return Ok(());
        }
        let interval = std::mem::replace(&mut self.intervals[id.index()], LifetimeInterval::new(register));
        let split = interval.split_before(position)?;
        self.intervals[id.index()] = split.before;

        let tail = IntervalId(self.intervals.len() as u32);
        self.intervals.push(split.after);
        self.allocation.push(None);
        self.enqueue(tail);
        Ok(())
    }

    /// Merge runs of consecutive splits without defs or uses into one
    /// interval that stays in memory.
    fn merge_and_unassign_intervals_without_sites(&mut self) {
        let mut split_lifetimes = std::mem::take(&mut self.split_lifetimes);
        for splits in split_lifetimes.values_mut() {
            let mut merged: Vec<IntervalId> = Vec::with_capacity(splits.len());
            let mut run: Vec<IntervalId> = Vec::new();
            for &id in splits.iter() {
                if self.interval(id).has_sites() {
                    self.flush_run(&mut run, &mut merged);
                    merged.push(id);
                } else {
                    run.push(id);
                }
            }
            self.flush_run(&mut run, &mut merged);
            *splits = merged;
        }
        self.split_lifetimes = split_lifetimes;
    }

    fn flush_run(&mut self, run: &mut Vec<IntervalId>, merged: &mut Vec<IntervalId>) {
        let Some(&head) = run.first() else {
            return;
        };
        let intervals = &self.intervals;
        let coalesced = LifetimeInterval::coalesce(run.iter().map(|id| &intervals[id.index()]));
        if let Some(interval) = coalesced {
            self.intervals[head.index()] = interval;
        }
        self.allocation[head.index()] = None;
        merged.push(head);
        run.clear();
    }
}
