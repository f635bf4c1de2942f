//! Allocation Result
//!
//! The allocator's answer for one function: which split of which register
//! holds which physical register, where spilled registers live on the
//! stack, and where values must be written to or read back from their
//! slots.
//!
//! # Spill Events
//! Derived once from each spilled register's ordered splits:
//! - **Spill** after the last def of the first split, and after the last def
//!   of every later split that holds a register (redefinitions)
//! - **Reload** where every later split that holds a register begins,
//!   unless it begins with a definition or at a block entry
//!
//! Splits without a register read and write the slot directly, so the slot
//! is current from the first spill on and a reload is valid anywhere.

use crate::backend::config::TargetConfig;
use crate::backend::error::BackendError;
use crate::backend::lifetime::interval::LifetimeInterval;
use crate::backend::lifetime::position::BlockPosition;
use crate::backend::operands::{AddressingMode, Operand};
use crate::backend::registers::{Amd64Register, OperandWidth, Register, VirtualRegister};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Index of an interval in the allocator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId(pub u32);

impl IntervalId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Direction of a move between a register and its spill slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpillKind {
    /// Register to slot, after a definition.
    Spill,
    /// Slot to register, before a use.
    Reload,
}

/// A scheduled spill or reload of one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpillEvent {
    pub kind: SpillKind,
    pub register: VirtualRegister,
    pub interval: IntervalId,
}

impl fmt::Display for SpillEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} ({})", self.kind, self.register, self.interval.0)
    }
}

/// Register assignment, splits and spill slots of one function.
#[derive(Debug, Clone)]
pub struct AllocationResult {
    intervals: Vec<LifetimeInterval>,
    allocation: Vec<Option<Amd64Register>>,
    split_lifetimes: BTreeMap<VirtualRegister, Vec<IntervalId>>,
    spill_slots: BTreeMap<VirtualRegister, u32>,
    spill_events: BTreeMap<BlockPosition, BTreeSet<SpillEvent>>,
    frame_base: Amd64Register,
    slot_size: u32,
    frame_alignment: u32,
}

impl AllocationResult {
    /// Assemble the result and derive the spill events.
    ///
    /// # Errors
    /// Returns `BackendError::MissingDefinition` if a spilled register's first
    /// split contains no definition.
    pub fn new(
        intervals: Vec<LifetimeInterval>,
        allocation: Vec<Option<Amd64Register>>,
        split_lifetimes: BTreeMap<VirtualRegister, Vec<IntervalId>>,
        spill_slots: BTreeMap<VirtualRegister, u32>,
        config: &TargetConfig,
    ) -> Result<Self, BackendError> {
        let mut result = Self {
            intervals,
            allocation,
            split_lifetimes,
            spill_slots,
            spill_events: BTreeMap::new(),
            frame_base: config.frame_base,
            slot_size: config.slot_size,
            frame_alignment: config.frame_alignment,
        };
        result.spill_events = result.compute_spill_events()?;
        Ok(result)
    }

    fn compute_spill_events(&self) -> Result<BTreeMap<BlockPosition, BTreeSet<SpillEvent>>, BackendError> {
        let mut events: BTreeMap<BlockPosition, BTreeSet<SpillEvent>> = BTreeMap::new();
        let mut add = |position: BlockPosition, kind: SpillKind, register: VirtualRegister, interval: IntervalId| {
            events.entry(position).or_default().insert(SpillEvent {
                kind,
                register,
                interval,
            });
        };

        for (register, splits) in &self.split_lifetimes {
            if !self.spill_slots.contains_key(register) {
                continue;
            }
            let Some((&first, following)) = splits.split_first() else {
                continue;
            };
            let def = self
                .interval(first)
                .last_def()
                .ok_or(BackendError::MissingDefinition { register: *register })?;
            if self.assigned(first).is_some() {
                add(def, SpillKind::Spill, *register, first);
            }
            for &split in following {
                if self.assigned(split).is_none() {
                    continue;
                }
                let interval = self.interval(split);
                let start = interval.from();
                let defined_on_entry = start.is_def() && interval.first_site() == Some(start);
                // Splits starting at a block entry are filled by the edge moves.
                if start.pos != 0 && !defined_on_entry {
                    add(start, SpillKind::Reload, *register, split);
                }
                if let Some(def) = interval.last_def() {
                    add(def, SpillKind::Spill, *register, split);
                }
            }
        }
        Ok(events)
    }

    #[inline]
    pub fn interval(&self, id: IntervalId) -> &LifetimeInterval {
        &self.intervals[id.index()]
    }

    /// Physical register assigned to a split, if any.
    #[inline]
    pub fn assigned(&self, id: IntervalId) -> Option<Amd64Register> {
        self.allocation[id.index()]
    }

    /// Splits of `register` in program order.
    pub fn splits(&self, register: VirtualRegister) -> &[IntervalId] {
        self.split_lifetimes.get(&register).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every virtual register with an interval.
    pub fn registers(&self) -> impl Iterator<Item = VirtualRegister> + '_ {
        self.split_lifetimes.keys().copied()
    }

    /// Whether `register` is live anywhere.
    #[inline]
    pub fn has_interval(&self, register: VirtualRegister) -> bool {
        self.split_lifetimes.contains_key(&register)
    }

    /// The split of `register` covering `position`.
    pub fn interval_at(&self, register: VirtualRegister, position: BlockPosition) -> Option<IntervalId> {
        self.splits(register)
            .iter()
            .copied()
            .find(|id| self.interval(*id).covers(position))
    }

    /// Physical register holding `register` at `position`.
    pub fn assigned_register_at(&self, register: Register, position: BlockPosition) -> Option<Amd64Register> {
        match register {
            Register::Physical(register) => Some(register),
            Register::Virtual(register) => self
                .interval_at(register, position)
                .and_then(|id| self.assigned(id)),
        }
    }

    /// Every split covering `position`, ordered by register.
    pub fn live_intervals_at(&self, position: BlockPosition) -> Vec<IntervalId> {
        self.split_lifetimes
            .keys()
            .filter_map(|register| self.interval_at(*register, position))
            .collect()
    }

    #[inline]
    pub fn spill_slot(&self, register: VirtualRegister) -> Option<u32> {
        self.spill_slots.get(&register).copied()
    }

    pub fn spill_slots(&self) -> &BTreeMap<VirtualRegister, u32> {
        &self.spill_slots
    }

    /// Memory operand of `register`'s spill slot.
    pub fn spill_location(&self, register: VirtualRegister, width: OperandWidth) -> Option<Operand> {
        let slot = self.spill_slot(register)?;
        let displacement = -((slot as i64 + 1) * self.slot_size as i64);
        Some(Operand::mem(width, AddressingMode::offset(self.frame_base, displacement)))
    }

    /// Where `register` lives at `position`: its register if one is
    /// assigned there, its spill slot otherwise.
    ///
    /// # Errors
    /// Returns `BackendError::MissingLocation` if it has neither.
    pub fn hardware_operand_at(
        &self,
        width: OperandWidth,
        register: Register,
        position: BlockPosition,
    ) -> Result<Operand, BackendError> {
        let Register::Virtual(virtual_register) = register else {
            return Ok(Operand::reg(width, register));
        };
        if let Some(physical) = self.assigned_register_at(register, position) {
            return Ok(Operand::reg(width, physical));
        }
        self.spill_location(virtual_register, width).ok_or(BackendError::MissingLocation {
            register: virtual_register,
            position,
        })
    }

    /// Spill and reload events scheduled at `position`.
    pub fn events_at(&self, position: BlockPosition) -> impl Iterator<Item = &SpillEvent> + '_ {
        self.spill_events.get(&position).into_iter().flatten()
    }

    pub fn spill_events(&self) -> &BTreeMap<BlockPosition, BTreeSet<SpillEvent>> {
        &self.spill_events
    }

    /// Number of scheduled events of `kind`.
    pub fn count_events(&self, kind: SpillKind) -> usize {
        self.spill_events
            .values()
            .flatten()
            .filter(|event| event.kind == kind)
            .count()
    }

    /// Number of stack slots in use.
    pub fn spill_slot_count(&self) -> u32 {
        self.spill_slots.values().max().map_or(0, |max| max + 1)
    }

    /// Bytes to reserve below the frame base, rounded to the frame alignment.
    pub fn activation_record_size(&self) -> u32 {
        let per_alignment = (self.frame_alignment / self.slot_size).max(1);
        let slots = self.spill_slot_count().div_ceil(per_alignment) * per_alignment;
        slots * self.slot_size
    }

    /// Number of splits across all registers.
    pub fn split_count(&self) -> usize {
        self.split_lifetimes.values().map(Vec::len).sum()
    }
}
