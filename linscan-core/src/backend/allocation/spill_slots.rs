//! Spill Slot Allocator
//!
//! Hands out stack slots to spilled virtual registers. A slot goes back to
//! the free pool once the whole lifetime of its owner is behind the
//! allocator's current position, and is only reused by a register whose
//! lifetime starts after that.

use crate::backend::lifetime::position::BlockPosition;
use crate::backend::registers::VirtualRegister;
use std::collections::{BTreeMap, BTreeSet};

/// Stack slot assignment for spilled registers.
#[derive(Debug, Clone, Default)]
pub struct SpillSlotAllocator {
    slots: BTreeMap<VirtualRegister, u32>,
    /// Last live position of the most recent owner, per slot.
    occupied_until: Vec<BlockPosition>,
    free: BTreeSet<u32>,
}

impl SpillSlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of `register`, allocating the lowest usable free slot (or a new
    /// one) on first request.
    ///
    /// # Arguments
    /// * `register` - Spilled register
    /// * `from` - First position of the register's whole lifetime
    /// * `to` - Last position of the register's whole lifetime
    pub fn allocate(&mut self, register: VirtualRegister, from: BlockPosition, to: BlockPosition) -> u32 {
        if let Some(slot) = self.slots.get(&register) {
            return *slot;
        }
        let reusable = self
            .free
            .iter()
            .copied()
            .find(|slot| self.occupied_until[*slot as usize] < from);
        let slot = match reusable {
            Some(slot) => {
                self.free.remove(&slot);
                self.occupied_until[slot as usize] = to;
                slot
            }
            None => {
                self.occupied_until.push(to);
                (self.occupied_until.len() - 1) as u32
            }
        };
        log::trace!("Spill slot {} for {}", slot, register);
        self.slots.insert(register, slot);
        slot
    }

    /// Return every slot whose owner is dead at `position` to the free pool.
    pub fn release_ended(&mut self, position: BlockPosition) {
        for (slot, until) in self.occupied_until.iter().enumerate() {
            if *until < position {
                self.free.insert(slot as u32);
            }
        }
    }

    pub fn into_slots(self) -> BTreeMap<VirtualRegister, u32> {
        self.slots
    }
}
