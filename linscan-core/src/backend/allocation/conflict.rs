//! Conflict Sites
//!
//! The allocator ranks physical registers by how long they stay usable for
//! the interval being allocated: until the first intersection with an
//! occupied range when looking for a free register, until the next use of
//! the current owner when looking for one to evict.

use crate::backend::lifetime::position::BlockPosition;
use crate::backend::registers::Amd64Register;
use std::fmt;

/// Where a register stops being available. `Never` sorts after every position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictSite {
    At(BlockPosition),
    Never,
}

impl From<Option<BlockPosition>> for ConflictSite {
    #[inline]
    fn from(position: Option<BlockPosition>) -> Self {
        position.map_or(ConflictSite::Never, ConflictSite::At)
    }
}

impl fmt::Display for ConflictSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSite::At(position) => write!(f, "{}", position),
            ConflictSite::Never => write!(f, "never"),
        }
    }
}

/// Earliest conflict per allocatable register, in preference order.
#[derive(Debug, Clone)]
pub struct ConflictMap {
    entries: Vec<(Amd64Register, ConflictSite)>,
}

impl ConflictMap {
    /// Every register starts out conflict-free.
    pub fn new(registers: &[Amd64Register]) -> Self {
        Self {
            entries: registers.iter().map(|register| (*register, ConflictSite::Never)).collect(),
        }
    }

    /// Lower the conflict of `register` to `site` if that is earlier.
    /// Registers outside the map are ignored.
    #[inline]
    pub fn put_earliest(&mut self, register: Amd64Register, site: ConflictSite) {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(candidate, _)| *candidate == register) {
            if site < *existing {
                *existing = site;
            }
        }
    }

    #[inline]
    pub fn get(&self, register: Amd64Register) -> Option<ConflictSite> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == register)
            .map(|(_, site)| *site)
    }

    /// The register available the longest; ties go to the preferred register.
    pub fn best(&self) -> Option<(Amd64Register, ConflictSite)> {
        let mut best: Option<(Amd64Register, ConflictSite)> = None;
        for &(register, site) in &self.entries {
            if best.map_or(true, |(_, best_site)| site > best_site) {
                best = Some((register, site));
            }
        }
        best
    }
}
