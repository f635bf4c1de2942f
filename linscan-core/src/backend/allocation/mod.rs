//! Register Allocation Module
//!
//! Linear scan allocation over the intervals of lifetime analysis, plus the
//! spill slot bookkeeping and the result queries used by lowering.

pub mod conflict;
pub mod linear_scan;
pub mod result;
pub mod spill_slots;

// Re-export commonly used types
pub use conflict::{ConflictMap, ConflictSite};
pub use linear_scan::LinearScanAllocator;
pub use result::{AllocationResult, IntervalId, SpillEvent, SpillKind};
pub use spill_slots::SpillSlotAllocator;
