//! Lifetime Module
//!
//! The position and interval model shared by every later stage, and the
//! analysis that builds it.

pub mod analysis;
pub mod fixed;
pub mod interval;
pub mod position;
pub mod ranges;

// Re-export commonly used types
pub use analysis::{LifetimeAnalysis, LifetimeAnalysisResult};
pub use fixed::FixedInterval;
pub use interval::{LifetimeInterval, UseSite};
pub use position::BlockPosition;
pub use ranges::{LinearLiveRanges, LiveRange, Split};
