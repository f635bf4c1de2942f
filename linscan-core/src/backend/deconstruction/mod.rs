//! Deconstruction Module
//!
//! Everything after allocation: register substitution with spill code,
//! parallel move resolution on control-flow edges and block layout.

pub mod lowering;
pub mod moves;
pub mod ssa;

// Re-export commonly used types
pub use lowering::{InstructionListLowerer, LoweredBlock};
pub use moves::{Move, MoveResolver};
pub use ssa::{AssembledFunction, SsaDeconstruction};
