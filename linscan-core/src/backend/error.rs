//! Backend Errors
//!
//! Every error here reports a broken invariant of the backend or of the
//! control-flow graph it was handed. The input is produced by an upstream
//! compiler stage, so none of these is recoverable: compilation of the
//! current function is abandoned and nothing is emitted for it.
//!
//! # Error Categories
//! - **Input errors**: phi inputs missing for a predecessor, invalid target configuration
//! - **Allocation errors**: invalid splits, register reassignment, missing definitions
//! - **Lowering errors**: values without a location, spilled address registers
//! - **Deconstruction errors**: critical edges carrying moves, conflicting parallel moves

use crate::backend::lifetime::position::BlockPosition;
use crate::backend::registers::{Amd64Register, VirtualRegister};
use thiserror::Error;

/// Backend error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A phi function lacks an input for one of its block's predecessors.
    #[error("phi in block {block} has no input for predecessor {predecessor}")]
    MissingPhiInput { block: String, predecessor: String },

    /// The target configuration cannot be used for allocation.
    #[error("invalid target configuration: {message}\nSuggestion: {suggestion}")]
    InvalidConfig { message: String, suggestion: String },

    /// An interval was asked to split outside of its own lifetime.
    #[error("cannot split the interval of {register} at {position}: it lives in {from}..={to}")]
    InvalidSplit {
        register: VirtualRegister,
        position: BlockPosition,
        from: BlockPosition,
        to: BlockPosition,
    },

    /// A split interval was handed the register it already held.
    #[error("interval of {register} starting at {position} was reassigned to {physical}")]
    RegisterReassigned {
        register: VirtualRegister,
        position: BlockPosition,
        physical: Amd64Register,
    },

    /// A spilled register has no definition to spill after.
    #[error("{register} is spilled but never defined")]
    MissingDefinition { register: VirtualRegister },

    /// A value is live but neither in a register nor in a spill slot.
    #[error("{register} has neither a register nor a spill slot at {position}")]
    MissingLocation {
        register: VirtualRegister,
        position: BlockPosition,
    },

    /// A register used to compute a memory address ended up in memory itself.
    #[error("address register {register} is spilled at {position}")]
    SpilledAddressRegister {
        register: VirtualRegister,
        position: BlockPosition,
    },

    /// An edge out of a block with several successors needs resolution moves.
    #[error("critical edge {predecessor} -> {successor} needs {moves} move(s)\nSuggestion: {suggestion}")]
    CriticalEdge {
        predecessor: String,
        successor: String,
        moves: usize,
        suggestion: String,
    },

    /// Two moves of one parallel move set write the same location.
    #[error("parallel move set writes {destination} more than once")]
    DuplicateMoveDestination { destination: String },
}

impl BackendError {
    /// Create a critical edge error.
    #[cold] // Error paths are cold
    pub fn critical_edge(predecessor: impl Into<String>, successor: impl Into<String>, moves: usize) -> Self {
        Self::CriticalEdge {
            predecessor: predecessor.into(),
            successor: successor.into(),
            moves,
            suggestion: "Split the edge with a trampoline block during instruction selection.".to_string(),
        }
    }

    /// Create a configuration error.
    #[cold] // Error paths are cold
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: "Allocate only from general purpose registers other than %rsp and %rbp.".to_string(),
        }
    }
}
