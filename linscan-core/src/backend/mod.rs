//! AMD64 Backend
//!
//! Register allocation and SSA deconstruction for functions handed over by
//! instruction selection.

pub mod allocation;
pub mod block;
pub mod config;
pub mod deconstruction;
pub mod error;
pub mod instructions;
pub mod lifetime;
pub mod operands;
pub mod pipeline;
pub mod registers;

// Re-export commonly used types
pub use block::{BlockId, CodeBlock, ExitArity, Function, FunctionBuilder, PhiFunction};
pub use config::TargetConfig;
pub use error::BackendError;
pub use instructions::{Instruction, Relation};
pub use operands::{AddressingMode, Operand};
pub use pipeline::{compile_function, compile_functions, AllocationStats, CompiledFunction};
pub use registers::{Amd64Register, OperandWidth, Register, VirtualRegister, VirtualRegisterSupply};
