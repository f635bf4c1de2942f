//! Linear Scan Backend
//!
//! Maps the virtual registers of a control-flow graph onto the AMD64
//! register file and a stack frame, and emits a flat instruction list.
//!
//! # Stages
//! - **Lifetime analysis** (`backend::lifetime`): live ranges, def/use sites
//!   and coalescing hints per virtual register
//! - **Allocation** (`backend::allocation`): linear scan with interval
//!   splitting and spill slots
//! - **Deconstruction** (`backend::deconstruction`): register substitution,
//!   spill code, parallel moves on edges and block layout
//!
//! # Examples
//! ```rust
//! use linscan_core::backend::{compile_function, Amd64Register, ExitArity, FunctionBuilder, Instruction};
//! use linscan_core::backend::{Operand, OperandWidth, TargetConfig, VirtualRegisterSupply};
//!
//! let mut registers = VirtualRegisterSupply::new();
//! let value = registers.next(OperandWidth::Quad);
//!
//! let mut builder = FunctionBuilder::new("answer");
//! let entry = builder.block("answer");
//! builder
//!     .push(entry, Instruction::mov(Operand::imm(OperandWidth::Quad, 42), Operand::reg(OperandWidth::Quad, value)))
//!     .push(entry, Instruction::mov(Operand::reg(OperandWidth::Quad, value), Operand::reg(OperandWidth::Quad, Amd64Register::A)));
//! builder.exit(entry, ExitArity::Zero);
//!
//! let compiled = compile_function(&builder.build().unwrap(), &TargetConfig::default()).unwrap();
//! assert_eq!(compiled.stats.spills, 0);
//! ```

pub mod backend;
