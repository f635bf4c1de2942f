//! Backend Pipeline
//!
//! Runs the backend stages over one function, or over a batch of
//! independent functions in parallel.
//!
//! # Pipeline Stages
//! 1. **Configuration check**: reject unusable register files
//! 2. **Lifetime Analysis**: intervals of every virtual register
//! 3. **Register Allocation**: linear scan with splitting and spilling
//! 4. **SSA Deconstruction**: lowering, edge moves and block layout
//!
//! # Concurrency
//! Every function gets its own allocator. `compile_functions` runs them on
//! the rayon pool; they share nothing but the read-only input, and results
//! come back in input order.

use crate::backend::allocation::linear_scan::LinearScanAllocator;
use crate::backend::allocation::result::{AllocationResult, SpillKind};
use crate::backend::block::Function;
use crate::backend::config::TargetConfig;
use crate::backend::deconstruction::ssa::SsaDeconstruction;
use crate::backend::error::BackendError;
use crate::backend::instructions::Instruction;
use crate::backend::lifetime::analysis::LifetimeAnalysis;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Statistics collected while compiling one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStats {
    pub virtual_registers: usize,
    /// Intervals after splitting.
    pub intervals: usize,
    pub spill_slots: u32,
    pub spills: usize,
    pub reloads: usize,
    /// Instructions added to resolve control-flow edges.
    pub resolution_moves: usize,
    pub frame_size: u32,
}

impl AllocationStats {
    fn collect(virtual_registers: usize, allocation: &AllocationResult, resolution_moves: usize) -> Self {
        Self {
            virtual_registers,
            intervals: allocation.split_count(),
            spill_slots: allocation.spill_slot_count(),
            spills: allocation.count_events(SpillKind::Spill),
            reloads: allocation.count_events(SpillKind::Reload),
            resolution_moves,
            frame_size: allocation.activation_record_size(),
        }
    }
}

/// A function with every virtual register eliminated.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub instructions: Vec<Instruction>,
    /// Bytes reserved below the frame base for spill slots.
    pub frame_size: u32,
    pub stats: AllocationStats,
}

/// Compile one function.
///
/// # Arguments
/// * `function` - Blocks in linearization order, over virtual registers
/// * `config` - Target register file
///
/// # Returns
/// `Result<CompiledFunction, BackendError>` - Physical instruction list and statistics
///
/// # Errors
/// Returns an error if the configuration is invalid or the function breaks
/// one of the backend's invariants (see `BackendError`).
///
/// # Examples
/// ```rust
/// use linscan_core::backend::block::{ExitArity, FunctionBuilder};
/// use linscan_core::backend::config::TargetConfig;
/// use linscan_core::backend::instructions::Instruction;
/// use linscan_core::backend::pipeline::compile_function;
///
/// let mut builder = FunctionBuilder::new("noop");
/// let entry = builder.block("noop");
/// builder.push(entry, Instruction::Enter).push(entry, Instruction::Leave);
/// builder.exit(entry, ExitArity::Zero);
///
/// let compiled = compile_function(&builder.build().unwrap(), &TargetConfig::default()).unwrap();
/// assert_eq!(compiled.frame_size, 0);
/// assert_eq!(compiled.instructions.last(), Some(&Instruction::Ret));
/// ```
pub fn compile_function(function: &Function, config: &TargetConfig) -> Result<CompiledFunction, BackendError> {
    config.validate()?;

    log::info!("Step 1: Analysing lifetimes of {}...", function.name);
    let lifetimes = LifetimeAnalysis::analyse(function, config);

    log::info!("Step 2: Allocating registers for {}...", function.name);
    let allocation = LinearScanAllocator::allocate(&lifetimes, config)?;

    log::info!("Step 3: Deconstructing SSA form of {}...", function.name);
    let assembled = SsaDeconstruction::assemble(function, &allocation, config)?;

    let stats = AllocationStats::collect(lifetimes.virtual_intervals.len(), &allocation, assembled.resolution_instructions);
    log::debug!("Compiled {}: {:?}", function.name, stats);
    Ok(CompiledFunction {
        name: function.name.clone(),
        instructions: assembled.instructions,
        frame_size: stats.frame_size,
        stats,
    })
}

/// Compile independent functions in parallel, one allocator per function.
///
/// # Errors
/// Returns a failing function's error, naming the function. With several
/// failures, which one is reported depends on scheduling.
pub fn compile_functions(functions: &[Function], config: &TargetConfig) -> Result<Vec<CompiledFunction>> {
    config.validate().context("Target configuration rejected")?;
    log::info!("Compiling {} functions...", functions.len());

    functions
        .par_iter()
        .map(|function| {
            compile_function(function, config).with_context(|| format!("Failed to compile function {}", function.name))
        })
        .collect()
}
