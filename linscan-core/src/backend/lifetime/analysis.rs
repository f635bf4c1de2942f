//! Lifetime Analysis
//!
//! Computes a `LifetimeInterval` for every virtual register and a
//! `FixedInterval` for every allocatable physical register in one backward
//! pass over the block linearization.
//!
//! # Algorithm
//! For each block, last to first:
//! 1. Union the live-in sets of all successors and read the phi inputs
//!    flowing along the edge at the end of the block
//! 2. Make every live register alive across the whole block
//! 3. Walk the instructions backwards: a def narrows the range to start at
//!    the def and kills the register, a use makes it live again
//! 4. Phi outputs of the block are defined at its first slot
//! 5. If the block heads a loop, everything live at its start is made alive
//!    in every block of the loop
//!
//! Step 5 stands in for iterating to a fixed point: the successors' live-in
//! sets seen across a back edge are still empty when the loop is walked.
//!
//! # Memory Optimizations
//! - Live sets are `BitVec<u32>` indexed by virtual register id

use crate::backend::block::{BlockId, Function};
use crate::backend::config::TargetConfig;
use crate::backend::instructions::Instruction;
use crate::backend::lifetime::fixed::FixedInterval;
use crate::backend::lifetime::interval::LifetimeInterval;
use crate::backend::lifetime::position::BlockPosition;
use crate::backend::registers::{Amd64Register, Register, VirtualRegister};
use bitvec::prelude::*;
use std::collections::BTreeMap;

/// Which hint set of an interval to extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HintSide {
    From,
    To,
}

/// Intervals of one function.
#[derive(Debug, Clone, Default)]
pub struct LifetimeAnalysisResult {
    pub virtual_intervals: BTreeMap<VirtualRegister, LifetimeInterval>,
    pub fixed_intervals: BTreeMap<Amd64Register, FixedInterval>,
}

/// Backward liveness pass over one function.
pub struct LifetimeAnalysis<'a> {
    function: &'a Function,
    /// Canonical register per id, in case widths differ between occurrences.
    registers: Vec<Option<VirtualRegister>>,
    live_in: Vec<BitVec<u32>>,
    intervals: BTreeMap<VirtualRegister, LifetimeInterval>,
    fixed: BTreeMap<Amd64Register, FixedInterval>,
    caller_saved: &'a [Amd64Register],
}

impl<'a> LifetimeAnalysis<'a> {
    /// Compute the intervals of `function`.
    ///
    /// # Arguments
    /// * `function` - Blocks in linearization order, loop bodies declared on their headers
    /// * `config` - Target; fixed intervals are built for its allocatable registers
    ///   only, from explicit physical operands and its caller-saved set at calls
    ///
    /// # Returns
    /// `LifetimeAnalysisResult` - One interval per virtual register, one fixed interval per allocatable register
    pub fn analyse(function: &'a Function, config: &'a TargetConfig) -> LifetimeAnalysisResult {
        let mut analysis = Self::new(function, config);
        for block in function.block_ids().rev() {
            analysis.analyse_block(block);
        }
        log::debug!(
            "Lifetime analysis of {}: {} virtual intervals",
            function.name,
            analysis.intervals.len()
        );
        LifetimeAnalysisResult {
            virtual_intervals: analysis.intervals,
            fixed_intervals: analysis.fixed,
        }
    }

    fn new(function: &'a Function, config: &'a TargetConfig) -> Self {
        let mut registers: Vec<Option<VirtualRegister>> = Vec::new();
        let mut record = |register: Register| {
            if let Register::Virtual(register) = register {
                let index = register.id as usize;
                if registers.len() <= index {
                    registers.resize(index + 1, None);
                }
                registers[index].get_or_insert(register);
            }
        };
        for block in &function.blocks {
            for phi in &block.phis {
                phi.register_hints().into_iter().for_each(&mut record);
                // Address registers of memory inputs are read without being hinted.
                for input in phi.inputs.values() {
                    input.reads(false, true).into_iter().for_each(|site| record(site.register));
                }
            }
            for instruction in &block.instructions {
                for site in instruction.uses().into_iter().chain(instruction.defs()) {
                    record(site.register);
                }
            }
        }
        let capacity = registers.len();
        Self {
            function,
            registers,
            live_in: vec![bitvec![u32, Lsb0; 0; capacity]; function.blocks.len()],
            intervals: BTreeMap::new(),
            fixed: config
                .allocatable
                .iter()
                .map(|register| (*register, FixedInterval::new(*register)))
                .collect(),
            caller_saved: &config.caller_saved,
        }
    }

    fn analyse_block(&mut self, block: BlockId) {
        let mut live: BitVec<u32> = bitvec![u32, Lsb0; 0; self.registers.len()];
        self.add_live_in_from_successors(block, &mut live);
        self.make_alive_in_whole_block(block, &live);
        self.walk_instructions_backwards(block, &mut live);
        self.define_phis(block, &mut live);
        self.handle_back_edges(block, &live);
        self.live_in[block.index()] = live;
    }

    #[inline]
    fn canonical(&self, register: VirtualRegister) -> VirtualRegister {
        self.registers
            .get(register.id as usize)
            .copied()
            .flatten()
            .unwrap_or(register)
    }

    fn interval(&mut self, register: VirtualRegister) -> &mut LifetimeInterval {
        let register = self.canonical(register);
        self.intervals
            .entry(register)
            .or_insert_with(|| LifetimeInterval::new(register))
    }

    fn add_live_in_from_successors(&mut self, block: BlockId, live: &mut BitVec<u32>) {
        let function = self.function;
        let end = function.end_of(block);
        for successor in function.block(block).exit.successors() {
            for index in self.live_in[successor.index()].iter_ones() {
                live.set(index, true);
            }
            for phi in &function.block(successor).phis {
                let Some(input) = phi.inputs.get(&block) else {
                    continue;
                };
                let hints = phi.register_hints_from(block);
                for site in input.reads(false, true) {
                    if let Register::Virtual(register) = site.register {
                        live.set(register.id as usize, true);
                        self.interval(register).add_use(end, site.may_be_memory);
                        if hints.contains(&site.register) {
                            self.add_transitive_hints(register, HintSide::To, &hints);
                        }
                    }
                }
            }
        }
    }

    fn make_alive_in_whole_block(&mut self, block: BlockId, live: &BitVec<u32>) {
        let count = self.function.block(block).instructions.len();
        for index in live.iter_ones() {
            if let Some(register) = self.registers[index] {
                self.interval(register).make_alive_in_whole_block(block, count);
            }
        }
    }

    fn walk_instructions_backwards(&mut self, block: BlockId, live: &mut BitVec<u32>) {
        let function = self.function;
        for (index, instruction) in function.block(block).instructions.iter().enumerate().rev() {
            let def = BlockPosition::defined_by(block, index);
            let usage = BlockPosition::used_by(block, index);
            let hints = instruction.register_hints();

            for site in instruction.defs() {
                match site.register {
                    Register::Virtual(register) => {
                        live.set(register.id as usize, false);
                        self.interval(register).set_def(def, site.may_be_memory);
                        if hints.contains(&site.register) {
                            self.add_transitive_hints(register, HintSide::From, &hints);
                        }
                    }
                    Register::Physical(register) => {
                        if let Some(fixed) = self.fixed.get_mut(&register) {
                            fixed.add_def(def);
                        }
                    }
                }
            }
            if matches!(instruction, Instruction::Call { .. }) {
                for register in self.caller_saved {
                    if let Some(fixed) = self.fixed.get_mut(register) {
                        fixed.add_def(def);
                    }
                }
            }

            for site in instruction.uses() {
                match site.register {
                    Register::Virtual(register) => {
                        let was_live = live[register.id as usize];
                        live.set(register.id as usize, true);
                        self.interval(register).add_use(usage, site.may_be_memory);
                        // Last use: the value flows into whatever this instruction produces.
                        if !was_live && hints.contains(&site.register) {
                            self.add_transitive_hints(register, HintSide::To, &hints);
                        }
                    }
                    Register::Physical(register) => {
                        if let Some(fixed) = self.fixed.get_mut(&register) {
                            fixed.add_use(usage);
                        }
                    }
                }
            }
        }
    }

    fn define_phis(&mut self, block: BlockId, live: &mut BitVec<u32>) {
        let function = self.function;
        let begin = function.begin_of(block);
        for phi in &function.block(block).phis {
            let Some(Register::Virtual(register)) = phi.output.register() else {
                continue;
            };
            // A phi nothing reads gets no interval.
            if !live[register.id as usize] {
                continue;
            }
            live.set(register.id as usize, false);
            self.interval(register).set_def(begin, true);
            self.add_transitive_hints(register, HintSide::From, &phi.register_hints());
        }
    }

    fn handle_back_edges(&mut self, block: BlockId, live: &BitVec<u32>) {
        let function = self.function;
        for member in function.loop_body(block) {
            self.make_alive_in_whole_block(member, live);
        }
    }

    /// Extend `register`'s hints by the hinted registers and, for virtual
    /// ones, by their own hints.
    fn add_transitive_hints(&mut self, register: VirtualRegister, side: HintSide, hints: &[Register]) {
        let mut collected: Vec<Register> = vec![Register::Virtual(self.canonical(register))];
        for hint in hints {
            match hint {
                Register::Virtual(other) => {
                    let other = self.canonical(*other);
                    collected.push(Register::Virtual(other));
                    if other != self.canonical(register) {
                        if let Some(interval) = self.intervals.get(&other) {
                            collected.extend(interval.to_hints.iter().copied());
                            collected.extend(interval.from_hints.iter().copied());
                        }
                    }
                }
                Register::Physical(_) => collected.push(*hint),
            }
        }
        let interval = self.interval(register);
        let target = match side {
            HintSide::From => &mut interval.from_hints,
            HintSide::To => &mut interval.to_hints,
        };
        target.extend(collected);
    }
}
