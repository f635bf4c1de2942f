//! Instruction Lowering
//!
//! Rewrites the instructions of one block onto the storage chosen by the
//! allocator. Every virtual register operand becomes the physical register
//! holding it at that exact position, or its spill slot.
//!
//! # Algorithm
//! 1. Emit the block label and translate the phis of the block
//! 2. Emit spills of phi outputs defined at the block's first slot
//! 3. For each instruction: reloads at its use slot, the substituted
//!    instruction (reads at the use slot, writes at the def slot), then
//!    spills and reloads at its def slot
//! 4. Reloads at the block's end, where successors' phi inputs are read
//!
//! `Enter` and `Leave` are expanded into the frame setup and teardown now
//! that the activation record size is known.

use crate::backend::allocation::result::{AllocationResult, SpillEvent, SpillKind};
use crate::backend::block::{BlockId, Function, PhiFunction};
use crate::backend::error::BackendError;
use crate::backend::instructions::Instruction;
use crate::backend::lifetime::position::BlockPosition;
use crate::backend::operands::{AddressingMode, Operand};
use crate::backend::registers::{Amd64Register, OperandWidth, Register, VirtualRegister};
use std::collections::BTreeMap;

/// A block after register substitution, before SSA deconstruction.
#[derive(Debug, Clone)]
pub struct LoweredBlock {
    pub id: BlockId,
    pub label: String,
    /// Phis over physical operands, keyed by the virtual register they define.
    /// Inputs are resolved at the end of their predecessor.
    pub physical_phis: BTreeMap<VirtualRegister, PhiFunction>,
    /// Starts with the block's `Label`.
    pub instructions: Vec<Instruction>,
}

/// Lowers the blocks of one function.
pub struct InstructionListLowerer<'a> {
    function: &'a Function,
    allocation: &'a AllocationResult,
    stack_pointer: Amd64Register,
    frame_base: Amd64Register,
}

impl<'a> InstructionListLowerer<'a> {
    pub fn new(function: &'a Function, allocation: &'a AllocationResult, stack_pointer: Amd64Register, frame_base: Amd64Register) -> Self {
        Self {
            function,
            allocation,
            stack_pointer,
            frame_base,
        }
    }

    /// Lower every block of the function, in linearization order.
    ///
    /// # Errors
    /// Returns `BackendError::MissingLocation` for a live value without any
    /// storage and `BackendError::SpilledAddressRegister` for an address
    /// register that was not given a register.
    pub fn lower_all(&self) -> Result<Vec<LoweredBlock>, BackendError> {
        self.function.block_ids().map(|block| self.lower_block(block)).collect()
    }

    /// Lower a single block.
    pub fn lower_block(&self, id: BlockId) -> Result<LoweredBlock, BackendError> {
        let block = self.function.block(id);
        let mut lowered = BlockEmitter::default();
        lowered.emit(Instruction::Label {
            label: block.label.clone(),
        });

        let physical_phis = self.substitute_phis(id)?;
        self.emit_events(&mut lowered, BlockPosition::begin_of(id))?;

        for (index, instruction) in block.instructions.iter().enumerate() {
            let usage = BlockPosition::used_by(id, index);
            let def = BlockPosition::defined_by(id, index);
            self.emit_events(&mut lowered, usage)?;
            self.lower_instruction(&mut lowered, instruction, usage, def)?;
            self.emit_events(&mut lowered, def)?;
        }
        self.emit_events(&mut lowered, self.function.end_of(id))?;

        log::trace!("Lowered {} into {} instructions", block.label, lowered.instructions.len());
        Ok(LoweredBlock {
            id,
            label: block.label.clone(),
            physical_phis,
            instructions: lowered.instructions,
        })
    }

    fn substitute_phis(&self, id: BlockId) -> Result<BTreeMap<VirtualRegister, PhiFunction>, BackendError> {
        let begin = BlockPosition::begin_of(id);
        let mut physical = BTreeMap::new();
        for phi in &self.function.block(id).phis {
            let Some(Register::Virtual(register)) = phi.output.register() else {
                continue;
            };
            // Dead phis got no interval and need no moves.
            if !self.allocation.has_interval(register) {
                continue;
            }
            let output = self.substitute(&phi.output, begin)?;
            let mut inputs = BTreeMap::new();
            for (pred, input) in &phi.inputs {
                inputs.insert(*pred, self.substitute(input, self.function.end_of(*pred))?);
            }
            physical.insert(register, PhiFunction { output, inputs });
        }
        Ok(physical)
    }

    fn emit_events(&self, lowered: &mut BlockEmitter, position: BlockPosition) -> Result<(), BackendError> {
        for event in self.allocation.events_at(position) {
            let Some(assigned) = self.allocation.assigned(event.interval) else {
                // Already lives in its slot.
                continue;
            };
            let register = Operand::reg(event.register.width, assigned);
            let slot = self.slot_of(event)?;
            match event.kind {
                SpillKind::Spill => lowered.emit(Instruction::mov(register, slot)),
                SpillKind::Reload => lowered.emit(Instruction::mov(slot, register)),
            }
        }
        Ok(())
    }

    fn slot_of(&self, event: &SpillEvent) -> Result<Operand, BackendError> {
        let interval = self.allocation.interval(event.interval);
        self.allocation
            .spill_location(event.register, event.register.width)
            .ok_or(BackendError::MissingLocation {
                register: event.register,
                position: interval.from(),
            })
    }

    fn lower_instruction(
        &self,
        lowered: &mut BlockEmitter,
        instruction: &Instruction,
        usage: BlockPosition,
        def: BlockPosition,
    ) -> Result<(), BackendError> {
        match instruction {
            Instruction::Add { left, right }
            | Instruction::Sub { left, right }
            | Instruction::And { left, right }
            | Instruction::IMul { left, right } => {
                let left = self.substitute(left, usage)?;
                let input = self.substitute(right, usage)?;
                let output = self.substitute(right, def)?;
                if left.is_memory() && input.is_memory() {
                    log::warn!("{} has two memory operands after allocation", instruction);
                }
                lowered.emit(rebuild_two_address(instruction, left, input));
                lowered.fixup(input, output);
            }
            Instruction::Neg { operand } => {
                let input = self.substitute(operand, usage)?;
                let output = self.substitute(operand, def)?;
                lowered.emit(Instruction::Neg { operand: input });
                lowered.fixup(input, output);
            }
            Instruction::Mov { src, dest } => {
                let src = self.substitute(src, usage)?;
                let dest = self.substitute(dest, def)?;
                lowered.emit_move(src, dest);
            }
            Instruction::Cmp { left, right } => lowered.emit(Instruction::Cmp {
                left: self.substitute(left, usage)?,
                right: self.substitute(right, usage)?,
            }),
            Instruction::Test { left, right } => lowered.emit(Instruction::Test {
                left: self.substitute(left, usage)?,
                right: self.substitute(right, usage)?,
            }),
            Instruction::Setcc { relation, output } => lowered.emit(Instruction::Setcc {
                relation: *relation,
                output: self.substitute(output, def)?,
            }),
            Instruction::IDiv { divisor } => lowered.emit(Instruction::IDiv {
                divisor: self.substitute(divisor, usage)?,
            }),
            Instruction::Push { operand } => lowered.emit(Instruction::Push {
                operand: self.substitute(operand, usage)?,
            }),
            Instruction::Pop { operand } => lowered.emit(Instruction::Pop {
                operand: self.substitute(operand, def)?,
            }),
            Instruction::Xchg { left, right } => lowered.emit(Instruction::Xchg {
                left: self.substitute(left, usage)?,
                right: self.substitute(right, usage)?,
            }),
            Instruction::Enter => {
                let rsp = Operand::reg(OperandWidth::Quad, self.stack_pointer);
                let rbp = Operand::reg(OperandWidth::Quad, self.frame_base);
                let size = self.allocation.activation_record_size();
                lowered.emit(Instruction::Push { operand: rbp });
                lowered.emit(Instruction::mov(rsp, rbp));
                lowered.emit(Instruction::sub(Operand::imm(OperandWidth::Quad, size as i64), rsp));
            }
            Instruction::Leave => {
                let rsp = Operand::reg(OperandWidth::Quad, self.stack_pointer);
                let rbp = Operand::reg(OperandWidth::Quad, self.frame_base);
                lowered.emit(Instruction::mov(rbp, rsp));
                lowered.emit(Instruction::Pop { operand: rbp });
            }
            Instruction::Cqto { .. }
            | Instruction::Call { .. }
            | Instruction::Jmp { .. }
            | Instruction::Jcc { .. }
            | Instruction::Label { .. }
            | Instruction::Ret => lowered.emit(instruction.clone()),
        }
        Ok(())
    }

    /// Replace virtual registers in `operand` by their storage at `position`.
    fn substitute(&self, operand: &Operand, position: BlockPosition) -> Result<Operand, BackendError> {
        match *operand {
            Operand::Immediate { .. } => Ok(*operand),
            Operand::Register { width, register } => self.allocation.hardware_operand_at(width, register, position),
            Operand::Memory { width, mode } => Ok(Operand::mem(
                width,
                AddressingMode {
                    base: mode.base.map(|base| self.address_register(base, position)).transpose()?,
                    index: mode.index.map(|index| self.address_register(index, position)).transpose()?,
                    ..mode
                },
            )),
        }
    }

    fn address_register(&self, register: Register, position: BlockPosition) -> Result<Register, BackendError> {
        let Register::Virtual(virtual_register) = register else {
            return Ok(register);
        };
        self.allocation
            .assigned_register_at(register, position)
            .map(Register::Physical)
            .ok_or(BackendError::SpilledAddressRegister {
                register: virtual_register,
                position,
            })
    }
}

/// Same two-address instruction over new operands.
fn rebuild_two_address(instruction: &Instruction, left: Operand, right: Operand) -> Instruction {
    match instruction {
        Instruction::Add { .. } => Instruction::Add { left, right },
        Instruction::Sub { .. } => Instruction::Sub { left, right },
        Instruction::And { .. } => Instruction::And { left, right },
        _ => Instruction::IMul { left, right },
    }
}

#[derive(Debug, Default)]
struct BlockEmitter {
    instructions: Vec<Instruction>,
}

impl BlockEmitter {
    #[inline]
    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// `mov`, or `push`/`pop` when both sides are memory.
    fn emit_move(&mut self, src: Operand, dest: Operand) {
        if src.is_memory() && dest.is_memory() {
            self.emit(Instruction::Push {
                operand: src.with_width(OperandWidth::Quad),
            });
            self.emit(Instruction::Pop {
                operand: dest.with_width(OperandWidth::Quad),
            });
        } else {
            self.emit(Instruction::mov(src, dest));
        }
    }

    /// Copy an in/out operand to its write location if the allocator moved it
    /// between the read and the write.
    fn fixup(&mut self, input: Operand, output: Operand) {
        if !input.same_location(&output) {
            self.emit_move(input, output);
        }
    }
}
