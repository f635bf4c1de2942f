//! SSA Deconstruction
//!
//! Turns the lowered blocks into one flat instruction list. Values whose
//! storage differs across a control-flow edge, and phi outputs, are moved
//! into place at the end of the predecessor.
//!
//! # Algorithm
//! 1. Lower every block
//! 2. For every edge `pred -> succ` and every interval live at the start of
//!    `succ`: the destination is its storage at the start of `succ`; the
//!    source is the phi input from `pred` if `succ` defines it by a phi, and
//!    its storage at the end of `pred` otherwise
//! 3. Resolve the moves of all edges out of `pred` as one parallel move set
//!    and append them to `pred`
//! 4. Concatenate the blocks, adding jumps only where control cannot fall
//!    through to the next block
//!
//! A block with two successors cannot take moves after its branch. Moves on
//! such an edge go to the start of the target instead, which must have no
//! other predecessor: instruction selection inserts a trampoline block on
//! every conditional edge into a join. Anything else is a critical edge.

use crate::backend::allocation::result::AllocationResult;
use crate::backend::block::{BlockId, ExitArity, Function};
use crate::backend::config::TargetConfig;
use crate::backend::deconstruction::lowering::{InstructionListLowerer, LoweredBlock};
use crate::backend::deconstruction::moves::{Move, MoveResolver};
use crate::backend::error::BackendError;
use crate::backend::instructions::Instruction;
use crate::backend::registers::Register;

/// The final instruction list of a function.
#[derive(Debug, Clone)]
pub struct AssembledFunction {
    pub instructions: Vec<Instruction>,
    /// Instructions emitted to resolve control-flow edges.
    pub resolution_instructions: usize,
}

/// Deconstructs the SSA form of one allocated function.
pub struct SsaDeconstruction<'a> {
    function: &'a Function,
    allocation: &'a AllocationResult,
    blocks: Vec<LoweredBlock>,
    resolution_instructions: usize,
}

impl<'a> SsaDeconstruction<'a> {
    /// Lower, resolve edges and flatten `function`.
    ///
    /// # Arguments
    /// * `function` - The function that was allocated
    /// * `allocation` - Its allocation result
    /// * `config` - Target, for the frame registers
    ///
    /// # Returns
    /// `Result<AssembledFunction, BackendError>` - Physical instructions in layout order
    ///
    /// # Errors
    /// Returns `BackendError::CriticalEdge` if an edge out of a block with two
    /// successors into a block with several predecessors needs moves, plus
    /// any lowering error.
    pub fn assemble(function: &'a Function, allocation: &'a AllocationResult, config: &TargetConfig) -> Result<AssembledFunction, BackendError> {
        let lowerer = InstructionListLowerer::new(function, allocation, config.stack_pointer, config.frame_base);
        let mut deconstruction = Self {
            function,
            allocation,
            blocks: lowerer.lower_all()?,
            resolution_instructions: 0,
        };
        deconstruction.resolve_phis_and_split_intervals()?;
        Ok(AssembledFunction {
            instructions: deconstruction.flatten_into_instruction_list(),
            resolution_instructions: deconstruction.resolution_instructions,
        })
    }

    fn resolve_phis_and_split_intervals(&mut self) -> Result<(), BackendError> {
        for pred in self.function.block_ids() {
            let successors = self.function.block(pred).exit.successors();
            let mut moves = Vec::new();
            for &succ in &successors {
                let edge = self.resolve_control_flow_edge(pred, succ)?;
                if successors.len() == 1 {
                    moves.extend(edge);
                    continue;
                }
                let needed = edge.iter().filter(|next| !next.is_noop()).count();
                if needed == 0 {
                    continue;
                }
                if self.function.predecessors(succ).len() > 1 {
                    return Err(BackendError::critical_edge(
                        self.function.block(pred).label.clone(),
                        self.function.block(succ).label.clone(),
                        needed,
                    ));
                }
                let resolved = MoveResolver::resolve(edge)?;
                log::trace!("{} resolution instructions at the start of {}", resolved.len(), self.function.block(succ).label);
                self.resolution_instructions += resolved.len();
                // After the label, before spills of the block's phi outputs.
                self.blocks[succ.index()].instructions.splice(1..1, resolved);
            }
            let resolved = MoveResolver::resolve(moves)?;
            if !resolved.is_empty() {
                log::trace!("{} resolution instructions after {}", resolved.len(), self.function.block(pred).label);
            }
            self.resolution_instructions += resolved.len();
            self.blocks[pred.index()].instructions.extend(resolved);
        }
        Ok(())
    }

    /// Moves needed on `pred -> succ`, including the ones already in place.
    fn resolve_control_flow_edge(&self, pred: BlockId, succ: BlockId) -> Result<Vec<Move>, BackendError> {
        let end_of_pred = self.function.end_of(pred);
        let begin_of_succ = self.function.begin_of(succ);
        let mut moves = Vec::new();
        for id in self.allocation.live_intervals_at(begin_of_succ) {
            let register = self.allocation.interval(id).register;
            let width = register.width;
            let dest = self
                .allocation
                .hardware_operand_at(width, Register::Virtual(register), begin_of_succ)?;
            let phi_input = self.blocks[succ.index()]
                .physical_phis
                .get(&register)
                .and_then(|phi| phi.inputs.get(&pred));
            let src = match phi_input {
                Some(input) => input.with_width(width),
                None => self
                    .allocation
                    .hardware_operand_at(width, Register::Virtual(register), end_of_pred)?,
            };
            moves.push(Move::new(src, dest));
        }
        Ok(moves)
    }

    fn flatten_into_instruction_list(&mut self) -> Vec<Instruction> {
        let mut instructions = Vec::new();
        for block in std::mem::take(&mut self.blocks) {
            let exit = self.lower_block_exit(block.id);
            instructions.extend(block.instructions);
            instructions.extend(exit);
        }
        instructions
    }

    /// Jumps leaving `id`, falling through to the next block where possible.
    fn lower_block_exit(&self, id: BlockId) -> Vec<Instruction> {
        let next = self.function.next_block(id);
        let label = |target: BlockId| self.function.block(target).label.clone();
        match self.function.block(id).exit {
            ExitArity::Zero => vec![Instruction::Ret],
            ExitArity::One { target } if Some(target) == next => Vec::new(),
            ExitArity::One { target } => vec![Instruction::Jmp { label: label(target) }],
            ExitArity::Two {
                relation,
                true_target,
                false_target,
            } => {
                if Some(false_target) == next {
                    vec![Instruction::Jcc {
                        relation,
                        label: label(true_target),
                    }]
                } else if Some(true_target) == next {
                    vec![Instruction::Jcc {
                        relation: relation.negated(),
                        label: label(false_target),
                    }]
                } else {
                    vec![
                        Instruction::Jcc {
                            relation,
                            label: label(true_target),
                        },
                        Instruction::Jmp {
                            label: label(false_target),
                        },
                    ]
                }
            }
        }
    }
}
