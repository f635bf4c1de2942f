//! Code Blocks
//!
//! The control-flow graph handed over by instruction selection: a
//! linearized list of blocks holding virtual-register instructions, phi
//! functions and an exit descriptor.
//!
//! # Memory Optimizations
//! - Block ids are `u32` indices into the linearization
//! - `CodeBlock.loop_body` is a `BitVec<u32>` over block ids
//! - Successor lists use `SmallVec<[BlockId; 2]>` (at most two successors)

use crate::backend::error::BackendError;
use crate::backend::instructions::{Instruction, Relation};
use crate::backend::lifetime::position::BlockPosition;
use crate::backend::operands::Operand;
use crate::backend::registers::Register;
use bitvec::prelude::*;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// Index of a block in the linearization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A phi function: `output` takes the input of whichever predecessor control came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiFunction {
    pub output: Operand,
    pub inputs: BTreeMap<BlockId, Operand>,
}

impl PhiFunction {
    pub fn new(output: Operand, inputs: impl IntoIterator<Item = (BlockId, Operand)>) -> Self {
        Self {
            output,
            inputs: inputs.into_iter().collect(),
        }
    }

    /// Registers of the output and of every input.
    pub fn register_hints(&self) -> SmallVec<[Register; 4]> {
        self.output
            .register()
            .into_iter()
            .chain(self.inputs.values().filter_map(Operand::register))
            .collect()
    }

    /// Registers of the output and of the input flowing in from `predecessor`.
    pub fn register_hints_from(&self, predecessor: BlockId) -> SmallVec<[Register; 2]> {
        self.output
            .register()
            .into_iter()
            .chain(self.inputs.get(&predecessor).and_then(Operand::register))
            .collect()
    }
}

/// How control leaves a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitArity {
    /// Return from the function.
    Zero,
    /// Unconditional jump.
    One { target: BlockId },
    /// Branch to `true_target` when the last comparison satisfied `relation`.
    Two {
        relation: Relation,
        true_target: BlockId,
        false_target: BlockId,
    },
}

impl ExitArity {
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match *self {
            ExitArity::Zero => SmallVec::new(),
            ExitArity::One { target } => smallvec::smallvec![target],
            ExitArity::Two {
                true_target,
                false_target,
                ..
            } => {
                if true_target == false_target {
                    smallvec::smallvec![true_target]
                } else {
                    smallvec::smallvec![true_target, false_target]
                }
            }
        }
    }
}

/// A basic block.
///
/// `loop_body` is non-empty only for loop headers and marks every block of
/// the loop; the header itself always counts as part of its loop.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub label: String,
    pub phis: Vec<PhiFunction>,
    pub instructions: Vec<Instruction>,
    pub exit: ExitArity,
    pub loop_body: BitVec<u32>,
}

/// A function as a linearized list of blocks; `BlockId(i)` is `blocks[i]`.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<CodeBlock>,
}

impl Function {
    #[inline]
    pub fn block(&self, id: BlockId) -> &CodeBlock {
        &self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl DoubleEndedIterator<Item = BlockId> + ExactSizeIterator {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    #[inline]
    pub fn begin_of(&self, id: BlockId) -> BlockPosition {
        BlockPosition::begin_of(id)
    }

    #[inline]
    pub fn end_of(&self, id: BlockId) -> BlockPosition {
        BlockPosition::end_of(id, self.block(id).instructions.len())
    }

    /// Blocks with an edge into `id`, in linearization order.
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.block_ids()
            .filter(|pred| self.block(*pred).exit.successors().contains(&id))
            .collect()
    }

    /// The next block in the linearization, which control falls through to.
    #[inline]
    pub fn next_block(&self, id: BlockId) -> Option<BlockId> {
        let next = id.0 + 1;
        ((next as usize) < self.blocks.len()).then_some(BlockId(next))
    }

    /// Blocks of the loop headed by `header`; empty unless it is a loop header.
    pub fn loop_body(&self, header: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(header).loop_body.iter_ones().map(|index| BlockId(index as u32))
    }
}

/// Builds a `Function` block by block.
///
/// Blocks are linearized in the order they are created.
///
/// # Examples
/// ```rust
/// use linscan_core::backend::block::{ExitArity, FunctionBuilder};
/// use linscan_core::backend::instructions::Instruction;
///
/// let mut builder = FunctionBuilder::new("main");
/// let entry = builder.block("entry");
/// builder.push(entry, Instruction::Enter);
/// builder.push(entry, Instruction::Leave);
/// builder.exit(entry, ExitArity::Zero);
/// let function = builder.build().unwrap();
/// assert_eq!(function.blocks.len(), 1);
/// ```
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    blocks: Vec<CodeBlock>,
    loops: Vec<(BlockId, Vec<BlockId>)>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            loops: Vec::new(),
        }
    }

    /// Append an empty block returning from the function.
    pub fn block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(CodeBlock {
            label: label.into(),
            phis: Vec::new(),
            instructions: Vec::new(),
            exit: ExitArity::Zero,
            loop_body: BitVec::new(),
        });
        id
    }

    pub fn push(&mut self, block: BlockId, instruction: Instruction) -> &mut Self {
        self.blocks[block.index()].instructions.push(instruction);
        self
    }

    pub fn phi(&mut self, block: BlockId, output: Operand, inputs: impl IntoIterator<Item = (BlockId, Operand)>) -> &mut Self {
        self.blocks[block.index()].phis.push(PhiFunction::new(output, inputs));
        self
    }

    pub fn exit(&mut self, block: BlockId, exit: ExitArity) -> &mut Self {
        self.blocks[block.index()].exit = exit;
        self
    }

    /// Declare `header` a loop header whose loop consists of `body`.
    pub fn loop_body(&mut self, header: BlockId, body: impl IntoIterator<Item = BlockId>) -> &mut Self {
        self.loops.push((header, body.into_iter().collect()));
        self
    }

    /// Finish the function.
    ///
    /// # Errors
    /// Returns `BackendError::MissingPhiInput` if a phi lacks an input for
    /// one of its block's predecessors.
    pub fn build(mut self) -> Result<Function, BackendError> {
        let count = self.blocks.len();
        for (header, body) in self.loops.drain(..) {
            let mut members: BitVec<u32> = bitvec![u32, Lsb0; 0; count];
            members.set(header.index(), true);
            for block in body {
                members.set(block.index(), true);
            }
            self.blocks[header.index()].loop_body = members;
        }
        let function = Function {
            name: self.name,
            blocks: self.blocks,
        };
        for id in function.block_ids() {
            let predecessors = function.predecessors(id);
            let block = function.block(id);
            for phi in &block.phis {
                if let Some(pred) = predecessors.iter().find(|pred| !phi.inputs.contains_key(pred)) {
                    return Err(BackendError::MissingPhiInput {
                        block: block.label.clone(),
                        predecessor: function.block(*pred).label.clone(),
                    });
                }
            }
        }
        Ok(function)
    }
}
