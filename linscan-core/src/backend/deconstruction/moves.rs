//! Parallel Move Resolution
//!
//! Sequentializes a set of moves that must appear to happen at once, such
//! as the moves needed on one control-flow edge.
//!
//! # Algorithm
//! Every pending move is ranked, lowest priority first:
//!
//! | Priority         | Handling                                   |
//! |------------------|--------------------------------------------|
//! | `ImmediateSrc`   | `mov`, last since its source never changes |
//! | `MemMemUnsafe`   | swap through the stack                     |
//! | `RegMemUnsafe`   | `xchg`                                     |
//! | `RegRegUnsafe`   | `xchg`                                     |
//! | `MemRegSafe`     | `mov`                                      |
//! | `MemMemSafe`     | `mov` through a scratch register, or `push`/`pop` |
//! | `RegRegSafe`     | `mov`                                      |
//! | `RegMemSafe`     | `mov`, frees its source register           |
//!
//! A move is unsafe while some other pending move still reads its
//! destination. The highest ranked move is emitted (the first one on
//! ties) until nothing is pending. After a swap, pending moves reading
//! either side of it are redirected to where their value went.
//!
//! Registers whose value nobody reads any more become scratch registers,
//! unless a move already wrote them or they hold a value that stays in
//! place.

use crate::backend::error::BackendError;
use crate::backend::instructions::Instruction;
use crate::backend::operands::Operand;
use crate::backend::registers::{Amd64Register, OperandWidth};
use std::collections::BTreeSet;
use std::fmt;

/// A copy of `src` into `dest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub src: Operand,
    pub dest: Operand,
}

impl Move {
    #[inline]
    pub fn new(src: Operand, dest: Operand) -> Self {
        Self { src, dest }
    }

    /// The value already is where it should be.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.src.same_location(&self.dest)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MovePriority {
    ImmediateSrc,
    MemMemUnsafe,
    RegMemUnsafe,
    RegRegUnsafe,
    MemRegSafe,
    MemMemSafe,
    RegRegSafe,
    RegMemSafe,
}

/// Resolves one set of parallel moves.
#[derive(Debug, Default)]
pub struct MoveResolver {
    pending: Vec<Move>,
    instructions: Vec<Instruction>,
    scratch: BTreeSet<Amd64Register>,
    /// Registers holding a final value: written by a move or never moved.
    frozen: BTreeSet<Amd64Register>,
}

impl MoveResolver {
    /// Turn `moves` into an equivalent sequence of instructions.
    ///
    /// No-op moves emit nothing but keep their register from being used as
    /// scratch.
    ///
    /// # Errors
    /// Returns `BackendError::DuplicateMoveDestination` if two moves write
    /// the same location.
    pub fn resolve(moves: impl IntoIterator<Item = Move>) -> Result<Vec<Instruction>, BackendError> {
        let mut resolver = MoveResolver::default();
        let mut destinations: Vec<Operand> = Vec::new();
        for next in moves {
            if destinations.iter().any(|dest| dest.same_location(&next.dest)) {
                return Err(BackendError::DuplicateMoveDestination {
                    destination: next.dest.to_string(),
                });
            }
            destinations.push(next.dest);
            if next.is_noop() {
                resolver.frozen.extend(next.dest.physical());
            } else {
                resolver.pending.push(next);
            }
        }
        resolver.run();
        Ok(resolver.instructions)
    }

    fn run(&mut self) {
        let mut read = self.read_registers();
        while let Some((index, priority)) = self.next_best_move() {
            let next = self.pending.remove(index);
            match priority {
                MovePriority::ImmediateSrc
                | MovePriority::MemRegSafe
                | MovePriority::RegRegSafe
                | MovePriority::RegMemSafe => self.instructions.push(Instruction::mov(next.src, next.dest)),
                MovePriority::MemMemSafe => self.move_via_scratch(next),
                MovePriority::MemMemUnsafe => {
                    self.swap_via_stack(next);
                    self.record_swap(next);
                }
                MovePriority::RegMemUnsafe | MovePriority::RegRegUnsafe => {
                    self.instructions.push(Instruction::Xchg {
                        left: next.src,
                        right: next.dest,
                    });
                    self.record_swap(next);
                }
            }
            if let Some(register) = next.dest.physical() {
                self.frozen.insert(register);
            }

            let still_read = self.read_registers();
            self.scratch.extend(read.difference(&still_read).copied());
            let frozen = &self.frozen;
            self.scratch.retain(|register| !frozen.contains(register) && !register.is_reserved());
            read = still_read;
        }
    }

    fn next_best_move(&self) -> Option<(usize, MovePriority)> {
        let mut best: Option<(usize, MovePriority)> = None;
        for (index, candidate) in self.pending.iter().enumerate() {
            let priority = self.priority(index, candidate);
            if best.map_or(true, |(_, best_priority)| priority > best_priority) {
                best = Some((index, priority));
            }
        }
        best
    }

    fn priority(&self, index: usize, candidate: &Move) -> MovePriority {
        if candidate.src.is_immediate() {
            return MovePriority::ImmediateSrc;
        }
        let safe = !self
            .pending
            .iter()
            .enumerate()
            .any(|(other, pending)| other != index && pending.src.same_location(&candidate.dest));
        let mem_to_mem = candidate.src.is_memory() && candidate.dest.is_memory();
        let reg_to_reg = !candidate.src.is_memory() && !candidate.dest.is_memory();
        match (safe, mem_to_mem, reg_to_reg) {
            (false, true, _) => MovePriority::MemMemUnsafe,
            (false, _, true) => MovePriority::RegRegUnsafe,
            (false, _, _) => MovePriority::RegMemUnsafe,
            (true, true, _) => MovePriority::MemMemSafe,
            (true, _, true) => MovePriority::RegRegSafe,
            (true, _, _) if candidate.src.is_memory() => MovePriority::MemRegSafe,
            (true, _, _) => MovePriority::RegMemSafe,
        }
    }

    /// Physical registers the pending moves still read.
    fn read_registers(&self) -> BTreeSet<Amd64Register> {
        self.pending
            .iter()
            .flat_map(|pending| pending.src.reads(false, false).into_iter().chain(pending.dest.reads(true, false)))
            .filter_map(|site| site.register.as_physical())
            .collect()
    }

    fn move_via_scratch(&mut self, next: Move) {
        match self.scratch.iter().next().copied() {
            Some(scratch) => {
                let temporary = Operand::reg(next.dest.width(), scratch);
                self.instructions.push(Instruction::mov(next.src, temporary));
                self.instructions.push(Instruction::mov(temporary, next.dest));
            }
            None => {
                self.instructions.push(Instruction::Push {
                    operand: next.src.with_width(OperandWidth::Quad),
                });
                self.instructions.push(Instruction::Pop {
                    operand: next.dest.with_width(OperandWidth::Quad),
                });
            }
        }
    }

    fn swap_via_stack(&mut self, next: Move) {
        let src = next.src.with_width(OperandWidth::Quad);
        let dest = next.dest.with_width(OperandWidth::Quad);
        self.instructions.push(Instruction::Push { operand: src });
        self.instructions.push(Instruction::Push { operand: dest });
        self.instructions.push(Instruction::Pop { operand: src });
        self.instructions.push(Instruction::Pop { operand: dest });
    }

    /// After swapping, the old value of `swap.dest` lives at `swap.src` and
    /// vice versa.
    fn record_swap(&mut self, swap: Move) {
        for pending in &mut self.pending {
            let width = pending.src.width();
            if pending.src.same_location(&swap.dest) {
                pending.src = swap.src.with_width(width);
            } else if pending.src.same_location(&swap.src) {
                pending.src = swap.dest.with_width(width);
            }
        }
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            if pending.is_noop() {
                self.frozen.extend(pending.dest.physical());
            } else {
                still_pending.push(pending);
            }
        }
        self.pending = still_pending;
    }
}
