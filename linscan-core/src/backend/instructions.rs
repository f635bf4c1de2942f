//! Instructions
//!
//! The closed set of AMD64 instructions the backend consumes from
//! instruction selection and produces for assembly emission.
//!
//! # Operand Conventions
//! Operands are in AT&T order. Two-address arithmetic computes
//! `right = right op left`, and `Cmp { left, right }` followed by
//! `Jcc { relation }` branches when `right <relation> left`.
//!
//! # Register Effects
//! Every instruction reports the registers it reads (`uses`), writes
//! (`defs`) and would like to share a physical register (`register_hints`).
//! Lifetime analysis is driven entirely by these three queries.

use crate::backend::operands::{Operand, Use};
use crate::backend::registers::{Amd64Register, OperandWidth, Register};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Signed comparison relation of a conditional jump or `setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Relation {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Relation {
    /// The relation that holds exactly when `self` does not.
    #[inline]
    pub fn negated(self) -> Self {
        match self {
            Relation::Equal => Relation::NotEqual,
            Relation::NotEqual => Relation::Equal,
            Relation::Less => Relation::GreaterEqual,
            Relation::LessEqual => Relation::Greater,
            Relation::Greater => Relation::LessEqual,
            Relation::GreaterEqual => Relation::Less,
        }
    }

    /// Condition code suffix (`e`, `ne`, `l`, ...).
    pub fn condition_code(self) -> &'static str {
        match self {
            Relation::Equal => "e",
            Relation::NotEqual => "ne",
            Relation::Less => "l",
            Relation::LessEqual => "le",
            Relation::Greater => "g",
            Relation::GreaterEqual => "ge",
        }
    }
}

/// An AMD64 instruction over virtual or physical operands.
///
/// `Push`, `Pop`, `Xchg`, `Jmp`, `Jcc`, `Label` and `Ret` are only produced
/// by lowering and SSA deconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `right += left`
    Add { left: Operand, right: Operand },
    /// `right -= left`
    Sub { left: Operand, right: Operand },
    /// `right &= left`
    And { left: Operand, right: Operand },
    /// `right *= left`
    IMul { left: Operand, right: Operand },
    Mov { src: Operand, dest: Operand },
    Neg { operand: Operand },
    Cmp { left: Operand, right: Operand },
    Test { left: Operand, right: Operand },
    Setcc { relation: Relation, output: Operand },
    /// Sign-extend `%rax` into `%rdx`.
    Cqto { width: OperandWidth },
    /// Divide `%rdx:%rax` by `divisor`, quotient in `%rax`, remainder in `%rdx`.
    IDiv { divisor: Operand },
    /// Call `label`; `arguments` are the physical registers carrying arguments.
    Call { label: String, arguments: Vec<Operand> },
    /// Function prologue, sized once the activation record is known.
    Enter,
    /// Function epilogue.
    Leave,
    Push { operand: Operand },
    Pop { operand: Operand },
    Xchg { left: Operand, right: Operand },
    Jmp { label: String },
    Jcc { relation: Relation, label: String },
    Label { label: String },
    Ret,
}

impl Instruction {
    #[inline]
    pub fn mov(src: Operand, dest: Operand) -> Self {
        Instruction::Mov { src, dest }
    }

    #[inline]
    pub fn add(left: Operand, right: Operand) -> Self {
        Instruction::Add { left, right }
    }

    #[inline]
    pub fn sub(left: Operand, right: Operand) -> Self {
        Instruction::Sub { left, right }
    }

    #[inline]
    pub fn imul(left: Operand, right: Operand) -> Self {
        Instruction::IMul { left, right }
    }

    #[inline]
    pub fn cmp(left: Operand, right: Operand) -> Self {
        Instruction::Cmp { left, right }
    }

    /// Call `label` with its arguments already in the given physical registers.
    pub fn call(label: impl Into<String>, arguments: &[Amd64Register]) -> Self {
        Instruction::Call {
            label: label.into(),
            arguments: arguments
                .iter()
                .map(|register| Operand::reg(OperandWidth::Quad, *register))
                .collect(),
        }
    }

    /// Registers read by this instruction.
    pub fn uses(&self) -> SmallVec<[Use; 4]> {
        let mut uses: SmallVec<[Use; 4]> = SmallVec::new();
        match self {
            Instruction::Add { left, right }
            | Instruction::Sub { left, right }
            | Instruction::And { left, right }
            | Instruction::IMul { left, right }
            | Instruction::Cmp { left, right }
            | Instruction::Test { left, right } => {
                uses.extend(left.reads(false, !right.is_memory()));
                uses.extend(right.reads(false, false));
            }
            Instruction::Mov { src, dest } => {
                uses.extend(src.reads(false, !dest.is_memory()));
                uses.extend(dest.reads(true, false));
            }
            Instruction::Neg { operand } => uses.extend(operand.reads(false, false)),
            Instruction::Setcc { output, .. } => uses.extend(output.reads(true, false)),
            Instruction::Cqto { .. } => uses.push(Use::new(Register::Physical(Amd64Register::A), false)),
            Instruction::IDiv { divisor } => {
                uses.extend(divisor.reads(false, true));
                uses.push(Use::new(Register::Physical(Amd64Register::A), false));
                uses.push(Use::new(Register::Physical(Amd64Register::D), false));
            }
            Instruction::Call { arguments, .. } => {
                for argument in arguments {
                    uses.extend(argument.reads(false, false));
                }
            }
            Instruction::Push { operand } => uses.extend(operand.reads(false, true)),
            Instruction::Pop { operand } => uses.extend(operand.reads(true, false)),
            Instruction::Xchg { left, right } => {
                uses.extend(left.reads(false, false));
                uses.extend(right.reads(false, false));
            }
            Instruction::Enter
            | Instruction::Leave
            | Instruction::Jmp { .. }
            | Instruction::Jcc { .. }
            | Instruction::Label { .. }
            | Instruction::Ret => {}
        }
        uses
    }

    /// Registers written by this instruction.
    pub fn defs(&self) -> SmallVec<[Use; 4]> {
        let mut defs: SmallVec<[Use; 4]> = SmallVec::new();
        match self {
            Instruction::Add { right, .. }
            | Instruction::Sub { right, .. }
            | Instruction::And { right, .. }
            | Instruction::IMul { right, .. } => defs.extend(right.writes(false)),
            Instruction::Mov { dest, .. } => defs.extend(dest.writes(false)),
            Instruction::Neg { operand } => defs.extend(operand.writes(false)),
            Instruction::Setcc { output, .. } => defs.extend(output.writes(false)),
            Instruction::Cqto { .. } => defs.push(Use::new(Register::Physical(Amd64Register::D), false)),
            Instruction::IDiv { .. } => {
                defs.push(Use::new(Register::Physical(Amd64Register::A), false));
                defs.push(Use::new(Register::Physical(Amd64Register::D), false));
            }
            Instruction::Pop { operand } => defs.extend(operand.writes(false)),
            Instruction::Xchg { left, right } => {
                defs.extend(left.writes(false));
                defs.extend(right.writes(false));
            }
            // Clobbers depend on the target's caller-saved set.
            Instruction::Call { .. }
            | Instruction::Cmp { .. }
            | Instruction::Test { .. }
            | Instruction::Enter
            | Instruction::Leave
            | Instruction::Push { .. }
            | Instruction::Jmp { .. }
            | Instruction::Jcc { .. }
            | Instruction::Label { .. }
            | Instruction::Ret => {}
        }
        defs
    }

    /// Registers this instruction would like to see in the same physical register.
    pub fn register_hints(&self) -> SmallVec<[Register; 2]> {
        match self {
            Instruction::Add { left, right }
            | Instruction::Sub { left, right }
            | Instruction::And { left, right }
            | Instruction::IMul { left, right } => left.register().into_iter().chain(right.register()).collect(),
            Instruction::Mov { src, dest } => src.register().into_iter().chain(dest.register()).collect(),
            _ => SmallVec::new(),
        }
    }

    fn mnemonic(&self) -> String {
        match self {
            Instruction::Add { .. } => "add".into(),
            Instruction::Sub { .. } => "sub".into(),
            Instruction::And { .. } => "and".into(),
            Instruction::IMul { .. } => "imul".into(),
            Instruction::Mov { .. } => "mov".into(),
            Instruction::Neg { .. } => "neg".into(),
            Instruction::Cmp { .. } => "cmp".into(),
            Instruction::Test { .. } => "test".into(),
            Instruction::Setcc { relation, .. } => format!("set{}", relation.condition_code()),
            Instruction::Cqto { .. } => "cqto".into(),
            Instruction::IDiv { .. } => "idiv".into(),
            Instruction::Call { .. } => "call".into(),
            Instruction::Enter => "enter".into(),
            Instruction::Leave => "leave".into(),
            Instruction::Push { .. } => "push".into(),
            Instruction::Pop { .. } => "pop".into(),
            Instruction::Xchg { .. } => "xchg".into(),
            Instruction::Jmp { .. } => "jmp".into(),
            Instruction::Jcc { relation, .. } => format!("j{}", relation.condition_code()),
            Instruction::Label { .. } => String::new(),
            Instruction::Ret => "ret".into(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match self {
            Instruction::Add { left, right }
            | Instruction::Sub { left, right }
            | Instruction::And { left, right }
            | Instruction::IMul { left, right }
            | Instruction::Cmp { left, right }
            | Instruction::Test { left, right }
            | Instruction::Xchg { left, right } => {
                write!(f, "{}{} {}, {}", mnemonic, right.width().suffix(), left, right)
            }
            Instruction::Mov { src, dest } => write!(f, "{}{} {}, {}", mnemonic, dest.width().suffix(), src, dest),
            Instruction::Neg { operand }
            | Instruction::Push { operand }
            | Instruction::Pop { operand }
            | Instruction::IDiv { divisor: operand } => {
                write!(f, "{}{} {}", mnemonic, operand.width().suffix(), operand)
            }
            Instruction::Setcc { output, .. } => write!(f, "{} {}", mnemonic, output),
            Instruction::Call { label, .. } | Instruction::Jmp { label } | Instruction::Jcc { label, .. } => {
                write!(f, "{} {}", mnemonic, label)
            }
            Instruction::Label { label } => write!(f, "{}:", label),
            Instruction::Cqto { .. } | Instruction::Enter | Instruction::Leave | Instruction::Ret => {
                write!(f, "{}", mnemonic)
            }
        }
    }
}
