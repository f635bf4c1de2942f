//! Operands
//!
//! Immediates, registers and memory operands as they appear in
//! instructions, both before allocation (virtual registers) and after
//! lowering (physical registers and spill slots).

use crate::backend::registers::{Amd64Register, OperandWidth, Register};
use smallvec::SmallVec;
use std::fmt;

/// `displacement(base, index, scale)` addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressingMode {
    pub displacement: i64,
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
}

impl AddressingMode {
    /// `displacement(base)`
    #[inline]
    pub fn offset(base: impl Into<Register>, displacement: i64) -> Self {
        Self {
            displacement,
            base: Some(base.into()),
            index: None,
            scale: 1,
        }
    }

    /// `displacement(base, index, scale)`
    #[inline]
    pub fn indexed(base: impl Into<Register>, index: impl Into<Register>, scale: u8, displacement: i64) -> Self {
        Self {
            displacement,
            base: Some(base.into()),
            index: Some(index.into()),
            scale,
        }
    }

    /// Registers read to compute the address.
    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        self.base.iter().chain(self.index.iter()).copied()
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.displacement != 0 || (self.base.is_none() && self.index.is_none()) {
            write!(f, "{}", self.displacement)?;
        }
        if self.base.is_none() && self.index.is_none() {
            return Ok(());
        }
        write!(f, "(")?;
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
        }
        if let Some(index) = self.index {
            write!(f, ",{},{}", index, self.scale)?;
        }
        write!(f, ")")
    }
}

/// A register read or written by an instruction.
///
/// `may_be_memory` marks operands that the instruction can just as well
/// take from a stack slot, so the allocator need not provide a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub register: Register,
    pub may_be_memory: bool,
}

impl Use {
    #[inline]
    pub fn new(register: Register, may_be_memory: bool) -> Self {
        Self { register, may_be_memory }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Immediate { width: OperandWidth, value: i64 },
    Register { width: OperandWidth, register: Register },
    Memory { width: OperandWidth, mode: AddressingMode },
}

impl Operand {
    #[inline]
    pub fn imm(width: OperandWidth, value: i64) -> Self {
        Operand::Immediate { width, value }
    }

    #[inline]
    pub fn reg(width: OperandWidth, register: impl Into<Register>) -> Self {
        Operand::Register {
            width,
            register: register.into(),
        }
    }

    #[inline]
    pub fn mem(width: OperandWidth, mode: AddressingMode) -> Self {
        Operand::Memory { width, mode }
    }

    #[inline]
    pub fn width(&self) -> OperandWidth {
        match self {
            Operand::Immediate { width, .. } | Operand::Register { width, .. } | Operand::Memory { width, .. } => *width,
        }
    }

    /// The same operand at another width.
    pub fn with_width(self, width: OperandWidth) -> Self {
        match self {
            Operand::Immediate { value, .. } => Operand::Immediate { width, value },
            Operand::Register { register, .. } => Operand::Register { width, register },
            Operand::Memory { mode, .. } => Operand::Memory { width, mode },
        }
    }

    #[inline]
    pub fn register(&self) -> Option<Register> {
        match self {
            Operand::Register { register, .. } => Some(*register),
            _ => None,
        }
    }

    #[inline]
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory { .. })
    }

    #[inline]
    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Immediate { .. })
    }

    /// Whether both operands name the same storage, ignoring width.
    pub fn same_location(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Register { register: a, .. }, Operand::Register { register: b, .. }) => a == b,
            (Operand::Memory { mode: a, .. }, Operand::Memory { mode: b, .. }) => a == b,
            (Operand::Immediate { value: a, .. }, Operand::Immediate { value: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Registers read when this operand is evaluated.
    ///
    /// In output position a register operand is only written, but the
    /// registers of a memory operand's address are still read.
    pub fn reads(&self, output: bool, may_be_memory: bool) -> SmallVec<[Use; 2]> {
        match self {
            Operand::Immediate { .. } => SmallVec::new(),
            Operand::Register { register, .. } => {
                if output {
                    SmallVec::new()
                } else {
                    smallvec::smallvec![Use::new(*register, may_be_memory)]
                }
            }
            Operand::Memory { mode, .. } => mode.registers().map(|register| Use::new(register, false)).collect(),
        }
    }

    /// The register written when this operand is an output.
    #[inline]
    pub fn writes(&self, may_be_memory: bool) -> Option<Use> {
        match self {
            Operand::Register { register, .. } => Some(Use::new(*register, may_be_memory)),
            _ => None,
        }
    }

    /// Physical register of a lowered register operand.
    #[inline]
    pub fn physical(&self) -> Option<Amd64Register> {
        self.register().and_then(Register::as_physical)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Immediate { value, .. } => write!(f, "${}", value),
            Operand::Register { register, .. } => write!(f, "{}", register),
            Operand::Memory { mode, .. } => write!(f, "{}", mode),
        }
    }
}
