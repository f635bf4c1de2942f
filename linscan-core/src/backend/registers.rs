//! Registers
//!
//! Physical AMD64 registers, virtual registers handed out by instruction
//! selection, and the `Register` sum type the rest of the backend works on.
//!
//! # Memory Optimizations
//! - `Amd64Register` and `OperandWidth` use `#[repr(u8)]`
//! - `VirtualRegister` is a `u32` id plus a one byte width, so it is `Copy`
//!   and cheap to use as a map key

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operand width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperandWidth {
    Byte = 1,
    Word = 2,
    Long = 4,
    Quad = 8,
}

impl OperandWidth {
    /// Size of a value of this width in bytes.
    #[inline]
    pub fn bytes(self) -> u32 {
        self as u32
    }

    /// AT&T mnemonic suffix (`b`, `w`, `l`, `q`).
    #[inline]
    pub fn suffix(self) -> char {
        match self {
            OperandWidth::Byte => 'b',
            OperandWidth::Word => 'w',
            OperandWidth::Long => 'l',
            OperandWidth::Quad => 'q',
        }
    }
}

/// The 16 general purpose registers of AMD64.
///
/// `Sp` and `Bp` are reserved for the stack and frame pointer and are never
/// handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Amd64Register {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    Sp = 4,
    Bp = 5,
    Si = 6,
    Di = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Amd64Register {
    /// Every register the allocator may assign, in preference order.
    pub const ALLOCATABLE: [Amd64Register; 14] = [
        Amd64Register::A,
        Amd64Register::B,
        Amd64Register::C,
        Amd64Register::D,
        Amd64Register::Si,
        Amd64Register::Di,
        Amd64Register::R8,
        Amd64Register::R9,
        Amd64Register::R10,
        Amd64Register::R11,
        Amd64Register::R12,
        Amd64Register::R13,
        Amd64Register::R14,
        Amd64Register::R15,
    ];

    /// Whether this is the stack or frame pointer.
    #[inline]
    pub fn is_reserved(self) -> bool {
        matches!(self, Amd64Register::Sp | Amd64Register::Bp)
    }

    /// Name of the 64-bit register without the `%` sigil.
    pub fn name(self) -> &'static str {
        match self {
            Amd64Register::A => "rax",
            Amd64Register::B => "rbx",
            Amd64Register::C => "rcx",
            Amd64Register::D => "rdx",
            Amd64Register::Sp => "rsp",
            Amd64Register::Bp => "rbp",
            Amd64Register::Si => "rsi",
            Amd64Register::Di => "rdi",
            Amd64Register::R8 => "r8",
            Amd64Register::R9 => "r9",
            Amd64Register::R10 => "r10",
            Amd64Register::R11 => "r11",
            Amd64Register::R12 => "r12",
            Amd64Register::R13 => "r13",
            Amd64Register::R14 => "r14",
            Amd64Register::R15 => "r15",
        }
    }
}

impl fmt::Display for Amd64Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// A value name produced by instruction selection.
///
/// Identity is the `id`; the width is that of the defining instruction and
/// is what spill and reload moves use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VirtualRegister {
    pub id: u32,
    pub width: OperandWidth,
}

impl VirtualRegister {
    #[inline]
    pub fn new(id: u32, width: OperandWidth) -> Self {
        Self { id, width }
    }
}

impl fmt::Display for VirtualRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%v{}", self.id)
    }
}

/// Hands out fresh virtual registers with increasing ids.
#[derive(Debug, Default)]
pub struct VirtualRegisterSupply {
    next: u32,
}

impl VirtualRegisterSupply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next virtual register.
    #[inline]
    pub fn next(&mut self, width: OperandWidth) -> VirtualRegister {
        let register = VirtualRegister::new(self.next, width);
        self.next += 1;
        register
    }
}

/// Either a virtual register or a physical one.
///
/// Physical registers show up before allocation wherever the ABI pins a
/// value (call arguments, return values, division).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Register {
    Virtual(VirtualRegister),
    Physical(Amd64Register),
}

impl Register {
    #[inline]
    pub fn as_virtual(self) -> Option<VirtualRegister> {
        match self {
            Register::Virtual(register) => Some(register),
            Register::Physical(_) => None,
        }
    }

    #[inline]
    pub fn as_physical(self) -> Option<Amd64Register> {
        match self {
            Register::Virtual(_) => None,
            Register::Physical(register) => Some(register),
        }
    }
}

impl From<VirtualRegister> for Register {
    #[inline]
    fn from(register: VirtualRegister) -> Self {
        Register::Virtual(register)
    }
}

impl From<Amd64Register> for Register {
    #[inline]
    fn from(register: Amd64Register) -> Self {
        Register::Physical(register)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Virtual(register) => register.fmt(f),
            Register::Physical(register) => register.fmt(f),
        }
    }
}
