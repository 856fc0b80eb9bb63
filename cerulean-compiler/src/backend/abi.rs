//! Physical registers and calling-convention descriptions.
//!
//! Both Cerulean machines have sixteen 64-bit registers named `R0`..`R15`.
//! Which of them carry arguments, which survive calls and which are set aside
//! for the stack pointer and friends differs per target; that split lives in
//! [`RegisterRoles`] and [`CallingConvention`], filled in by the target
//! descriptors.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Register {
    R0, R1, R2, R3, R4, R5, R6, R7,
    R8, R9, R10, R11, R12, R13, R14, R15,
}

impl Register {
    pub const COUNT: usize = 16;

    pub const ALL: [Register; 16] = [
        Register::R0, Register::R1, Register::R2, Register::R3,
        Register::R4, Register::R5, Register::R6, Register::R7,
        Register::R8, Register::R9, Register::R10, Register::R11,
        Register::R12, Register::R13, Register::R14, Register::R15,
    ];

    /// Register number, used for encoding and for indexing register files.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(n: usize) -> Option<Self> {
        Self::ALL.get(n).copied()
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "R0" => Some(Register::R0),
            "R1" => Some(Register::R1),
            "R2" => Some(Register::R2),
            "R3" => Some(Register::R3),
            "R4" => Some(Register::R4),
            "R5" => Some(Register::R5),
            "R6" => Some(Register::R6),
            "R7" => Some(Register::R7),
            "R8" => Some(Register::R8),
            "R9" => Some(Register::R9),
            "R10" => Some(Register::R10),
            "R11" => Some(Register::R11),
            "R12" => Some(Register::R12),
            "R13" => Some(Register::R13),
            "R14" => Some(Register::R14),
            "R15" => Some(Register::R15),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Register::R0 => "R0",
            Register::R1 => "R1",
            Register::R2 => "R2",
            Register::R3 => "R3",
            Register::R4 => "R4",
            Register::R5 => "R5",
            Register::R6 => "R6",
            Register::R7 => "R7",
            Register::R8 => "R8",
            Register::R9 => "R9",
            Register::R10 => "R10",
            Register::R11 => "R11",
            Register::R12 => "R12",
            Register::R13 => "R13",
            Register::R14 => "R14",
            Register::R15 => "R15",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registers with a fixed job that the allocator never hands out.
#[derive(Debug, Clone, Copy)]
pub struct RegisterRoles {
    /// Reads as zero, writes are discarded.
    pub zero: Register,
    pub stack_ptr: Register,
    /// `None` when the convention addresses the frame from the stack pointer.
    pub frame_ptr: Option<Register>,
    /// Written by `call`, read by `ret`.
    pub link: Register,
    /// Reserved for spill loads and stores.
    pub spill_scratch: Register,
}

impl RegisterRoles {
    pub fn is_reserved(&self, reg: Register) -> bool {
        reg == self.zero
            || reg == self.stack_ptr
            || Some(reg) == self.frame_ptr
            || reg == self.link
            || reg == self.spill_scratch
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CallingConvention {
    /// Argument registers in parameter order; later arguments go on the stack.
    pub arg_regs: &'static [Register],
    pub ret_reg: Register,
    pub caller_saved: &'static [Register],
    pub callee_saved: &'static [Register],
    /// Stack pointer alignment in bytes at every call boundary.
    pub stack_align: u32,
}

impl CallingConvention {
    pub fn is_caller_saved(&self, reg: Register) -> bool {
        self.caller_saved.contains(&reg)
    }

    pub fn is_callee_saved(&self, reg: Register) -> bool {
        self.callee_saved.contains(&reg)
    }

    pub fn is_arg_reg(&self, reg: Register) -> bool {
        self.arg_regs.contains(&reg)
    }
}
