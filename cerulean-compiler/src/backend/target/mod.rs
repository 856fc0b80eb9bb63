//! Target descriptors.
//!
//! Everything a pipeline stage needs to know about an ISA lives in one
//! immutable [`Target`] value: the opcode table (mnemonic, format and encoding
//! per opcode), the register roles, the calling convention, the immediate
//! field widths and how conditional branches are formed. Stages never branch
//! on which ISA they are compiling for; they ask the descriptor.

mod asm;
mod risc;

pub use asm::CERULEAN_ASM;
pub use risc::CERULEAN_RISC;

use super::abi::{CallingConvention, Register, RegisterRoles};
use super::instruction::{Format, InstrError, MachInstr, Offset, Opcode, Operand};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetKind {
    CeruleanAsm,
    CeruleanRisc,
}

impl TargetKind {
    pub fn target(self) -> &'static Target {
        match self {
            TargetKind::CeruleanAsm => &CERULEAN_ASM,
            TargetKind::CeruleanRisc => &CERULEAN_RISC,
        }
    }
}

/// How a conditional branch on a comparison is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareStyle {
    /// Materialize the comparison into a register, then branch if nonzero.
    SetThenBranch,
    /// A single compare-and-branch instruction.
    Fused,
}

/// One row of an opcode table.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub op: Opcode,
    pub mnemonic: &'static str,
    pub format: Format,
    pub encoding: u8,
}

/// Bit widths of the immediate fields, all signed except `logic`.
#[derive(Debug, Clone, Copy)]
pub struct ImmWidths {
    /// `li`
    pub load: u32,
    /// `addi`
    pub arith: u32,
    /// `ori` and `lui`, zero-extended; also the materialization chunk width.
    pub logic: u32,
    /// Memory offsets of `ld`/`st`/`lea`.
    pub mem: u32,
}

#[derive(Debug)]
pub struct Target {
    pub kind: TargetKind,
    pub name: &'static str,
    pub opcodes: &'static [OpcodeInfo],
    pub roles: RegisterRoles,
    pub conv: CallingConvention,
    pub imm: ImmWidths,
    pub compare: CompareStyle,
    /// Bytes per register and per spill slot.
    pub word_size: u32,
}

/// Whether `value` is representable as a `bits`-wide two's-complement field.
pub fn fits_signed(value: i64, bits: u32) -> bool {
    if bits >= 64 {
        return true;
    }
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (min..=max).contains(&value)
}

pub fn fits_unsigned(value: i64, bits: u32) -> bool {
    value >= 0 && (bits >= 63 || value < (1i64 << bits))
}

/// Every immediate field of the encoding is 16 bits wide; narrower target
/// widths are enforced by the stages that choose immediates.
const FIELD_BITS: u32 = 16;

fn fits_field(value: i64) -> bool {
    fits_signed(value, FIELD_BITS) || fits_unsigned(value, FIELD_BITS)
}

impl Target {
    pub fn info(&self, op: Opcode) -> Option<&'static OpcodeInfo> {
        self.opcodes.iter().find(|i| i.op == op)
    }

    pub fn supports(&self, op: Opcode) -> bool {
        self.info(op).is_some()
    }

    pub fn decode(&self, encoding: u8) -> Option<&'static OpcodeInfo> {
        self.opcodes.iter().find(|i| i.encoding == encoding)
    }

    /// Build an instruction, checking that the opcode exists on this target
    /// and that the operands match its format.
    pub fn instr(&self, op: Opcode, operands: Vec<Operand>) -> Result<MachInstr, InstrError> {
        let info = self.info(op).ok_or(InstrError::Unsupported(op))?;
        let instr = MachInstr::new_checked(op, info.format, info.mnemonic, operands);
        self.verify(&instr)?;
        Ok(instr)
    }

    /// Re-check an instruction after its operands were rewritten.
    pub fn verify(&self, instr: &MachInstr) -> Result<(), InstrError> {
        let info = self.info(instr.op).ok_or(InstrError::Unsupported(instr.op))?;

        let mut regs = 0;
        let mut imms = 0;
        let mut tail = false;
        let mut ordered = true;
        for operand in &instr.operands {
            if tail {
                ordered = false;
            }
            match operand {
                Operand::Reg(_) => regs += 1,
                Operand::Imm(_) | Operand::Label(_) => {
                    imms += 1;
                    tail = true;
                }
                Operand::Mem { .. } => {
                    regs += 1;
                    imms += 1;
                    tail = true;
                }
            }
        }
        if !ordered || (regs, imms) != info.format.shape() || instr.format != info.format {
            return Err(InstrError::Shape {
                op: instr.op,
                format: info.format,
                regs,
                imms,
            });
        }

        for operand in &instr.operands {
            let value = match operand {
                Operand::Imm(v) => *v,
                Operand::Mem {
                    offset: Offset::Const(v),
                    ..
                } => *v,
                _ => continue,
            };
            if !fits_field(value) {
                return Err(InstrError::ImmediateRange {
                    op: instr.op,
                    value,
                    bits: FIELD_BITS,
                });
            }
        }
        Ok(())
    }

    pub fn fits_load_imm(&self, value: i64) -> bool {
        fits_signed(value, self.imm.load)
    }

    pub fn fits_arith_imm(&self, value: i64) -> bool {
        fits_signed(value, self.imm.arith)
    }

    pub fn fits_logic_imm(&self, value: i64) -> bool {
        fits_unsigned(value, self.imm.logic)
    }

    pub fn fits_mem_offset(&self, value: i64) -> bool {
        fits_signed(value, self.imm.mem)
    }

    /// Register that frame-relative memory operands are based on.
    pub fn frame_base(&self) -> Register {
        self.roles.frame_ptr.unwrap_or(self.roles.stack_ptr)
    }

    /// Registers the allocator may hand out, in register-number order.
    /// With `reserve_scratch` off the spill scratch register is included.
    pub fn allocatable(&self, reserve_scratch: bool) -> Vec<Register> {
        Register::ALL
            .iter()
            .copied()
            .filter(|&r| {
                if r == self.roles.spill_scratch {
                    !reserve_scratch
                } else {
                    !self.roles.is_reserved(r)
                }
            })
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::instruction::{Reg, VReg};

    #[test]
    fn signed_widths() {
        assert!(fits_signed(2047, 12));
        assert!(fits_signed(-2048, 12));
        assert!(!fits_signed(2048, 12));
        assert!(fits_signed(-32768, 16));
        assert!(!fits_signed(32768, 16));
        assert!(fits_unsigned(0xFFFF, 16));
        assert!(!fits_unsigned(-1, 16));
    }

    #[test]
    fn opcode_tables_have_unique_encodings() {
        for target in [&CERULEAN_ASM, &CERULEAN_RISC] {
            for (i, a) in target.opcodes.iter().enumerate() {
                for b in &target.opcodes[i + 1..] {
                    assert_ne!(a.op, b.op, "{target}: {} listed twice", a.op);
                    assert_ne!(a.encoding, b.encoding, "{target}: {} and {}", a.op, b.op);
                }
            }
        }
    }

    #[test]
    fn format_shapes_follow_the_target() {
        let v = |n| Operand::vreg(VReg(n));
        assert_eq!(CERULEAN_ASM.info(Opcode::Add).map(|i| i.format), Some(Format::RR));
        assert_eq!(CERULEAN_RISC.info(Opcode::Add).map(|i| i.format), Some(Format::RRR));
        assert!(CERULEAN_ASM.instr(Opcode::Add, vec![v(0), v(1)]).is_ok());
        assert!(matches!(
            CERULEAN_ASM.instr(Opcode::Add, vec![v(0), v(1), v(2)]),
            Err(InstrError::Shape { .. })
        ));
        assert!(CERULEAN_RISC.instr(Opcode::Add, vec![v(0), v(1), v(2)]).is_ok());
        assert!(matches!(
            CERULEAN_RISC.instr(Opcode::Rem, vec![v(0), v(1), v(2)]),
            Err(InstrError::Unsupported(Opcode::Rem))
        ));
    }

    #[test]
    fn memory_operand_counts_as_register_and_immediate() {
        let mem = Operand::mem(Reg::Virt(VReg(1)), Offset::Const(8));
        let ld = CERULEAN_ASM.instr(Opcode::Ld, vec![Operand::vreg(VReg(0)), mem.clone()]);
        assert!(ld.is_ok());
        // immediate before a register is rejected
        let bad = CERULEAN_ASM.instr(Opcode::Ld, vec![mem, Operand::vreg(VReg(0))]);
        assert!(bad.is_err());
    }

    #[test]
    fn allocatable_pool_excludes_reserved_roles() {
        let pool = CERULEAN_ASM.allocatable(true);
        assert_eq!(pool.len(), 11);
        assert!(!pool.contains(&Register::R12));
        assert!(CERULEAN_ASM.allocatable(false).contains(&Register::R12));

        // R0, R1, R2 and R4 are reserved; R3 and R5..R15 remain
        let pool = CERULEAN_RISC.allocatable(true);
        assert_eq!(pool.len(), 12);
        assert!(!pool.contains(&Register::R4));
        assert!(pool.contains(&Register::R3));
    }
}
