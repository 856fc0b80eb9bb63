//! CeruleanRISC: three-address arithmetic, 12-bit arithmetic and memory
//! immediates, fused compare-and-branch, no frame pointer.

use super::{CompareStyle, ImmWidths, OpcodeInfo, Target, TargetKind};
use crate::backend::abi::{CallingConvention, Register, RegisterRoles};
use crate::backend::instruction::{Format, Opcode};

use Register::*;

const fn row(op: Opcode, mnemonic: &'static str, format: Format, encoding: u8) -> OpcodeInfo {
    OpcodeInfo {
        op,
        mnemonic,
        format,
        encoding,
    }
}

static OPCODES: [OpcodeInfo; 38] = [
    row(Opcode::Halt, "halt", Format::None, 0x00),
    row(Opcode::Ret, "ret", Format::R, 0x01),
    row(Opcode::ChkZ, "chkz", Format::R, 0x02),
    row(Opcode::Mov, "mv", Format::RR, 0x03),
    row(Opcode::Add, "add", Format::RRR, 0x10),
    row(Opcode::Sub, "sub", Format::RRR, 0x11),
    row(Opcode::Mul, "mul", Format::RRR, 0x12),
    row(Opcode::Div, "div", Format::RRR, 0x13),
    row(Opcode::And, "and", Format::RRR, 0x14),
    row(Opcode::Or, "or", Format::RRR, 0x15),
    row(Opcode::Xor, "xor", Format::RRR, 0x16),
    row(Opcode::Shl, "sll", Format::RRR, 0x17),
    row(Opcode::Shr, "sra", Format::RRR, 0x18),
    row(Opcode::Seq, "seq", Format::RRR, 0x19),
    row(Opcode::Sne, "sne", Format::RRR, 0x1a),
    row(Opcode::Slt, "slt", Format::RRR, 0x1b),
    row(Opcode::Sle, "sle", Format::RRR, 0x1c),
    row(Opcode::Sgt, "sgt", Format::RRR, 0x1d),
    row(Opcode::Sge, "sge", Format::RRR, 0x1e),
    row(Opcode::Li, "li", Format::RI, 0x20),
    row(Opcode::Lui, "lui", Format::RI, 0x21),
    row(Opcode::Bnz, "bnez", Format::RI, 0x22),
    row(Opcode::Jmp, "j", Format::RI, 0x23),
    row(Opcode::Call, "jal", Format::RI, 0x24),
    row(Opcode::Ori, "ori", Format::RRI, 0x30),
    row(Opcode::Shli, "slli", Format::RRI, 0x31),
    row(Opcode::Addi, "addi", Format::RRI, 0x32),
    row(Opcode::Beq, "beq", Format::RRI, 0x38),
    row(Opcode::Bne, "bne", Format::RRI, 0x39),
    row(Opcode::Blt, "blt", Format::RRI, 0x3a),
    row(Opcode::Ble, "ble", Format::RRI, 0x3b),
    row(Opcode::Bgt, "bgt", Format::RRI, 0x3c),
    row(Opcode::Bge, "bge", Format::RRI, 0x3d),
    row(Opcode::Ld, "ld", Format::RRI, 0x40),
    row(Opcode::St, "sd", Format::RRI, 0x41),
    row(Opcode::Ldw, "lw", Format::RRI, 0x42),
    row(Opcode::Stw, "sw", Format::RRI, 0x43),
    row(Opcode::Lea, "la", Format::RRI, 0x44),
];

pub static CERULEAN_RISC: Target = Target {
    kind: TargetKind::CeruleanRisc,
    name: "CeruleanRISC",
    opcodes: &OPCODES,
    roles: RegisterRoles {
        zero: R0,
        stack_ptr: R2,
        frame_ptr: None,
        link: R1,
        spill_scratch: R4,
    },
    conv: CallingConvention {
        arg_regs: &[R5, R6, R7, R8, R9, R10],
        ret_reg: R5,
        caller_saved: &[R5, R6, R7, R8, R9, R10, R11],
        callee_saved: &[R3, R12, R13, R14, R15],
        stack_align: 16,
    },
    imm: ImmWidths {
        load: 16,
        arith: 12,
        logic: 16,
        mem: 12,
    },
    compare: CompareStyle::Fused,
    word_size: 8,
};
