//! CeruleanASM: two-address arithmetic, 16-bit immediates, frame pointer.

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

static OPCODES: [OpcodeInfo; 37] = [
    row(Opcode::Add, "add", Format::RR, 0x00),
    row(Opcode::Sub, "sub", Format::RR, 0x01),
    row(Opcode::Mul, "mul", Format::RR, 0x02),
    row(Opcode::Div, "div", Format::RR, 0x03),
    row(Opcode::Rem, "rem", Format::RR, 0x04),
    row(Opcode::And, "and", Format::RR, 0x05),
    row(Opcode::Or, "or", Format::RR, 0x06),
    row(Opcode::Xor, "xor", Format::RR, 0x07),
    row(Opcode::Shl, "shl", Format::RR, 0x08),
    row(Opcode::Shr, "shr", Format::RR, 0x09),
    row(Opcode::FAdd, "fadd", Format::RR, 0x0a),
    row(Opcode::FSub, "fsub", Format::RR, 0x0b),
    row(Opcode::FMul, "fmul", Format::RR, 0x0c),
    row(Opcode::FDiv, "fdiv", Format::RR, 0x0d),
    row(Opcode::Seq, "cmpeq", Format::RR, 0x10),
    row(Opcode::Sne, "cmpne", Format::RR, 0x11),
    row(Opcode::Slt, "cmplt", Format::RR, 0x12),
    row(Opcode::Sle, "cmple", Format::RR, 0x13),
    row(Opcode::Sgt, "cmpgt", Format::RR, 0x14),
    row(Opcode::Sge, "cmpge", Format::RR, 0x15),
    row(Opcode::Mov, "mov", Format::RR, 0x18),
    row(Opcode::ChkZ, "chkz", Format::R, 0x19),
    row(Opcode::Ret, "ret", Format::R, 0x1a),
    row(Opcode::Halt, "trap", Format::None, 0x1f),
    row(Opcode::Li, "ldi", Format::RI, 0x20),
    row(Opcode::Lui, "ldhi", Format::RI, 0x21),
    row(Opcode::Ori, "ori", Format::RI, 0x22),
    row(Opcode::Shli, "shli", Format::RI, 0x23),
    row(Opcode::Addi, "addi", Format::RI, 0x24),
    row(Opcode::Bnz, "jumpnz", Format::RI, 0x28),
    row(Opcode::Jmp, "jump", Format::RI, 0x29),
    row(Opcode::Call, "jal", Format::RI, 0x2a),
    row(Opcode::Ld, "load", Format::RRI, 0x30),
    row(Opcode::St, "store", Format::RRI, 0x31),
    row(Opcode::Ldw, "loadw", Format::RRI, 0x32),
    row(Opcode::Stw, "storew", Format::RRI, 0x33),
    row(Opcode::Lea, "lea", Format::RRI, 0x34),
];

pub static CERULEAN_ASM: Target = Target {
    kind: TargetKind::CeruleanAsm,
    name: "CeruleanASM",
    opcodes: &OPCODES,
    roles: RegisterRoles {
        zero: R0,
        stack_ptr: R14,
        frame_ptr: Some(R15),
        link: R13,
        spill_scratch: R12,
    },
    conv: CallingConvention {
        arg_regs: &[R1, R2, R3, R4],
        ret_reg: R1,
        caller_saved: &[R1, R2, R3, R4, R5, R6, R7],
        callee_saved: &[R8, R9, R10, R11],
        stack_align: 16,
    },
    imm: ImmWidths {
        load: 16,
        arith: 16,
        logic: 16,
        mem: 16,
    },
    compare: CompareStyle::SetThenBranch,
    word_size: 8,
};
