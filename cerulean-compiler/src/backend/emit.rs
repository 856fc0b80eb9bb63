//! Output boundary: assembly text and the fixed 4-byte encoding.
//!
//! Encoding layout, one word per instruction:
//!
//! | byte | contents                                            |
//! |------|-----------------------------------------------------|
//! | 0    | opcode                                              |
//! | 1    | first register (high nibble), second (low nibble)   |
//! | 2..4 | RRR: third register in the high nibble of byte 2    |
//! |      | RI/RRI: 16-bit little-endian immediate              |
//!
//! Label immediates are written as zero and reported as relocations.

use super::instruction::{MachInstr, Offset, Operand, Reg};
use super::target::Target;
use super::CompiledFunction;
use crate::backend::instruction::Format;
use crate::{BackendError, Stage};
use serde::Serialize;
use std::collections::BTreeMap;

pub const INSTR_BYTES: usize = 4;
const COMMENT_COL: usize = 30;

// ============================================================================
// Assembly text
// ============================================================================

fn with_comment(base: String, comment: Option<&str>) -> String {
    match comment {
        Some(c) if !c.is_empty() => {
            let pad = if base.len() < COMMENT_COL {
                COMMENT_COL - base.len()
            } else {
                2
            };
            format!("{}{}; {}", base, " ".repeat(pad), c)
        }
        _ => base,
    }
}

/// One line per label and instruction.
pub fn assembly_lines(cf: &CompiledFunction) -> Vec<String> {
    let mut lines = Vec::new();
    for block in &cf.blocks {
        lines.push(format!("{}:", block.label));
        for instr in &block.instrs {
            lines.push(with_comment(instr.to_string(), instr.comment.as_deref()));
        }
    }
    lines
}

pub fn assembly(cf: &CompiledFunction) -> String {
    let mut text = assembly_lines(cf).join("\n");
    text.push('\n');
    text
}

// ============================================================================
// Binary encoding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relocation {
    /// Byte offset of the 16-bit immediate field to patch.
    pub offset: u32,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub relocations: Vec<Relocation>,
    /// Byte offset of every block label.
    pub labels: BTreeMap<String, u32>,
}

impl Encoded {
    pub fn words(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes.chunks(INSTR_BYTES)
    }
}

fn encode_instr(
    target: &Target,
    function: &str,
    instr: &MachInstr,
    at: u32,
    relocations: &mut Vec<Relocation>,
) -> Result<[u8; INSTR_BYTES], BackendError> {
    let mismatch = |detail: &str| BackendError::FormatMismatch {
        function: function.to_string(),
        stage: Stage::Emission,
        instr: instr.to_string().trim().to_string(),
        detail: detail.to_string(),
    };
    let info = target
        .info(instr.op)
        .ok_or_else(|| mismatch("opcode not provided by this target"))?;

    let mut regs: Vec<u8> = Vec::new();
    let mut imm: Option<i64> = None;
    for operand in &instr.operands {
        match operand {
            Operand::Reg(Reg::Phys(r)) => regs.push(r.index() as u8),
            Operand::Imm(v) => imm = Some(*v),
            Operand::Label(l) => {
                relocations.push(Relocation {
                    offset: at + 2,
                    label: l.clone(),
                });
                imm = Some(0);
            }
            Operand::Mem {
                base: Reg::Phys(r),
                offset: Offset::Const(v),
            } => {
                regs.push(r.index() as u8);
                imm = Some(*v);
            }
            _ => return Err(mismatch("unresolved register or frame offset")),
        }
    }
    let reg = |i: usize| regs.get(i).copied().unwrap_or(0);

    let mut word = [info.encoding, (reg(0) << 4) | reg(1), 0, 0];
    match info.format {
        Format::RRR => word[2] = reg(2) << 4,
        Format::RI | Format::RRI => {
            let field = (imm.unwrap_or(0) as u16).to_le_bytes();
            word[2] = field[0];
            word[3] = field[1];
        }
        Format::None | Format::R | Format::RR => {}
    }
    Ok(word)
}

/// Encode a compiled function. Block labels are recorded at their offsets;
/// every label immediate becomes a relocation.
pub fn encode(target: &Target, cf: &CompiledFunction) -> Result<Encoded, BackendError> {
    let mut out = Encoded::default();
    for block in &cf.blocks {
        out.labels.insert(block.label.clone(), out.bytes.len() as u32);
        for instr in &block.instrs {
            let at = out.bytes.len() as u32;
            let word = encode_instr(target, &cf.name, instr, at, &mut out.relocations)?;
            out.bytes.extend_from_slice(&word);
        }
    }
    Ok(out)
}

/// Space-separated hex words, one instruction per line.
pub fn hex_lines(encoded: &Encoded) -> Vec<String> {
    encoded
        .words()
        .map(|w| {
            w.iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}
