//! Stack frame layout, prologue/epilogue insertion and frame-index
//! resolution.
//!
//! The frame grows down from the caller's stack pointer. Offsets are
//! measured upward from the frame base, which is the stack pointer after the
//! prologue's adjustment (the frame pointer is set equal to it):
//!
//! ```text
//!   size + 8k   incoming stack argument k (caller's outgoing area)
//!   ---------   caller SP
//!               return address      (non-leaf only)
//!               saved frame pointer (when established)
//!               callee-saved registers
//!               spill slots
//!               locals
//!   0           outgoing argument area
//! ```

use super::abi::Register;
use super::instruction::{
    render, Format, FrameIndex, InstrError, MachFunction, MachInstr, Offset, Opcode, Operand, Reg,
};
use super::regalloc::Allocation;
use super::target::Target;
use crate::{BackendError, Stage};
use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameLayout {
    /// Total bytes, a multiple of the stack alignment.
    pub size: u32,
    pub outgoing_size: u32,
    /// Offset of each local, by slot number.
    pub locals: Vec<u32>,
    /// Offset of spill slot 0; slot `n` is `8n` above it.
    pub spill_base: u32,
    pub spill_slots: u32,
    pub callee_saved: Vec<(Register, u32)>,
    pub frame_ptr: Option<u32>,
    pub return_addr: Option<u32>,
}

fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Whether any operand of `mf` refers to an incoming stack argument.
fn reads_incoming(mf: &MachFunction) -> bool {
    mf.instrs().any(|i| {
        i.operands.iter().any(|o| {
            matches!(
                o,
                Operand::Mem {
                    offset: Offset::Frame(FrameIndex::Incoming(_)),
                    ..
                }
            )
        })
    })
}

impl FrameLayout {
    pub fn compute(target: &Target, alloc: &Allocation) -> Self {
        let mf = &alloc.func;
        let word = target.word_size;

        let outgoing_size = mf.outgoing_args * word;
        let mut at = outgoing_size;

        let mut locals = Vec::with_capacity(mf.locals.len());
        for slot in &mf.locals {
            at = align_to(at, slot.size);
            locals.push(at);
            at += slot.size;
        }

        at = align_to(at, word);
        let spill_base = at;
        at += alloc.spill_slots * word;

        let mut callee_saved = Vec::new();
        for r in &alloc.used_callee_saved {
            callee_saved.push((*r, at));
            at += word;
        }

        let needs_fp = target.roles.frame_ptr.is_some()
            && (!mf.locals.is_empty() || alloc.spill_slots > 0 || reads_incoming(mf));
        let frame_ptr = needs_fp.then(|| {
            let off = at;
            at += word;
            off
        });
        let return_addr = mf.has_calls.then(|| {
            let off = at;
            at += word;
            off
        });

        FrameLayout {
            size: align_to(at, target.conv.stack_align),
            outgoing_size,
            locals,
            spill_base,
            spill_slots: alloc.spill_slots,
            callee_saved,
            frame_ptr,
            return_addr,
        }
    }

    /// Constant offset of a frame index from the frame base, or `None` for
    /// a local slot the frame does not have.
    pub fn offset(&self, idx: FrameIndex, word: u32) -> Option<i64> {
        match idx {
            FrameIndex::Local(n) => self.locals.get(n as usize).map(|&off| off as i64),
            FrameIndex::Spill(n) => Some((self.spill_base + n * word) as i64),
            FrameIndex::Incoming(k) => Some((self.size + k * word) as i64),
        }
    }
}

// ── Lowering ────────────────────────────────────────────────────────────

struct FrameLowerer<'a> {
    target: &'a Target,
    function: &'a str,
    layout: &'a FrameLayout,
}

impl<'a> FrameLowerer<'a> {
    fn overflow(&self, instr: String, bits: u32) -> BackendError {
        BackendError::FrameOverflow {
            function: self.function.to_string(),
            stage: Stage::Frame,
            frame_size: self.layout.size,
            instr,
            bits,
        }
    }

    fn build(&self, op: Opcode, operands: Vec<Operand>) -> Result<MachInstr, BackendError> {
        self.target.instr(op, operands.clone()).map_err(|err| match err {
            InstrError::ImmediateRange { bits, .. } => self.overflow(render(op, &operands), bits),
            other => BackendError::from_instr(self.function, Stage::Frame, render(op, &operands), other),
        })
    }

    fn sp_slot(&self, op: Opcode, r: Register, offset: u32) -> Result<Operand, BackendError> {
        let slot = Operand::mem(Reg::Phys(self.target.roles.stack_ptr), Offset::Const(offset as i64));
        if !self.target.fits_mem_offset(offset as i64) {
            return Err(self.overflow(render(op, &[Operand::phys(r), slot]), self.target.imm.mem));
        }
        Ok(slot)
    }

    fn adjust_sp(&self, delta: i64) -> Result<MachInstr, BackendError> {
        let sp = Operand::phys(self.target.roles.stack_ptr);
        let text = render(Opcode::Addi, &[sp.clone(), Operand::Imm(delta)]);
        if !self.target.fits_arith_imm(delta) {
            return Err(self.overflow(text, self.target.imm.arith));
        }
        let format = self
            .target
            .info(Opcode::Addi)
            .map(|i| i.format)
            .ok_or_else(|| {
                BackendError::from_instr(self.function, Stage::Frame, text, InstrError::Unsupported(Opcode::Addi))
            })?;
        let operands = match format {
            Format::RI => vec![sp, Operand::Imm(delta)],
            _ => vec![sp.clone(), sp, Operand::Imm(delta)],
        };
        self.build(Opcode::Addi, operands)
    }

    fn store(&self, r: Register, offset: u32, comment: &str) -> Result<MachInstr, BackendError> {
        Ok(self
            .build(Opcode::St, vec![Operand::phys(r), self.sp_slot(Opcode::St, r, offset)?])?
            .with_comment(comment))
    }

    fn load(&self, r: Register, offset: u32, comment: &str) -> Result<MachInstr, BackendError> {
        Ok(self
            .build(Opcode::Ld, vec![Operand::phys(r), self.sp_slot(Opcode::Ld, r, offset)?])?
            .with_comment(comment))
    }

    fn prologue(&self) -> Result<Vec<MachInstr>, BackendError> {
        let layout = self.layout;
        let roles = &self.target.roles;
        let mut out = Vec::new();
        if layout.size == 0 {
            return Ok(out);
        }
        out.push(self.adjust_sp(-(layout.size as i64))?.with_comment("allocate frame"));
        if let Some(off) = layout.return_addr {
            out.push(self.store(roles.link, off, "save return address")?);
        }
        if let (Some(off), Some(fp)) = (layout.frame_ptr, roles.frame_ptr) {
            out.push(self.store(fp, off, "save frame pointer")?);
            out.push(self.build(
                Opcode::Mov,
                vec![Operand::phys(fp), Operand::phys(roles.stack_ptr)],
            )?);
        }
        for (r, off) in &layout.callee_saved {
            out.push(self.store(*r, *off, &format!("save {r}"))?);
        }
        Ok(out)
    }

    fn epilogue(&self) -> Result<Vec<MachInstr>, BackendError> {
        let layout = self.layout;
        let roles = &self.target.roles;
        let mut out = Vec::new();
        if layout.size == 0 {
            return Ok(out);
        }
        for (r, off) in layout.callee_saved.iter().rev() {
            out.push(self.load(*r, *off, &format!("restore {r}"))?);
        }
        if let (Some(off), Some(fp)) = (layout.frame_ptr, roles.frame_ptr) {
            out.push(self.load(fp, off, "restore frame pointer")?);
        }
        if let Some(off) = layout.return_addr {
            out.push(self.load(roles.link, off, "restore return address")?);
        }
        out.push(self.adjust_sp(layout.size as i64)?.with_comment("release frame"));
        Ok(out)
    }

    /// Replace frame-index offsets with constants.
    fn resolve(&self, instr: &mut MachInstr) -> Result<(), BackendError> {
        let word = self.target.word_size;
        let text = instr.to_string().trim().to_string();
        for operand in instr.operands.iter_mut() {
            if let Operand::Mem { offset, .. } = operand {
                if let Offset::Frame(idx) = *offset {
                    let value = self.layout.offset(idx, word).ok_or_else(|| {
                        BackendError::UnknownSymbol {
                            function: self.function.to_string(),
                            stage: Stage::Frame,
                            symbol: idx.to_string(),
                            operation: text.clone(),
                        }
                    })?;
                    if !self.target.fits_mem_offset(value) {
                        return Err(self.overflow(text, self.target.imm.mem));
                    }
                    *offset = Offset::Const(value);
                }
            }
        }
        self.target
            .verify(instr)
            .map_err(|err| BackendError::from_instr(self.function, Stage::Frame, text, err))
    }
}

/// Lay out the frame of an allocated function, insert its prologue and
/// epilogues and resolve every frame index.
pub fn lower_frame(
    target: &Target,
    alloc: &Allocation,
) -> Result<(MachFunction, FrameLayout), BackendError> {
    let layout = FrameLayout::compute(target, alloc);
    let lowerer = FrameLowerer {
        target,
        function: &alloc.func.name,
        layout: &layout,
    };
    if !target.fits_arith_imm(layout.size as i64) {
        return Err(lowerer.overflow(
            format!("frame of {} bytes", layout.size),
            target.imm.arith,
        ));
    }

    let prologue = lowerer.prologue()?;
    let epilogue = lowerer.epilogue()?;

    let mut mf = alloc.func.clone();
    for (b, block) in mf.blocks.iter_mut().enumerate() {
        let mut out = Vec::with_capacity(block.instrs.len());
        if b == 0 {
            out.extend(prologue.iter().cloned());
        }
        for mut instr in std::mem::take(&mut block.instrs) {
            lowerer.resolve(&mut instr)?;
            if instr.is_ret() {
                out.extend(epilogue.iter().cloned());
            }
            out.push(instr);
        }
        block.instrs = out;
    }
    mf.compute_cfg();

    debug!(
        "`{}`: {}-byte frame, {} spill slots, fp {}, ra {}",
        mf.name,
        layout.size,
        layout.spill_slots,
        layout.frame_ptr.is_some(),
        layout.return_addr.is_some()
    );
    Ok((mf, layout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(1, 16), 16);
        assert_eq!(align_to(20, 8), 24);
        assert_eq!(align_to(32, 16), 32);
    }
}
