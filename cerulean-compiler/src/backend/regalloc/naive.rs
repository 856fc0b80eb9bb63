//! The naive allocator.
//!
//! Each virtual register gets one location, a register or a stack slot, for
//! its whole lifetime. Registers are handed out first-fit: parameters first,
//! then everything else by the start of its interval. There is no splitting,
//! no coalescing and no eviction; a register that does not fit is spilled.
//!
//! Spilled operands are loaded into the target's spill scratch register
//! before the instruction and stored back after it. An instruction with more
//! than one spilled operand borrows further registers, preferring ones that
//! hold nothing live at that point and otherwise saving the borrowed
//! register in a dedicated slot around the instruction.

use super::{
    block_starts, build_intervals, def_point, fixed_spans, use_point, written_callee_saved,
    AllocOptions, Allocation, Interval, Location, RegAllocator,
};
use crate::backend::abi::Register;
use crate::backend::instruction::{
    render, FrameIndex, InstrError, MachBlock, MachFunction, MachInstr, Opcode, Operand, Reg, VReg,
};
use crate::backend::liveness::Liveness;
use crate::backend::target::Target;
use crate::{BackendError, Stage};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};

pub struct NaiveAllocator {
    options: AllocOptions,
}

impl NaiveAllocator {
    pub fn new(options: AllocOptions) -> Self {
        Self { options }
    }
}

impl Default for NaiveAllocator {
    fn default() -> Self {
        Self::new(AllocOptions::default())
    }
}

impl RegAllocator for NaiveAllocator {
    fn allocate(
        &self,
        target: &Target,
        mf: &MachFunction,
        liveness: &Liveness,
    ) -> Result<Allocation, BackendError> {
        check_reaching_defs(mf)?;

        let reserve = self.options.reserve_spill_scratch;
        let pool = target.allocatable(reserve);
        let intervals = build_intervals(mf, liveness);
        let fixed = fixed_spans(mf, &pool);

        let mut assigner = Assigner {
            target,
            pool: &pool,
            occupied: fixed.clone(),
            next_slot: 0,
        };
        let assignment = assigner.assign(mf, &intervals);

        let mut rewriter = Rewriter {
            target,
            function: &mf.name,
            pool: &pool,
            reserve,
            assignment: &assignment,
            intervals: &intervals,
            occupied: &assigner.occupied,
            entry_live: liveness.live_in.first().cloned().unwrap_or_default(),
            next_slot: assigner.next_slot,
            save_slots: BTreeMap::new(),
            borrow_slots: Vec::new(),
            trampolines: Vec::new(),
        };
        let func = rewriter.rewrite(mf)?;
        let used_callee_saved = written_callee_saved(target, &func);

        debug!(
            "`{}`: {} in registers, {} in memory, {} slots, callee-saved {:?}",
            mf.name,
            assignment.values().filter(|l| l.reg().is_some()).count(),
            assignment.values().filter(|l| l.reg().is_none()).count(),
            rewriter.next_slot,
            used_callee_saved
        );

        Ok(Allocation {
            func,
            spill_slots: rewriter.next_slot,
            assignment,
            intervals,
            fixed,
            used_callee_saved,
        })
    }
}

/// Every register read must be a parameter or written somewhere.
fn check_reaching_defs(mf: &MachFunction) -> Result<(), BackendError> {
    let mut defined: BTreeSet<VReg> = mf.params.iter().copied().collect();
    for instr in mf.instrs() {
        defined.extend(instr.vreg_defs());
    }
    for instr in mf.instrs() {
        if let Some(v) = instr.vreg_uses().into_iter().find(|u| !defined.contains(u)) {
            return Err(BackendError::MalformedLiveRange {
                function: mf.name.clone(),
                stage: Stage::Allocation,
                vreg: v.to_string(),
                instr: instr.to_string().trim().to_string(),
            });
        }
    }
    Ok(())
}

// ── Assignment ──────────────────────────────────────────────────────────

struct Assigner<'a> {
    target: &'a Target,
    pool: &'a [Register],
    /// Intervals already holding each register, fixed ABI spans included.
    occupied: BTreeMap<Register, Vec<Interval>>,
    next_slot: u32,
}

impl<'a> Assigner<'a> {
    fn is_free(&self, r: Register, iv: &Interval) -> bool {
        self.occupied
            .get(&r)
            .map_or(true, |spans| spans.iter().all(|s| !s.overlaps(iv)))
    }

    /// Preference order for one register.
    fn candidates(&self, param: Option<usize>, crosses_call: bool) -> Vec<Register> {
        let conv = &self.target.conv;
        let (preserved, clobbered): (Vec<Register>, Vec<Register>) =
            self.pool.iter().partition(|r| conv.is_callee_saved(**r));
        let mut order = if crosses_call {
            [preserved, clobbered].concat()
        } else {
            [clobbered, preserved].concat()
        };
        if let Some(k) = param {
            let own = conv.arg_regs[k];
            order.retain(|r| *r == own || !conv.is_arg_reg(*r));
            if !crosses_call {
                order.retain(|r| *r != own);
                order.insert(0, own);
            }
        }
        order
    }

    fn assign(
        &mut self,
        mf: &MachFunction,
        intervals: &BTreeMap<VReg, Interval>,
    ) -> BTreeMap<VReg, Location> {
        let nregs = self.target.conv.arg_regs.len();
        let param_index: BTreeMap<VReg, usize> =
            mf.params.iter().enumerate().map(|(k, p)| (*p, k)).collect();

        let starts = block_starts(mf);
        let calls: Vec<u32> = mf
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(b, block)| {
                let start = starts[b];
                block
                    .instrs
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| i.is_call())
                    .map(move |(k, _)| start + k as u32)
            })
            .collect();

        let mut order: Vec<VReg> = mf
            .params
            .iter()
            .filter(|p| intervals.contains_key(p))
            .copied()
            .collect();
        let mut rest: Vec<(u32, VReg)> = intervals
            .iter()
            .filter(|(v, _)| !param_index.contains_key(v))
            .map(|(v, iv)| (iv.start, *v))
            .collect();
        rest.sort();
        order.extend(rest.into_iter().map(|(_, v)| v));

        let mut assignment = BTreeMap::new();
        for v in order {
            let iv = intervals[&v];
            let param = param_index.get(&v).copied();
            if let Some(k) = param {
                if k >= nregs {
                    assignment.insert(v, Location::Incoming((k - nregs) as u32));
                    continue;
                }
            }
            let crosses_call = calls.iter().any(|&c| iv.crosses(c));
            let free = self
                .candidates(param, crosses_call)
                .into_iter()
                .find(|&r| self.is_free(r, &iv));
            let loc = match free {
                Some(r) => {
                    self.occupied.entry(r).or_default().push(iv);
                    Location::Reg(r)
                }
                None => {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    Location::Spill(slot)
                }
            };
            trace!("{v} [{}, {}] -> {loc}", iv.start, iv.end);
            assignment.insert(v, loc);
        }
        assignment
    }
}

// ── Rewriting ───────────────────────────────────────────────────────────

fn home(loc: Location) -> Option<FrameIndex> {
    match loc {
        Location::Reg(_) => None,
        Location::Spill(s) => Some(FrameIndex::Spill(s)),
        Location::Incoming(k) => Some(FrameIndex::Incoming(k)),
    }
}

/// A memory-resident operand of one instruction.
struct Spilled {
    vreg: VReg,
    home: FrameIndex,
    reads: bool,
    writes: bool,
}

struct Rewriter<'a> {
    target: &'a Target,
    function: &'a str,
    pool: &'a [Register],
    reserve: bool,
    assignment: &'a BTreeMap<VReg, Location>,
    intervals: &'a BTreeMap<VReg, Interval>,
    occupied: &'a BTreeMap<Register, Vec<Interval>>,
    /// Parameters whose incoming value is read.
    entry_live: BTreeSet<VReg>,
    next_slot: u32,
    /// Slot each caller-saved value is kept in across calls.
    save_slots: BTreeMap<VReg, u32>,
    /// Slots for saving borrowed registers, by borrow position.
    borrow_slots: Vec<u32>,
    /// Restore blocks for branches taken while a register is borrowed.
    trampolines: Vec<MachBlock>,
}

impl<'a> Rewriter<'a> {
    fn build(
        &self,
        op: Opcode,
        operands: Vec<Operand>,
        comment: String,
    ) -> Result<MachInstr, BackendError> {
        self.target
            .instr(op, operands.clone())
            .map(|i| if comment.is_empty() { i } else { i.with_comment(comment) })
            .map_err(|err| self.format_error(render(op, &operands), err))
    }

    fn format_error(&self, instr: String, err: InstrError) -> BackendError {
        BackendError::from_instr(self.function, Stage::Allocation, instr, err)
    }

    fn slot(&self, idx: FrameIndex) -> Operand {
        Operand::frame_slot(self.target.frame_base(), idx)
    }

    fn load(&self, r: Register, idx: FrameIndex, comment: String) -> Result<MachInstr, BackendError> {
        self.build(Opcode::Ld, vec![Operand::phys(r), self.slot(idx)], comment)
    }

    fn store(&self, r: Register, idx: FrameIndex, comment: String) -> Result<MachInstr, BackendError> {
        self.build(Opcode::St, vec![Operand::phys(r), self.slot(idx)], comment)
    }

    fn fresh_slot(&mut self) -> u32 {
        let s = self.next_slot;
        self.next_slot += 1;
        s
    }

    fn borrow_slot(&mut self, n: usize) -> u32 {
        while self.borrow_slots.len() <= n {
            let s = self.fresh_slot();
            self.borrow_slots.push(s);
        }
        self.borrow_slots[n]
    }

    fn save_slot(&mut self, v: VReg) -> u32 {
        if let Some(&s) = self.save_slots.get(&v) {
            return s;
        }
        let s = self.fresh_slot();
        self.save_slots.insert(v, s);
        s
    }

    fn location(&self, v: VReg, instr: &MachInstr) -> Result<Location, BackendError> {
        self.assignment
            .get(&v)
            .copied()
            .ok_or_else(|| BackendError::MalformedLiveRange {
                function: self.function.to_string(),
                stage: Stage::Allocation,
                vreg: v.to_string(),
                instr: instr.to_string().trim().to_string(),
            })
    }

    fn is_free_at(&self, r: Register, i: u32) -> bool {
        let here = Interval {
            start: use_point(i),
            end: def_point(i),
        };
        self.occupied
            .get(&r)
            .map_or(true, |spans| spans.iter().all(|s| !s.overlaps(&here)))
    }

    /// A register for a spill temporary at instruction `i`, and whether it
    /// already holds nothing live.
    fn borrow(&self, i: u32, busy: &BTreeSet<Register>) -> Option<(Register, bool)> {
        let idle = self
            .pool
            .iter()
            .copied()
            .find(|r| !busy.contains(r) && self.is_free_at(*r, i));
        if let Some(r) = idle {
            return Some((r, true));
        }
        self.pool
            .iter()
            .copied()
            .find(|r| !busy.contains(r))
            .map(|r| (r, false))
    }

    /// Temporary number `n` for the spilled operands of instruction `i`.
    /// A borrowed register that holds a live value is recorded in `saved`.
    fn spill_temp(
        &mut self,
        original: &MachInstr,
        i: u32,
        n: usize,
        busy: &BTreeSet<Register>,
        saved: &mut Vec<(Register, u32)>,
    ) -> Result<Register, BackendError> {
        if n == 0 && self.reserve {
            return Ok(self.target.roles.spill_scratch);
        }
        let (r, idle) = self.borrow(i, busy).ok_or_else(|| {
            self.format_error(
                original.to_string().trim().to_string(),
                InstrError::Shape {
                    op: original.op,
                    format: original.format,
                    regs: busy.len(),
                    imms: 0,
                },
            )
        })?;
        if !idle {
            let slot = self.borrow_slot(saved.len());
            saved.push((r, slot));
        }
        Ok(r)
    }

    /// Values in clobbered registers that live across the call at `i`.
    fn live_across_call(&mut self, i: u32) -> Vec<(VReg, Register, u32)> {
        let conv = &self.target.conv;
        let crossing: Vec<(VReg, Register)> = self
            .assignment
            .iter()
            .filter_map(|(v, loc)| loc.reg().map(|r| (*v, r)))
            .filter(|(v, r)| {
                !conv.is_callee_saved(*r) && self.intervals.get(v).map_or(false, |iv| iv.crosses(i))
            })
            .collect();
        crossing
            .into_iter()
            .map(|(v, r)| (v, r, self.save_slot(v)))
            .collect()
    }

    fn rewrite(&mut self, mf: &MachFunction) -> Result<MachFunction, BackendError> {
        let starts = block_starts(mf);
        let mut blocks = Vec::with_capacity(mf.blocks.len());
        for (b, block) in mf.blocks.iter().enumerate() {
            let mut out = Vec::new();
            if b == 0 {
                self.entry_moves(mf, &mut out)?;
            }
            for (k, instr) in block.instrs.iter().enumerate() {
                self.rewrite_instr(instr, starts[b] + k as u32, &mut out)?;
            }
            let mut mb = MachBlock::new(block.label.clone());
            mb.instrs = out;
            blocks.push(mb);
        }
        blocks.append(&mut self.trampolines);

        let mut func = MachFunction {
            name: mf.name.clone(),
            params: mf.params.clone(),
            blocks,
            vreg_count: mf.vreg_count,
            locals: mf.locals.clone(),
            outgoing_args: mf.outgoing_args,
            has_calls: mf.has_calls,
        };
        func.compute_cfg();
        Ok(func)
    }

    /// Move register parameters from their argument registers to their
    /// homes. Stores come first; moves only write non-argument registers, so
    /// no source is overwritten before it is read. A parameter that is
    /// redefined before any read gets no move: its register may already
    /// belong to a live parameter.
    fn entry_moves(&self, mf: &MachFunction, out: &mut Vec<MachInstr>) -> Result<(), BackendError> {
        let args = self.target.conv.arg_regs;
        let incoming: Vec<(&VReg, &Register)> = mf
            .params
            .iter()
            .zip(args)
            .filter(|(p, _)| self.entry_live.contains(*p))
            .collect();
        for &(p, &arg) in &incoming {
            if let Some(Location::Spill(s)) = self.assignment.get(p) {
                out.push(self.store(arg, FrameIndex::Spill(*s), format!("spill {p}"))?);
            }
        }
        for &(p, &arg) in &incoming {
            if let Some(Location::Reg(r)) = self.assignment.get(p) {
                if *r != arg {
                    out.push(self.build(
                        Opcode::Mov,
                        vec![Operand::phys(*r), Operand::phys(arg)],
                        format!("{p}"),
                    )?);
                }
            }
        }
        Ok(())
    }

    fn rewrite_instr(
        &mut self,
        original: &MachInstr,
        i: u32,
        out: &mut Vec<MachInstr>,
    ) -> Result<(), BackendError> {
        let mut instr = original.clone();

        // Memory-resident operands in order of first appearance.
        let mut spilled: Vec<Spilled> = Vec::new();
        let mut busy: BTreeSet<Register> = instr
            .implicit_uses
            .iter()
            .chain(instr.implicit_defs.iter())
            .copied()
            .collect();
        for (r, role) in instr.reg_refs() {
            match r {
                Reg::Phys(p) => {
                    busy.insert(p);
                }
                Reg::Virt(v) => {
                    let loc = self.location(v, original)?;
                    if let Some(p) = loc.reg() {
                        busy.insert(p);
                    }
                    let Some(idx) = home(loc) else { continue };
                    match spilled.iter_mut().find(|s| s.vreg == v) {
                        Some(s) => {
                            s.reads |= role.reads();
                            s.writes |= role.writes();
                        }
                        None => spilled.push(Spilled {
                            vreg: v,
                            home: idx,
                            reads: role.reads(),
                            writes: role.writes(),
                        }),
                    }
                }
            }
        }

        // Sources get temporaries first, so the scratch register goes to a
        // read. A write-only destination reuses a source's temporary, which
        // is free again once the instruction has read it.
        let mut temps: BTreeMap<VReg, Register> = BTreeMap::new();
        let mut saved: Vec<(Register, u32)> = Vec::new();
        let mut first_source = None;
        for s in spilled.iter().filter(|s| s.reads) {
            let t = self.spill_temp(original, i, temps.len(), &busy, &mut saved)?;
            busy.insert(t);
            temps.insert(s.vreg, t);
            first_source.get_or_insert(t);
        }
        for s in spilled.iter().filter(|s| !s.reads) {
            let t = match first_source.take() {
                Some(t) => t,
                None => {
                    let t = self.spill_temp(original, i, temps.len(), &busy, &mut saved)?;
                    busy.insert(t);
                    t
                }
            };
            temps.insert(s.vreg, t);
        }

        let assignment = self.assignment;
        instr.map_regs(|r, _| match r {
            Reg::Virt(v) => temps
                .get(&v)
                .copied()
                .or_else(|| assignment.get(&v).and_then(|l| l.reg()))
                .map_or(r, Reg::Phys),
            phys => phys,
        });
        if instr.has_virtual_regs() {
            return Err(self.format_error(
                instr.to_string().trim().to_string(),
                InstrError::Shape {
                    op: instr.op,
                    format: instr.format,
                    regs: 0,
                    imms: 0,
                },
            ));
        }
        if instr.op == Opcode::Mov && instr.operands[0] == instr.operands[1] && spilled.is_empty() {
            return Ok(());
        }
        self.target
            .verify(&instr)
            .map_err(|e| self.format_error(instr.to_string().trim().to_string(), e))?;

        let call_saves = if instr.is_call() {
            self.live_across_call(i)
        } else {
            Vec::new()
        };

        for (r, slot) in &saved {
            out.push(self.store(*r, FrameIndex::Spill(*slot), format!("borrow {r}"))?);
        }
        for s in spilled.iter().filter(|s| s.reads) {
            out.push(self.load(temps[&s.vreg], s.home, format!("restore {}", s.vreg))?);
        }
        for (v, r, slot) in &call_saves {
            out.push(self.store(*r, FrameIndex::Spill(*slot), format!("save {v}"))?);
        }

        if instr.op.is_branch() && !saved.is_empty() {
            self.redirect_through_restore(&mut instr, &saved)?;
        }
        trace!("{}", instr);
        out.push(instr);

        for (v, r, slot) in &call_saves {
            out.push(self.load(*r, FrameIndex::Spill(*slot), format!("reload {v}"))?);
        }
        for s in spilled.iter().filter(|s| s.writes) {
            out.push(self.store(temps[&s.vreg], s.home, format!("spill {}", s.vreg))?);
        }
        for (r, slot) in saved.iter().rev() {
            out.push(self.load(*r, FrameIndex::Spill(*slot), format!("return {r}"))?);
        }
        Ok(())
    }

    /// Send the taken edge of `branch` through a block that restores the
    /// borrowed registers before continuing to the original target.
    fn redirect_through_restore(
        &mut self,
        branch: &mut MachInstr,
        saved: &[(Register, u32)],
    ) -> Result<(), BackendError> {
        let Some(target) = branch.branch_target().map(str::to_string) else {
            return Ok(());
        };
        let label = format!("{}.restore{}", self.function, self.trampolines.len());
        let mut block = MachBlock::new(label.clone());
        for (r, slot) in saved.iter().rev() {
            block
                .instrs
                .push(self.load(*r, FrameIndex::Spill(*slot), format!("return {r}"))?);
        }
        block.instrs.push(self.build(
            Opcode::Jmp,
            vec![
                Operand::phys(self.target.roles.zero),
                Operand::Label(target),
            ],
            String::new(),
        )?);
        for operand in branch.operands.iter_mut() {
            if let Operand::Label(l) = operand {
                *l = label.clone();
            }
        }
        self.trampolines.push(block);
        Ok(())
    }
}
