//! Register allocation interfaces and shared infrastructure.
//!
//! This module defines:
//! - [`RegAllocator`] — the trait an allocator implements.
//! - [`AllocOptions`] — allocator tunables.
//! - [`Allocation`] — the rewritten function plus the assignment behind it.
//! - live-interval construction shared by allocators.

mod naive;

pub use naive::NaiveAllocator;

use super::abi::Register;
use super::instruction::{MachFunction, VReg};
use super::liveness::Liveness;
use super::target::Target;
use crate::BackendError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Options and results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocOptions {
    /// Keep the target's spill scratch register out of the allocatable
    /// pool. When off, the scratch register is allocatable and every spill
    /// temporary is borrowed instead.
    pub reserve_spill_scratch: bool,
}

impl Default for AllocOptions {
    fn default() -> Self {
        Self {
            reserve_spill_scratch: true,
        }
    }
}

/// Where a virtual register lives for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Location {
    Reg(Register),
    Spill(u32),
    /// A stack-passed parameter left in the caller's outgoing area.
    Incoming(u32),
}

impl Location {
    pub fn reg(self) -> Option<Register> {
        match self {
            Location::Reg(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg(r) => write!(f, "{r}"),
            Location::Spill(n) => write!(f, "spill{n}"),
            Location::Incoming(n) => write!(f, "incoming{n}"),
        }
    }
}

/// An inclusive span of program points. Instruction `i` reads at point `2i`
/// and writes at point `2i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    pub fn point(p: u32) -> Self {
        Self { start: p, end: p }
    }

    pub fn extend(&mut self, p: u32) {
        self.start = self.start.min(p);
        self.end = self.end.max(p);
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Live both before and after instruction `i`.
    pub fn crosses(&self, i: u32) -> bool {
        self.start < 2 * i && self.end > 2 * i + 1
    }
}

pub fn use_point(i: u32) -> u32 {
    2 * i
}

pub fn def_point(i: u32) -> u32 {
    2 * i + 1
}

pub struct Allocation {
    /// The rewritten function: physical registers only.
    pub func: MachFunction,
    pub assignment: BTreeMap<VReg, Location>,
    pub intervals: BTreeMap<VReg, Interval>,
    /// Spans where an ABI-fixed register is occupied.
    pub fixed: BTreeMap<Register, Vec<Interval>>,
    /// Spill, call-save and borrow slots, one word each.
    pub spill_slots: u32,
    pub used_callee_saved: Vec<Register>,
}

// ============================================================================
// Allocator trait
// ============================================================================

pub trait RegAllocator {
    fn allocate(
        &self,
        target: &Target,
        mf: &MachFunction,
        liveness: &Liveness,
    ) -> Result<Allocation, BackendError>;
}

// ============================================================================
// Linear numbering and intervals
// ============================================================================

/// First instruction index of every block, plus the total count at the end.
pub fn block_starts(mf: &MachFunction) -> Vec<u32> {
    let mut starts = Vec::with_capacity(mf.blocks.len() + 1);
    let mut pos = 0u32;
    for block in &mf.blocks {
        starts.push(pos);
        pos += block.instrs.len() as u32;
    }
    starts.push(pos);
    starts
}

/// One hull interval per virtual register, covering every read, every write
/// and every block boundary where it is live.
pub fn build_intervals(mf: &MachFunction, liveness: &Liveness) -> BTreeMap<VReg, Interval> {
    let starts = block_starts(mf);
    let mut intervals: BTreeMap<VReg, Interval> = BTreeMap::new();
    let mut touch = |v: VReg, p: u32| {
        intervals
            .entry(v)
            .and_modify(|iv| iv.extend(p))
            .or_insert_with(|| Interval::point(p));
    };

    for (b, block) in mf.blocks.iter().enumerate() {
        let (start, end) = (starts[b], starts[b + 1]);
        for &v in &liveness.live_in[b] {
            touch(v, use_point(start));
        }
        let last = if end > start { def_point(end - 1) } else { use_point(start) };
        for &v in &liveness.live_out[b] {
            touch(v, last);
        }
        for (k, instr) in block.instrs.iter().enumerate() {
            let i = start + k as u32;
            for u in instr.vreg_uses() {
                touch(u, use_point(i));
            }
            for d in instr.vreg_defs() {
                touch(d, def_point(i));
            }
        }
    }
    if let Some(entry) = liveness.live_in.first() {
        for p in &mf.params {
            if entry.contains(p) {
                touch(*p, 0);
            }
        }
    }
    intervals
}

/// Spans during which an allocatable physical register carries an ABI value:
/// from each write of the register to its last read before the next write,
/// within one block.
pub fn fixed_spans(mf: &MachFunction, pool: &[Register]) -> BTreeMap<Register, Vec<Interval>> {
    let starts = block_starts(mf);
    let mut spans: BTreeMap<Register, Vec<Interval>> = BTreeMap::new();
    for (b, block) in mf.blocks.iter().enumerate() {
        let mut open: BTreeMap<Register, Interval> = BTreeMap::new();
        for (k, instr) in block.instrs.iter().enumerate() {
            let i = starts[b] + k as u32;
            for r in instr.phys_uses() {
                if let Some(iv) = open.get_mut(&r) {
                    iv.extend(use_point(i));
                }
            }
            for r in instr.phys_defs() {
                if !pool.contains(&r) {
                    continue;
                }
                if let Some(iv) = open.remove(&r) {
                    spans.entry(r).or_default().push(iv);
                }
                open.insert(r, Interval::point(def_point(i)));
            }
        }
        for (r, iv) in open {
            spans.entry(r).or_default().push(iv);
        }
    }
    spans
}

/// Callee-saved registers written anywhere in `mf`, in register order.
pub fn written_callee_saved(target: &Target, mf: &MachFunction) -> Vec<Register> {
    let written: BTreeSet<Register> = mf
        .instrs()
        .flat_map(|i| i.phys_defs())
        .filter(|r| target.conv.is_callee_saved(*r))
        .collect();
    written.into_iter().collect()
}
