//! Liveness analysis over virtual registers.
//!
//! Computes per-block live-in/live-out sets using iterative backward
//! dataflow. Blocks are visited in post-order of a depth-first walk from the
//! entry, with unreachable blocks appended, until a full round changes
//! nothing. Physical registers are not tracked here; the allocator handles
//! the few fixed ABI spans itself.

use super::instruction::{MachFunction, VReg};
use crate::{BackendError, Stage};
use log::{debug, trace, warn};
use std::collections::BTreeSet;

pub struct Liveness {
    pub live_in: Vec<BTreeSet<VReg>>,
    pub live_out: Vec<BTreeSet<VReg>>,
    /// Read before any write in the block.
    pub use_block: Vec<BTreeSet<VReg>>,
    /// Written anywhere in the block.
    pub def_block: Vec<BTreeSet<VReg>>,
    /// Block visiting order used by the fixed point.
    pub order: Vec<usize>,
    /// Sum of all live-in and live-out set sizes after each round.
    pub history: Vec<usize>,
    /// Parameters that are never read.
    pub dead_params: Vec<VReg>,
}

impl Liveness {
    pub fn rounds(&self) -> usize {
        self.history.len()
    }

    /// Registers live after each instruction of `block`.
    pub fn live_after(&self, mf: &MachFunction, block: usize) -> Vec<BTreeSet<VReg>> {
        let instrs = &mf.blocks[block].instrs;
        let mut out = vec![BTreeSet::new(); instrs.len()];
        let mut live = self.live_out[block].clone();
        for (i, instr) in instrs.iter().enumerate().rev() {
            out[i] = live.clone();
            for d in instr.vreg_defs() {
                live.remove(&d);
            }
            for u in instr.vreg_uses() {
                live.insert(u);
            }
        }
        out
    }
}

// ── Block ordering ──────────────────────────────────────────────────────

/// Post-order of a depth-first traversal from block 0, followed by any
/// blocks the traversal did not reach, in layout order.
pub fn postorder(mf: &MachFunction) -> Vec<usize> {
    let n = mf.blocks.len();
    let mut order = Vec::with_capacity(n);
    if n == 0 {
        return order;
    }
    let mut visited = vec![false; n];
    // (block, next successor to visit)
    let mut stack = vec![(0usize, 0usize)];
    visited[0] = true;
    while let Some(top) = stack.last_mut() {
        let (b, next) = *top;
        if let Some(&s) = mf.blocks[b].succs.get(next) {
            top.1 += 1;
            if !visited[s] {
                visited[s] = true;
                stack.push((s, 0));
            }
        } else {
            order.push(b);
            stack.pop();
        }
    }
    for (b, seen) in visited.iter().enumerate() {
        if !seen {
            order.push(b);
        }
    }
    order
}

// ── Core dataflow analysis ──────────────────────────────────────────────

pub fn analyze(mf: &MachFunction) -> Result<Liveness, BackendError> {
    let n = mf.blocks.len();

    // Step 1: use/def sets per block.
    let mut use_block = vec![BTreeSet::new(); n];
    let mut def_block = vec![BTreeSet::new(); n];
    for (bi, block) in mf.blocks.iter().enumerate() {
        for instr in &block.instrs {
            // read-before-write operands are uses first
            for u in instr.vreg_uses() {
                if !def_block[bi].contains(&u) {
                    use_block[bi].insert(u);
                }
            }
            for d in instr.vreg_defs() {
                def_block[bi].insert(d);
            }
        }
    }

    // Step 2: iterate to the fixed point.
    let order = postorder(mf);
    let mut live_in: Vec<BTreeSet<VReg>> = vec![BTreeSet::new(); n];
    let mut live_out: Vec<BTreeSet<VReg>> = vec![BTreeSet::new(); n];
    let mut history = Vec::new();

    loop {
        let mut changed = false;
        for &b in &order {
            // live_out[B] = ∪ live_in[S] for all successors S
            let mut new_out = BTreeSet::new();
            for &s in &mf.blocks[b].succs {
                new_out.extend(live_in[s].iter().copied());
            }

            // live_in[B] = use[B] ∪ (live_out[B] − def[B])
            let mut new_in = use_block[b].clone();
            new_in.extend(new_out.difference(&def_block[b]).copied());

            if new_in != live_in[b] || new_out != live_out[b] {
                changed = true;
                live_in[b] = new_in;
                live_out[b] = new_out;
            }
        }
        let total: usize = live_in.iter().chain(live_out.iter()).map(|s| s.len()).sum();
        history.push(total);
        trace!("`{}`: round {} total {}", mf.name, history.len(), total);
        if !changed {
            break;
        }
    }

    // Step 3: nothing but parameters may be live into the entry.
    let mut dead_params = Vec::new();
    if n > 0 {
        if let Some(v) = live_in[0].iter().find(|v| !mf.params.contains(v)) {
            return Err(BackendError::IllegalLiveIn {
                function: mf.name.clone(),
                stage: Stage::Liveness,
                vreg: v.to_string(),
            });
        }
        for p in &mf.params {
            if !live_in[0].contains(p) {
                warn!("`{}`: parameter {} is never used", mf.name, p);
                dead_params.push(*p);
            }
        }
    }

    debug!(
        "`{}`: liveness converged after {} rounds",
        mf.name,
        history.len()
    );
    Ok(Liveness {
        live_in,
        live_out,
        use_block,
        def_block,
        order,
        history,
        dead_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::lowering::lower_function;
    use crate::backend::target::CERULEAN_ASM;
    use crate::ir::{samples, SymbolTable};

    fn lowered(f: crate::ir::Function) -> MachFunction {
        let module = vec![f];
        let symbols = SymbolTable::from_module(&module);
        lower_function(&CERULEAN_ASM, &symbols, &module[0]).unwrap()
    }

    #[test]
    fn postorder_puts_exit_before_entry() {
        let mf = lowered(samples::sum_regs());
        let order = postorder(&mf);
        assert_eq!(order.len(), mf.blocks.len());
        assert_eq!(*order.last().unwrap(), 0);
    }

    #[test]
    fn loop_carried_values_are_live_around_the_loop() {
        let mf = lowered(samples::sum_regs());
        let live = analyze(&mf).unwrap();
        // s (%0) and i (%1) flow through the loop header
        assert!(live.live_in[1].contains(&VReg(0)));
        assert!(live.live_in[1].contains(&VReg(1)));
        assert!(live.live_in[0].is_empty());
    }

    #[test]
    fn unused_parameter_is_reported_dead() {
        let mf = lowered(samples::leaf_const());
        let live = analyze(&mf).unwrap();
        assert_eq!(live.dead_params, vec![VReg(0)]);
    }
}
