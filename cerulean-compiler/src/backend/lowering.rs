//! IR → virtual-register machine code.
//!
//! Every IR value maps to the virtual register with the same number;
//! temporaries are numbered after the last IR value. Three producer/consumer
//! pairs are fused when the producer's result has exactly one definition and
//! one use, and that use is the very next instruction:
//!
//! - a constant becomes an inline immediate (or the zero register, or is
//!   materialized straight into its destination);
//! - a comparison feeding a branch becomes a fused compare-and-branch on
//!   targets with [`CompareStyle::Fused`];
//! - a local address feeding a load or store becomes a frame-relative memory
//!   operand.

use super::instruction::{
    render, Format, FrameIndex, InstrError, LocalSlot, MachBlock, MachFunction, MachInstr, Offset, Opcode,
    Operand, Reg, VReg,
};
use super::target::{fits_signed, CompareStyle, Target};
use crate::ir::{BinOp, CmpOp, Function, Instr, SymbolAddr, SymbolTable, Type, UnOp, ValueId};
use crate::{BackendError, Stage};
use log::{debug, trace};
use std::collections::HashMap;

/// Lower one IR function for `target`.
pub fn lower_function(
    target: &Target,
    symbols: &SymbolTable,
    func: &Function,
) -> Result<MachFunction, BackendError> {
    debug!("lowering `{}` for {}", func.name, target);
    let mut lowerer = Lowerer::new(target, symbols, func);
    lowerer.run()?;
    let mf = lowerer.finish();
    debug!(
        "`{}`: {} blocks, {} instructions, {} virtual registers",
        mf.name,
        mf.blocks.len(),
        mf.instr_count(),
        mf.vreg_count
    );
    Ok(mf)
}

/// The first block is named after the function, unless something branches
/// back to it; then an empty entry block takes the name so the prologue runs
/// once.
fn machine_label(func: &Function, index: usize, label: &str, reentered: bool) -> String {
    if index == 0 && !reentered {
        func.name.clone()
    } else {
        format!("{}.{}", func.name, label)
    }
}

fn entry_is_reentered(func: &Function) -> bool {
    let Some(entry) = func.blocks.first() else {
        return false;
    };
    func.instrs().any(|ins| match ins {
        Instr::Jump { target } => *target == entry.label,
        Instr::Branch {
            then_label,
            else_label,
            ..
        } => *then_label == entry.label || *else_label == entry.label,
        _ => false,
    })
}

fn arith_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Rem => Opcode::Rem,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
        BinOp::Xor => Opcode::Xor,
        BinOp::Shl => Opcode::Shl,
        BinOp::Shr => Opcode::Shr,
        BinOp::FAdd => Opcode::FAdd,
        BinOp::FSub => Opcode::FSub,
        BinOp::FMul => Opcode::FMul,
        BinOp::FDiv => Opcode::FDiv,
    }
}

fn set_opcode(op: CmpOp) -> Opcode {
    match op {
        CmpOp::Eq => Opcode::Seq,
        CmpOp::Ne => Opcode::Sne,
        CmpOp::Lt => Opcode::Slt,
        CmpOp::Le => Opcode::Sle,
        CmpOp::Gt => Opcode::Sgt,
        CmpOp::Ge => Opcode::Sge,
    }
}

fn branch_opcode(op: CmpOp) -> Opcode {
    match op {
        CmpOp::Eq => Opcode::Beq,
        CmpOp::Ne => Opcode::Bne,
        CmpOp::Lt => Opcode::Blt,
        CmpOp::Le => Opcode::Ble,
        CmpOp::Gt => Opcode::Bgt,
        CmpOp::Ge => Opcode::Bge,
    }
}

/// Producer/consumer pairs that lower as one.
#[derive(Default)]
struct Fusions {
    consts: HashMap<ValueId, i64>,
    cmps: HashMap<ValueId, (CmpOp, ValueId, ValueId)>,
    locals: HashMap<ValueId, u32>,
}

impl Fusions {
    fn analyze(func: &Function) -> Self {
        let mut defs: HashMap<ValueId, usize> = HashMap::new();
        let mut uses: HashMap<ValueId, usize> = HashMap::new();
        for p in &func.params {
            *defs.entry(p.value).or_default() += 1;
        }
        for ins in func.instrs() {
            if let Some(d) = ins.def() {
                *defs.entry(d).or_default() += 1;
            }
            for u in ins.uses() {
                *uses.entry(u).or_default() += 1;
            }
        }
        let single = |v: ValueId| defs.get(&v) == Some(&1) && uses.get(&v) == Some(&1);

        let mut fusions = Fusions::default();
        for block in &func.blocks {
            for pair in block.instrs.windows(2) {
                let (producer, consumer) = (&pair[0], &pair[1]);
                match producer {
                    Instr::Const { dst, value, .. }
                        if single(*dst) && consumer.uses().contains(dst) =>
                    {
                        fusions.consts.insert(*dst, *value);
                    }
                    Instr::Cmp { dst, op, lhs, rhs } if single(*dst) => {
                        if let Instr::Branch { cond, .. } = consumer {
                            if cond == dst {
                                fusions.cmps.insert(*dst, (*op, *lhs, *rhs));
                            }
                        }
                    }
                    Instr::LocalAddr { dst, slot } if single(*dst) => match consumer {
                        Instr::Load { addr, .. } if addr == dst => {
                            fusions.locals.insert(*dst, *slot);
                        }
                        Instr::Store { addr, src, .. } if addr == dst && src != dst => {
                            fusions.locals.insert(*dst, *slot);
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
        fusions
    }

    fn is_fused_producer(&self, ins: &Instr) -> bool {
        match ins {
            Instr::Const { dst, .. } => self.consts.contains_key(dst),
            Instr::Cmp { dst, .. } => self.cmps.contains_key(dst),
            Instr::LocalAddr { dst, .. } => self.locals.contains_key(dst),
            _ => false,
        }
    }
}

struct Lowerer<'a> {
    target: &'a Target,
    symbols: &'a SymbolTable,
    func: &'a Function,
    labels: HashMap<&'a str, String>,
    reentered: bool,
    fusions: Fusions,
    next_vreg: u32,
    out: Vec<MachInstr>,
    blocks: Vec<MachBlock>,
    outgoing_args: u32,
    has_calls: bool,
    /// IR instruction being lowered, for diagnostics.
    current: String,
}

impl<'a> Lowerer<'a> {
    fn new(target: &'a Target, symbols: &'a SymbolTable, func: &'a Function) -> Self {
        let reentered = entry_is_reentered(func);
        let labels = func
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.as_str(), machine_label(func, i, &b.label, reentered)))
            .collect();
        Self {
            target,
            symbols,
            func,
            labels,
            reentered,
            fusions: Fusions::analyze(func),
            next_vreg: func.value_count,
            out: Vec::new(),
            blocks: Vec::new(),
            outgoing_args: 0,
            has_calls: false,
            current: String::new(),
        }
    }

    fn run(&mut self) -> Result<(), BackendError> {
        let func = self.func;
        let last = func.blocks.len().saturating_sub(1);
        if self.reentered {
            self.blocks.push(MachBlock::new(func.name.clone()));
        }
        for (bi, block) in func.blocks.iter().enumerate() {
            let next = func.blocks.get(bi + 1).map(|b| b.label.as_str());
            let mut terminated = false;
            for ins in &block.instrs {
                if self.fusions.is_fused_producer(ins) {
                    continue;
                }
                self.current = ins.to_string();
                self.lower_instr(ins, next)?;
                if ins.is_terminator() {
                    terminated = true;
                    break;
                }
            }
            if bi == last && !terminated {
                self.current = "implicit return".to_string();
                self.emit_ret(false)?;
            }
            let mut mb = MachBlock::new(self.label(&block.label)?);
            mb.instrs = std::mem::take(&mut self.out);
            self.blocks.push(mb);
        }
        Ok(())
    }

    fn finish(self) -> MachFunction {
        let mut mf = MachFunction {
            name: self.func.name.clone(),
            params: self.func.params.iter().map(|p| VReg(p.value.0)).collect(),
            blocks: self.blocks,
            vreg_count: self.next_vreg,
            locals: self
                .func
                .locals
                .iter()
                .map(|t| LocalSlot { size: t.size() })
                .collect(),
            outgoing_args: self.outgoing_args,
            has_calls: self.has_calls,
        };
        mf.compute_cfg();
        mf
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    fn no_rule(&self) -> BackendError {
        BackendError::NoLoweringRule {
            function: self.func.name.clone(),
            stage: Stage::Lowering,
            operation: self.current.clone(),
            target: self.target.name,
        }
    }

    fn label(&self, ir_label: &str) -> Result<String, BackendError> {
        self.labels
            .get(ir_label)
            .cloned()
            .ok_or_else(|| BackendError::UnknownLabel {
                function: self.func.name.clone(),
                stage: Stage::Lowering,
                label: ir_label.to_string(),
                operation: self.current.clone(),
            })
    }

    fn unknown_symbol(&self, name: &str) -> BackendError {
        BackendError::UnknownSymbol {
            function: self.func.name.clone(),
            stage: Stage::Lowering,
            symbol: name.to_string(),
            operation: self.current.clone(),
        }
    }

    /// Frame operand for local `slot`, which must be declared.
    fn local_slot(&self, slot: u32) -> Result<Operand, BackendError> {
        if slot as usize >= self.func.locals.len() {
            return Err(self.unknown_symbol(&format!("local{slot}")));
        }
        Ok(Operand::frame_slot(self.target.frame_base(), FrameIndex::Local(slot)))
    }

    // ── Emission helpers ────────────────────────────────────────────────

    fn build(&self, op: Opcode, operands: Vec<Operand>) -> Result<MachInstr, BackendError> {
        self.target
            .instr(op, operands.clone())
            .map_err(|err| match err {
                InstrError::Unsupported(_) => self.no_rule(),
                other => BackendError::from_instr(
                    &self.func.name,
                    Stage::Lowering,
                    render(op, &operands),
                    other,
                ),
            })
    }

    fn push(&mut self, instr: MachInstr) {
        trace!("{}", instr);
        self.out.push(instr);
    }

    fn emit(&mut self, op: Opcode, operands: Vec<Operand>) -> Result<(), BackendError> {
        let instr = self.build(op, operands)?;
        self.push(instr);
        Ok(())
    }

    fn format_of(&self, op: Opcode) -> Result<Format, BackendError> {
        self.target
            .info(op)
            .map(|i| i.format)
            .ok_or_else(|| self.no_rule())
    }

    fn temp(&mut self) -> Reg {
        let v = VReg(self.next_vreg);
        self.next_vreg += 1;
        Reg::Virt(v)
    }

    fn vreg(v: ValueId) -> Reg {
        Reg::Virt(VReg(v.0))
    }

    fn zero(&self) -> Reg {
        Reg::Phys(self.target.roles.zero)
    }

    /// Register holding `v` as a source operand. Fused constants are
    /// materialized on the spot; zero reads the zero register.
    fn source(&mut self, v: ValueId) -> Result<Reg, BackendError> {
        if let Some(&c) = self.fusions.consts.get(&v) {
            if c == 0 {
                return Ok(self.zero());
            }
            let t = self.temp();
            self.materialize(t, c)?;
            return Ok(t);
        }
        Ok(Self::vreg(v))
    }

    fn mov(&mut self, dst: Reg, src: Reg) -> Result<(), BackendError> {
        if dst == src {
            return Ok(());
        }
        self.emit(Opcode::Mov, vec![Operand::Reg(dst), Operand::Reg(src)])
    }

    /// `dst = src <op> imm` for the immediate forms (`addi`, `ori`, `shli`).
    fn emit_imm_op(&mut self, op: Opcode, dst: Reg, src: Reg, imm: i64) -> Result<(), BackendError> {
        match self.format_of(op)? {
            Format::RI => {
                self.mov(dst, src)?;
                self.emit(op, vec![Operand::Reg(dst), Operand::Imm(imm)])
            }
            _ => self.emit(
                op,
                vec![Operand::Reg(dst), Operand::Reg(src), Operand::Imm(imm)],
            ),
        }
    }

    /// `dst = a <op> b` in whichever shape the target gives `op`.
    fn emit_binary(&mut self, op: Opcode, dst: Reg, a: Reg, b: Reg) -> Result<(), BackendError> {
        match self.format_of(op)? {
            Format::RR => {
                if dst == b && dst != a {
                    let t = self.temp();
                    self.mov(t, b)?;
                    self.mov(dst, a)?;
                    self.emit(op, vec![Operand::Reg(dst), Operand::Reg(t)])
                } else {
                    self.mov(dst, a)?;
                    self.emit(op, vec![Operand::Reg(dst), Operand::Reg(b)])
                }
            }
            _ => self.emit(
                op,
                vec![Operand::Reg(dst), Operand::Reg(a), Operand::Reg(b)],
            ),
        }
    }

    /// Load an arbitrary 64-bit constant into `dst`.
    ///
    /// Values that fit the load-immediate field take one `li`. Otherwise the
    /// value is cut into chunks of the logic-immediate width, and the
    /// smallest count `k >= 2` of chunks whose sign extension reproduces the
    /// value is emitted as `lui c[k-1]; ori c[k-2]; (shli; ori c[j])*`.
    fn materialize(&mut self, dst: Reg, value: i64) -> Result<(), BackendError> {
        if self.target.fits_load_imm(value) {
            return self.emit(Opcode::Li, vec![Operand::Reg(dst), Operand::Imm(value)]);
        }
        let chunk = self.target.imm.logic;
        let max_chunks = 64 / chunk;
        let k = (2..=max_chunks)
            .find(|&k| fits_signed(value, chunk * k))
            .unwrap_or(max_chunks);
        let bits = value as u64;
        let mask = (1u64 << chunk) - 1;
        let piece = |j: u32| ((bits >> (chunk * j)) & mask) as i64;

        self.emit(Opcode::Lui, vec![Operand::Reg(dst), Operand::Imm(piece(k - 1))])?;
        self.emit_imm_op(Opcode::Ori, dst, dst, piece(k - 2))?;
        for j in (0..k - 2).rev() {
            self.emit_imm_op(Opcode::Shli, dst, dst, chunk as i64)?;
            self.emit_imm_op(Opcode::Ori, dst, dst, piece(j))?;
        }
        Ok(())
    }

    /// Memory operand addressing `addr`.
    fn address(&mut self, addr: ValueId) -> Result<Operand, BackendError> {
        if let Some(&slot) = self.fusions.locals.get(&addr) {
            return self.local_slot(slot);
        }
        let base = self.source(addr)?;
        Ok(Operand::mem(base, Offset::Const(0)))
    }

    fn emit_ret(&mut self, with_value: bool) -> Result<(), BackendError> {
        let conv = &self.target.conv;
        let uses = if with_value { vec![conv.ret_reg] } else { vec![] };
        let ret = self
            .build(Opcode::Ret, vec![Operand::phys(self.target.roles.link)])?
            .with_implicit(uses, vec![]);
        self.push(ret);
        Ok(())
    }

    fn jump(&mut self, label: String) -> Result<(), BackendError> {
        self.emit(Opcode::Jmp, vec![Operand::Reg(self.zero()), Operand::Label(label)])
    }

    // ── Per-instruction rules ───────────────────────────────────────────

    fn lower_instr(&mut self, ins: &Instr, next: Option<&str>) -> Result<(), BackendError> {
        match ins {
            Instr::Const { dst, value, .. } => self.materialize(Self::vreg(*dst), *value),

            Instr::Copy { dst, src } => {
                let d = Self::vreg(*dst);
                match self.fusions.consts.get(src) {
                    Some(&c) => self.materialize(d, c),
                    None => self.mov(d, Self::vreg(*src)),
                }
            }

            Instr::Binary { dst, op, lhs, rhs } => self.lower_binary(*dst, *op, *lhs, *rhs),

            Instr::Unary { dst, op, src } => {
                let d = Self::vreg(*dst);
                match op {
                    UnOp::Neg => {
                        let a = self.source(*src)?;
                        let zero = self.zero();
                        self.emit_binary(Opcode::Sub, d, zero, a)
                    }
                    UnOp::Not => {
                        let ones = self.temp();
                        self.materialize(ones, -1)?;
                        let a = self.source(*src)?;
                        self.emit_binary(Opcode::Xor, d, a, ones)
                    }
                }
            }

            Instr::Cmp { dst, op, lhs, rhs } => {
                let a = self.source(*lhs)?;
                let b = self.source(*rhs)?;
                self.emit_binary(set_opcode(*op), Self::vreg(*dst), a, b)
            }

            Instr::LocalAddr { dst, slot } => {
                let mem = self.local_slot(*slot)?;
                self.emit(Opcode::Lea, vec![Operand::vreg(VReg(dst.0)), mem])
            }

            Instr::GlobalAddr { dst, name } => {
                let d = Self::vreg(*dst);
                match self.symbols.global(name) {
                    Some(SymbolAddr::Address(a)) => self.materialize(d, *a as i64),
                    Some(SymbolAddr::Relocation(token)) => self.emit(
                        Opcode::Li,
                        vec![Operand::Reg(d), Operand::label(token.clone())],
                    ),
                    None => Err(self.unknown_symbol(name)),
                }
            }

            Instr::Load { dst, ty, addr } => {
                let mem = self.address(*addr)?;
                let op = if *ty == Type::I32 { Opcode::Ldw } else { Opcode::Ld };
                self.emit(op, vec![Operand::vreg(VReg(dst.0)), mem])
            }

            Instr::Store { ty, addr, src } => {
                let s = self.source(*src)?;
                let mem = self.address(*addr)?;
                let op = if *ty == Type::I32 { Opcode::Stw } else { Opcode::St };
                self.emit(op, vec![Operand::Reg(s), mem])
            }

            Instr::Call { dst, func, args } => self.lower_call(*dst, func, args),

            Instr::Jump { target } => {
                if next == Some(target.as_str()) {
                    return Ok(());
                }
                let label = self.label(target)?;
                self.jump(label)
            }

            Instr::Branch {
                cond,
                then_label,
                else_label,
            } => self.lower_branch(*cond, then_label, else_label, next),

            Instr::Return { value } => {
                if let Some(v) = value {
                    let ret = Reg::Phys(self.target.conv.ret_reg);
                    match self.fusions.consts.get(v) {
                        Some(&c) => self.materialize(ret, c)?,
                        None => self.mov(ret, Self::vreg(*v))?,
                    }
                }
                self.emit_ret(value.is_some())
            }

            Instr::Halt => self.emit(Opcode::Halt, vec![]),
        }
    }

    fn lower_binary(
        &mut self,
        dst: ValueId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<(), BackendError> {
        let d = Self::vreg(dst);
        let imm = self.fusions.consts.get(&rhs).copied();
        let target = self.target;

        let folded = match (op, imm) {
            (BinOp::Add, Some(c)) if target.fits_arith_imm(c) => Some((Opcode::Addi, c)),
            (BinOp::Sub, Some(c)) if c != i64::MIN && target.fits_arith_imm(-c) => {
                Some((Opcode::Addi, -c))
            }
            (BinOp::Or, Some(c)) if target.fits_logic_imm(c) => Some((Opcode::Ori, c)),
            (BinOp::Shl, Some(c)) if (0..64).contains(&c) => Some((Opcode::Shli, c)),
            _ => None,
        };
        if let Some((mop, c)) = folded {
            let a = self.source(lhs)?;
            return self.emit_imm_op(mop, d, a, c);
        }

        let mop = arith_opcode(op);
        let expand_rem = op == BinOp::Rem && !target.supports(Opcode::Rem);
        if !expand_rem && !target.supports(mop) {
            return Err(self.no_rule());
        }

        let a = self.source(lhs)?;
        let b = self.source(rhs)?;
        if matches!(op, BinOp::Div | BinOp::Rem) {
            self.emit(Opcode::ChkZ, vec![Operand::Reg(b)])?;
        }
        if expand_rem {
            // a - (a / b) * b
            let q = self.temp();
            self.emit_binary(Opcode::Div, q, a, b)?;
            self.emit_binary(Opcode::Mul, q, q, b)?;
            return self.emit_binary(Opcode::Sub, d, a, q);
        }
        self.emit_binary(mop, d, a, b)
    }

    fn lower_call(
        &mut self,
        dst: Option<ValueId>,
        callee: &str,
        args: &[ValueId],
    ) -> Result<(), BackendError> {
        if !self.symbols.is_function(callee) {
            return Err(self.unknown_symbol(callee));
        }
        let conv = self.target.conv;
        let sp = self.target.roles.stack_ptr;
        let nregs = conv.arg_regs.len();
        let word = self.target.word_size as i64;

        for (k, arg) in args.iter().enumerate().skip(nregs) {
            let r = self.source(*arg)?;
            let offset = (k - nregs) as i64 * word;
            let mem = Operand::mem(Reg::Phys(sp), Offset::Const(offset));
            self.emit(Opcode::St, vec![Operand::Reg(r), mem])?;
        }
        let stack_args = args.len().saturating_sub(nregs) as u32;
        self.outgoing_args = self.outgoing_args.max(stack_args);

        let mut arg_uses = Vec::new();
        for (arg, &reg) in args.iter().zip(conv.arg_regs) {
            let r = Reg::Phys(reg);
            match self.fusions.consts.get(arg) {
                Some(&c) => self.materialize(r, c)?,
                None => self.mov(r, Self::vreg(*arg))?,
            }
            arg_uses.push(reg);
        }

        let call = self
            .build(
                Opcode::Call,
                vec![
                    Operand::phys(self.target.roles.link),
                    Operand::label(callee),
                ],
            )?
            .with_implicit(arg_uses, vec![conv.ret_reg]);
        self.push(call);
        self.has_calls = true;

        if let Some(d) = dst {
            self.mov(Self::vreg(d), Reg::Phys(conv.ret_reg))?;
        }
        Ok(())
    }

    fn lower_branch(
        &mut self,
        cond: ValueId,
        then_label: &str,
        else_label: &str,
        next: Option<&str>,
    ) -> Result<(), BackendError> {
        let then_l = self.label(then_label)?;
        let else_l = self.label(else_label)?;
        let then_next = next == Some(then_label);
        let else_next = next == Some(else_label);

        if let Some(&(op, lhs, rhs)) = self.fusions.cmps.get(&cond) {
            let a = self.source(lhs)?;
            let b = self.source(rhs)?;
            match self.target.compare {
                CompareStyle::Fused => {
                    let (op, taken) = if then_next {
                        (op.inverse(), else_l.clone())
                    } else {
                        (op, then_l)
                    };
                    self.emit(
                        branch_opcode(op),
                        vec![Operand::Reg(a), Operand::Reg(b), Operand::Label(taken)],
                    )?;
                    if !then_next && !else_next {
                        self.jump(else_l)?;
                    }
                }
                CompareStyle::SetThenBranch => {
                    let c = Self::vreg(cond);
                    let (op, taken) = if then_next {
                        (op.inverse(), else_l.clone())
                    } else {
                        (op, then_l)
                    };
                    self.emit_binary(set_opcode(op), c, a, b)?;
                    self.emit(Opcode::Bnz, vec![Operand::Reg(c), Operand::Label(taken)])?;
                    if !then_next && !else_next {
                        self.jump(else_l)?;
                    }
                }
            }
            return Ok(());
        }

        let c = self.source(cond)?;
        self.emit(Opcode::Bnz, vec![Operand::Reg(c), Operand::Label(then_l)])?;
        if !else_next {
            self.jump(else_l)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::target::{CERULEAN_ASM, CERULEAN_RISC};
    use crate::ir::{samples, FunctionBuilder};

    fn ops(mf: &MachFunction) -> Vec<Opcode> {
        mf.instrs().map(|i| i.op).collect()
    }

    #[test]
    fn small_constant_is_one_load_immediate() {
        let module = vec![samples::leaf_const()];
        let symbols = SymbolTable::from_module(&module);
        let mf = lower_function(&CERULEAN_ASM, &symbols, &module[0]).unwrap();
        assert_eq!(ops(&mf), vec![Opcode::Li, Opcode::Ret]);
    }

    #[test]
    fn sixty_four_bit_constant_uses_six_instructions() {
        let module = vec![samples::wide_const()];
        let symbols = SymbolTable::from_module(&module);
        let mf = lower_function(&CERULEAN_RISC, &symbols, &module[0]).unwrap();
        assert_eq!(
            ops(&mf),
            vec![
                Opcode::Lui,
                Opcode::Ori,
                Opcode::Shli,
                Opcode::Ori,
                Opcode::Shli,
                Opcode::Ori,
                Opcode::Ret
            ]
        );
    }

    #[test]
    fn jump_to_next_block_is_dropped() {
        let mut b = FunctionBuilder::new("fall");
        b.jump("next");
        b.block("next");
        b.ret(None);
        let module = vec![b.finish()];
        let symbols = SymbolTable::from_module(&module);
        let mf = lower_function(&CERULEAN_ASM, &symbols, &module[0]).unwrap();
        assert!(mf.blocks[0].instrs.is_empty());
        assert_eq!(mf.blocks[0].succs, vec![1]);
    }

    #[test]
    fn branch_back_to_entry_gets_a_fresh_entry_block() {
        let mut b = FunctionBuilder::new("spin");
        let x = b.param(Type::I64);
        let c = b.cmp(CmpOp::Eq, x, x);
        b.branch(c, "entry", "out");
        b.block("out");
        b.ret(None);
        let module = vec![b.finish()];
        let symbols = SymbolTable::from_module(&module);
        let mf = lower_function(&CERULEAN_RISC, &symbols, &module[0]).unwrap();
        assert_eq!(mf.blocks[0].label, "spin");
        assert!(mf.blocks[0].instrs.is_empty());
        assert_eq!(mf.blocks[1].label, "spin.entry");
        assert!(mf.blocks[0].preds.is_empty());
    }
}
