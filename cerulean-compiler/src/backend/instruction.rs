//! Machine-instruction types shared by both Cerulean targets.
//!
//! An instruction is an [`Opcode`] plus an ordered operand list. Every
//! instruction also carries the [`Format`] its target assigned to the opcode,
//! so the operand shape can be checked and the read/write role of each
//! register can be recovered without consulting the target again. Instances
//! are only created through `Target::instr`, which performs that check.

use super::abi::Register;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Registers
// ============================================================================

/// A virtual register, unique within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A register operand: virtual before allocation, physical afterwards.
/// ABI-fixed registers are physical from the moment lowering creates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reg {
    Virt(VReg),
    Phys(Register),
}

impl Reg {
    pub fn virt(self) -> Option<VReg> {
        match self {
            Reg::Virt(v) => Some(v),
            Reg::Phys(_) => None,
        }
    }

    pub fn phys(self) -> Option<Register> {
        match self {
            Reg::Phys(r) => Some(r),
            Reg::Virt(_) => None,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Virt(v) => write!(f, "{v}"),
            Reg::Phys(r) => write!(f, "{r}"),
        }
    }
}

// ============================================================================
// Operands
// ============================================================================

/// A stack location whose byte offset is only known after frame lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FrameIndex {
    /// A local variable slot declared by the IR function.
    Local(u32),
    /// A spill, call-save or borrow slot created by the allocator.
    Spill(u32),
    /// A stack-passed incoming argument, counted from the first one.
    Incoming(u32),
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameIndex::Local(n) => write!(f, "local{n}"),
            FrameIndex::Spill(n) => write!(f, "spill{n}"),
            FrameIndex::Incoming(n) => write!(f, "incoming{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Offset {
    Const(i64),
    Frame(FrameIndex),
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Const(n) => write!(f, "{n}"),
            Offset::Frame(idx) => write!(f, "{idx}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
    /// A symbolic address: a block label, a function, or a global.
    Label(String),
    /// `offset[base]`
    Mem { base: Reg, offset: Offset },
}

impl Operand {
    pub fn vreg(v: VReg) -> Self {
        Operand::Reg(Reg::Virt(v))
    }

    pub fn phys(r: Register) -> Self {
        Operand::Reg(Reg::Phys(r))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }

    pub fn mem(base: Reg, offset: Offset) -> Self {
        Operand::Mem { base, offset }
    }

    pub fn frame_slot(base: Register, idx: FrameIndex) -> Self {
        Operand::Mem {
            base: Reg::Phys(base),
            offset: Offset::Frame(idx),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(n) => write!(f, "{n}"),
            Operand::Label(l) => write!(f, "{l}"),
            Operand::Mem { base, offset } => write!(f, "{offset}[{base}]"),
        }
    }
}

// ============================================================================
// Formats and opcodes
// ============================================================================

/// The encoding shape of a 4-byte instruction.
///
/// `RI` and `RRI` carry a 16-bit little-endian immediate; a memory operand
/// counts as one register plus the immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Format {
    None,
    R,
    RR,
    RRR,
    RI,
    RRI,
}

impl Format {
    /// Number of register fields and immediate fields.
    pub fn shape(self) -> (usize, usize) {
        match self {
            Format::None => (0, 0),
            Format::R => (1, 0),
            Format::RR => (2, 0),
            Format::RRR => (3, 0),
            Format::RI => (1, 1),
            Format::RRI => (2, 1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::None => "NONE",
            Format::R => "R",
            Format::RR => "RR",
            Format::RRR => "RRR",
            Format::RI => "RI",
            Format::RRI => "RRI",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every machine operation either target may provide. A target's opcode
/// table decides which of these exist and in which format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Opcode {
    // ── moves and immediates ────────────────────────────────────────────
    Mov,
    /// Sign-extended immediate load.
    Li,
    /// `rd = imm << 16`
    Lui,
    /// OR with a zero-extended immediate.
    Ori,
    Shli,
    Addi,

    // ── integer arithmetic ──────────────────────────────────────────────
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    /// Arithmetic shift right.
    Shr,

    // ── floating point (operands hold IEEE-754 bit patterns) ────────────
    FAdd,
    FSub,
    FMul,
    FDiv,

    // ── compare-and-set ─────────────────────────────────────────────────
    Seq,
    Sne,
    Slt,
    Sle,
    Sgt,
    Sge,

    // ── control flow ────────────────────────────────────────────────────
    Beq,
    Bne,
    Blt,
    Ble,
    Bgt,
    Bge,
    /// Branch if the register is nonzero.
    Bnz,
    Jmp,
    Call,
    Ret,
    /// Trap if the register is zero.
    ChkZ,
    Halt,

    // ── memory ──────────────────────────────────────────────────────────
    Ld,
    St,
    /// 32-bit sign-extending load.
    Ldw,
    /// 32-bit store.
    Stw,
    Lea,
}

impl Opcode {
    /// Canonical lowercase name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Mov => "mov",
            Opcode::Li => "li",
            Opcode::Lui => "lui",
            Opcode::Ori => "ori",
            Opcode::Shli => "shli",
            Opcode::Addi => "addi",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::Seq => "seq",
            Opcode::Sne => "sne",
            Opcode::Slt => "slt",
            Opcode::Sle => "sle",
            Opcode::Sgt => "sgt",
            Opcode::Sge => "sge",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Blt => "blt",
            Opcode::Ble => "ble",
            Opcode::Bgt => "bgt",
            Opcode::Bge => "bge",
            Opcode::Bnz => "bnz",
            Opcode::Jmp => "jmp",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::ChkZ => "chkz",
            Opcode::Halt => "halt",
            Opcode::Ld => "ld",
            Opcode::St => "st",
            Opcode::Ldw => "ldw",
            Opcode::Stw => "stw",
            Opcode::Lea => "lea",
        }
    }

    /// Whether the first register operand is written.
    pub fn writes_first(self) -> bool {
        !matches!(
            self,
            Opcode::Beq
                | Opcode::Bne
                | Opcode::Blt
                | Opcode::Ble
                | Opcode::Bgt
                | Opcode::Bge
                | Opcode::Bnz
                | Opcode::Jmp
                | Opcode::Ret
                | Opcode::ChkZ
                | Opcode::Halt
                | Opcode::St
                | Opcode::Stw
        )
    }

    /// Whether, in `format`, the first operand is both source and destination.
    pub fn is_two_address(self, format: Format) -> bool {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv
            | Opcode::Seq
            | Opcode::Sne
            | Opcode::Slt
            | Opcode::Sle
            | Opcode::Sgt
            | Opcode::Sge => format == Format::RR,
            Opcode::Ori | Opcode::Shli | Opcode::Addi => format == Format::RI,
            _ => false,
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Beq
                | Opcode::Bne
                | Opcode::Blt
                | Opcode::Ble
                | Opcode::Bgt
                | Opcode::Bge
                | Opcode::Bnz
                | Opcode::Jmp
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an instruction touches one of its register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Use,
    Def,
    /// Read before written by the same instruction.
    UseDef,
}

impl Role {
    pub fn reads(self) -> bool {
        matches!(self, Role::Use | Role::UseDef)
    }

    pub fn writes(self) -> bool {
        matches!(self, Role::Def | Role::UseDef)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrError {
    #[error("opcode `{0}` is not provided by this target")]
    Unsupported(Opcode),

    #[error("`{op}` is {format} but got {regs} register(s) and {imms} immediate(s)")]
    Shape {
        op: Opcode,
        format: Format,
        regs: usize,
        imms: usize,
    },

    #[error("immediate {value} does not fit the {bits}-bit field of `{op}`")]
    ImmediateRange { op: Opcode, value: i64, bits: u32 },
}

// ============================================================================
// Instructions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachInstr {
    pub op: Opcode,
    pub format: Format,
    pub mnemonic: &'static str,
    pub operands: Vec<Operand>,
    /// Registers read without appearing as operands (call arguments, the
    /// return value consumed by `ret`).
    pub implicit_uses: Vec<Register>,
    /// Registers written without appearing as operands (a call's result).
    pub implicit_defs: Vec<Register>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl MachInstr {
    /// Only `Target::instr` should build instructions; it checks the format.
    pub(crate) fn new_checked(
        op: Opcode,
        format: Format,
        mnemonic: &'static str,
        operands: Vec<Operand>,
    ) -> Self {
        Self {
            op,
            format,
            mnemonic,
            operands,
            implicit_uses: Vec::new(),
            implicit_defs: Vec::new(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_implicit(mut self, uses: Vec<Register>, defs: Vec<Register>) -> Self {
        self.implicit_uses = uses;
        self.implicit_defs = defs;
        self
    }

    fn first_role(&self) -> Role {
        if !self.op.writes_first() {
            Role::Use
        } else if self.op.is_two_address(self.format) {
            Role::UseDef
        } else {
            Role::Def
        }
    }

    /// Every register reference in operand order, with its role. Memory
    /// bases are always reads.
    pub fn reg_refs(&self) -> Vec<(Reg, Role)> {
        let mut refs = Vec::new();
        for (i, operand) in self.operands.iter().enumerate() {
            match operand {
                Operand::Reg(r) => {
                    let role = if i == 0 { self.first_role() } else { Role::Use };
                    refs.push((*r, role));
                }
                Operand::Mem { base, .. } => refs.push((*base, Role::Use)),
                Operand::Imm(_) | Operand::Label(_) => {}
            }
        }
        refs
    }

    /// Virtual registers read, including read-before-write operands.
    pub fn vreg_uses(&self) -> Vec<VReg> {
        let mut out = Vec::new();
        for (r, role) in self.reg_refs() {
            if let (Some(v), true) = (r.virt(), role.reads()) {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }

    /// Virtual registers written, including read-before-write operands.
    pub fn vreg_defs(&self) -> Vec<VReg> {
        let mut out = Vec::new();
        for (r, role) in self.reg_refs() {
            if let (Some(v), true) = (r.virt(), role.writes()) {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
        out
    }

    pub fn phys_uses(&self) -> Vec<Register> {
        let mut out: Vec<Register> = self
            .reg_refs()
            .into_iter()
            .filter(|(_, role)| role.reads())
            .filter_map(|(r, _)| r.phys())
            .collect();
        out.extend(self.implicit_uses.iter().copied());
        out
    }

    pub fn phys_defs(&self) -> Vec<Register> {
        let mut out: Vec<Register> = self
            .reg_refs()
            .into_iter()
            .filter(|(_, role)| role.writes())
            .filter_map(|(r, _)| r.phys())
            .collect();
        out.extend(self.implicit_defs.iter().copied());
        out
    }

    /// Whether `reg` appears anywhere in the operand list.
    pub fn mentions(&self, reg: Register) -> bool {
        self.reg_refs().iter().any(|(r, _)| *r == Reg::Phys(reg))
    }

    pub fn has_virtual_regs(&self) -> bool {
        self.reg_refs().iter().any(|(r, _)| r.virt().is_some())
    }

    /// Replace every register operand, telling the callback how it is used.
    pub fn map_regs(&mut self, mut f: impl FnMut(Reg, Role) -> Reg) {
        let first = self.first_role();
        for (i, operand) in self.operands.iter_mut().enumerate() {
            match operand {
                Operand::Reg(r) => {
                    let role = if i == 0 { first } else { Role::Use };
                    *r = f(*r, role);
                }
                Operand::Mem { base, .. } => *base = f(*base, Role::Use),
                Operand::Imm(_) | Operand::Label(_) => {}
            }
        }
    }

    pub fn is_call(&self) -> bool {
        self.op == Opcode::Call
    }

    pub fn is_ret(&self) -> bool {
        self.op == Opcode::Ret
    }

    /// Control never falls through to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(self.op, Opcode::Jmp | Opcode::Ret | Opcode::Halt)
    }

    /// The label a branch or jump may transfer to.
    pub fn branch_target(&self) -> Option<&str> {
        if !self.op.is_branch() {
            return None;
        }
        self.operands.iter().find_map(|o| match o {
            Operand::Label(l) => Some(l.as_str()),
            _ => None,
        })
    }

    /// Labels referenced by this instruction.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.operands.iter().filter_map(|o| match o {
            Operand::Label(l) => Some(l.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for MachInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {}", self.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { "," };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}

/// Text of an instruction that could not be built, for diagnostics.
pub fn render(op: Opcode, operands: &[Operand]) -> String {
    let ops: Vec<String> = operands.iter().map(|o| o.to_string()).collect();
    format!("{} {}", op, ops.join(","))
}

// ============================================================================
// Functions and blocks
// ============================================================================

#[derive(Debug, Clone)]
pub struct MachBlock {
    pub label: String,
    pub instrs: Vec<MachInstr>,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

impl MachBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instrs: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalSlot {
    /// 4 or 8 bytes; alignment equals size.
    pub size: u32,
}

/// A function in machine form. Lowering produces it with virtual registers;
/// allocation produces a copy with physical registers only.
#[derive(Debug, Clone)]
pub struct MachFunction {
    pub name: String,
    /// Formal parameters in order. Parameters past the argument registers
    /// arrive on the stack.
    pub params: Vec<VReg>,
    pub blocks: Vec<MachBlock>,
    pub vreg_count: u32,
    pub locals: Vec<LocalSlot>,
    /// Largest number of stack-passed arguments of any call made.
    pub outgoing_args: u32,
    pub has_calls: bool,
}

impl MachFunction {
    /// Derive successor and predecessor lists from branch targets and
    /// fall-through.
    pub fn compute_cfg(&mut self) {
        let index: HashMap<String, usize> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.clone(), i))
            .collect();
        let count = self.blocks.len();

        for (bi, block) in self.blocks.iter_mut().enumerate() {
            let mut succs = Vec::new();
            for instr in &block.instrs {
                if let Some(&t) = instr.branch_target().and_then(|l| index.get(l)) {
                    if !succs.contains(&t) {
                        succs.push(t);
                    }
                }
            }
            let falls_through = block.instrs.last().map_or(true, |i| !i.ends_block());
            if falls_through && bi + 1 < count && !succs.contains(&(bi + 1)) {
                succs.push(bi + 1);
            }
            block.succs = succs;
            block.preds.clear();
        }

        for bi in 0..count {
            for s in self.blocks[bi].succs.clone() {
                self.blocks[s].preds.push(bi);
            }
        }
    }

    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }

    pub fn instrs(&self) -> impl Iterator<Item = &MachInstr> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for block in &self.blocks {
            out.push(format!("{}:", block.label));
            for instr in &block.instrs {
                out.push(instr.to_string());
            }
        }
        out
    }
}
