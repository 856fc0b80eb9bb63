// Target-independent IR: functions made of labelled blocks over numbered values.
//
// Values are not SSA. A value may be redefined (see `Instr::Copy`), which is
// how loop-carried variables are written without phi nodes.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    I32,
    I64,
    /// Carried as its IEEE-754 bit pattern.
    F64,
    Ptr,
}

impl Type {
    /// Storage size in bytes.
    pub fn size(self) -> u32 {
        match self {
            Type::I32 => 4,
            Type::I64 | Type::F64 | Type::Ptr => 8,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
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
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "neg"),
            UnOp::Not => write!(f, "not"),
        }
    }
}

/// Signed integer comparison producing 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn inverse(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    pub fn eval(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub enum Instr {
    /// `dst = value` (an `F64` constant holds its bit pattern)
    Const { dst: ValueId, ty: Type, value: i64 },

    /// `dst = src`
    Copy { dst: ValueId, src: ValueId },

    /// `dst = lhs <op> rhs`
    Binary { dst: ValueId, op: BinOp, lhs: ValueId, rhs: ValueId },

    /// `dst = <op> src`
    Unary { dst: ValueId, op: UnOp, src: ValueId },

    /// `dst = lhs <op> rhs` as 0 or 1
    Cmp { dst: ValueId, op: CmpOp, lhs: ValueId, rhs: ValueId },

    /// `dst = &local[slot]`
    LocalAddr { dst: ValueId, slot: u32 },

    /// `dst = &name`
    GlobalAddr { dst: ValueId, name: String },

    /// `dst = *addr`
    Load { dst: ValueId, ty: Type, addr: ValueId },

    /// `*addr = src`
    Store { ty: Type, addr: ValueId, src: ValueId },

    /// Call a function with args; optional destination for the return value
    Call { dst: Option<ValueId>, func: String, args: Vec<ValueId> },

    /// `GOTO <target>`
    Jump { target: String },

    /// `if cond != 0 GOTO then_label else GOTO else_label`
    Branch { cond: ValueId, then_label: String, else_label: String },

    Return { value: Option<ValueId> },

    /// Stop the machine.
    Halt,
}

impl Instr {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Jump { .. } | Instr::Branch { .. } | Instr::Return { .. } | Instr::Halt
        )
    }

    /// The value written, if any.
    pub fn def(&self) -> Option<ValueId> {
        match self {
            Instr::Const { dst, .. }
            | Instr::Copy { dst, .. }
            | Instr::Binary { dst, .. }
            | Instr::Unary { dst, .. }
            | Instr::Cmp { dst, .. }
            | Instr::LocalAddr { dst, .. }
            | Instr::GlobalAddr { dst, .. }
            | Instr::Load { dst, .. } => Some(*dst),
            Instr::Call { dst, .. } => *dst,
            Instr::Store { .. }
            | Instr::Jump { .. }
            | Instr::Branch { .. }
            | Instr::Return { .. }
            | Instr::Halt => None,
        }
    }

    /// Values read, in operand order.
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Instr::Const { .. }
            | Instr::LocalAddr { .. }
            | Instr::GlobalAddr { .. }
            | Instr::Jump { .. }
            | Instr::Halt => vec![],
            Instr::Copy { src, .. } | Instr::Unary { src, .. } => vec![*src],
            Instr::Binary { lhs, rhs, .. } | Instr::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::Load { addr, .. } => vec![*addr],
            Instr::Store { addr, src, .. } => vec![*addr, *src],
            Instr::Call { args, .. } => args.clone(),
            Instr::Branch { cond, .. } => vec![*cond],
            Instr::Return { value } => value.iter().copied().collect(),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Const { dst, ty, value } => write!(f, "{dst} = const.{ty} {value}"),
            Instr::Copy { dst, src } => write!(f, "{dst} = {src}"),
            Instr::Binary { dst, op, lhs, rhs } => write!(f, "{dst} = {op} {lhs}, {rhs}"),
            Instr::Unary { dst, op, src } => write!(f, "{dst} = {op} {src}"),
            Instr::Cmp { dst, op, lhs, rhs } => write!(f, "{dst} = {lhs} {op} {rhs}"),
            Instr::LocalAddr { dst, slot } => write!(f, "{dst} = &local{slot}"),
            Instr::GlobalAddr { dst, name } => write!(f, "{dst} = &{name}"),
            Instr::Load { dst, ty, addr } => write!(f, "{dst} = load.{ty} *({addr})"),
            Instr::Store { ty, addr, src } => write!(f, "store.{ty} *({addr}) = {src}"),
            Instr::Call { dst, func, args } => {
                if let Some(d) = dst {
                    write!(f, "{d} = ")?;
                }
                write!(f, "CALL {func}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Instr::Jump { target } => write!(f, "GOTO {target}"),
            Instr::Branch { cond, then_label, else_label } => {
                write!(f, "if {cond} GOTO {then_label} else GOTO {else_label}")
            }
            Instr::Return { value: Some(v) } => write!(f, "RETURN {v}"),
            Instr::Return { value: None } => write!(f, "RETURN"),
            Instr::Halt => write!(f, "HALT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    pub instrs: Vec<Instr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub value: ValueId,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<Type>,
    /// Entry block first.
    pub blocks: Vec<Block>,
    /// Stack slots addressed by `LocalAddr`, by type.
    pub locals: Vec<Type>,
    /// Values are numbered `0..value_count`.
    pub value_count: u32,
}

impl Function {
    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.value, p.ty))
            .collect();
        let ret = self.ret.map(|t| format!(" -> {t}")).unwrap_or_default();
        out.push(format!("FUNC {}({}){ret}", self.name, params.join(", ")));
        for (i, ty) in self.locals.iter().enumerate() {
            out.push(format!("  local{i}: {ty}"));
        }
        for block in &self.blocks {
            out.push(format!("{}:", block.label));
            for ins in &block.instrs {
                out.push(format!("  {ins}"));
            }
        }
        out.push(format!("END {}", self.name));
        out
    }
}
