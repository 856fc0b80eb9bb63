//! Instruction-level simulator for compiled Cerulean code.
//!
//! Semantics are driven by each instruction's format, so both targets run on
//! the same machine: two-address forms read their first operand, three-
//! address forms don't. `R0` always reads zero. Every call records the
//! callee-saved registers and the stack pointer and checks them again when
//! the callee returns; every other register except the link and return
//! registers comes back holding garbage.

pub mod memory;

use crate::backend::abi::Register;
use crate::backend::instruction::{Format, MachInstr, Offset, Opcode, Operand, Reg};
use crate::backend::target::Target;
use crate::backend::CompiledFunction;
use crate::ir::interp::eval_binop;
use crate::ir::{BinOp, CmpOp};
use log::trace;
use memory::{Memory, MemoryFault};
use std::collections::HashMap;
use thiserror::Error;

const STEP_LIMIT: u64 = 10_000_000;

/// Link value that ends a top-level call.
const RETURN_SENTINEL: i64 = -1;

/// Base of the values left in caller-saved registers after a return.
const CLOBBER: i64 = 0x0BAD_0000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("no compiled function `{0}`")]
    UnknownFunction(String),

    #[error("branch to unknown label `{0}`")]
    UnknownLabel(String),

    #[error("`{0}` has an operand the machine cannot execute")]
    BadOperand(String),

    #[error("division by zero at `{0}`")]
    DivideByZero(String),

    #[error(transparent)]
    Memory(#[from] MemoryFault),

    #[error("`{function}` returned with {reg} changed from {before:#x} to {after:#x}")]
    CalleeSavedClobbered {
        function: String,
        reg: Register,
        before: i64,
        after: i64,
    },

    #[error("step limit of {STEP_LIMIT} exceeded")]
    StepLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Value of the return register when the entry function returned.
    Return(i64),
    Halt,
}

/// All compiled functions laid out as one instruction stream.
pub struct Program<'a> {
    code: Vec<&'a MachInstr>,
    labels: HashMap<&'a str, usize>,
    /// Owning function of each instruction, for diagnostics.
    owners: Vec<&'a str>,
}

impl<'a> Program<'a> {
    pub fn link(functions: &'a [CompiledFunction]) -> Self {
        let mut code = Vec::new();
        let mut labels = HashMap::new();
        let mut owners = Vec::new();
        for func in functions {
            for block in &func.blocks {
                labels.insert(block.label.as_str(), code.len());
                for instr in &block.instrs {
                    code.push(instr);
                    owners.push(func.name.as_str());
                }
            }
        }
        Self {
            code,
            labels,
            owners,
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Registers and stack pointer captured at a call.
struct CallRecord {
    callee: String,
    saved: Vec<(Register, i64)>,
}

pub struct Machine<'a> {
    target: &'a Target,
    program: Program<'a>,
    regs: [i64; Register::COUNT],
    pub memory: Memory,
    calls: Vec<CallRecord>,
    pub steps: u64,
}

fn sext16(v: i64) -> i64 {
    v as u16 as i16 as i64
}

fn arith(op: Opcode) -> Option<BinOp> {
    Some(match op {
        Opcode::Add | Opcode::Addi => BinOp::Add,
        Opcode::Sub => BinOp::Sub,
        Opcode::Mul => BinOp::Mul,
        Opcode::Div => BinOp::Div,
        Opcode::Rem => BinOp::Rem,
        Opcode::And => BinOp::And,
        Opcode::Or => BinOp::Or,
        Opcode::Xor => BinOp::Xor,
        Opcode::Shl | Opcode::Shli => BinOp::Shl,
        Opcode::Shr => BinOp::Shr,
        Opcode::FAdd => BinOp::FAdd,
        Opcode::FSub => BinOp::FSub,
        Opcode::FMul => BinOp::FMul,
        Opcode::FDiv => BinOp::FDiv,
        _ => return None,
    })
}

fn comparison(op: Opcode) -> Option<CmpOp> {
    Some(match op {
        Opcode::Seq | Opcode::Beq => CmpOp::Eq,
        Opcode::Sne | Opcode::Bne => CmpOp::Ne,
        Opcode::Slt | Opcode::Blt => CmpOp::Lt,
        Opcode::Sle | Opcode::Ble => CmpOp::Le,
        Opcode::Sgt | Opcode::Bgt => CmpOp::Gt,
        Opcode::Sge | Opcode::Bge => CmpOp::Ge,
        _ => return None,
    })
}

impl<'a> Machine<'a> {
    pub fn new(target: &'a Target, functions: &'a [CompiledFunction], memory: Memory) -> Self {
        Self {
            target,
            program: Program::link(functions),
            regs: [0; Register::COUNT],
            memory,
            calls: Vec::new(),
            steps: 0,
        }
    }

    pub fn reg(&self, r: Register) -> i64 {
        if r == self.target.roles.zero {
            0
        } else {
            self.regs[r.index()]
        }
    }

    fn set(&mut self, r: Register, value: i64) {
        if r != self.target.roles.zero {
            self.regs[r.index()] = value;
        }
    }

    fn preserved(&self) -> Vec<Register> {
        let roles = &self.target.roles;
        let mut regs: Vec<Register> = self.target.conv.callee_saved.to_vec();
        regs.push(roles.stack_ptr);
        regs.extend(roles.frame_ptr);
        regs
    }

    fn record_call(&mut self, callee: &str) {
        let saved = self
            .preserved()
            .into_iter()
            .map(|r| (r, self.reg(r)))
            .collect();
        self.calls.push(CallRecord {
            callee: callee.to_string(),
            saved,
        });
    }

    fn check_return(&mut self) -> Result<(), SimError> {
        let Some(record) = self.calls.pop() else {
            return Ok(());
        };
        for (reg, before) in record.saved {
            let after = self.reg(reg);
            if after != before {
                return Err(SimError::CalleeSavedClobbered {
                    function: record.callee,
                    reg,
                    before,
                    after,
                });
            }
        }
        Ok(())
    }

    /// Overwrite every register a callee may freely change, so a caller
    /// that relies on one surviving the call reads garbage.
    fn clobber_after_return(&mut self) {
        let roles = self.target.roles;
        let conv = self.target.conv;
        for r in Register::ALL {
            let kept = conv.is_callee_saved(r)
                || r == roles.stack_ptr
                || Some(r) == roles.frame_ptr
                || r == roles.link
                || r == conv.ret_reg;
            if !kept {
                self.set(r, CLOBBER + r.index() as i64);
            }
        }
    }

    /// Call `name` with `args` following the target's convention and run
    /// until it returns or halts.
    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<Outcome, SimError> {
        let entry = *self
            .program
            .labels
            .get(name)
            .ok_or_else(|| SimError::UnknownFunction(name.to_string()))?;
        let conv = self.target.conv;
        let roles = self.target.roles;
        let word = self.target.word_size as u64;

        // Recognisable garbage in every register the callee must preserve.
        for (k, r) in Register::ALL.iter().enumerate() {
            self.set(*r, 0x5EED_0000 + k as i64);
        }

        let stack_args = args.len().saturating_sub(conv.arg_regs.len()) as u64;
        let align = conv.stack_align as u64;
        let area = (stack_args * word).div_ceil(align) * align;
        let sp = self.memory.size() - area;
        self.set(roles.stack_ptr, sp as i64);
        for (k, value) in args.iter().enumerate() {
            match conv.arg_regs.get(k) {
                Some(r) => self.set(*r, *value),
                None => {
                    let slot = sp + (k - conv.arg_regs.len()) as u64 * word;
                    self.memory.store(slot, 8, *value)?;
                }
            }
        }
        self.set(roles.link, RETURN_SENTINEL);
        self.record_call(name);
        self.run(entry)
    }

    fn label(&self, name: &str) -> Result<usize, SimError> {
        self.program
            .labels
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownLabel(name.to_string()))
    }

    fn run(&mut self, mut pc: usize) -> Result<Outcome, SimError> {
        loop {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err(SimError::StepLimit);
            }
            let instr = *self
                .program
                .code
                .get(pc)
                .ok_or_else(|| SimError::UnknownLabel(format!("@{pc}")))?;
            trace!("{:>5} {:<12} {}", pc, self.program.owners[pc], instr);
            match self.step(instr, pc)? {
                Flow::Next => pc += 1,
                Flow::Goto(target) => pc = target,
                Flow::Finished(outcome) => return Ok(outcome),
            }
        }
    }

    // ── Operand access ──────────────────────────────────────────────────

    fn bad(instr: &MachInstr) -> SimError {
        SimError::BadOperand(instr.to_string().trim().to_string())
    }

    fn reg_at(&self, instr: &MachInstr, i: usize) -> Result<Register, SimError> {
        match instr.operands.get(i) {
            Some(Operand::Reg(Reg::Phys(r))) => Ok(*r),
            _ => Err(Self::bad(instr)),
        }
    }

    fn imm_at(&self, instr: &MachInstr, i: usize) -> Result<i64, SimError> {
        match instr.operands.get(i) {
            Some(Operand::Imm(v)) => Ok(*v),
            Some(Operand::Label(l)) => self
                .memory
                .symbol(l)
                .map(|a| a as i64)
                .ok_or_else(|| SimError::UnknownLabel(l.clone())),
            _ => Err(Self::bad(instr)),
        }
    }

    fn label_at(&self, instr: &MachInstr, i: usize) -> Result<usize, SimError> {
        match instr.operands.get(i) {
            Some(Operand::Label(l)) => self.label(l),
            _ => Err(Self::bad(instr)),
        }
    }

    fn address(&self, instr: &MachInstr) -> Result<u64, SimError> {
        match instr.operands.get(1) {
            Some(Operand::Mem {
                base: Reg::Phys(b),
                offset: Offset::Const(off),
            }) => Ok(self.reg(*b).wrapping_add(*off) as u64),
            _ => Err(Self::bad(instr)),
        }
    }

    /// Destination and both inputs of an arithmetic-shaped instruction.
    fn operands3(&self, instr: &MachInstr) -> Result<(Register, i64, i64), SimError> {
        let d = self.reg_at(instr, 0)?;
        Ok(match instr.format {
            Format::RR => (d, self.reg(d), self.reg(self.reg_at(instr, 1)?)),
            Format::RRR => (
                d,
                self.reg(self.reg_at(instr, 1)?),
                self.reg(self.reg_at(instr, 2)?),
            ),
            Format::RI => (d, self.reg(d), self.imm_at(instr, 1)?),
            Format::RRI => (d, self.reg(self.reg_at(instr, 1)?), self.imm_at(instr, 2)?),
            Format::None | Format::R => return Err(Self::bad(instr)),
        })
    }

    // ── Execution ───────────────────────────────────────────────────────

    fn step(&mut self, instr: &MachInstr, pc: usize) -> Result<Flow, SimError> {
        let op = instr.op;
        if let Some(bin) = arith(op) {
            let (d, a, b) = self.operands3(instr)?;
            let value = eval_binop(bin, a, b)
                .ok_or_else(|| SimError::DivideByZero(instr.to_string().trim().to_string()))?;
            self.set(d, value);
            return Ok(Flow::Next);
        }
        if let Some(cmp) = comparison(op) {
            if op.is_branch() {
                let a = self.reg(self.reg_at(instr, 0)?);
                let b = self.reg(self.reg_at(instr, 1)?);
                if cmp.eval(a, b) {
                    return Ok(Flow::Goto(self.label_at(instr, 2)?));
                }
                return Ok(Flow::Next);
            }
            let (d, a, b) = self.operands3(instr)?;
            self.set(d, cmp.eval(a, b) as i64);
            return Ok(Flow::Next);
        }

        match op {
            Opcode::Mov => {
                let d = self.reg_at(instr, 0)?;
                let s = self.reg_at(instr, 1)?;
                let v = self.reg(s);
                self.set(d, v);
            }
            Opcode::Li => {
                let d = self.reg_at(instr, 0)?;
                let v = self.imm_at(instr, 1)?;
                self.set(d, v);
            }
            Opcode::Lui => {
                let d = self.reg_at(instr, 0)?;
                let v = self.imm_at(instr, 1)?;
                self.set(d, sext16(v) << 16);
            }
            Opcode::Ori => {
                let (d, a, imm) = self.operands3(instr)?;
                self.set(d, a | (imm & 0xFFFF));
            }
            Opcode::ChkZ => {
                let r = self.reg_at(instr, 0)?;
                if self.reg(r) == 0 {
                    return Err(SimError::DivideByZero(instr.to_string().trim().to_string()));
                }
            }
            Opcode::Ld | Opcode::Ldw => {
                let d = self.reg_at(instr, 0)?;
                let size = if op == Opcode::Ld { 8 } else { 4 };
                let addr = self.address(instr)?;
                let v = self.memory.load(addr, size)?;
                self.set(d, v);
            }
            Opcode::St | Opcode::Stw => {
                let s = self.reg_at(instr, 0)?;
                let size = if op == Opcode::St { 8 } else { 4 };
                let (addr, value) = (self.address(instr)?, self.reg(s));
                self.memory.store(addr, size, value)?;
            }
            Opcode::Lea => {
                let d = self.reg_at(instr, 0)?;
                let a = self.address(instr)?;
                self.set(d, a as i64);
            }
            Opcode::Bnz => {
                let c = self.reg_at(instr, 0)?;
                if self.reg(c) != 0 {
                    return Ok(Flow::Goto(self.label_at(instr, 1)?));
                }
            }
            Opcode::Jmp => return Ok(Flow::Goto(self.label_at(instr, 1)?)),
            Opcode::Call => {
                let link = self.reg_at(instr, 0)?;
                let target = self.label_at(instr, 1)?;
                if let Some(Operand::Label(callee)) = instr.operands.get(1) {
                    self.record_call(callee);
                }
                self.set(link, (pc + 1) as i64);
                return Ok(Flow::Goto(target));
            }
            Opcode::Ret => {
                let link = self.reg_at(instr, 0)?;
                let back = self.reg(link);
                self.check_return()?;
                self.clobber_after_return();
                if back == RETURN_SENTINEL {
                    let value = self.reg(self.target.conv.ret_reg);
                    return Ok(Flow::Finished(Outcome::Return(value)));
                }
                return Ok(Flow::Goto(back as usize));
            }
            Opcode::Halt => return Ok(Flow::Finished(Outcome::Halt)),
            _ => return Err(Self::bad(instr)),
        }
        Ok(Flow::Next)
    }
}

enum Flow {
    Next,
    Goto(usize),
    Finished(Outcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lui_sign_extends_its_field() {
        assert_eq!(sext16(0xFFFF) << 16, -65536);
        assert_eq!(sext16(0x1234) << 16, 0x1234_0000);
    }
}
