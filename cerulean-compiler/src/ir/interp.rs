//! Direct IR execution, used as the reference result for compiled code.

use super::ir::{BinOp, Function, Instr, UnOp, ValueId};
use super::symbol_table::{SymbolAddr, SymbolTable};
use crate::sim::memory::{Memory, MemoryFault};
use std::collections::HashMap;
use thiserror::Error;

const STEP_LIMIT: u64 = 10_000_000;
const MAX_DEPTH: usize = 256;

/// How a top-level call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Return(Option<i64>),
    Halt,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpError {
    #[error("call to unknown function `{0}`")]
    UnknownFunction(String),

    #[error("{function}: jump to unknown label `{label}`")]
    UnknownLabel { function: String, label: String },

    #[error("unresolved global `{0}`")]
    UnknownGlobal(String),

    #[error("{function}: division by zero")]
    DivideByZero { function: String },

    #[error(transparent)]
    Memory(#[from] MemoryFault),

    #[error("call depth exceeded {MAX_DEPTH}")]
    StackOverflow,

    #[error("step limit of {STEP_LIMIT} exceeded")]
    StepLimit,
}

/// `None` on division by zero. Integer arithmetic wraps at 64 bits.
pub fn eval_binop(op: BinOp, a: i64, b: i64) -> Option<i64> {
    let fa = f64::from_bits(a as u64);
    let fb = f64::from_bits(b as u64);
    let value = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl((b & 63) as u32),
        BinOp::Shr => a.wrapping_shr((b & 63) as u32),
        BinOp::FAdd => (fa + fb).to_bits() as i64,
        BinOp::FSub => (fa - fb).to_bits() as i64,
        BinOp::FMul => (fa * fb).to_bits() as i64,
        BinOp::FDiv => (fa / fb).to_bits() as i64,
    };
    Some(value)
}

fn read(values: &[i64], v: &ValueId) -> i64 {
    values[v.0 as usize]
}

pub struct Interpreter<'a> {
    functions: HashMap<&'a str, &'a Function>,
    symbols: &'a SymbolTable,
    pub memory: Memory,
    sp: u64,
    steps: u64,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(module: &'a [Function], symbols: &'a SymbolTable) -> Self {
        Self::with_memory(module, symbols, Memory::default())
    }

    pub fn with_memory(module: &'a [Function], symbols: &'a SymbolTable, memory: Memory) -> Self {
        let sp = memory.size();
        Self {
            functions: module.iter().map(|f| (f.name.as_str(), f)).collect(),
            symbols,
            memory,
            sp,
            steps: 0,
            depth: 0,
        }
    }

    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<Exit, InterpError> {
        let func = *self
            .functions
            .get(name)
            .ok_or_else(|| InterpError::UnknownFunction(name.to_string()))?;
        if self.depth >= MAX_DEPTH {
            return Err(InterpError::StackOverflow);
        }
        self.depth += 1;
        let saved_sp = self.sp;
        let result = self.run(func, args);
        self.sp = saved_sp;
        self.depth -= 1;
        result
    }

    fn global(&self, name: &str) -> Result<u64, InterpError> {
        match self.symbols.global(name) {
            Some(SymbolAddr::Address(a)) => Ok(*a),
            Some(SymbolAddr::Relocation(tok)) => self
                .memory
                .symbol(tok)
                .ok_or_else(|| InterpError::UnknownGlobal(name.to_string())),
            None => Err(InterpError::UnknownGlobal(name.to_string())),
        }
    }

    fn run(&mut self, func: &'a Function, args: &[i64]) -> Result<Exit, InterpError> {
        let mut values = vec![0i64; func.value_count as usize];
        for (p, a) in func.params.iter().zip(args) {
            values[p.value.0 as usize] = *a;
        }

        // Locals get 8-byte aligned slots below the caller's stack.
        let mut local_addrs = Vec::with_capacity(func.locals.len());
        for _ in &func.locals {
            self.sp -= 8;
            local_addrs.push(self.sp);
        }

        let mut block = 0usize;
        loop {
            let mut next = block + 1;
            let mut jumped = false;
            for ins in &func.blocks[block].instrs {
                self.steps += 1;
                if self.steps > STEP_LIMIT {
                    return Err(InterpError::StepLimit);
                }
                match ins {
                    Instr::Const { dst, value, .. } => values[dst.0 as usize] = *value,
                    Instr::Copy { dst, src } => {
                        let r = read(&values, src);
                        values[dst.0 as usize] = r;
                    }
                    Instr::Binary { dst, op, lhs, rhs } => {
                        let r = eval_binop(*op, read(&values, lhs), read(&values, rhs))
                            .ok_or_else(|| InterpError::DivideByZero {
                                function: func.name.clone(),
                            })?;
                        values[dst.0 as usize] = r;
                    }
                    Instr::Unary { dst, op, src } => {
                        let a = read(&values, src);
                        values[dst.0 as usize] = match op {
                            UnOp::Neg => a.wrapping_neg(),
                            UnOp::Not => !a,
                        };
                    }
                    Instr::Cmp { dst, op, lhs, rhs } => {
                        let r = op.eval(read(&values, lhs), read(&values, rhs));
                        values[dst.0 as usize] = r as i64;
                    }
                    Instr::LocalAddr { dst, slot } => {
                        values[dst.0 as usize] = local_addrs[*slot as usize] as i64;
                    }
                    Instr::GlobalAddr { dst, name } => {
                        values[dst.0 as usize] = self.global(name)? as i64;
                    }
                    Instr::Load { dst, ty, addr } => {
                        let r = self.memory.load(read(&values, addr) as u64, ty.size())?;
                        values[dst.0 as usize] = r;
                    }
                    Instr::Store { ty, addr, src } => {
                        self.memory
                            .store(read(&values, addr) as u64, ty.size(), read(&values, src))?;
                    }
                    Instr::Call { dst, func: callee, args } => {
                        let argv: Vec<i64> = args.iter().map(|a| read(&values, a)).collect();
                        match self.call(callee, &argv)? {
                            Exit::Halt => return Ok(Exit::Halt),
                            Exit::Return(v) => {
                                if let Some(d) = dst {
                                    values[d.0 as usize] = v.unwrap_or(0);
                                }
                            }
                        }
                    }
                    Instr::Jump { target } => {
                        next = self.find_block(func, target)?;
                        jumped = true;
                    }
                    Instr::Branch {
                        cond,
                        then_label,
                        else_label,
                    } => {
                        let target = if read(&values, cond) != 0 { then_label } else { else_label };
                        next = self.find_block(func, target)?;
                        jumped = true;
                    }
                    Instr::Return { value } => {
                        return Ok(Exit::Return(value.map(|v| read(&values, &v))));
                    }
                    Instr::Halt => return Ok(Exit::Halt),
                }
                if jumped {
                    break;
                }
            }
            if next >= func.blocks.len() {
                // falling off the last block is an implicit return
                return Ok(Exit::Return(None));
            }
            block = next;
        }
    }

    fn find_block(&self, func: &Function, label: &str) -> Result<usize, InterpError> {
        func.blocks
            .iter()
            .position(|b| b.label == label)
            .ok_or_else(|| InterpError::UnknownLabel {
                function: func.name.clone(),
                label: label.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{samples, CmpOp, FunctionBuilder, Type};

    #[test]
    fn sum_loop_reaches_ninety_one() {
        let module = vec![samples::sum_loop()];
        let symbols = SymbolTable::from_module(&module);
        let mut interp = Interpreter::new(&module, &symbols);
        assert_eq!(interp.call("sum_loop", &[]).unwrap(), Exit::Return(Some(91)));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let mut b = FunctionBuilder::new("div0").returns(Type::I64);
        let x = b.param(Type::I64);
        let z = b.iconst(Type::I64, 0);
        let q = b.binary(BinOp::Div, x, z);
        b.ret(Some(q));
        let module = vec![b.finish()];
        let symbols = SymbolTable::from_module(&module);
        let err = Interpreter::new(&module, &symbols).call("div0", &[7]).unwrap_err();
        assert!(matches!(err, InterpError::DivideByZero { .. }));
    }

    #[test]
    fn halt_unwinds_through_calls() {
        let mut b = FunctionBuilder::new("stop");
        b.halt();
        let stop = b.finish();

        let mut b = FunctionBuilder::new("outer").returns(Type::I64);
        b.call_void("stop", &[]);
        let one = b.iconst(Type::I64, 1);
        let c = b.cmp(CmpOp::Eq, one, one);
        b.ret(Some(c));
        let module = vec![b.finish(), stop];
        let symbols = SymbolTable::from_module(&module);
        let mut interp = Interpreter::new(&module, &symbols);
        assert_eq!(interp.call("outer", &[]).unwrap(), Exit::Halt);
    }
}
