//! Built-in sample programs for the CLI and the end-to-end tests.

use super::builder::FunctionBuilder;
use super::ir::{BinOp, CmpOp, Function, Type};
use super::symbol_table::{SymbolAddr, SymbolTable};
use crate::sim::memory::Memory;
use log::debug;

/// First address handed to relocated globals when a sample is run.
const GLOBAL_BASE: u64 = 0x100;

pub struct Sample {
    pub name: &'static str,
    pub about: &'static str,
    pub module: Vec<Function>,
    /// Function to run and its arguments.
    pub entry: &'static str,
    pub args: Vec<i64>,
    pub globals: Vec<(&'static str, SymbolAddr)>,
}

impl Sample {
    pub fn symbols(&self) -> SymbolTable {
        let mut table = SymbolTable::from_module(&self.module);
        for (name, addr) in &self.globals {
            if let Err(kept) = table.declare_global(name, addr.clone()) {
                debug!("global `{}` keeps its first declaration {:?}", name, kept.kind);
            }
        }
        table
    }

    /// Memory with every relocated global bound to an address.
    pub fn memory(&self) -> Memory {
        let mut mem = Memory::default();
        let mut next = GLOBAL_BASE;
        for (_, addr) in &self.globals {
            if let SymbolAddr::Relocation(token) = addr {
                mem.bind_symbol(token, next);
                next += 8;
            }
        }
        mem
    }
}

pub const NAMES: &[&str] = &[
    "sum_loop",
    "sum_regs",
    "pressure",
    "leaf",
    "caller",
    "wide",
    "stack_args",
    "counter",
    "float",
];

pub fn by_name(name: &str) -> Option<Sample> {
    let sample = match name {
        "sum_loop" => Sample {
            name: "sum_loop",
            about: "sum 1..=13 through stack locals",
            module: vec![sum_loop()],
            entry: "sum_loop",
            args: vec![],
            globals: vec![],
        },
        "sum_regs" => Sample {
            name: "sum_regs",
            about: "sum 1..=13 with loop-carried values",
            module: vec![sum_regs()],
            entry: "sum_regs",
            args: vec![],
            globals: vec![],
        },
        "pressure" => Sample {
            name: "pressure",
            about: "20 simultaneously live values",
            module: vec![pressure()],
            entry: "pressure",
            args: vec![3],
            globals: vec![],
        },
        "leaf" => Sample {
            name: "leaf",
            about: "leaf function returning a constant",
            module: vec![leaf_const()],
            entry: "leaf",
            args: vec![5],
            globals: vec![],
        },
        "caller" => Sample {
            name: "caller",
            about: "call with every allocatable register live across it",
            module: caller_module(),
            entry: "caller",
            args: vec![4],
            globals: vec![],
        },
        "wide" => Sample {
            name: "wide",
            about: "64-bit immediate materialization",
            module: vec![wide_const()],
            entry: "wide",
            args: vec![],
            globals: vec![],
        },
        "stack_args" => Sample {
            name: "stack_args",
            about: "eight arguments, some passed on the stack",
            module: stack_args_module(),
            entry: "call8",
            args: vec![],
            globals: vec![],
        },
        "counter" => Sample {
            name: "counter",
            about: "increment a relocated global twice",
            module: counter_module(),
            entry: "twice",
            args: vec![],
            globals: vec![("counter", SymbolAddr::Relocation("counter".to_string()))],
        },
        "float" => Sample {
            name: "float",
            about: "floating-point arithmetic on bit patterns",
            module: vec![float_mix()],
            entry: "float",
            args: vec![],
            globals: vec![],
        },
        _ => return None,
    };
    Some(sample)
}

/// `s = 0; for i in 1..=13 { s += i }; return s`, with both variables in
/// stack locals.
pub fn sum_loop() -> Function {
    let mut b = FunctionBuilder::new("sum_loop").returns(Type::I64);
    let i = b.local(Type::I64);
    let s = b.local(Type::I64);
    let zero = b.iconst(Type::I64, 0);
    b.store_local(s, zero);
    let one = b.iconst(Type::I64, 1);
    b.store_local(i, one);
    b.jump("loop");

    b.block("loop");
    let iv = b.load_local(i);
    let limit = b.iconst(Type::I64, 13);
    let c = b.cmp(CmpOp::Le, iv, limit);
    b.branch(c, "body", "done");

    b.block("body");
    let sv = b.load_local(s);
    let iv = b.load_local(i);
    let sum = b.binary(BinOp::Add, sv, iv);
    b.store_local(s, sum);
    let step = b.iconst(Type::I64, 1);
    let next = b.binary(BinOp::Add, iv, step);
    b.store_local(i, next);
    b.jump("loop");

    b.block("done");
    let r = b.load_local(s);
    b.ret(Some(r));
    b.finish()
}

/// The same loop with `s` and `i` kept in redefined values.
pub fn sum_regs() -> Function {
    let mut b = FunctionBuilder::new("sum_regs").returns(Type::I64);
    let s = b.iconst(Type::I64, 0);
    let i = b.iconst(Type::I64, 1);
    b.jump("loop");

    b.block("loop");
    let limit = b.iconst(Type::I64, 13);
    let c = b.cmp(CmpOp::Le, i, limit);
    b.branch(c, "body", "done");

    b.block("body");
    b.binary_into(s, BinOp::Add, s, i);
    let one = b.iconst(Type::I64, 1);
    b.binary_into(i, BinOp::Add, i, one);
    b.jump("loop");

    b.block("done");
    b.ret(Some(s));
    b.finish()
}

/// `x*1 + x*2 + ... + x*20`, with all twenty products live at once.
pub fn pressure() -> Function {
    let mut b = FunctionBuilder::new("pressure").returns(Type::I64);
    let x = b.param(Type::I64);
    let mut vals = Vec::new();
    for k in 1..=20 {
        let c = b.iconst(Type::I64, k);
        vals.push(b.binary(BinOp::Mul, x, c));
    }
    let mut acc = vals[0];
    for v in &vals[1..] {
        acc = b.binary(BinOp::Add, acc, *v);
    }
    b.ret(Some(acc));
    b.finish()
}

/// One unused parameter, returns 42.
pub fn leaf_const() -> Function {
    let mut b = FunctionBuilder::new("leaf").returns(Type::I64);
    let _x = b.param(Type::I64);
    let c = b.iconst(Type::I64, 42);
    b.ret(Some(c));
    b.finish()
}

/// `caller(x)` keeps twelve values live across a call to `callee`, which
/// itself uses several caller-saved registers.
pub fn caller_module() -> Vec<Function> {
    let mut b = FunctionBuilder::new("caller").returns(Type::I64);
    let x = b.param(Type::I64);
    let mut live = Vec::new();
    for k in 0..12 {
        let c = b.iconst(Type::I64, k * 7 + 1);
        live.push(b.binary(BinOp::Add, x, c));
    }
    let r = b.call("callee", &[live[0], live[1]]);
    let mut acc = r;
    for v in &live {
        acc = b.binary(BinOp::Add, acc, *v);
    }
    b.ret(Some(acc));
    let caller = b.finish();

    let mut b = FunctionBuilder::new("callee").returns(Type::I64);
    let p = b.param(Type::I64);
    let q = b.param(Type::I64);
    let t0 = b.binary(BinOp::Mul, p, q);
    let t1 = b.binary(BinOp::Sub, t0, p);
    let t2 = b.binary(BinOp::Xor, t1, q);
    let t3 = b.binary(BinOp::Add, t2, t0);
    let t4 = b.binary(BinOp::Mul, t3, t1);
    let t5 = b.binary(BinOp::Sub, t4, t2);
    let t6 = b.binary(BinOp::Add, t5, t3);
    b.ret(Some(t6));
    let callee = b.finish();

    vec![caller, callee]
}

pub const WIDE_CONSTANT: i64 = 0x1234_5678_9ABC_DEF0;

pub fn wide_const() -> Function {
    let mut b = FunctionBuilder::new("wide").returns(Type::I64);
    let c = b.iconst(Type::I64, WIDE_CONSTANT);
    b.ret(Some(c));
    b.finish()
}

/// `sum8(a..h) = a + 2b + ... + 8h`, called with 1..=8.
pub fn stack_args_module() -> Vec<Function> {
    let mut b = FunctionBuilder::new("sum8").returns(Type::I64);
    let params: Vec<_> = (0..8).map(|_| b.param(Type::I64)).collect();
    let mut acc = params[0];
    for (k, p) in params.iter().enumerate().skip(1) {
        let w = b.iconst(Type::I64, k as i64 + 1);
        let t = b.binary(BinOp::Mul, *p, w);
        acc = b.binary(BinOp::Add, acc, t);
    }
    b.ret(Some(acc));
    let sum8 = b.finish();

    let mut b = FunctionBuilder::new("call8").returns(Type::I64);
    let args: Vec<_> = (1..=8).map(|k| b.iconst(Type::I64, k)).collect();
    let r = b.call("sum8", &args);
    b.ret(Some(r));
    let call8 = b.finish();

    vec![call8, sum8]
}

/// `bump()` increments the global `counter` and returns the new value;
/// `twice()` bumps it twice.
pub fn counter_module() -> Vec<Function> {
    let mut b = FunctionBuilder::new("bump").returns(Type::I64);
    let addr = b.global_addr("counter");
    let old = b.load(Type::I64, addr);
    let one = b.iconst(Type::I64, 1);
    let new = b.binary(BinOp::Add, old, one);
    b.store(Type::I64, addr, new);
    b.ret(Some(new));
    let bump = b.finish();

    let mut b = FunctionBuilder::new("twice").returns(Type::I64);
    b.call_void("bump", &[]);
    let r = b.call("bump", &[]);
    b.ret(Some(r));
    let twice = b.finish();

    vec![twice, bump]
}

/// `(1.5 + 2.25) * 4.0`, returned as a bit pattern.
pub fn float_mix() -> Function {
    let mut b = FunctionBuilder::new("float").returns(Type::F64);
    let a = b.fconst(1.5);
    let c = b.fconst(2.25);
    let s = b.binary(BinOp::FAdd, a, c);
    let k = b.fconst(4.0);
    let p = b.binary(BinOp::FMul, s, k);
    b.ret(Some(p));
    b.finish()
}
