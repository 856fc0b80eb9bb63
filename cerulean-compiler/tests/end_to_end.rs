use cerulean_compiler::backend::instruction::Opcode;
use cerulean_compiler::backend::regalloc::AllocOptions;
use cerulean_compiler::ir::interp::{Exit, Interpreter};
use cerulean_compiler::ir::samples::{self, Sample};
use cerulean_compiler::ir::{BinOp, Function, FunctionBuilder, Type};
use cerulean_compiler::sim::{Machine, Outcome};
use cerulean_compiler::{
    compile_module, BackendOptions, CompiledFunction, Target, CERULEAN_ASM, CERULEAN_RISC,
};

const TARGETS: [&Target; 2] = [&CERULEAN_ASM, &CERULEAN_RISC];

// ── Scenarios ────────────────────────────────────────────────────────────
// Each sample is compiled, run on the simulator and checked against the IR
// interpreter and a known answer.

#[test]
fn sum_loop_through_locals() {
    for target in TARGETS {
        assert_eq!(run_sample("sum_loop", target), Outcome::Return(91), "{target}");
    }
}

#[test]
fn sum_loop_in_registers() {
    for target in TARGETS {
        assert_eq!(run_sample("sum_regs", target), Outcome::Return(91), "{target}");
    }
}

#[test]
fn twenty_live_values_spill_and_still_add_up() {
    for target in TARGETS {
        // 3 * (1 + 2 + ... + 20)
        assert_eq!(run_sample("pressure", target), Outcome::Return(630), "{target}");
        let out = compile("pressure", target, &BackendOptions::default());
        let f = &out[0];
        assert!(f.frame.spill_slots > 0, "{target}: nothing spilled");
        assert!(f.instrs().any(|i| i.comment.as_deref().is_some_and(|c| c.starts_with("spill"))));
        assert!(f.instrs().any(|i| i.comment.as_deref().is_some_and(|c| c.starts_with("restore"))));
    }
}

#[test]
fn leaf_constant_has_no_frame() {
    for target in TARGETS {
        assert_eq!(run_sample("leaf", target), Outcome::Return(42), "{target}");
        let out = compile("leaf", target, &BackendOptions::default());
        let f = &out[0];
        assert_eq!(f.frame.size, 0);
        let ops: Vec<Opcode> = f.instrs().map(|i| i.op).collect();
        assert_eq!(ops, vec![Opcode::Li, Opcode::Ret], "{target}");
    }
}

#[test]
fn values_survive_a_call() {
    for target in TARGETS {
        let expected = reference("caller");
        assert_eq!(run_sample("caller", target), expected, "{target}");
    }
}

#[test]
fn wide_immediate_round_trips() {
    for target in TARGETS {
        assert_eq!(
            run_sample("wide", target),
            Outcome::Return(samples::WIDE_CONSTANT),
            "{target}"
        );
    }
}

#[test]
fn stack_arguments_reach_the_callee() {
    for target in TARGETS {
        // 1*1 + 2*2 + ... + 8*8
        assert_eq!(run_sample("stack_args", target), Outcome::Return(204), "{target}");
    }
}

#[test]
fn relocated_global_is_shared_across_calls() {
    for target in TARGETS {
        assert_eq!(run_sample("counter", target), Outcome::Return(2), "{target}");
        let out = compile("counter", target, &BackendOptions::default());
        let bump = out.iter().find(|f| f.name == "bump").unwrap();
        assert_eq!(bump.relocations, vec!["counter".to_string()]);
        let twice = out.iter().find(|f| f.name == "twice").unwrap();
        assert_eq!(twice.relocations, vec!["bump".to_string()]);
    }
}

#[test]
fn float_arithmetic_on_the_target_that_has_it() {
    let expected = Outcome::Return(15.0f64.to_bits() as i64);
    assert_eq!(run_sample("float", &CERULEAN_ASM), expected);
}

#[test]
fn every_sample_matches_the_interpreter() {
    for name in samples::NAMES {
        for target in TARGETS {
            if *name == "float" && !target.supports(Opcode::FAdd) {
                continue;
            }
            assert_eq!(run_sample(name, target), reference(name), "{name} on {target}");
        }
    }
}

#[test]
fn parameter_redefined_before_use_does_not_clobber_another() {
    // `b` is overwritten before it is read, so it may share a register
    // with `a`; moving `b` in at entry would destroy `a`.
    let sample = Sample {
        name: "redefined",
        about: "",
        module: redefined_param_module(),
        entry: "f",
        args: vec![10, 99],
        globals: vec![],
    };
    for target in TARGETS {
        for reserve in [true, false] {
            let options = BackendOptions {
                alloc: AllocOptions {
                    reserve_spill_scratch: reserve,
                },
            };
            let out = compile_sample(&sample, target, &options);
            let got = simulate(&sample, target, &out);
            assert_eq!(got, Outcome::Return(30), "{target}, scratch reserved: {reserve}");
            assert_eq!(got, reference_of(&sample));
        }
    }
}

#[test]
fn copy_between_spilled_values_is_kept() {
    let sample = Sample {
        name: "spilled_copy",
        about: "",
        module: vec![spilled_copy()],
        entry: "spilled_copy",
        args: vec![3],
        globals: vec![],
    };
    for target in TARGETS {
        for reserve in [true, false] {
            let options = BackendOptions {
                alloc: AllocOptions {
                    reserve_spill_scratch: reserve,
                },
            };
            let out = compile_sample(&sample, target, &options);
            assert_eq!(simulate(&sample, target, &out), reference_of(&sample), "{target}");
        }
    }
}

#[test]
fn dropping_call_saves_breaks_the_caller() {
    let sample = samples::by_name("caller").unwrap();
    for target in TARGETS {
        let mut out = compile("caller", target, &BackendOptions::default());
        let mut removed = 0;
        for f in &mut out {
            for block in &mut f.blocks {
                let before = block.instrs.len();
                block.instrs.retain(|i| {
                    !i.comment
                        .as_deref()
                        .is_some_and(|c| c.starts_with("save v") || c.starts_with("reload v"))
                });
                removed += before - block.instrs.len();
            }
        }
        assert!(removed > 0, "{target}: no call saves to drop");
        let mut machine = Machine::new(target, &out, sample.memory());
        let got = machine.call(sample.entry, &sample.args);
        assert_ne!(got, Ok(reference("caller")), "{target}");
    }
}

// ── Allocator tunable ────────────────────────────────────────────────────

#[test]
fn scratch_register_can_join_the_pool() {
    let options = BackendOptions {
        alloc: AllocOptions {
            reserve_spill_scratch: false,
        },
    };
    for name in ["pressure", "caller", "stack_args", "sum_loop"] {
        for target in TARGETS {
            let sample = samples::by_name(name).unwrap();
            let out = compile(name, target, &options);
            let got = simulate(&sample, target, &out);
            assert_eq!(got, reference(name), "{name} on {target} without scratch");
        }
    }
}

// ── Determinism ──────────────────────────────────────────────────────────

#[test]
fn output_is_byte_identical_across_runs() {
    for name in samples::NAMES {
        for target in TARGETS {
            if *name == "float" && !target.supports(Opcode::FAdd) {
                continue;
            }
            let a = compile(name, target, &BackendOptions::default());
            let b = compile(name, target, &BackendOptions::default());
            let text = |fs: &[CompiledFunction]| -> String {
                fs.iter()
                    .map(cerulean_compiler::backend::emit::assembly)
                    .collect()
            };
            assert_eq!(text(&a), text(&b), "{name} on {target}");
            for (fa, fb) in a.iter().zip(&b) {
                assert_eq!(fa.frame, fb.frame);
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compile(name: &str, target: &Target, options: &BackendOptions) -> Vec<CompiledFunction> {
    let sample = samples::by_name(name).unwrap();
    compile_sample(&sample, target, options)
}

fn compile_sample(sample: &Sample, target: &Target, options: &BackendOptions) -> Vec<CompiledFunction> {
    init_logging();
    let symbols = sample.symbols();
    let out = compile_module(target, &symbols, &sample.module, options);
    assert!(out.is_clean(), "{} on {target}: {:?}", sample.name, out.diagnostics);
    out.functions
}

fn simulate(sample: &Sample, target: &Target, functions: &[CompiledFunction]) -> Outcome {
    let mut machine = Machine::new(target, functions, sample.memory());
    machine
        .call(sample.entry, &sample.args)
        .unwrap_or_else(|e| panic!("{} on {target}: {e}", sample.name))
}

fn run_sample(name: &str, target: &Target) -> Outcome {
    let sample = samples::by_name(name).unwrap();
    let functions = compile(name, target, &BackendOptions::default());
    simulate(&sample, target, &functions)
}

fn reference(name: &str) -> Outcome {
    reference_of(&samples::by_name(name).unwrap())
}

fn reference_of(sample: &Sample) -> Outcome {
    let symbols = sample.symbols();
    let mut interp = Interpreter::with_memory(&sample.module, &symbols, sample.memory());
    match interp.call(sample.entry, &sample.args).unwrap() {
        Exit::Return(v) => Outcome::Return(v.unwrap_or(0)),
        Exit::Halt => Outcome::Halt,
    }
}

/// `f(a, b) { r = g2(1, a); b = r; return g3(r, r, b) }` with `g2(p, q) = q`
/// and `g3(x, y, z) = x + y + z`.
fn redefined_param_module() -> Vec<Function> {
    let mut b = FunctionBuilder::new("f").returns(Type::I64);
    let pa = b.param(Type::I64);
    let pb = b.param(Type::I64);
    let one = b.iconst(Type::I64, 1);
    let r = b.call("g2", &[one, pa]);
    b.copy_to(pb, r);
    let s = b.call("g3", &[r, r, pb]);
    b.ret(Some(s));
    let f = b.finish();

    let mut b = FunctionBuilder::new("g2").returns(Type::I64);
    let _p = b.param(Type::I64);
    let q = b.param(Type::I64);
    b.ret(Some(q));
    let g2 = b.finish();

    let mut b = FunctionBuilder::new("g3").returns(Type::I64);
    let x = b.param(Type::I64);
    let y = b.param(Type::I64);
    let z = b.param(Type::I64);
    let xy = b.binary(BinOp::Add, x, y);
    let sum = b.binary(BinOp::Add, xy, z);
    b.ret(Some(sum));
    let g3 = b.finish();

    vec![f, g2, g3]
}

/// Twenty-four values live to the end, and a copy of the last one (spilled
/// like its source) added on top.
fn spilled_copy() -> Function {
    let mut b = FunctionBuilder::new("spilled_copy").returns(Type::I64);
    let x = b.param(Type::I64);
    let mut vals = Vec::new();
    for k in 1..=24 {
        let c = b.iconst(Type::I64, k * 5);
        vals.push(b.binary(BinOp::Mul, x, c));
    }
    let w = b.new_value();
    b.copy_to(w, vals[23]);
    let mut acc = w;
    for v in &vals {
        acc = b.binary(BinOp::Add, acc, *v);
    }
    b.ret(Some(acc));
    b.finish()
}
