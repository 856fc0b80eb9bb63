use cerulean_compiler::ir::{samples, BinOp, Function, FunctionBuilder, SymbolTable, Type};
use cerulean_compiler::{
    compile_function, compile_module, BackendError, BackendOptions, Stage, CERULEAN_ASM,
    CERULEAN_RISC,
};

// ── Per-function diagnostics ─────────────────────────────────────────────
// Each test feeds a function the backend must reject and checks the error
// kind and the stage that raised it.

#[test]
fn float_operation_on_risc_has_no_lowering_rule() {
    let err = compile_err(&CERULEAN_RISC, samples::float_mix());
    assert!(matches!(
        err,
        BackendError::NoLoweringRule { stage: Stage::Lowering, target: "CeruleanRISC", .. }
    ));
    assert_eq!(err.function(), "float");
}

#[test]
fn call_to_undeclared_function_is_an_unknown_symbol() {
    let mut b = FunctionBuilder::new("lonely").returns(Type::I64);
    let r = b.call("nowhere", &[]);
    b.ret(Some(r));
    let err = compile_err(&CERULEAN_ASM, b.finish());
    assert!(matches!(
        err,
        BackendError::UnknownSymbol { ref symbol, stage: Stage::Lowering, .. } if symbol == "nowhere"
    ));
}

#[test]
fn unresolved_global_is_an_unknown_symbol() {
    let mut b = FunctionBuilder::new("peek").returns(Type::I64);
    let a = b.global_addr("missing");
    let v = b.load(Type::I64, a);
    b.ret(Some(v));
    let err = compile_err(&CERULEAN_RISC, b.finish());
    assert!(matches!(err, BackendError::UnknownSymbol { ref symbol, .. } if symbol == "missing"));
}

#[test]
fn undeclared_local_slot_is_an_unknown_symbol() {
    for target in [&CERULEAN_ASM, &CERULEAN_RISC] {
        // Fused into the load.
        let mut b = FunctionBuilder::new("stray").returns(Type::I64);
        let a = b.local_addr(5);
        let y = b.load(Type::I64, a);
        b.ret(Some(y));
        let err = compile_err(target, b.finish());
        assert!(matches!(
            err,
            BackendError::UnknownSymbol { ref symbol, stage: Stage::Lowering, .. } if symbol == "local5"
        ));

        // Materialized, since the address has two uses.
        let mut b = FunctionBuilder::new("stray_addr").returns(Type::I64);
        let _declared = b.local(Type::I64);
        let x = b.param(Type::I64);
        let a = b.local_addr(1);
        b.store(Type::I64, a, x);
        let y = b.load(Type::I64, a);
        b.ret(Some(y));
        let err = compile_err(target, b.finish());
        assert!(matches!(err, BackendError::UnknownSymbol { ref symbol, .. } if symbol == "local1"));
    }
}

#[test]
fn jump_to_missing_block_is_an_unknown_label() {
    let mut b = FunctionBuilder::new("lost");
    b.jump("nowhere");
    let err = compile_err(&CERULEAN_ASM, b.finish());
    assert!(matches!(
        err,
        BackendError::UnknownLabel { ref label, stage: Stage::Lowering, .. } if label == "nowhere"
    ));
}

#[test]
fn undefined_value_is_an_illegal_live_in() {
    let mut b = FunctionBuilder::new("ghost").returns(Type::I64);
    let x = b.param(Type::I64);
    let ghost = b.new_value();
    let y = b.binary(BinOp::Add, x, ghost);
    b.ret(Some(y));
    let err = compile_err(&CERULEAN_RISC, b.finish());
    assert!(matches!(err, BackendError::IllegalLiveIn { stage: Stage::Liveness, .. }));
}

#[test]
fn oversized_frame_overflows() {
    let mut b = FunctionBuilder::new("huge").returns(Type::I64);
    let slots: Vec<u32> = (0..400).map(|_| b.local(Type::I64)).collect();
    let x = b.param(Type::I64);
    b.store_local(slots[399], x);
    let y = b.load_local(slots[399]);
    b.ret(Some(y));
    let err = compile_err(&CERULEAN_RISC, b.finish());
    assert!(matches!(err, BackendError::FrameOverflow { stage: Stage::Frame, .. }));
    assert!(err.to_string().starts_with("huge: frame:"));
}

// ── Module compilation ───────────────────────────────────────────────────

#[test]
fn module_keeps_going_after_a_failure() {
    let mut module = samples::caller_module();
    module.push(samples::float_mix());
    module.push(samples::leaf_const());
    let symbols = SymbolTable::from_module(&module);
    let out = compile_module(&CERULEAN_RISC, &symbols, &module, &BackendOptions::default());
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[0].function(), "float");
    let names: Vec<&str> = out.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["caller", "callee", "leaf"]);
    assert!(!out.is_clean());
}

#[test]
fn every_failing_function_is_reported() {
    let mut a = FunctionBuilder::new("a");
    a.jump("gone");
    let mut b = FunctionBuilder::new("b");
    b.call_void("nobody", &[]);
    let module = vec![a.finish(), samples::wide_const(), b.finish()];
    let symbols = SymbolTable::from_module(&module);
    let out = compile_module(&CERULEAN_ASM, &symbols, &module, &BackendOptions::default());
    let failed: Vec<&str> = out.diagnostics.iter().map(|d| d.function()).collect();
    assert_eq!(failed, vec!["a", "b"]);
    assert!(out.function("wide").is_some());
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn compile_err(target: &cerulean_compiler::Target, f: Function) -> BackendError {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = vec![f];
    let symbols = SymbolTable::from_module(&module);
    match compile_function(target, &symbols, &module[0], &BackendOptions::default()) {
        Ok(compiled) => panic!("`{}` compiled but should have failed", compiled.name),
        Err(err) => err,
    }
}
