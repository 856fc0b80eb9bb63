use cerulean_compiler::backend::instruction::{
    FrameIndex, MachFunction, Offset, Opcode, Operand, Reg,
};
use cerulean_compiler::backend::lowering::lower_function;
use cerulean_compiler::ir::{samples, BinOp, CmpOp, Function, FunctionBuilder, SymbolTable, Type};
use cerulean_compiler::{Target, CERULEAN_ASM, CERULEAN_RISC};

// ── Fusion ───────────────────────────────────────────────────────────────

#[test]
fn local_address_folds_into_the_memory_operand() {
    let mf = lower(&CERULEAN_RISC, samples::sum_loop());
    assert!(!ops(&mf).contains(&Opcode::Lea));
    let frame_refs = mf
        .instrs()
        .filter(|i| {
            i.operands.iter().any(|o| {
                matches!(
                    o,
                    Operand::Mem {
                        offset: Offset::Frame(FrameIndex::Local(_)),
                        ..
                    }
                )
            })
        })
        .count();
    // two initial stores, one load in the header, two loads and two stores
    // in the body, one load at the exit
    assert_eq!(frame_refs, 8);
}

#[test]
fn escaping_local_address_uses_lea() {
    let mut b = FunctionBuilder::new("escape").returns(Type::I64);
    let slot = b.local(Type::I64);
    let addr = b.local_addr(slot);
    let v = b.iconst(Type::I64, 9);
    b.store(Type::I64, addr, v);
    let r = b.load(Type::I64, addr);
    b.ret(Some(r));
    let mf = lower(&CERULEAN_ASM, b.finish());
    assert_eq!(ops(&mf)[0], Opcode::Lea);
}

#[test]
fn compare_and_branch_fuse_on_risc() {
    let mf = lower(&CERULEAN_RISC, samples::sum_regs());
    let o = ops(&mf);
    assert!(!o.contains(&Opcode::Sle));
    // the body follows the header, so the exit test is inverted
    assert!(o.contains(&Opcode::Bgt));
    assert!(!o.contains(&Opcode::Bnz));
}

#[test]
fn compare_then_branch_on_asm() {
    let mf = lower(&CERULEAN_ASM, samples::sum_regs());
    let o = ops(&mf);
    assert!(o.contains(&Opcode::Sgt));
    assert!(o.contains(&Opcode::Bnz));
}

#[test]
fn unfused_condition_branches_on_nonzero() {
    let mut b = FunctionBuilder::new("pick").returns(Type::I64);
    let x = b.param(Type::I64);
    let y = b.param(Type::I64);
    let c = b.cmp(CmpOp::Lt, x, y);
    let one = b.iconst(Type::I64, 1);
    let _ = b.binary(BinOp::Add, x, one);
    b.branch(c, "yes", "no");
    b.block("yes");
    b.ret(Some(x));
    b.block("no");
    b.ret(Some(y));
    let mf = lower(&CERULEAN_RISC, b.finish());
    assert!(ops(&mf).contains(&Opcode::Slt));
    assert!(ops(&mf).contains(&Opcode::Bnz));
}

// ── Immediates ───────────────────────────────────────────────────────────

#[test]
fn small_addend_becomes_addi() {
    let mut b = FunctionBuilder::new("inc").returns(Type::I64);
    let x = b.param(Type::I64);
    let k = b.iconst(Type::I64, 100);
    let y = b.binary(BinOp::Add, x, k);
    b.ret(Some(y));
    let f = b.finish();
    for target in [&CERULEAN_ASM, &CERULEAN_RISC] {
        let mf = lower(target, f.clone());
        assert!(ops(&mf).contains(&Opcode::Addi), "{target}");
        assert!(!ops(&mf).contains(&Opcode::Li), "{target}");
    }
}

#[test]
fn addend_outside_the_arith_field_is_materialized() {
    let mut b = FunctionBuilder::new("inc").returns(Type::I64);
    let x = b.param(Type::I64);
    let k = b.iconst(Type::I64, 5000);
    let y = b.binary(BinOp::Add, x, k);
    b.ret(Some(y));
    let f = b.finish();
    // 5000 fits 16 bits but not 12
    assert!(ops(&lower(&CERULEAN_ASM, f.clone())).contains(&Opcode::Addi));
    let risc = ops(&lower(&CERULEAN_RISC, f));
    assert!(risc.contains(&Opcode::Li));
    assert!(risc.contains(&Opcode::Add));
}

#[test]
fn zero_constant_reads_the_zero_register() {
    let mut b = FunctionBuilder::new("z").returns(Type::I64);
    let x = b.param(Type::I64);
    let z = b.iconst(Type::I64, 0);
    let y = b.binary(BinOp::Mul, x, z);
    b.ret(Some(y));
    let mf = lower(&CERULEAN_RISC, b.finish());
    let mul = mf.instrs().find(|i| i.op == Opcode::Mul).unwrap();
    assert_eq!(mul.operands[2], Operand::Reg(Reg::Phys(CERULEAN_RISC.roles.zero)));
}

#[test]
fn thirty_two_bit_constant_takes_two_instructions() {
    let mut b = FunctionBuilder::new("k").returns(Type::I64);
    let c = b.iconst(Type::I64, 0x1234_5678);
    b.ret(Some(c));
    let mf = lower(&CERULEAN_ASM, b.finish());
    assert_eq!(ops(&mf), vec![Opcode::Lui, Opcode::Ori, Opcode::Ret]);
}

// ── Operations without a direct instruction ──────────────────────────────

#[test]
fn remainder_expands_on_risc() {
    let mut b = FunctionBuilder::new("m").returns(Type::I64);
    let x = b.param(Type::I64);
    let y = b.param(Type::I64);
    let r = b.binary(BinOp::Rem, x, y);
    b.ret(Some(r));
    let f = b.finish();
    assert_eq!(
        ops(&lower(&CERULEAN_RISC, f.clone())),
        vec![
            Opcode::ChkZ,
            Opcode::Div,
            Opcode::Mul,
            Opcode::Sub,
            Opcode::Mov,
            Opcode::Ret
        ]
    );
    assert!(ops(&lower(&CERULEAN_ASM, f)).contains(&Opcode::Rem));
}

#[test]
fn division_checks_for_zero_first() {
    let mut b = FunctionBuilder::new("d").returns(Type::I64);
    let x = b.param(Type::I64);
    let y = b.param(Type::I64);
    let q = b.binary(BinOp::Div, x, y);
    b.ret(Some(q));
    let o = ops(&lower(&CERULEAN_ASM, b.finish()));
    let chk = o.iter().position(|op| *op == Opcode::ChkZ).unwrap();
    let div = o.iter().position(|op| *op == Opcode::Div).unwrap();
    assert!(chk < div);
}

// ── Calls ────────────────────────────────────────────────────────────────

#[test]
fn call_passes_extra_arguments_on_the_stack() {
    let module = samples::stack_args_module();
    let symbols = SymbolTable::from_module(&module);
    for (target, on_stack) in [(&CERULEAN_ASM, 4), (&CERULEAN_RISC, 2)] {
        let mf = lower_function(target, &symbols, &module[0]).unwrap();
        assert_eq!(mf.outgoing_args, on_stack);
        assert!(mf.has_calls);
        let call = mf.instrs().find(|i| i.is_call()).unwrap();
        assert_eq!(call.implicit_uses, target.conv.arg_regs.to_vec());
        assert_eq!(call.implicit_defs, vec![target.conv.ret_reg]);
        let stack_stores = mf
            .instrs()
            .filter(|i| {
                i.op == Opcode::St
                    && matches!(i.operands[1], Operand::Mem { base: Reg::Phys(r), .. } if r == target.roles.stack_ptr)
            })
            .count();
        assert_eq!(stack_stores as u32, on_stack, "{target}");
    }
}

#[test]
fn relocated_global_loads_its_label() {
    let sample = samples::by_name("counter").unwrap();
    let symbols = sample.symbols();
    let bump = sample.module.iter().find(|f| f.name == "bump").unwrap();
    let mf = lower_function(&CERULEAN_ASM, &symbols, bump).unwrap();
    let li = mf.instrs().find(|i| i.op == Opcode::Li).unwrap();
    assert_eq!(li.operands[1], Operand::label("counter"));
}

// ── Format validity ──────────────────────────────────────────────────────

#[test]
fn every_lowered_instruction_matches_its_format() {
    for name in ["sum_loop", "sum_regs", "pressure", "caller", "wide", "stack_args", "counter"] {
        let sample = samples::by_name(name).unwrap();
        let symbols = sample.symbols();
        for target in [&CERULEAN_ASM, &CERULEAN_RISC] {
            for f in &sample.module {
                let mf = lower_function(target, &symbols, f).unwrap();
                for instr in mf.instrs() {
                    assert_eq!(target.verify(instr), Ok(()), "{name} on {target}: {instr}");
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn lower(target: &Target, f: Function) -> MachFunction {
    let module = vec![f];
    let symbols = SymbolTable::from_module(&module);
    lower_function(target, &symbols, &module[0]).unwrap()
}

fn ops(mf: &MachFunction) -> Vec<Opcode> {
    mf.instrs().map(|i| i.op).collect()
}
