use cerulean_compiler::backend::frame::{lower_frame, FrameLayout};
use cerulean_compiler::backend::instruction::{MachFunction, MachInstr, Offset, Opcode, Operand};
use cerulean_compiler::backend::liveness::analyze;
use cerulean_compiler::backend::lowering::lower_function;
use cerulean_compiler::backend::regalloc::{NaiveAllocator, RegAllocator};
use cerulean_compiler::ir::{samples, Function, FunctionBuilder, SymbolTable, Type};
use cerulean_compiler::{BackendError, Stage, Target, CERULEAN_ASM, CERULEAN_RISC};

const TARGETS: [&Target; 2] = [&CERULEAN_ASM, &CERULEAN_RISC];

// ── Layout ───────────────────────────────────────────────────────────────

#[test]
fn frame_size_is_aligned_and_covers_every_area() {
    for name in ["sum_loop", "pressure", "caller", "stack_args"] {
        for target in TARGETS {
            for (_, layout) in frame_sample(name, target) {
                assert_eq!(layout.size % target.conv.stack_align, 0);
                let word = target.word_size;
                let mut used = layout.spill_base + layout.spill_slots * word;
                used += layout.callee_saved.len() as u32 * word;
                used += layout.frame_ptr.map_or(0, |_| word);
                used += layout.return_addr.map_or(0, |_| word);
                assert!(layout.size >= used, "{name} on {target}: {layout:?}");
            }
        }
    }
}

#[test]
fn leaf_without_locals_or_spills_has_an_empty_frame() {
    for target in TARGETS {
        let (mf, layout) = frame_sample("wide", target).remove(0);
        assert_eq!(layout.size, 0);
        assert!(layout.return_addr.is_none());
        assert!(!mf.instrs().any(|i| i.op == Opcode::Addi));
    }
}

#[test]
fn non_leaf_saves_the_return_address() {
    for target in TARGETS {
        for (mf, layout) in frame_sample("counter", target) {
            assert_eq!(layout.return_addr.is_some(), mf.has_calls, "{} on {target}", mf.name);
        }
    }
}

#[test]
fn frame_pointer_only_on_the_target_that_has_one() {
    let (_, asm) = frame_sample("sum_loop", &CERULEAN_ASM).remove(0);
    assert!(asm.frame_ptr.is_some());
    let (_, risc) = frame_sample("sum_loop", &CERULEAN_RISC).remove(0);
    assert!(risc.frame_ptr.is_none());
}

#[test]
fn locals_are_aligned_to_their_size() {
    let mut b = FunctionBuilder::new("mixed").returns(Type::I64);
    let a = b.local(Type::I32);
    let c = b.local(Type::I64);
    let d = b.local(Type::I32);
    let x = b.load_local(a);
    b.store_local(c, x);
    b.store_local(d, x);
    let y = b.load_local(c);
    b.ret(Some(y));
    let (_, layout) = frame_function(&CERULEAN_RISC, b.finish());
    assert_eq!(layout.locals, vec![0, 8, 16]);
}

// ── Prologue and epilogue ────────────────────────────────────────────────

#[test]
fn every_return_is_preceded_by_the_same_epilogue() {
    for name in ["sum_loop", "pressure", "caller", "counter"] {
        for target in TARGETS {
            for (mf, layout) in frame_sample(name, target) {
                if layout.size == 0 {
                    continue;
                }
                let instrs: Vec<&MachInstr> = mf.instrs().collect();
                let rets: Vec<usize> = instrs
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| i.is_ret())
                    .map(|(k, _)| k)
                    .collect();
                assert!(!rets.is_empty());
                let tail = |k: usize| -> Vec<String> {
                    instrs[k - epilogue_len(&layout)..k]
                        .iter()
                        .map(|i| i.to_string())
                        .collect()
                };
                let first = tail(rets[0]);
                assert!(first.last().unwrap().contains(&format!("{}", layout.size)));
                for &k in &rets[1..] {
                    assert_eq!(tail(k), first, "{name} on {target}");
                }
            }
        }
    }
}

#[test]
fn prologue_opens_the_entry_block() {
    for target in TARGETS {
        let (mf, layout) = frame_sample("caller", target).remove(0);
        let entry = &mf.blocks[0].instrs;
        assert_eq!(entry[0].op, Opcode::Addi);
        assert!(entry[0].to_string().contains(&format!("-{}", layout.size)));
        let saves_ra = entry
            .iter()
            .any(|i| i.op == Opcode::St && i.operands[0] == Operand::phys(target.roles.link));
        assert!(saves_ra);
        for (r, _) in &layout.callee_saved {
            assert!(entry
                .iter()
                .any(|i| i.op == Opcode::St && i.operands[0] == Operand::phys(*r)));
        }
    }
}

#[test]
fn no_frame_indices_survive() {
    for name in samples::NAMES {
        for target in TARGETS {
            if *name == "float" && !target.supports(Opcode::FAdd) {
                continue;
            }
            for (mf, _) in frame_sample(name, target) {
                for instr in mf.instrs() {
                    for o in &instr.operands {
                        assert!(
                            !matches!(o, Operand::Mem { offset: Offset::Frame(_), .. }),
                            "{name} on {target}: {instr}"
                        );
                    }
                    assert_eq!(target.verify(instr), Ok(()));
                }
            }
        }
    }
}

#[test]
fn incoming_arguments_sit_above_the_frame() {
    for target in TARGETS {
        let frames = frame_sample("stack_args", target);
        let (sum8, layout) = frames.iter().find(|(mf, _)| mf.name == "sum8").unwrap();
        let base = target.frame_base();
        let top = sum8
            .instrs()
            .filter_map(|i| match i.operands.get(1) {
                Some(Operand::Mem {
                    base: b,
                    offset: Offset::Const(off),
                }) if b.phys() == Some(base) && i.op == Opcode::Ld => Some(*off),
                _ => None,
            })
            .max()
            .unwrap();
        assert!(top >= layout.size as i64, "{target}");
    }
}

// ── Overflow ─────────────────────────────────────────────────────────────

#[test]
fn frame_too_large_for_the_offset_field_overflows() {
    let mut b = FunctionBuilder::new("huge").returns(Type::I64);
    let slots: Vec<u32> = (0..300).map(|_| b.local(Type::I64)).collect();
    let x = b.param(Type::I64);
    b.store_local(slots[299], x);
    let y = b.load_local(slots[299]);
    b.ret(Some(y));
    let f = b.finish();

    // 2400 bytes is fine for 16-bit fields
    let (_, layout) = frame_function(&CERULEAN_ASM, f.clone());
    assert!(layout.size >= 2400);

    let module = vec![f];
    let symbols = SymbolTable::from_module(&module);
    let mf = lower_function(&CERULEAN_RISC, &symbols, &module[0]).unwrap();
    let live = analyze(&mf).unwrap();
    let alloc = NaiveAllocator::default().allocate(&CERULEAN_RISC, &mf, &live).unwrap();
    let err = lower_frame(&CERULEAN_RISC, &alloc).err().unwrap();
    assert!(matches!(
        err,
        BackendError::FrameOverflow { stage: Stage::Frame, bits: 12, .. }
    ));
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn epilogue_len(layout: &FrameLayout) -> usize {
    layout.callee_saved.len()
        + layout.frame_ptr.map_or(0, |_| 1)
        + layout.return_addr.map_or(0, |_| 1)
        + 1
}

fn frame_function(target: &Target, f: Function) -> (MachFunction, FrameLayout) {
    let module = vec![f];
    let symbols = SymbolTable::from_module(&module);
    let mf = lower_function(target, &symbols, &module[0]).unwrap();
    let live = analyze(&mf).unwrap();
    let alloc = NaiveAllocator::default().allocate(target, &mf, &live).unwrap();
    lower_frame(target, &alloc).unwrap()
}

fn frame_sample(name: &str, target: &Target) -> Vec<(MachFunction, FrameLayout)> {
    let sample = samples::by_name(name).unwrap();
    let symbols = sample.symbols();
    sample
        .module
        .iter()
        .map(|f| {
            let mf = lower_function(target, &symbols, f).unwrap();
            let live = analyze(&mf).unwrap();
            let alloc = NaiveAllocator::default().allocate(target, &mf, &live).unwrap();
            lower_frame(target, &alloc).unwrap()
        })
        .collect()
}
