//! Cerulean backend: IR functions to allocated, framed machine code.
//!
//! Module layout:
//! - `abi`         — physical registers, register roles, calling conventions
//! - `instruction` — machine instructions over virtual or physical registers
//! - `target`      — the CeruleanASM and CeruleanRISC descriptors
//! - `lowering`    — IR → virtual-register machine code
//! - `liveness`    — dataflow liveness over virtual registers
//! - `regalloc`    — allocator trait and the naive allocator
//! - `frame`       — frame layout, prologue/epilogue, frame-index resolution
//! - `emit`        — assembly text and binary encoding

pub mod abi;
pub mod emit;
pub mod frame;
pub mod instruction;
pub mod liveness;
pub mod lowering;
pub mod regalloc;
pub mod target;

use crate::ir::{Function, SymbolTable};
use crate::BackendError;
use frame::FrameLayout;
use instruction::{MachFunction, MachInstr};
use log::{debug, error};
use regalloc::{AllocOptions, NaiveAllocator, RegAllocator};
use serde::Serialize;
use target::{Target, TargetKind};

// ============================================================================
// Options and output
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    pub alloc: AllocOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompiledBlock {
    pub label: String,
    pub instrs: Vec<MachInstr>,
}

/// A fully compiled function: physical registers, resolved frame offsets and
/// labels only.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledFunction {
    pub name: String,
    pub target: TargetKind,
    pub blocks: Vec<CompiledBlock>,
    pub frame: FrameLayout,
    /// Labels referenced here that are not blocks of this function.
    pub relocations: Vec<String>,
}

impl CompiledFunction {
    fn new(target: &Target, mf: MachFunction, frame: FrameLayout) -> Self {
        let mut relocations: Vec<String> = Vec::new();
        for label in mf.instrs().flat_map(|i| i.labels()) {
            let local = mf.blocks.iter().any(|b| b.label == label);
            if !local && !relocations.iter().any(|r| r == label) {
                relocations.push(label.to_string());
            }
        }
        relocations.sort();
        CompiledFunction {
            name: mf.name,
            target: target.kind,
            blocks: mf
                .blocks
                .into_iter()
                .map(|b| CompiledBlock {
                    label: b.label,
                    instrs: b.instrs,
                })
                .collect(),
            frame,
            relocations,
        }
    }

    pub fn instrs(&self) -> impl Iterator<Item = &MachInstr> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }

    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }
}

/// Everything a module compile produced. Failing functions contribute a
/// diagnostic and nothing else.
#[derive(Debug, Default)]
pub struct ModuleOutput {
    pub functions: Vec<CompiledFunction>,
    pub diagnostics: Vec<BackendError>,
}

impl ModuleOutput {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

// ============================================================================
// Drivers
// ============================================================================

/// Run every stage with a caller-chosen allocator.
pub fn compile_function_with(
    target: &Target,
    symbols: &SymbolTable,
    func: &Function,
    allocator: &dyn RegAllocator,
) -> Result<CompiledFunction, BackendError> {
    let mf = lowering::lower_function(target, symbols, func)?;
    let live = liveness::analyze(&mf)?;
    let alloc = allocator.allocate(target, &mf, &live)?;
    let (framed, layout) = frame::lower_frame(target, &alloc)?;
    let compiled = CompiledFunction::new(target, framed, layout);
    debug!(
        "`{}`: {} instructions for {}",
        compiled.name,
        compiled.instr_count(),
        target
    );
    Ok(compiled)
}

/// Compile one function with the naive allocator.
pub fn compile_function(
    target: &Target,
    symbols: &SymbolTable,
    func: &Function,
    options: &BackendOptions,
) -> Result<CompiledFunction, BackendError> {
    let allocator = NaiveAllocator::new(options.alloc);
    compile_function_with(target, symbols, func, &allocator)
}

/// Compile every function in order, continuing past failures.
pub fn compile_module(
    target: &Target,
    symbols: &SymbolTable,
    module: &[Function],
    options: &BackendOptions,
) -> ModuleOutput {
    let mut out = ModuleOutput::default();
    for func in module {
        match compile_function(target, symbols, func, options) {
            Ok(compiled) => out.functions.push(compiled),
            Err(err) => {
                error!("{err}");
                out.diagnostics.push(err);
            }
        }
    }
    debug!(
        "module for {}: {} compiled, {} failed",
        target,
        out.functions.len(),
        out.diagnostics.len()
    );
    out
}
