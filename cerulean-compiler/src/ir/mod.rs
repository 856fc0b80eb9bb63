//! Intermediate Representation (IR) module.
//!
//! This module contains the IR definitions, a programmatic builder, the
//! shared symbol table, a reference interpreter and the built-in samples.

pub mod ir;
pub use ir::*;
pub mod builder;
pub use builder::FunctionBuilder;
pub mod interp;
pub mod samples;
pub mod symbol_table;
pub use symbol_table::{SymbolAddr, SymbolInfo, SymbolKind, SymbolTable};
