use super::ir::Function;
use log::{debug, warn};
use std::collections::HashMap;

/// Where a global lives: a fixed address, or a token the linker patches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolAddr {
    Address(u64),
    Relocation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Function { params: usize, returns: bool },
    Global { addr: SymbolAddr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
}

/// Read-only view of the compilation unit shared by every function's
/// pipeline. Filled in before the backend runs and never written after.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, SymbolInfo>,
    /// Names declared more than once, in declaration order.
    clashes: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every function of `module`, declared by signature.
    pub fn from_module(module: &[Function]) -> Self {
        let mut table = Self::new();
        for f in module {
            if let Err(kept) = table.declare_function(&f.name, f.params.len(), f.ret.is_some()) {
                debug!("`{}` keeps its first declaration {:?}", f.name, kept.kind);
            }
        }
        table
    }

    /// Declare a symbol; on a clash the existing entry is kept, the name is
    /// recorded in [`SymbolTable::clashes`] and the existing entry returned.
    pub fn declare(&mut self, name: String, info: SymbolInfo) -> Result<(), SymbolInfo> {
        if let Some(existing) = self.symbols.get(&name) {
            warn!("`{}` redeclared as {:?}; keeping {:?}", name, info.kind, existing.kind);
            let existing = existing.clone();
            self.clashes.push(name);
            return Err(existing);
        }
        self.symbols.insert(name, info);
        Ok(())
    }

    pub fn declare_function(
        &mut self,
        name: &str,
        params: usize,
        returns: bool,
    ) -> Result<(), SymbolInfo> {
        self.declare(
            name.to_string(),
            SymbolInfo {
                kind: SymbolKind::Function { params, returns },
            },
        )
    }

    pub fn declare_global(&mut self, name: &str, addr: SymbolAddr) -> Result<(), SymbolInfo> {
        self.declare(
            name.to_string(),
            SymbolInfo {
                kind: SymbolKind::Global { addr },
            },
        )
    }

    pub fn clashes(&self) -> &[String] {
        &self.clashes
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }

    pub fn is_function(&self, name: &str) -> bool {
        matches!(
            self.lookup(name),
            Some(SymbolInfo {
                kind: SymbolKind::Function { .. }
            })
        )
    }

    pub fn global(&self, name: &str) -> Option<&SymbolAddr> {
        match self.lookup(name) {
            Some(SymbolInfo {
                kind: SymbolKind::Global { addr },
            }) => Some(addr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclaration_returns_existing_entry() {
        let mut t = SymbolTable::new();
        t.declare_global("counter", SymbolAddr::Address(0x100)).unwrap();
        let err = t.declare_function("counter", 0, false).unwrap_err();
        assert_eq!(
            err.kind,
            SymbolKind::Global {
                addr: SymbolAddr::Address(0x100)
            }
        );
        assert!(!t.is_function("counter"));
        assert_eq!(t.global("counter"), Some(&SymbolAddr::Address(0x100)));
        assert_eq!(t.clashes(), ["counter"]);
    }

    #[test]
    fn duplicate_functions_in_a_module_are_recorded() {
        use crate::ir::{FunctionBuilder, Type};
        let mut one = FunctionBuilder::new("twice").returns(Type::I64);
        let _ = one.param(Type::I64);
        let mut two = FunctionBuilder::new("twice");
        let _ = two.param(Type::I64);
        let _ = two.param(Type::I64);
        let module = vec![one.finish(), two.finish(), FunctionBuilder::new("once").finish()];
        let t = SymbolTable::from_module(&module);
        assert_eq!(t.clashes(), ["twice"]);
        assert_eq!(
            t.lookup("twice").map(|s| &s.kind),
            Some(&SymbolKind::Function {
                params: 1,
                returns: true
            })
        );
        assert!(t.is_function("once"));
    }
}
