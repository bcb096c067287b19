use std::collections::HashMap;

use super::CompileError;

/// Number of global slots a session can address (the width of a global operand).
pub const GLOBALS_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The function currently being compiled, bound to its own `let` name.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One lexical scope of bindings. Function bodies get an enclosed table whose
/// `outer` is the defining scope; the outermost table holds globals and builtins.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    /// Detach and return the enclosing table, if any.
    pub fn take_outer(&mut self) -> Option<SymbolTable> {
        self.outer.take().map(|outer| *outer)
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Local slots allocated so far (parameters included).
    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// Symbols captured from enclosing scopes, in first-reference order. Each
    /// entry is the symbol as the *enclosing* scope sees it.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    /// Bind `name` to the next slot: Local inside a function, Global at the top.
    pub fn define(&mut self, name: &str) -> Result<Symbol, CompileError> {
        let scope = if self.is_global() { SymbolScope::Global } else { SymbolScope::Local };
        if scope == SymbolScope::Global && self.num_definitions >= GLOBALS_SIZE {
            return Err(CompileError::TooManyGlobals { limit: GLOBALS_SIZE });
        }
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());
        Ok(symbol)
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Look `name` up through the enclosing scopes. A binding owned by an
    /// enclosing function is re-bound here as Free, which in turn makes every
    /// intermediate scope capture it as well.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            SymbolScope::Local | SymbolScope::Free | SymbolScope::Function => Some(self.define_free(symbol)),
        }
    }
}
