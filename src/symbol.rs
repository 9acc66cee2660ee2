// Garnet Symbol Table
//
// Interner for method, constant and instance-variable names with O(1)
// comparison. Names are case-sensitive; constants are recognized by a
// leading uppercase letter.

use crate::fastmap::HashMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for a symbol (index into symbol table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// An interned name (immutable metadata only)
#[derive(Debug, Clone)]
pub struct Symbol {
    /// The symbol's name (e.g., "each", "Comparable", "@name")
    pub name: String,
    /// Uninterned symbols (gensyms) are never found by name lookup
    pub interned: bool,
}

impl Symbol {
    pub fn new(name: String, interned: bool) -> Self {
        Self { name, interned }
    }

    /// Constant names start with an ASCII uppercase letter.
    pub fn is_constant_name(&self) -> bool {
        self.name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
    }

    /// Instance-variable names carry the `@` sigil.
    pub fn is_ivar_name(&self) -> bool {
        self.name.starts_with('@')
    }
}

/// The symbol table
#[derive(Debug, Default)]
pub struct SymbolTable {
    /// All symbols indexed by SymbolId
    symbols: Vec<Symbol>,
    /// Name -> SymbolId lookup for interned symbols
    names: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the existing id when already present.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(name.to_string(), true));
        self.names.insert(name.to_string(), id);
        id
    }

    /// Create an uninterned symbol (gensym); never returned by `find`.
    pub fn make_symbol(&mut self, name: &str) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(name.to_string(), false));
        id
    }

    /// Find an interned symbol without creating it.
    pub fn find(&self, name: &str) -> Option<SymbolId> {
        self.names.get(name).copied()
    }

    /// Get a symbol by ID
    pub fn get_symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    /// Get the name of a symbol
    pub fn symbol_name(&self, id: SymbolId) -> Option<&str> {
        self.get_symbol(id).map(|s| s.name.as_str())
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn iter_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_symbol() {
        let mut table = SymbolTable::new();
        let sym1 = table.intern("foo");
        let sym2 = table.intern("foo");
        assert_eq!(sym1, sym2); // Same symbol

        let sym3 = table.intern("bar");
        assert_ne!(sym1, sym3); // Different symbols
    }

    #[test]
    fn test_case_sensitive() {
        let mut table = SymbolTable::new();
        let lower = table.intern("foo");
        let upper = table.intern("Foo");
        assert_ne!(lower, upper);
        assert!(!table.get_symbol(lower).unwrap().is_constant_name());
        assert!(table.get_symbol(upper).unwrap().is_constant_name());
    }

    #[test]
    fn test_uninterned() {
        let mut table = SymbolTable::new();
        let sym = table.make_symbol("g123");
        assert!(!table.get_symbol(sym).unwrap().interned);
        assert_eq!(table.find("g123"), None);

        let interned = table.intern("g123");
        assert_ne!(sym, interned);
    }

    #[test]
    fn test_ivar_name() {
        let mut table = SymbolTable::new();
        let ivar = table.intern("@name");
        assert!(table.get_symbol(ivar).unwrap().is_ivar_name());
    }
}
