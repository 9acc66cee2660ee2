// Garnet variable tables.
//
// Each class-like node owns a descriptor mapping instance-variable names
// to slot indices in that class's instances. Accessors are created
// against a node's effective owner (proxies resolve to their origin) and
// read/write an instance's ivar row.

use crate::fastmap::HashMap;
use crate::symbol::SymbolId;
use crate::types::{ClassId, Value};

/// Name -> slot-index descriptor for one class.
#[derive(Debug, Default)]
pub struct VariableTable {
    slots: Vec<SymbolId>,
    index: HashMap<SymbolId, usize>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot index for a name, if one has been reserved.
    pub fn slot_of(&self, name: SymbolId) -> Option<usize> {
        self.index.get(&name).copied()
    }

    /// Reserve a slot for a name, reusing the existing one.
    pub fn reserve(&mut self, name: SymbolId) -> usize {
        if let Some(idx) = self.slot_of(name) {
            return idx;
        }
        let idx = self.slots.len();
        self.slots.push(name);
        self.index.insert(name, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.slots.iter().copied()
    }
}

/// A resolved accessor for one ivar slot. Rows are grown lazily, so an
/// accessor created after instances were allocated still works on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableAccessor {
    /// Effective table owner the slot was reserved on.
    pub owner: ClassId,
    pub name: SymbolId,
    pub index: usize,
}

impl VariableAccessor {
    /// Read the slot from an ivar row; unset slots read as nil.
    pub fn get(&self, row: &[Value]) -> Value {
        row.get(self.index).copied().unwrap_or(Value::Nil)
    }

    /// Write the slot, growing the row with nils as needed.
    pub fn set(&self, row: &mut Vec<Value>, value: Value) {
        if row.len() <= self.index {
            row.resize(self.index + 1, Value::Nil);
        }
        row[self.index] = value;
    }
}
