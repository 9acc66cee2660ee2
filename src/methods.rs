// Garnet method entries and tables.
//
// A method table maps an interned name to an entry carrying visibility,
// the owning node, and the entry kind. Visibility is stored here and
// enforced by the dispatch layer, never by lookup.

use crate::fastmap::HashMap;
use crate::symbol::SymbolId;
use crate::types::{ClassId, MethodBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodKind {
    /// A plain definition.
    Def(MethodBody),
    /// An alias; keeps the body resolved at alias time.
    Alias { original: SymbolId, body: MethodBody },
    /// An `undef` tombstone: lookup stops here and reports "not found"
    /// even when an ancestor defines the name.
    Undefined,
    /// Refinement marker. `orig` holds the pre-refinement definition when
    /// one existed; a marker-only entry has `None`. Lookup returns the
    /// marker and leaves activation to refinement-aware dispatch.
    Refined { orig: Option<Box<MethodEntry>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodEntry {
    pub kind: MethodKind,
    pub visibility: Visibility,
    /// Node the entry was defined on (bind validation, reflection).
    pub owner: ClassId,
}

impl MethodEntry {
    pub fn define(body: MethodBody, visibility: Visibility, owner: ClassId) -> Self {
        Self {
            kind: MethodKind::Def(body),
            visibility,
            owner,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, MethodKind::Undefined)
    }

    pub fn is_refined(&self) -> bool {
        matches!(self.kind, MethodKind::Refined { .. })
    }

    /// The callable body, when the entry has one.
    pub fn body(&self) -> Option<MethodBody> {
        match &self.kind {
            MethodKind::Def(body) => Some(*body),
            MethodKind::Alias { body, .. } => Some(*body),
            MethodKind::Undefined => None,
            MethodKind::Refined { orig } => orig.as_deref().and_then(MethodEntry::body),
        }
    }
}

/// Name -> entry mapping owned by a class-like node.
#[derive(Debug, Default)]
pub struct MethodTable {
    entries: HashMap<SymbolId, MethodEntry>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: SymbolId) -> Option<&MethodEntry> {
        self.entries.get(&name)
    }

    pub fn insert(&mut self, name: SymbolId, entry: MethodEntry) -> Option<MethodEntry> {
        self.entries.insert(name, entry)
    }

    pub fn remove(&mut self, name: SymbolId) -> Option<MethodEntry> {
        self.entries.remove(&name)
    }

    pub fn contains(&self, name: SymbolId) -> bool {
        self.entries.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &MethodEntry)> {
        self.entries.iter().map(|(&k, v)| (k, v))
    }

    pub fn names(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.entries.keys().copied()
    }
}
