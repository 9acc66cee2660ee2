// Garnet lookup engine - ancestor linearization and name resolution.
//
// Stateless, pure traversals over an object graph. Callers that memoize
// a linearization key it on the graph's epoch or the node's generation;
// nothing here caches.

use crate::errors::ModelError;
use crate::methods::MethodEntry;
use crate::model::{ClassKind, ObjectGraph};
use crate::symbol::{SymbolId, SymbolTable};
use crate::types::{ClassId, Value};
use smallvec::SmallVec;

/// Ancestor order of a node. Chains are short; eight covers almost every
/// real hierarchy without spilling.
pub type AncestorChain = SmallVec<[ClassId; 8]>;

/// Deterministic ancestor order: prepended modules, the node itself,
/// included modules (most recent first), then the superclass chain.
/// A prepended node appears at its relocated table's position, so the
/// same identity can legitimately occur twice (included and prepended).
pub fn linearize(graph: &ObjectGraph, start: ClassId) -> AncestorChain {
    let mut out = AncestorChain::new();
    let mut cur = Some(start);
    while let Some(id) = cur {
        // prepend headers are skipped; their table shows up further down
        if graph.method_location(id) == id {
            out.push(graph.delegate(id));
        }
        cur = graph.raw_superclass(id);
    }
    out
}

/// True iff `a` (by origin identity) appears in `b`'s ancestor chain.
pub fn is_ancestor(graph: &ObjectGraph, a: ClassId, b: ClassId) -> bool {
    graph.hierarchy_contains(b, a)
}

/// First table hit along the ancestor chain. An `undef` tombstone stops
/// the walk and reports "not found"; a refinement marker is returned as
/// a hit for refinement-aware dispatch to interpret. A miss is not an
/// error here: the dispatch layer decides on method_missing semantics.
pub fn resolve_method<'a>(
    graph: &'a ObjectGraph,
    start: ClassId,
    name: SymbolId,
) -> Option<&'a MethodEntry> {
    resolve_method_site(graph, start, name).map(|(_, entry)| entry)
}

/// Resolution for `super`: first hit strictly above `position` in the
/// chain. `position` is the node whose table supplied the current
/// method (a proxy id for mixin methods).
pub fn resolve_method_above<'a>(
    graph: &'a ObjectGraph,
    position: ClassId,
    name: SymbolId,
) -> Option<&'a MethodEntry> {
    let above = graph.raw_superclass(position)?;
    resolve_method(graph, above, name)
}

/// Where in the chain a name resolves: the traversal node (proxy ids
/// included) paired with the entry. `super` resumes above this node.
pub fn resolve_method_site<'a>(
    graph: &'a ObjectGraph,
    start: ClassId,
    name: SymbolId,
) -> Option<(ClassId, &'a MethodEntry)> {
    let mut cur = Some(start);
    while let Some(id) = cur {
        if let Some(entry) = graph.method_table(id).get(name) {
            if entry.is_undefined() {
                return None;
            }
            return Some((id, entry));
        }
        cur = graph.raw_superclass(id);
    }
    None
}

/// A constant resolution result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantHit<'a> {
    Value(Value),
    /// Registered but not yet loaded; the caller loads `feature` and
    /// retries.
    Autoload { node: ClassId, feature: &'a str },
}

/// First constant hit along the ancestor order; each ancestor's constant
/// table is consulted before its autoload table.
pub fn resolve_constant<'a>(
    graph: &'a ObjectGraph,
    start: ClassId,
    name: SymbolId,
) -> Option<ConstantHit<'a>> {
    for dele in linearize(graph, start) {
        if let Some(value) = graph.constant_get(dele, name) {
            return Some(ConstantHit::Value(value));
        }
        if let Some(feature) = graph.autoload_get(dele, name) {
            return Some(ConstantHit::Autoload {
                node: dele,
                feature,
            });
        }
    }
    None
}

/// Validate re-binding an unbound method whose origin is
/// `origin_module` to a receiver of class `receiver_class`. Module
/// origins bind anywhere; class origins require an ancestor
/// relationship; singleton origins never re-bind.
pub fn check_bind_target(
    graph: &ObjectGraph,
    symbols: &SymbolTable,
    origin_module: ClassId,
    receiver_class: ClassId,
) -> Result<(), ModelError> {
    if graph.kind(origin_module) == ClassKind::Module {
        return Ok(());
    }
    if graph.hierarchy_contains(receiver_class, origin_module) {
        return Ok(());
    }
    if graph.kind(origin_module) == ClassKind::Metaclass {
        return Err(ModelError::SingletonBindMismatch);
    }
    let name = graph
        .name(origin_module)
        .and_then(|s| symbols.symbol_name(s))
        .unwrap_or("Class")
        .to_string();
    Err(ModelError::BindTargetMismatch { name })
}
