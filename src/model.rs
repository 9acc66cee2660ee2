// Garnet Object Graph - classes, modules, metaclasses, mixin proxies.
//
// Tagged-variant nodes in an index arena. A node's kind decides which
// fields carry meaning; proxy kinds never own behavior of their own and
// resolve to an origin node. Mixin splicing builds proxy nodes fully
// off-chain and publishes them with a single superclass re-point, so a
// reader walking the chain never observes a partial splice.

use crate::errors::ModelError;
use crate::fastmap::{HashMap, HashSet};
use crate::methods::{MethodEntry, MethodKind, MethodTable, Visibility};
use crate::symbol::{SymbolId, SymbolTable};
use crate::types::{ClassId, InstanceId, Value};
use crate::variables::{VariableAccessor, VariableTable};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Kind tag of a class-like node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Class,
    Module,
    Metaclass,
    IncludedProxy,
    PrependedProxy,
}

impl ClassKind {
    pub fn is_proxy(self) -> bool {
        matches!(self, ClassKind::IncludedProxy | ClassKind::PrependedProxy)
    }

    /// Tag used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            ClassKind::Class => "Class",
            ClassKind::Module => "Module",
            ClassKind::Metaclass => "MetaClass",
            ClassKind::IncludedProxy => "IncludedProxy",
            ClassKind::PrependedProxy => "PrependedProxy",
        }
    }
}

/// A class, module, singleton class, or mixin proxy.
///
/// Read through `ObjectGraph`; all mutation goes through graph operations
/// so mutation counters stay coherent.
#[derive(Debug)]
pub struct ClassNode {
    pub kind: ClassKind,
    /// Interned name; anonymous nodes and proxies have none.
    pub name: Option<SymbolId>,
    /// Raw ancestor pointer. May name a proxy; the user-visible
    /// superclass is `ObjectGraph::superclass`.
    pub superclass: Option<ClassId>,
    /// Owned method table. Empty and unused on `IncludedProxy` (reads go
    /// through `table_from`); holds the relocated class table on
    /// `PrependedProxy`.
    pub methods: MethodTable,
    pub constants: HashMap<SymbolId, Value>,
    pub autoloads: HashMap<SymbolId, String>,
    /// Instance-variable slot descriptor.
    pub ivars: VariableTable,
    /// Lazily created singleton class, at most one per node.
    pub metaclass: Option<ClassId>,
    /// Metaclass kinds: the exact value this singleton class belongs to.
    pub attached: Option<Value>,
    /// Proxy kinds: the node being mixed in (ancestor identity).
    pub origin: Option<ClassId>,
    /// IncludedProxy: the node whose method-table slot this proxy
    /// exposes. Usually the origin; the origin's prepend proxy when a
    /// relocated table was wrapped.
    pub table_from: Option<ClassId>,
    /// Where method definitions land. Self, until a prepend relocates
    /// the table onto a `PrependedProxy`.
    pub method_location: ClassId,
    /// Classes that spliced this module in; invalidation fan-out only,
    /// not an ownership edge.
    pub including: HashSet<ClassId>,
    /// Per-node mutation counter for memoizing callers.
    pub generation: u64,
    pub frozen: bool,
}

/// An allocated instance: class pointer plus ivar row.
#[derive(Debug)]
pub struct Instance {
    pub class: ClassId,
    pub ivars: Vec<Value>,
    metaclass: Option<ClassId>,
    frozen: bool,
}

impl Instance {
    pub fn metaclass(&self) -> Option<ClassId> {
        self.metaclass
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// The object-model registry: an arena of class-like nodes plus the
/// instance store. One graph is one isolated runtime universe; nothing
/// here is process-global.
pub struct ObjectGraph {
    nodes: Vec<ClassNode>,
    instances: Vec<Instance>,
    /// Global mutation counter. Bumped with every splice or table
    /// mutation; cached-lookup consumers detect staleness with a single
    /// atomic load, without taking the host's lock.
    epoch: AtomicU64,
    /// Root of the class hierarchy (no superclass).
    pub root_class: ClassId,
    /// Default superclass for user classes; owns the top-level constants.
    pub object_class: ClassId,
    pub module_class: ClassId,
    /// Class of all classes; the metaclass chain bottoms out here.
    pub class_class: ClassId,
}

impl ObjectGraph {
    /// Bootstrap the well-known hierarchy and its metaclasses.
    pub fn new(symbols: &mut SymbolTable) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            instances: Vec::new(),
            epoch: AtomicU64::new(0),
            root_class: ClassId(0),
            object_class: ClassId(0),
            module_class: ClassId(0),
            class_class: ClassId(0),
        };

        let root_name = symbols.intern("BasicObject");
        let object_name = symbols.intern("Object");
        let module_name = symbols.intern("Module");
        let class_name = symbols.intern("Class");

        let root = graph.alloc_node(ClassKind::Class, Some(root_name), None);
        let object = graph.alloc_node(ClassKind::Class, Some(object_name), Some(root));
        let module = graph.alloc_node(ClassKind::Class, Some(module_name), Some(object));
        let class = graph.alloc_node(ClassKind::Class, Some(class_name), Some(module));

        graph.root_class = root;
        graph.object_class = object;
        graph.module_class = module;
        graph.class_class = class;

        // Root first so each metaclass finds its superclass's metaclass.
        for id in [root, object, module, class] {
            graph.make_metaclass_for(id);
        }

        for (name, id) in [
            (root_name, root),
            (object_name, object),
            (module_name, module),
            (class_name, class),
        ] {
            graph.nodes[object.0 as usize]
                .constants
                .insert(name, Value::Class(id));
        }

        graph
    }

    fn alloc_node(
        &mut self,
        kind: ClassKind,
        name: Option<SymbolId>,
        superclass: Option<ClassId>,
    ) -> ClassId {
        let id = ClassId(self.nodes.len() as u32);
        self.nodes.push(ClassNode {
            kind,
            name,
            superclass,
            methods: MethodTable::new(),
            constants: HashMap::default(),
            autoloads: HashMap::default(),
            ivars: VariableTable::new(),
            metaclass: None,
            attached: None,
            origin: None,
            table_from: None,
            method_location: id,
            including: HashSet::default(),
            generation: 0,
            frozen: false,
        });
        id
    }

    //
    // ---- accessors ----
    //

    /// Get a node; panics on a stale id (ids are never reused).
    pub fn node(&self, id: ClassId) -> &ClassNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, id: ClassId) -> ClassKind {
        self.node(id).kind
    }

    pub fn name(&self, id: ClassId) -> Option<SymbolId> {
        self.node(id).name
    }

    /// Ancestor identity: proxies stand for their origin.
    pub fn delegate(&self, id: ClassId) -> ClassId {
        self.node(id).origin.unwrap_or(id)
    }

    /// Raw ancestor pointer, proxies included. Traversal order.
    pub fn raw_superclass(&self, id: ClassId) -> Option<ClassId> {
        self.node(id).superclass
    }

    /// User-visible superclass: first non-proxy node up the chain.
    pub fn superclass(&self, id: ClassId) -> Option<ClassId> {
        let mut cur = self.node(id).superclass;
        while let Some(s) = cur {
            if !self.node(s).kind.is_proxy() {
                return Some(s);
            }
            cur = self.node(s).superclass;
        }
        None
    }

    pub fn metaclass_of(&self, id: ClassId) -> Option<ClassId> {
        self.node(id).metaclass
    }

    pub fn attached_value(&self, id: ClassId) -> Option<Value> {
        self.node(id).attached
    }

    pub fn method_location(&self, id: ClassId) -> ClassId {
        self.node(id).method_location
    }

    pub fn is_frozen(&self, id: ClassId) -> bool {
        self.node(id).frozen
    }

    /// The node whose method-table slot `id` exposes during traversal.
    /// A class visits its own slot (refinement markers live there after a
    /// prepend); an include proxy resolves to the table it wrapped.
    pub fn table_node(&self, id: ClassId) -> ClassId {
        let node = self.node(id);
        match node.kind {
            ClassKind::IncludedProxy => node.table_from.or(node.origin).unwrap_or(id),
            _ => id,
        }
    }

    /// Method table seen at `id`'s position in the ancestor chain.
    pub fn method_table(&self, id: ClassId) -> &MethodTable {
        &self.node(self.table_node(id)).methods
    }

    /// Table that local definitions on `id` land in.
    pub fn local_methods(&self, id: ClassId) -> &MethodTable {
        &self.node(self.write_target(id)).methods
    }

    /// Modules included anywhere in `id`'s chain, most recent first.
    pub fn included_modules(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut cur = self.node(id).superclass;
        while let Some(p) = cur {
            let node = self.node(p);
            if node.kind == ClassKind::IncludedProxy {
                let dele = self.delegate(p);
                if self.node(dele).kind == ClassKind::Module {
                    out.push(dele);
                }
            }
            cur = node.superclass;
        }
        out
    }

    //
    // ---- mutation counters ----
    //

    /// Global mutation counter; monotonic, readable without a lock.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Per-node counter for memoized linearizations.
    pub fn generation(&self, id: ClassId) -> u64 {
        self.node(self.delegate(id)).generation
    }

    fn bump(&mut self, id: ClassId) {
        self.epoch.fetch_add(1, Ordering::Release);
        let dele = self.delegate(id);
        self.nodes[dele.0 as usize].generation += 1;
        let dependents: Vec<ClassId> = self.nodes[dele.0 as usize]
            .including
            .iter()
            .copied()
            .collect();
        for dep in dependents {
            self.nodes[dep.0 as usize].generation += 1;
        }
    }

    fn check_mutable(&self, id: ClassId) -> Result<(), ModelError> {
        let node = self.node(id);
        if node.frozen {
            return Err(ModelError::Frozen {
                what: node.kind.label(),
            });
        }
        Ok(())
    }

    pub fn freeze(&mut self, id: ClassId) {
        self.nodes[id.0 as usize].frozen = true;
    }

    //
    // ---- class / module construction ----
    //

    /// Define a class. The superclass must be a real class: proxies,
    /// metaclasses and modules are rejected before any state changes.
    pub fn define_class(
        &mut self,
        name: SymbolId,
        superclass: ClassId,
    ) -> Result<ClassId, ModelError> {
        match self.node(superclass).kind {
            ClassKind::Class => {}
            other => {
                return Err(ModelError::InvalidSuperclass {
                    actual: other.label(),
                })
            }
        }
        let id = self.alloc_node(ClassKind::Class, Some(name), Some(superclass));
        self.make_metaclass_for(id);
        let object = self.object_class;
        self.nodes[object.0 as usize]
            .constants
            .insert(name, Value::Class(id));
        self.bump(object);
        debug!(class = id.0, superclass = superclass.0, "defined class");
        Ok(id)
    }

    /// Define a module. Its metaclass is created on demand.
    pub fn define_module(&mut self, name: SymbolId) -> ClassId {
        let id = self.alloc_node(ClassKind::Module, Some(name), None);
        let object = self.object_class;
        self.nodes[object.0 as usize]
            .constants
            .insert(name, Value::Class(id));
        self.bump(object);
        debug!(module = id.0, "defined module");
        id
    }

    /// Re-point a class's superclass. Rejected before mutation when the
    /// target is not a real class or the change would close a cycle.
    pub fn set_superclass(
        &mut self,
        class: ClassId,
        new_super: ClassId,
    ) -> Result<(), ModelError> {
        self.check_mutable(class)?;
        match self.node(new_super).kind {
            ClassKind::Class => {}
            other => {
                return Err(ModelError::InvalidSuperclass {
                    actual: other.label(),
                })
            }
        }
        if new_super == class || self.hierarchy_contains(new_super, class) {
            return Err(ModelError::CyclicSuperclass);
        }
        // keep spliced proxies: re-point below the proxy chain
        let mut anchor = class;
        while let Some(s) = self.node(anchor).superclass {
            if self.node(s).kind.is_proxy() {
                anchor = s;
            } else {
                break;
            }
        }
        self.nodes[anchor.0 as usize].superclass = Some(new_super);
        self.bump(class);
        Ok(())
    }

    /// Is `target` (by origin identity) anywhere in `start`'s chain?
    pub fn hierarchy_contains(&self, start: ClassId, target: ClassId) -> bool {
        let want = self.delegate(target);
        let mut cur = Some(start);
        while let Some(id) = cur {
            if self.delegate(id) == want {
                return true;
            }
            cur = self.node(id).superclass;
        }
        false
    }

    //
    // ---- metaclasses ----
    //

    /// Get or create the singleton class of a class-like node.
    /// Idempotent; fails fast on proxy kinds.
    pub fn make_metaclass(&mut self, id: ClassId) -> Result<ClassId, ModelError> {
        let kind = self.node(id).kind;
        if kind.is_proxy() {
            return Err(ModelError::CantDefineSingleton { what: kind.label() });
        }
        Ok(self.make_metaclass_for(id))
    }

    fn make_metaclass_for(&mut self, id: ClassId) -> ClassId {
        if let Some(meta) = self.node(id).metaclass {
            return meta;
        }
        // The metaclass hierarchy mirrors the class hierarchy: the
        // metaclass's superclass is the superclass's metaclass. Modules
        // hang under Module's metaclass; the root bottoms out at the
        // class of all classes so lookups never fall off the chain.
        let super_meta = match self.node(id).kind {
            ClassKind::Module => {
                let module_class = self.module_class;
                self.make_metaclass_for(module_class)
            }
            _ => match self.superclass(id) {
                Some(s) => self.make_metaclass_for(s),
                None => self.class_class,
            },
        };
        let meta = self.alloc_node(ClassKind::Metaclass, None, Some(super_meta));
        self.nodes[meta.0 as usize].attached = Some(Value::Class(id));
        // A metaclass is its own metaclass; singleton chains terminate
        // here instead of diverging.
        self.nodes[meta.0 as usize].metaclass = Some(meta);
        self.nodes[id.0 as usize].metaclass = Some(meta);
        debug!(node = id.0, metaclass = meta.0, "created metaclass");
        meta
    }

    /// Singleton class of an arbitrary value. One per value, ever.
    pub fn singleton_class_of(&mut self, value: Value) -> Result<ClassId, ModelError> {
        match value {
            Value::Class(c) => self.make_metaclass(c),
            Value::Instance(i) => {
                let inst = &self.instances[i.0 as usize];
                if let Some(meta) = inst.metaclass {
                    return Ok(meta);
                }
                let class = inst.class;
                let frozen = inst.frozen;
                let meta = self.alloc_node(ClassKind::Metaclass, None, Some(class));
                self.nodes[meta.0 as usize].attached = Some(Value::Instance(i));
                self.nodes[meta.0 as usize].metaclass = Some(meta);
                self.nodes[meta.0 as usize].frozen = frozen;
                self.instances[i.0 as usize].metaclass = Some(meta);
                debug!(instance = i.0, metaclass = meta.0, "created singleton class");
                Ok(meta)
            }
            other => Err(ModelError::CantDefineSingleton {
                what: other.type_name(),
            }),
        }
    }

    //
    // ---- method tables ----
    //

    fn write_target(&self, id: ClassId) -> ClassId {
        let node = self.node(id);
        match node.kind {
            // writes pass through to the wrapped table
            ClassKind::IncludedProxy => self.table_node(id),
            ClassKind::PrependedProxy => id,
            _ => node.method_location,
        }
    }

    /// Install a method. Definitions on a prepended class land in its
    /// relocated table, below the prepended modules; definitions on a
    /// proxy write through to the wrapped table. The entry's owner is
    /// stamped with the defining node's identity.
    pub fn add_method(
        &mut self,
        id: ClassId,
        name: SymbolId,
        mut entry: MethodEntry,
    ) -> Result<(), ModelError> {
        self.check_mutable(id)?;
        let target = self.write_target(id);
        entry.owner = self.delegate(id);
        self.nodes[target.0 as usize].methods.insert(name, entry);
        self.bump(id);
        trace!(node = id.0, name = name.0, "added method");
        Ok(())
    }

    /// Install a refinement marker on the node's own slot. The marker
    /// wraps any plain local definition so it can be restored; it stays
    /// at the class's chain position across prepends.
    pub fn add_refined_method(
        &mut self,
        id: ClassId,
        name: SymbolId,
        visibility: Visibility,
    ) -> Result<(), ModelError> {
        self.check_mutable(id)?;
        let owner = self.delegate(id);
        let slot = owner.0 as usize;
        let orig = match self.nodes[slot].methods.remove(name) {
            Some(existing) if existing.is_refined() => {
                self.nodes[slot].methods.insert(name, existing);
                self.bump(id);
                return Ok(());
            }
            other => other.map(Box::new),
        };
        self.nodes[slot].methods.insert(
            name,
            MethodEntry {
                kind: MethodKind::Refined { orig },
                visibility,
                owner,
            },
        );
        self.bump(id);
        trace!(node = id.0, name = name.0, "added refinement marker");
        Ok(())
    }

    /// `undef`: installs a tombstone that stops lookup with "not found"
    /// even when an ancestor defines the name.
    pub fn undef_method(&mut self, id: ClassId, name: SymbolId) -> Result<(), ModelError> {
        let owner = self.delegate(id);
        self.add_method(
            id,
            name,
            MethodEntry {
                kind: MethodKind::Undefined,
                visibility: Visibility::Public,
                owner,
            },
        )
    }

    /// Remove a local definition. Returns false when the name has no
    /// local entry (ancestor definitions are untouched).
    pub fn remove_method(&mut self, id: ClassId, name: SymbolId) -> Result<bool, ModelError> {
        self.check_mutable(id)?;
        let target = self.write_target(id);
        let removed = self.nodes[target.0 as usize].methods.remove(name).is_some();
        if removed {
            self.bump(id);
            trace!(node = id.0, name = name.0, "removed method");
        }
        Ok(removed)
    }

    /// Alias `new_name` to the entry `old_name` resolves to right now.
    /// Returns false when nothing resolves.
    pub fn alias_method(
        &mut self,
        id: ClassId,
        new_name: SymbolId,
        old_name: SymbolId,
    ) -> Result<bool, ModelError> {
        self.check_mutable(id)?;
        let resolved = crate::lookup::resolve_method(self, id, old_name).cloned();
        let Some(entry) = resolved else {
            return Ok(false);
        };
        let Some(body) = entry.body() else {
            return Ok(false);
        };
        let owner = self.delegate(id);
        self.add_method(
            id,
            new_name,
            MethodEntry {
                kind: MethodKind::Alias {
                    original: old_name,
                    body,
                },
                visibility: entry.visibility,
                owner,
            },
        )?;
        Ok(true)
    }

    //
    // ---- constants ----
    //

    pub fn set_constant(
        &mut self,
        id: ClassId,
        name: SymbolId,
        value: Value,
    ) -> Result<(), ModelError> {
        self.check_mutable(id)?;
        let owner = self.delegate(id);
        self.nodes[owner.0 as usize].constants.insert(name, value);
        self.bump(id);
        Ok(())
    }

    pub fn remove_constant(
        &mut self,
        id: ClassId,
        name: SymbolId,
    ) -> Result<Option<Value>, ModelError> {
        self.check_mutable(id)?;
        let owner = self.delegate(id);
        let removed = self.nodes[owner.0 as usize].constants.remove(&name);
        if removed.is_some() {
            self.bump(id);
        }
        Ok(removed)
    }

    /// Register an autoload: the constant resolves to a feature string
    /// the caller loads on first touch.
    pub fn define_autoload(
        &mut self,
        id: ClassId,
        name: SymbolId,
        feature: &str,
    ) -> Result<(), ModelError> {
        self.check_mutable(id)?;
        let owner = self.delegate(id);
        self.nodes[owner.0 as usize]
            .autoloads
            .insert(name, feature.to_string());
        self.bump(id);
        Ok(())
    }

    /// Local constant read; chain-walking lookup lives in `lookup`.
    pub fn constant_get(&self, id: ClassId, name: SymbolId) -> Option<Value> {
        self.node(self.delegate(id)).constants.get(&name).copied()
    }

    pub fn autoload_get(&self, id: ClassId, name: SymbolId) -> Option<&str> {
        self.node(self.delegate(id))
            .autoloads
            .get(&name)
            .map(String::as_str)
    }

    //
    // ---- mixins ----
    //

    fn check_module_arg(&self, module: ClassId) -> Result<(), ModelError> {
        let kind = self.node(module).kind;
        if kind != ClassKind::Module {
            return Err(ModelError::WrongArgumentType {
                actual: kind.label(),
                expected: "Module",
            });
        }
        Ok(())
    }

    /// Is the module (by origin identity) already in `class`'s prepend
    /// region, between the node and its relocated table?
    pub fn has_module_in_prepends(&self, class: ClassId, module: ClassId) -> bool {
        let want = self.delegate(module);
        let stop = self.node(class).method_location;
        let mut cur = class;
        while cur != stop {
            if self.delegate(cur) == want {
                return true;
            }
            match self.node(cur).superclass {
                Some(s) => cur = s,
                None => break,
            }
        }
        false
    }

    /// Include a module below the class's own methods. Idempotent with
    /// respect to lookup order; transitively splices the module's own
    /// mixins preserving their order.
    pub fn include_module(&mut self, class: ClassId, module: ClassId) -> Result<(), ModelError> {
        self.check_mutable(class)?;
        self.check_module_arg(module)?;
        if self.delegate(class) == self.delegate(module) {
            return Err(ModelError::CyclicInclude);
        }
        if self.has_module_in_prepends(class, module) {
            self.bump(class);
            return Ok(());
        }
        self.splice_mixins(class, module, false)?;
        self.bump(class);
        trace!(class = class.0, module = module.0, "included module");
        Ok(())
    }

    /// Prepend a module above the class's own methods. The first prepend
    /// relocates the class's method table onto a `PrependedProxy`; the
    /// module chain is spliced between the class and that proxy.
    pub fn prepend_module(&mut self, class: ClassId, module: ClassId) -> Result<(), ModelError> {
        self.check_mutable(class)?;
        self.check_module_arg(module)?;
        if self.delegate(class) == self.delegate(module) {
            return Err(ModelError::CyclicInclude);
        }
        if self.has_module_in_prepends(class, module) {
            self.bump(class);
            return Ok(());
        }
        // validate the whole gathered chain before relocating anything
        let class_delegate = self.delegate(class);
        if self
            .gather_mixins(module)
            .iter()
            .any(|&(dele, _)| dele == class_delegate)
        {
            return Err(ModelError::CyclicInclude);
        }
        self.ensure_prepend_origin(class);
        self.splice_mixins(class, module, true)?;
        self.bump(class);
        trace!(class = class.0, module = module.0, "prepended module");
        Ok(())
    }

    /// The module's effective chain as (origin identity, table slot)
    /// pairs, in lookup order: its prepended modules, the module itself,
    /// then its includes. Prepend headers are skipped; their table shows
    /// up at the relocated proxy's position.
    fn gather_mixins(&self, module: ClassId) -> Vec<(ClassId, ClassId)> {
        let mut out = Vec::new();
        let mut cur = Some(module);
        while let Some(id) = cur {
            let node = self.node(id);
            if node.kind != ClassKind::Module && !node.kind.is_proxy() {
                break;
            }
            if node.method_location == id {
                out.push((self.delegate(id), self.table_node(id)));
            }
            cur = node.superclass;
        }
        out
    }

    /// Relocate the class's method table onto a fresh `PrependedProxy`
    /// and re-point `method_location`. Refinement markers migrate back
    /// onto the class so refinement-aware lookup still triggers at the
    /// class's chain position. No-op when already relocated.
    fn ensure_prepend_origin(&mut self, class: ClassId) {
        if self.node(class).method_location != class {
            return;
        }
        let old_super = self.node(class).superclass;
        let moved = std::mem::take(&mut self.nodes[class.0 as usize].methods);
        let proxy = self.alloc_node(ClassKind::PrependedProxy, None, old_super);
        self.nodes[proxy.0 as usize].origin = Some(class);
        self.nodes[proxy.0 as usize].methods = moved;

        let marker_names: Vec<SymbolId> = self.nodes[proxy.0 as usize]
            .methods
            .iter()
            .filter(|(_, entry)| entry.is_refined())
            .map(|(name, _)| name)
            .collect();
        for name in marker_names {
            let Some(entry) = self.nodes[proxy.0 as usize].methods.remove(name) else {
                continue;
            };
            match entry.kind {
                MethodKind::Refined { orig: Some(orig) } => {
                    // the real definition stays below the prepends; the
                    // marker returns to the class
                    self.nodes[proxy.0 as usize].methods.insert(name, *orig);
                    self.nodes[class.0 as usize].methods.insert(
                        name,
                        MethodEntry {
                            kind: MethodKind::Refined { orig: None },
                            visibility: entry.visibility,
                            owner: entry.owner,
                        },
                    );
                }
                _ => {
                    self.nodes[class.0 as usize].methods.insert(name, entry);
                }
            }
        }

        // include proxies that exposed this table keep seeing it
        for i in 0..self.nodes.len() {
            if self.nodes[i].kind == ClassKind::IncludedProxy
                && self.nodes[i].table_from == Some(class)
            {
                self.nodes[i].table_from = Some(proxy);
            }
        }

        self.nodes[class.0 as usize].superclass = Some(proxy);
        self.nodes[class.0 as usize].method_location = proxy;
        trace!(class = class.0, proxy = proxy.0, "relocated method table");
    }

    fn splice_mixins(
        &mut self,
        class: ClassId,
        module: ClassId,
        prepend: bool,
    ) -> Result<(), ModelError> {
        let mixins = self.gather_mixins(module);
        let class_delegate = self.delegate(class);
        if mixins.iter().any(|&(dele, _)| dele == class_delegate) {
            return Err(ModelError::CyclicInclude);
        }

        let mut insertion_point = if prepend {
            class
        } else {
            self.node(class).method_location
        };
        // prepend splices stay inside the prepend region; the duplicate
        // scan must not look past the relocated table, or a module
        // already included below would block its own prepend
        let scan_stop = if prepend {
            Some(self.node(class).method_location)
        } else {
            None
        };

        'mixins: for (dele, table_src) in mixins {
            let mut superclass_seen = false;
            let mut cursor = if prepend {
                self.node(class).superclass
            } else {
                self.node(self.node(class).method_location).superclass
            };
            while let Some(p) = cursor {
                if Some(p) == scan_stop {
                    break;
                }
                let proxy_here = self.node(p).kind.is_proxy();
                if proxy_here && self.delegate(p) == dele {
                    // already spliced; before any real superclass it
                    // becomes the new insertion point
                    if !superclass_seen {
                        insertion_point = p;
                    }
                    continue 'mixins;
                }
                if !proxy_here {
                    superclass_seen = true;
                }
                cursor = self.node(p).superclass;
            }

            let old_super = self.node(insertion_point).superclass;
            let proxy = self.alloc_node(ClassKind::IncludedProxy, None, old_super);
            self.nodes[proxy.0 as usize].origin = Some(dele);
            self.nodes[proxy.0 as usize].table_from = Some(table_src);
            // single-pointer publish of the fully built proxy
            self.nodes[insertion_point.0 as usize].superclass = Some(proxy);
            self.nodes[dele.0 as usize].including.insert(class);
            trace!(
                class = class.0,
                module = dele.0,
                proxy = proxy.0,
                "spliced include proxy"
            );
            insertion_point = proxy;
        }
        Ok(())
    }

    //
    // ---- instances ----
    //

    /// Allocate an instance. Gated: metaclasses and proxies are never
    /// instantiable, and modules have no allocator.
    pub fn allocate(&mut self, class: ClassId) -> Result<InstanceId, ModelError> {
        match self.node(class).kind {
            ClassKind::Class => {}
            ClassKind::Metaclass => return Err(ModelError::VirtualClass),
            other => {
                return Err(ModelError::AllocatorUndefined {
                    what: other.label(),
                })
            }
        }
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(Instance {
            class,
            ivars: Vec::new(),
            metaclass: None,
            frozen: false,
        });
        Ok(id)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0 as usize)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Effective class for dispatch: the singleton class when the value
    /// has one, else the allocation class.
    pub fn class_of(&self, id: InstanceId) -> ClassId {
        let inst = &self.instances[id.0 as usize];
        inst.metaclass.unwrap_or(inst.class)
    }

    pub fn freeze_instance(&mut self, id: InstanceId) {
        let meta = {
            let inst = &mut self.instances[id.0 as usize];
            inst.frozen = true;
            inst.metaclass
        };
        if let Some(meta) = meta {
            self.nodes[meta.0 as usize].frozen = true;
        }
    }

    //
    // ---- instance variables ----
    //

    /// Accessor factory against the node's effective table owner
    /// (proxies resolve to their origin). Idempotent per name.
    pub fn ivar_accessor(&mut self, class: ClassId, name: SymbolId) -> VariableAccessor {
        let owner = self.delegate(class);
        let index = self.nodes[owner.0 as usize].ivars.reserve(name);
        VariableAccessor { owner, name, index }
    }

    pub fn ivar_get(&self, instance: InstanceId, accessor: &VariableAccessor) -> Value {
        accessor.get(&self.instances[instance.0 as usize].ivars)
    }

    pub fn ivar_set(
        &mut self,
        instance: InstanceId,
        accessor: &VariableAccessor,
        value: Value,
    ) -> Result<(), ModelError> {
        let inst = &mut self.instances[instance.0 as usize];
        if inst.frozen {
            return Err(ModelError::Frozen { what: "Object" });
        }
        accessor.set(&mut inst.ivars, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MethodBody;

    fn setup() -> (SymbolTable, ObjectGraph) {
        let mut symbols = SymbolTable::new();
        let graph = ObjectGraph::new(&mut symbols);
        (symbols, graph)
    }

    fn entry(body: u32) -> MethodEntry {
        MethodEntry::define(MethodBody(body), Visibility::Public, ClassId(0))
    }

    #[test]
    fn test_bootstrap_hierarchy() {
        let (_, graph) = setup();
        assert_eq!(graph.superclass(graph.root_class), None);
        assert_eq!(graph.superclass(graph.object_class), Some(graph.root_class));
        assert_eq!(graph.superclass(graph.module_class), Some(graph.object_class));
        assert_eq!(graph.superclass(graph.class_class), Some(graph.module_class));
    }

    #[test]
    fn test_bootstrap_metaclass_chain() {
        let (_, graph) = setup();
        let root_meta = graph.metaclass_of(graph.root_class).unwrap();
        let object_meta = graph.metaclass_of(graph.object_class).unwrap();
        // the root's metaclass bottoms out at the class of all classes
        assert_eq!(graph.superclass(root_meta), Some(graph.class_class));
        assert_eq!(graph.superclass(object_meta), Some(root_meta));
        // metaclasses are their own metaclass
        assert_eq!(graph.metaclass_of(root_meta), Some(root_meta));
    }

    #[test]
    fn test_define_class_rejects_bad_superclass() {
        let (mut symbols, mut graph) = setup();
        let name = symbols.intern("Widget");
        let module = graph.define_module(symbols.intern("Helper"));
        let err = graph.define_class(name, module).unwrap_err();
        assert_eq!(err, ModelError::InvalidSuperclass { actual: "Module" });

        let meta = graph.metaclass_of(graph.object_class).unwrap();
        let err = graph.define_class(name, meta).unwrap_err();
        assert_eq!(err, ModelError::InvalidSuperclass { actual: "MetaClass" });
    }

    #[test]
    fn test_define_class_registers_constant() {
        let (mut symbols, mut graph) = setup();
        let name = symbols.intern("Widget");
        let class = graph.define_class(name, graph.object_class).unwrap();
        assert_eq!(
            graph.constant_get(graph.object_class, name),
            Some(Value::Class(class))
        );
    }

    #[test]
    fn test_make_metaclass_idempotent() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let a = graph.make_metaclass(class).unwrap();
        let b = graph.make_metaclass(class).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_metaclass_hierarchy_mirrors_classes() {
        let (mut symbols, mut graph) = setup();
        let parent = graph
            .define_class(symbols.intern("Parent"), graph.object_class)
            .unwrap();
        let child = graph.define_class(symbols.intern("Child"), parent).unwrap();
        let child_meta = graph.metaclass_of(child).unwrap();
        let parent_meta = graph.metaclass_of(parent).unwrap();
        assert_eq!(graph.superclass(child_meta), Some(parent_meta));
    }

    #[test]
    fn test_metaclass_fixed_point() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let meta = graph.make_metaclass(class).unwrap();
        let meta_meta = graph.metaclass_of(meta).unwrap();
        assert_eq!(meta_meta, meta);
    }

    #[test]
    fn test_metaclass_on_proxy_fails() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let module = graph.define_module(symbols.intern("Helper"));
        graph.include_module(class, module).unwrap();
        let proxy = graph.raw_superclass(class).unwrap();
        assert_eq!(graph.kind(proxy), ClassKind::IncludedProxy);
        let err = graph.make_metaclass(proxy).unwrap_err();
        assert_eq!(
            err,
            ModelError::CantDefineSingleton {
                what: "IncludedProxy"
            }
        );
    }

    #[test]
    fn test_singleton_class_of_instance() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let obj = graph.allocate(class).unwrap();
        let a = graph.singleton_class_of(Value::Instance(obj)).unwrap();
        let b = graph.singleton_class_of(Value::Instance(obj)).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.kind(a), ClassKind::Metaclass);
        assert_eq!(graph.attached_value(a), Some(Value::Instance(obj)));
        assert_eq!(graph.superclass(a), Some(class));
        assert_eq!(graph.class_of(obj), a);
    }

    #[test]
    fn test_singleton_class_of_integer_fails() {
        let (_, mut graph) = setup();
        let err = graph.singleton_class_of(Value::Integer(3)).unwrap_err();
        assert_eq!(err, ModelError::CantDefineSingleton { what: "Integer" });
    }

    #[test]
    fn test_allocate_gating() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        assert!(graph.allocate(class).is_ok());

        let meta = graph.make_metaclass(class).unwrap();
        assert_eq!(graph.allocate(meta).unwrap_err(), ModelError::VirtualClass);

        let module = graph.define_module(symbols.intern("Helper"));
        assert_eq!(
            graph.allocate(module).unwrap_err(),
            ModelError::AllocatorUndefined { what: "Module" }
        );

        graph.include_module(class, module).unwrap();
        let proxy = graph.raw_superclass(class).unwrap();
        assert_eq!(
            graph.allocate(proxy).unwrap_err(),
            ModelError::AllocatorUndefined {
                what: "IncludedProxy"
            }
        );
    }

    #[test]
    fn test_include_rejects_non_module() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let other = graph
            .define_class(symbols.intern("Other"), graph.object_class)
            .unwrap();
        let err = graph.include_module(class, other).unwrap_err();
        assert_eq!(
            err,
            ModelError::WrongArgumentType {
                actual: "Class",
                expected: "Module"
            }
        );
    }

    #[test]
    fn test_cyclic_include_detected() {
        let (mut symbols, mut graph) = setup();
        let m1 = graph.define_module(symbols.intern("M1"));
        let m2 = graph.define_module(symbols.intern("M2"));
        graph.include_module(m1, m2).unwrap();
        assert_eq!(
            graph.include_module(m2, m1).unwrap_err(),
            ModelError::CyclicInclude
        );
        assert_eq!(
            graph.include_module(m1, m1).unwrap_err(),
            ModelError::CyclicInclude
        );
    }

    #[test]
    fn test_frozen_rejects_mutation() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let module = graph.define_module(symbols.intern("Helper"));
        let name = symbols.intern("poke");
        graph.freeze(class);
        assert_eq!(
            graph.add_method(class, name, entry(1)).unwrap_err(),
            ModelError::Frozen { what: "Class" }
        );
        assert_eq!(
            graph.include_module(class, module).unwrap_err(),
            ModelError::Frozen { what: "Class" }
        );
        assert_eq!(
            graph.prepend_module(class, module).unwrap_err(),
            ModelError::Frozen { what: "Class" }
        );
        assert_eq!(
            graph
                .set_constant(class, symbols.intern("X"), Value::Nil)
                .unwrap_err(),
            ModelError::Frozen { what: "Class" }
        );
    }

    #[test]
    fn test_set_superclass_rejects_cycle() {
        let (mut symbols, mut graph) = setup();
        let parent = graph
            .define_class(symbols.intern("Parent"), graph.object_class)
            .unwrap();
        let child = graph.define_class(symbols.intern("Child"), parent).unwrap();
        assert_eq!(
            graph.set_superclass(parent, child).unwrap_err(),
            ModelError::CyclicSuperclass
        );
        assert_eq!(
            graph.set_superclass(parent, parent).unwrap_err(),
            ModelError::CyclicSuperclass
        );
        // graph unchanged
        assert_eq!(graph.superclass(child), Some(parent));
        assert_eq!(graph.superclass(parent), Some(graph.object_class));
    }

    #[test]
    fn test_set_superclass_keeps_mixins() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let module = graph.define_module(symbols.intern("Helper"));
        let other = graph
            .define_class(symbols.intern("Base"), graph.object_class)
            .unwrap();
        graph.include_module(class, module).unwrap();
        graph.set_superclass(class, other).unwrap();
        assert_eq!(graph.superclass(class), Some(other));
        assert!(graph.hierarchy_contains(class, module));
    }

    #[test]
    fn test_epoch_moves_on_mutation() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let name = symbols.intern("poke");
        let before = graph.epoch();
        graph.add_method(class, name, entry(1)).unwrap();
        assert!(graph.epoch() > before);
    }

    #[test]
    fn test_generation_ripples_to_includers() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let module = graph.define_module(symbols.intern("Helper"));
        graph.include_module(class, module).unwrap();
        let before = graph.generation(class);
        graph
            .add_method(module, symbols.intern("helped"), entry(1))
            .unwrap();
        assert!(graph.generation(class) > before);
    }

    #[test]
    fn test_ivar_accessor_resolves_proxy_owner() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let module = graph.define_module(symbols.intern("Helper"));
        graph.include_module(class, module).unwrap();
        let proxy = graph.raw_superclass(class).unwrap();
        let name = symbols.intern("@cache");
        let via_proxy = graph.ivar_accessor(proxy, name);
        let via_module = graph.ivar_accessor(module, name);
        assert_eq!(via_proxy, via_module);
        assert_eq!(via_proxy.owner, module);
    }

    #[test]
    fn test_ivar_roundtrip() {
        let (mut symbols, mut graph) = setup();
        let class = graph
            .define_class(symbols.intern("Widget"), graph.object_class)
            .unwrap();
        let obj = graph.allocate(class).unwrap();
        let accessor = graph.ivar_accessor(class, symbols.intern("@size"));
        assert_eq!(graph.ivar_get(obj, &accessor), Value::Nil);
        graph.ivar_set(obj, &accessor, Value::Integer(4)).unwrap();
        assert_eq!(graph.ivar_get(obj, &accessor), Value::Integer(4));

        graph.freeze_instance(obj);
        assert_eq!(
            graph.ivar_set(obj, &accessor, Value::Nil).unwrap_err(),
            ModelError::Frozen { what: "Object" }
        );
    }
}
