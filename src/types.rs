// Garnet core identities and value handles.

use serde::{Deserialize, Serialize};

pub use crate::symbol::SymbolId;

/// Unique identifier for a class-like node (index into the object graph).
/// Stable for the lifetime of the owning graph; doubles as the node's
/// serialization key for marshaling and reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

/// Unique identifier for an allocated instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

/// Handle to an executable method body, owned by the dispatch layer.
/// The object model stores and returns these; it never calls them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodBody(pub u32);

/// A value handle as the object model sees it: enough to identify
/// receivers, metaclass attachments, and constant-table entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Integer(i64),
    Symbol(SymbolId),
    Instance(InstanceId),
    Class(ClassId),
}

impl Value {
    /// Human-readable tag for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Integer(_) => "Integer",
            Value::Symbol(_) => "Symbol",
            Value::Instance(_) => "Object",
            Value::Class(_) => "Class",
        }
    }
}
