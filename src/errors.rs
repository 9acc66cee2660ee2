// Garnet error taxonomy.
//
// Every precondition failure in the object model is a typed, synchronous
// error raised before any mutation; lookup misses are represented as
// absent values, never as errors. `ErrorKind` tells the dispatch layer
// which exception class to surface.

use thiserror::Error;

/// The exception class a `ModelError` maps to at the dispatch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TypeError,
    ArgumentError,
    FrozenError,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("wrong argument type {actual} (expected {expected})")]
    WrongArgumentType {
        actual: &'static str,
        expected: &'static str,
    },

    #[error("superclass must be a Class ({actual} given)")]
    InvalidSuperclass { actual: &'static str },

    #[error("cyclic include detected")]
    CyclicInclude,

    #[error("superclass reassignment would create a cyclic hierarchy")]
    CyclicSuperclass,

    #[error("can't create instance of virtual class")]
    VirtualClass,

    #[error("allocator undefined for {what}")]
    AllocatorUndefined { what: &'static str },

    #[error("can't define singleton class for {what}")]
    CantDefineSingleton { what: &'static str },

    #[error("can't modify frozen {what}")]
    Frozen { what: &'static str },

    #[error("can't bind singleton method to a different class")]
    SingletonBindMismatch,

    #[error("bind argument must be an instance of {name}")]
    BindTargetMismatch { name: String },
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::WrongArgumentType { .. }
            | ModelError::InvalidSuperclass { .. }
            | ModelError::VirtualClass
            | ModelError::AllocatorUndefined { .. }
            | ModelError::CantDefineSingleton { .. }
            | ModelError::SingletonBindMismatch
            | ModelError::BindTargetMismatch { .. } => ErrorKind::TypeError,
            ModelError::CyclicInclude | ModelError::CyclicSuperclass => ErrorKind::ArgumentError,
            ModelError::Frozen { .. } => ErrorKind::FrozenError,
        }
    }
}
