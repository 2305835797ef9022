use thiserror::Error;

use crate::types::NativeHandle;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("bad argument #{position} ({expected} expected, got {actual})")]
    TypeMismatch {
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("proxy cache already holds an entry for {0}")]
    StaleCacheEntry(NativeHandle),

    #[error("bad query mode `{0}`")]
    InvalidQueryMode(String),

    #[error("cannot access `{member}`: {reason}")]
    Marshal { member: String, reason: String },

    #[error("cannot load `{name}`: {reason}")]
    Library { name: String, reason: String },
}

/// Failures of the ownership protocol. These never reach scripts; the bridge logs them
/// and degrades to borrowing or leaking the object.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifetimeError {
    #[error("no way to {op} type `{type_name}`")]
    Unsupported { op: &'static str, type_name: String },
}
