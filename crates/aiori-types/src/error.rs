use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown object class: {0}")]
    UnknownObjectClass(String),

    #[error("invalid rank list {list:?}: {reason}")]
    InvalidRankList { list: String, reason: String },
}
