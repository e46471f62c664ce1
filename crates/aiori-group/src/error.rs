use aiori_types::Rank;

/// Errors from collective operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    /// The group was aborted while (or before) this member waited.
    #[error("group aborted by rank {by} with code {code}")]
    Aborted { by: Rank, code: i32 },

    /// Root and member disagree on the broadcast buffer length.
    #[error("broadcast length mismatch: root sent {expected} bytes, buffer holds {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The named root is not a member of the group.
    #[error("rank {root} is outside a group of {size}")]
    InvalidRoot { root: Rank, size: usize },
}

/// Result alias for collective operations.
pub type GroupResult<T> = Result<T, GroupError>;
