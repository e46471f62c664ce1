use aiori_types::Handle;

/// DER-style status codes. Always negative.
pub mod der {
    pub const DER_NO_PERM: i32 = -1001;
    pub const DER_NO_HDL: i32 = -1002;
    pub const DER_INVAL: i32 = -1003;
    pub const DER_EXIST: i32 = -1004;
    pub const DER_NONEXIST: i32 = -1005;
    pub const DER_NOMEM: i32 = -1009;
    pub const DER_TRUNC: i32 = -1013;
    pub const DER_UNINIT: i32 = -1015;
    pub const DER_IO: i32 = -2001;
    pub const DER_CSUM: i32 = -2021;
}

/// Errors from storage engine calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Operation not allowed by the handle's open mode.
    #[error("permission denied: {0}")]
    NoPermission(String),

    /// The handle is invalid or was issued by another client.
    #[error("invalid handle {0:?}")]
    NoHandle(Handle),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("does not exist: {0}")]
    NonExistent(String),

    #[error("out of memory")]
    NoMemory,

    /// Caller buffer too small for the result.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Engine used before `init` or after the last `fini`.
    #[error("engine not initialized")]
    Uninitialized,

    #[error("I/O error: {0}")]
    Io(String),

    /// A global handle blob failed its integrity check.
    #[error("corrupt global handle: {0}")]
    Corrupt(String),
}

impl EngineError {
    /// Negative status code for diagnostics.
    pub fn status(&self) -> i32 {
        match self {
            Self::NoPermission(_) => der::DER_NO_PERM,
            Self::NoHandle(_) => der::DER_NO_HDL,
            Self::InvalidArgument(_) => der::DER_INVAL,
            Self::Exists(_) => der::DER_EXIST,
            Self::NonExistent(_) => der::DER_NONEXIST,
            Self::NoMemory => der::DER_NOMEM,
            Self::Truncated { .. } => der::DER_TRUNC,
            Self::Uninitialized => der::DER_UNINIT,
            Self::Io(_) => der::DER_IO,
            Self::Corrupt(_) => der::DER_CSUM,
        }
    }

    /// Rebuild an error from a status code received from another process.
    /// Returns `None` for success (zero or positive).
    pub fn from_status(status: i32, what: &str) -> Option<Self> {
        let what = what.to_string();
        let err = match status {
            s if s >= 0 => return None,
            der::DER_NO_PERM => Self::NoPermission(what),
            der::DER_INVAL => Self::InvalidArgument(what),
            der::DER_EXIST => Self::Exists(what),
            der::DER_NONEXIST => Self::NonExistent(what),
            der::DER_NOMEM => Self::NoMemory,
            der::DER_UNINIT => Self::Uninitialized,
            der::DER_CSUM => Self::Corrupt(what),
            other => Self::Io(format!("{what} (status {other})")),
        };
        Some(err)
    }

    pub fn is_nonexistent(&self) -> bool {
        matches!(self, Self::NonExistent(_))
    }
}

/// Result alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;
