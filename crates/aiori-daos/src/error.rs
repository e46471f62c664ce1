use std::panic::Location;

use aiori_engine::{EngineError, EngineResult};
use aiori_group::{GroupError, GroupResult};
use aiori_types::{ObjectIdentity, Rank, TypeError};

use crate::transfer::Access;

/// Errors from backend operations. All of them are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum DaosError {
    /// Missing or malformed configuration, or an operation called out of
    /// order.
    #[error("{0}")]
    Usage(String),

    /// A malformed identifier or rank list in the options.
    #[error("invalid option: {0}")]
    Option(#[from] TypeError),

    #[error("DAOS is not initialized!")]
    NotInitialized,

    /// Close or transfer without a bound array.
    #[error("no array is open")]
    NotBound,

    /// A storage engine call returned a negative status.
    #[error("{call} failed ({status}): {source}", status = source.status())]
    Engine {
        call: &'static str,
        #[source]
        source: EngineError,
        location: &'static Location<'static>,
    },

    /// A collective step failed; the group view is no longer consistent.
    #[error("{step}: {source}")]
    Collective {
        step: &'static str,
        #[source]
        source: GroupError,
        location: &'static Location<'static>,
    },

    /// A follower could not allocate the buffer for a distributed handle.
    #[error("failed to allocate {len}-byte global handle buffer")]
    Alloc {
        len: u64,
        location: &'static Location<'static>,
    },

    /// The array was not created by this backend.
    #[error("Invalid DAOS Array object {oid}: cell size {cell_size}")]
    InvalidArray { oid: ObjectIdentity, cell_size: u64 },

    /// The engine moved fewer bytes than requested.
    #[error("short {access}: moved {moved} of {expected} bytes at offset {offset}")]
    ShortTransfer {
        access: Access,
        offset: u64,
        expected: u64,
        moved: u64,
    },
}

impl DaosError {
    /// Numeric status for the diagnostic line.
    pub fn status(&self) -> i32 {
        match self {
            Self::Engine { source, .. } => source.status(),
            Self::Collective {
                source: GroupError::Aborted { code, .. },
                ..
            } => *code,
            _ => -1,
        }
    }

    /// Source location of the failing call, where one was recorded.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Engine { location, .. }
            | Self::Collective { location, .. }
            | Self::Alloc { location, .. } => Some(location),
            _ => None,
        }
    }

    /// `true` if this member failed only because another member aborted.
    pub fn is_remote_abort(&self) -> bool {
        matches!(
            self,
            Self::Collective {
                source: GroupError::Aborted { .. },
                ..
            }
        )
    }

    /// The single-line report printed before the group goes down.
    pub fn diagnostic(&self, rank: Rank) -> String {
        match self.location() {
            Some(loc) => format!(
                "ior ERROR ({}:{}): {}: {}: {}",
                loc.file(),
                loc.line(),
                rank,
                self.status(),
                self
            ),
            None => format!("ior ERROR: {}: {}: {}", rank, self.status(), self),
        }
    }
}

/// Result alias for backend operations.
pub type DaosResult<T> = Result<T, DaosError>;

/// Attach the failing call name and caller location to an engine result.
pub trait EngineCallExt<T> {
    fn engine_call(self, call: &'static str) -> DaosResult<T>;
}

impl<T> EngineCallExt<T> for EngineResult<T> {
    #[track_caller]
    fn engine_call(self, call: &'static str) -> DaosResult<T> {
        let location = Location::caller();
        self.map_err(|source| DaosError::Engine {
            call,
            source,
            location,
        })
    }
}

/// Attach the collective step name and caller location to a group result.
pub trait CollectiveResultExt<T> {
    fn collective(self, step: &'static str) -> DaosResult<T>;
}

impl<T> CollectiveResultExt<T> for GroupResult<T> {
    #[track_caller]
    fn collective(self, step: &'static str) -> DaosResult<T> {
        let location = Location::caller();
        self.map_err(|source| DaosError::Collective {
            step,
            source,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_carry_status_and_location() {
        let res: EngineResult<()> = Err(EngineError::NonExistent("array".into()));
        let err = res.engine_call("daos_array_open").unwrap_err();
        assert_eq!(err.status(), -1005);
        let loc = err.location().expect("location recorded");
        assert!(loc.file().ends_with("error.rs"));

        let line = err.diagnostic(Rank(3));
        assert!(line.starts_with("ior ERROR ("), "{line}");
        assert!(line.contains(": 3: -1005: daos_array_open failed"), "{line}");
    }

    #[test]
    fn usage_errors_have_no_location() {
        let err = DaosError::Usage("Invalid pool or container options".into());
        assert_eq!(err.location(), None);
        assert_eq!(
            err.diagnostic(Rank(0)),
            "ior ERROR: 0: -1: Invalid pool or container options"
        );
    }

    #[test]
    fn remote_abort_is_recognized() {
        let res: GroupResult<()> = Err(GroupError::Aborted {
            by: Rank(0),
            code: -1,
        });
        let err = res.collective("barrier").unwrap_err();
        assert!(err.is_remote_abort());
        assert_eq!(err.status(), -1);
        assert!(!DaosError::NotBound.is_remote_abort());
    }

    #[test]
    fn invalid_array_message() {
        let err = DaosError::InvalidArray {
            oid: ObjectIdentity::new(1, 2),
            cell_size: 8,
        };
        assert!(err.to_string().starts_with("Invalid DAOS Array object"));
    }
}
