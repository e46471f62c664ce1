//! The one place where a failure turns into a group abort.

use aiori_group::ProcessGroup;
use tracing::{debug, error};

use crate::error::DaosResult;

/// Status every member exits the group with.
pub const ABORT_CODE: i32 = -1;

/// Pass `result` through, aborting the group on error.
///
/// The diagnostic line is logged once, by the member that failed. Members
/// that only saw the abort from another member stay quiet.
pub fn abort_on_error<G, T>(group: &G, result: DaosResult<T>) -> DaosResult<T>
where
    G: ProcessGroup + ?Sized,
{
    if let Err(e) = &result {
        if e.is_remote_abort() {
            debug!(rank = %group.rank(), "{e}");
        } else {
            error!("{}", e.diagnostic(group.rank()));
            group.abort(ABORT_CODE);
        }
    }
    result
}

/// Run `op` and abort the group if it fails.
pub fn run_or_abort<G, T>(group: &G, op: impl FnOnce() -> DaosResult<T>) -> DaosResult<T>
where
    G: ProcessGroup + ?Sized,
{
    abort_on_error(group, op())
}
