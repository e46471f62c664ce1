//! Process-group collectives.
//!
//! The backend needs very little from its group substrate: the caller's rank,
//! the group size, a broadcast from a root, a barrier, and a way to take the
//! whole group down. [`ProcessGroup`] captures exactly that.
//!
//! # Implementations
//!
//! - [`SoloGroup`] -- a group of one; every collective is local.
//! - [`ThreadGroup`] -- ranks are threads of one process sharing a rendezvous.
//!   Used by the driver binary and by multi-rank tests.
//!
//! Every member must enter the same sequence of collectives. There are no
//! timeouts; a member that never arrives blocks the others until the group is
//! aborted.

pub mod error;
pub mod solo;
pub mod thread;
pub mod traits;

pub use error::{GroupError, GroupResult};
pub use solo::SoloGroup;
pub use thread::{ThreadGroup, ThreadMember};
pub use traits::ProcessGroup;
