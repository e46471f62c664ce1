//! DAOS array backend for the IOR benchmark harness.
//!
//! Every process of a benchmark run holds one [`DaosBackend`]. The harness
//! drives it through the [`Aiori`] trait: initialize, create/open a test file
//! by name, transfer bytes at offsets, close, delete, finalize.
//!
//! # Layers
//!
//! - [`ConnectionContext`] -- pool and container handles for the run. The
//!   leader connects (creating the container if absent) and every other rank
//!   receives the handles through the [`HandleCoordinator`].
//! - [`ArraySession`] -- the array object behind the current test file.
//!   Object ids are derived from file names ([`aiori_types::ObjectIdentity`]).
//!   In shared mode only the leader creates or opens; the others import the
//!   leader's handle.
//! - [`TransferEngine`] -- one contiguous extent per read or write.
//!
//! # Errors
//!
//! Nothing is recovered locally. Every operation returns a [`DaosResult`];
//! the caller hands failures to [`fatal::abort_on_error`], which prints the
//! diagnostic and aborts the whole group.

pub mod backend;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod fatal;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{Aiori, DaosBackend, VERSION};
pub use config::{parse_size, DaosOptions, XferHints};
pub use context::ConnectionContext;
pub use coordinator::HandleCoordinator;
pub use error::{CollectiveResultExt, DaosError, DaosResult, EngineCallExt};
pub use fatal::{abort_on_error, run_or_abort};
pub use session::{ArraySession, SessionState};
pub use transfer::{Access, TransferEngine};
