//! Foundation types for the DAOS array benchmark backend.
//!
//! Every other crate in the workspace depends on `aiori-types`. Nothing here
//! talks to a storage engine or a process group; these are the plain values
//! that flow between them.
//!
//! # Key Types
//!
//! - [`ObjectIdentity`] — 128-bit object id derived from a test-file name
//! - [`ObjectClass`] — redundancy/striping class stamped into the id
//! - [`Handle`] — opaque local handle to a pool, container, or array
//! - [`ArrayGeometry`] — cell and chunk size of an array object
//! - [`AddressingMode`] — file-per-process vs. single shared file
//! - [`Rank`] / [`RankList`] — process-group and service ranks

pub mod error;
pub mod geometry;
pub mod group;
pub mod handle;
pub mod oid;

pub use error::TypeError;
pub use geometry::{ArrayGeometry, CELL_SIZE, DEFAULT_CHUNK_SIZE, MAX_CHUNK_BYTES};
pub use group::{AddressingMode, Rank, RankList};
pub use handle::{Handle, HandleKind};
pub use oid::{ObjectClass, ObjectIdentity, OidFeatures, OID_NAME_SEED};
