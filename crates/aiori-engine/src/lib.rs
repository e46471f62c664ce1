//! Storage engine capabilities for the DAOS array benchmark backend.
//!
//! The backend never talks to a storage client directly; it consumes the
//! [`StorageEngine`] trait, which is the capability set it needs from the
//! engine: pool and container lifecycle, array objects keyed by a 128-bit id,
//! ranged I/O, and handle serialization ([`HandleCodec`]).
//!
//! # Backends
//!
//! - [`InMemoryEngine`] -- one client of an [`InMemoryCluster`]. Several
//!   clients of the same cluster behave like processes attached to the same
//!   servers: handles are private to the client that issued them and must be
//!   shipped as global blobs to be used elsewhere.
//!
//! # Status codes
//!
//! Every [`EngineError`] maps to a negative DER-style status via
//! [`EngineError::status`], which is what diagnostics print.

pub mod error;
pub mod global;
pub mod io;
pub mod memory;
pub mod traits;

pub use error::{der, EngineError, EngineResult};
pub use io::{ArrayIod, ArrayRange, SgList, SgListMut};
pub use memory::{EngineStats, InMemoryCluster, InMemoryEngine};
pub use traits::{HandleCodec, OpenMode, StorageEngine};
