use aiori_types::{ArrayGeometry, Handle, HandleKind, ObjectIdentity, RankList};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::io::{ArrayIod, SgList, SgListMut};

/// Access mode for pools, containers and arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        self == Self::ReadWrite
    }
}

/// Conversion between process-local handles and portable global blobs.
///
/// A global blob produced by one client can be turned back into a local
/// handle by any other client of the same engine. The blob layout is private
/// to the engine; callers only move the bytes around.
pub trait HandleCodec {
    /// Number of bytes [`local2global`](Self::local2global) will write.
    fn global_size(&self, handle: Handle) -> EngineResult<usize>;

    /// Serialize `handle` into `buf`. Returns the number of bytes written.
    ///
    /// Fails with `Truncated` if `buf` is shorter than `global_size`.
    fn local2global(&self, handle: Handle, buf: &mut [u8]) -> EngineResult<usize>;

    /// Build a local handle from a global blob of the given kind.
    ///
    /// Container handles need the local pool handle as `parent`, array
    /// handles the local container handle. Pool handles take no parent.
    fn global2local(
        &self,
        kind: HandleKind,
        parent: Option<Handle>,
        buf: &[u8],
    ) -> EngineResult<Handle>;
}

/// Capability set the benchmark backend consumes from the storage engine.
///
/// Implementations must satisfy these invariants:
/// - Handles are process-local; a handle from another client is `NoHandle`.
/// - Creating an array whose id already exists fails with `Exists`.
/// - Opening anything that does not exist fails with `NonExistent`.
/// - Reads and writes either move the full descriptor length or fail.
/// - Every call before `init` fails with `Uninitialized`.
pub trait StorageEngine: HandleCodec + Send + Sync {
    /// Initialize the client library. Calls nest; each needs a `fini`.
    fn init(&self) -> EngineResult<()>;

    fn fini(&self) -> EngineResult<()>;

    /// Connect to a pool through the given server group and service ranks.
    fn pool_connect(
        &self,
        pool: Uuid,
        group: Option<&str>,
        svcl: &RankList,
        mode: OpenMode,
    ) -> EngineResult<Handle>;

    fn pool_disconnect(&self, poh: Handle) -> EngineResult<()>;

    fn cont_create(&self, poh: Handle, cont: Uuid) -> EngineResult<()>;

    fn cont_open(&self, poh: Handle, cont: Uuid, mode: OpenMode) -> EngineResult<Handle>;

    fn cont_close(&self, coh: Handle) -> EngineResult<()>;

    fn cont_destroy(&self, poh: Handle, cont: Uuid, force: bool) -> EngineResult<()>;

    /// Create an array object and return a read-write handle to it.
    fn array_create(
        &self,
        coh: Handle,
        oid: ObjectIdentity,
        geometry: ArrayGeometry,
    ) -> EngineResult<Handle>;

    /// Open an existing array; returns the handle and the recorded geometry.
    fn array_open(
        &self,
        coh: Handle,
        oid: ObjectIdentity,
        mode: OpenMode,
    ) -> EngineResult<(Handle, ArrayGeometry)>;

    fn array_close(&self, aoh: Handle) -> EngineResult<()>;

    /// Destroy the array the handle refers to. The handle still needs closing.
    fn array_destroy(&self, aoh: Handle) -> EngineResult<()>;

    /// Current size in cells: one past the highest cell ever written.
    fn array_get_size(&self, aoh: Handle) -> EngineResult<u64>;

    /// Read the ranges of `iod` into `sgl`. Returns the number of bytes read.
    fn array_read(&self, aoh: Handle, iod: &ArrayIod, sgl: &mut SgListMut<'_>)
        -> EngineResult<u64>;

    /// Write `sgl` into the ranges of `iod`. Returns the number of bytes written.
    fn array_write(&self, aoh: Handle, iod: &ArrayIod, sgl: &SgList<'_>) -> EngineResult<u64>;
}
