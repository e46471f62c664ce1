//! Fixtures shared by the multi-rank tests.

use std::sync::Arc;

use aiori_engine::{
    ArrayIod, EngineError, EngineResult, HandleCodec, InMemoryCluster, InMemoryEngine, OpenMode,
    SgList, SgListMut, StorageEngine,
};
use aiori_types::{ArrayGeometry, Handle, HandleKind, ObjectIdentity, RankList};
use uuid::Uuid;

use crate::config::DaosOptions;

pub const GROUP: &str = "daos_server";
pub const POOL: Uuid = Uuid::from_u128(0x5f5b2f1e_2a9c_4c1e_9d6a_3c2b1a0f9e8d);
pub const CONT: Uuid = Uuid::from_u128(0x0b7e4a52_8d3f_4f7b_a1c2_6e5d4c3b2a19);

/// A cluster with one pool served by rank 0.
pub fn cluster() -> Arc<InMemoryCluster> {
    let cluster = InMemoryCluster::new(GROUP);
    cluster.create_pool(POOL, RankList::new(vec![0]));
    cluster
}

/// Options pointing at [`POOL`] and [`CONT`] with a small chunk size.
pub fn options() -> DaosOptions {
    DaosOptions {
        pool: Some(POOL.to_string()),
        svcl: Some("0".into()),
        group: Some(GROUP.into()),
        cont: Some(CONT.to_string()),
        chunk_size: CHUNK,
        ..DaosOptions::default()
    }
}

pub const CHUNK: u64 = 4096;

/// What a [`FaultyEngine`] gets wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Every read and write reports one byte fewer than asked.
    ShortIo,
    /// `array_destroy` fails with an I/O error.
    Destroy,
}

/// In-memory engine with one injected fault.
pub struct FaultyEngine {
    inner: InMemoryEngine,
    fault: Fault,
}

impl FaultyEngine {
    pub fn new(inner: InMemoryEngine, fault: Fault) -> Self {
        Self { inner, fault }
    }

    pub fn inner(&self) -> &InMemoryEngine {
        &self.inner
    }

    fn trim(&self, moved: u64) -> u64 {
        match self.fault {
            Fault::ShortIo => moved.saturating_sub(1),
            Fault::Destroy => moved,
        }
    }
}

impl HandleCodec for FaultyEngine {
    fn global_size(&self, handle: Handle) -> EngineResult<usize> {
        self.inner.global_size(handle)
    }
    fn local2global(&self, handle: Handle, buf: &mut [u8]) -> EngineResult<usize> {
        self.inner.local2global(handle, buf)
    }
    fn global2local(
        &self,
        kind: HandleKind,
        parent: Option<Handle>,
        buf: &[u8],
    ) -> EngineResult<Handle> {
        self.inner.global2local(kind, parent, buf)
    }
}

impl StorageEngine for FaultyEngine {
    fn init(&self) -> EngineResult<()> {
        self.inner.init()
    }
    fn fini(&self) -> EngineResult<()> {
        self.inner.fini()
    }
    fn pool_connect(
        &self,
        pool: Uuid,
        group: Option<&str>,
        svcl: &RankList,
        mode: OpenMode,
    ) -> EngineResult<Handle> {
        self.inner.pool_connect(pool, group, svcl, mode)
    }
    fn pool_disconnect(&self, poh: Handle) -> EngineResult<()> {
        self.inner.pool_disconnect(poh)
    }
    fn cont_create(&self, poh: Handle, cont: Uuid) -> EngineResult<()> {
        self.inner.cont_create(poh, cont)
    }
    fn cont_open(&self, poh: Handle, cont: Uuid, mode: OpenMode) -> EngineResult<Handle> {
        self.inner.cont_open(poh, cont, mode)
    }
    fn cont_close(&self, coh: Handle) -> EngineResult<()> {
        self.inner.cont_close(coh)
    }
    fn cont_destroy(&self, poh: Handle, cont: Uuid, force: bool) -> EngineResult<()> {
        self.inner.cont_destroy(poh, cont, force)
    }
    fn array_create(
        &self,
        coh: Handle,
        oid: ObjectIdentity,
        geometry: ArrayGeometry,
    ) -> EngineResult<Handle> {
        self.inner.array_create(coh, oid, geometry)
    }
    fn array_open(
        &self,
        coh: Handle,
        oid: ObjectIdentity,
        mode: OpenMode,
    ) -> EngineResult<(Handle, ArrayGeometry)> {
        self.inner.array_open(coh, oid, mode)
    }
    fn array_close(&self, aoh: Handle) -> EngineResult<()> {
        self.inner.array_close(aoh)
    }
    fn array_destroy(&self, aoh: Handle) -> EngineResult<()> {
        match self.fault {
            Fault::Destroy => Err(EngineError::Io(format!("destroy of {aoh:?} failed"))),
            Fault::ShortIo => self.inner.array_destroy(aoh),
        }
    }
    fn array_get_size(&self, aoh: Handle) -> EngineResult<u64> {
        self.inner.array_get_size(aoh)
    }
    fn array_read(
        &self,
        aoh: Handle,
        iod: &ArrayIod,
        sgl: &mut SgListMut<'_>,
    ) -> EngineResult<u64> {
        Ok(self.trim(self.inner.array_read(aoh, iod, sgl)?))
    }
    fn array_write(&self, aoh: Handle, iod: &ArrayIod, sgl: &SgList<'_>) -> EngineResult<u64> {
        Ok(self.trim(self.inner.array_write(aoh, iod, sgl)?))
    }
}
