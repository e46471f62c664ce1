use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use aiori_types::{ArrayGeometry, Handle, HandleKind, ObjectIdentity, RankList, MAX_CHUNK_BYTES};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::global::{self, GlobalBody};
use crate::io::{ArrayIod, SgList, SgListMut};
use crate::traits::{HandleCodec, OpenMode, StorageEngine};

/// Call counters shared by every client of a cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub pool_connects: u64,
    pub cont_creates: u64,
    pub cont_opens: u64,
    pub cont_destroys: u64,
    pub array_creates: u64,
    pub array_opens: u64,
    pub array_destroys: u64,
    pub local2global: u64,
    pub global2local: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Sparse byte array. Each chunk holds only the bytes up to the highest one
/// written in it; the rest reads as zero.
struct ArrayObject {
    geometry: ArrayGeometry,
    chunks: BTreeMap<u64, Vec<u8>>,
    size: u64,
}

impl ArrayObject {
    fn new(geometry: ArrayGeometry) -> Self {
        Self {
            geometry,
            chunks: BTreeMap::new(),
            size: 0,
        }
    }

    fn chunk_len(&self) -> u64 {
        self.geometry.chunk_bytes().unwrap_or(MAX_CHUNK_BYTES).max(1)
    }

    fn write_at(&mut self, mut offset: u64, mut data: &[u8]) {
        let chunk_len = self.chunk_len();
        if let Some(end) = offset.checked_add(data.len() as u64) {
            if !data.is_empty() {
                self.size = self.size.max(end);
            }
        }
        while !data.is_empty() {
            let index = offset / chunk_len;
            let within = (offset % chunk_len) as usize;
            let n = data.len().min((chunk_len - within as u64) as usize);
            let chunk = self.chunks.entry(index).or_default();
            if chunk.len() < within + n {
                chunk.resize(within + n, 0);
            }
            chunk[within..within + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            offset += n as u64;
        }
    }

    fn read_at(&self, mut offset: u64, mut out: &mut [u8]) {
        let chunk_len = self.chunk_len();
        while !out.is_empty() {
            let index = offset / chunk_len;
            let within = (offset % chunk_len) as usize;
            let n = out.len().min((chunk_len - within as u64) as usize);
            let (head, tail) = out.split_at_mut(n);
            let stored = self
                .chunks
                .get(&index)
                .and_then(|chunk| chunk.get(within..))
                .unwrap_or(&[]);
            let copied = stored.len().min(n);
            head[..copied].copy_from_slice(&stored[..copied]);
            head[copied..].fill(0);
            out = tail;
            offset += n as u64;
        }
    }
}

#[derive(Default)]
struct ContainerState {
    arrays: HashMap<ObjectIdentity, ArrayObject>,
}

struct PoolState {
    svc: RankList,
    containers: HashMap<Uuid, ContainerState>,
}

/// An in-process storage cluster.
///
/// Holds pools, containers and array objects behind a `RwLock`. Processes
/// attach through [`InMemoryCluster::client`]; each client has its own handle
/// table, so handles only travel between clients as global blobs.
pub struct InMemoryCluster {
    group: String,
    pools: RwLock<HashMap<Uuid, PoolState>>,
    stats: Mutex<EngineStats>,
    next_client: AtomicU32,
}

impl InMemoryCluster {
    /// Create an empty cluster serving the named server group.
    pub fn new(group: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            group: group.into(),
            pools: RwLock::new(HashMap::new()),
            stats: Mutex::new(EngineStats::default()),
            next_client: AtomicU32::new(1),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Provision a pool whose service runs on the given ranks.
    pub fn create_pool(&self, pool: Uuid, svc: RankList) {
        self.pools.write().expect("lock poisoned").insert(
            pool,
            PoolState {
                svc,
                containers: HashMap::new(),
            },
        );
    }

    /// Attach a new client (one per process).
    pub fn client(self: &Arc<Self>) -> InMemoryEngine {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        InMemoryEngine {
            cluster: Arc::clone(self),
            client_id: id,
            state: Mutex::new(ClientState {
                init_count: 0,
                next_cookie: 1,
                handles: HashMap::new(),
            }),
        }
    }

    pub fn stats(&self) -> EngineStats {
        *self.stats.lock().expect("lock poisoned")
    }

    pub fn container_exists(&self, pool: Uuid, cont: Uuid) -> bool {
        self.pools
            .read()
            .expect("lock poisoned")
            .get(&pool)
            .is_some_and(|p| p.containers.contains_key(&cont))
    }

    pub fn array_exists(&self, pool: Uuid, cont: Uuid, oid: ObjectIdentity) -> bool {
        self.pools
            .read()
            .expect("lock poisoned")
            .get(&pool)
            .and_then(|p| p.containers.get(&cont))
            .is_some_and(|c| c.arrays.contains_key(&oid))
    }

    pub fn array_count(&self, pool: Uuid, cont: Uuid) -> usize {
        self.pools
            .read()
            .expect("lock poisoned")
            .get(&pool)
            .and_then(|p| p.containers.get(&cont))
            .map_or(0, |c| c.arrays.len())
    }

    fn bump(&self, f: impl FnOnce(&mut EngineStats)) {
        f(&mut self.stats.lock().expect("lock poisoned"));
    }

    fn with_container<T>(
        &self,
        pool: Uuid,
        cont: Uuid,
        f: impl FnOnce(&mut ContainerState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut pools = self.pools.write().expect("lock poisoned");
        let pool_state = pools
            .get_mut(&pool)
            .ok_or_else(|| EngineError::NonExistent(format!("pool {pool}")))?;
        let cont_state = pool_state
            .containers
            .get_mut(&cont)
            .ok_or_else(|| EngineError::NonExistent(format!("container {cont}")))?;
        f(cont_state)
    }
}

impl std::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool_count = self.pools.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryCluster")
            .field("group", &self.group)
            .field("pool_count", &pool_count)
            .finish()
    }
}

#[derive(Clone, Debug)]
enum LocalHandle {
    Pool {
        pool: Uuid,
        mode: OpenMode,
    },
    Container {
        pool: Uuid,
        cont: Uuid,
        mode: OpenMode,
    },
    Array {
        pool: Uuid,
        cont: Uuid,
        oid: ObjectIdentity,
        geometry: ArrayGeometry,
        mode: OpenMode,
    },
}

impl LocalHandle {
    fn kind(&self) -> HandleKind {
        match self {
            Self::Pool { .. } => HandleKind::Pool,
            Self::Container { .. } => HandleKind::Container,
            Self::Array { .. } => HandleKind::Array,
        }
    }

    fn to_global(&self) -> GlobalBody {
        match self.clone() {
            Self::Pool { pool, mode } => GlobalBody::Pool { pool, mode },
            Self::Container { pool, cont, mode } => GlobalBody::Container { pool, cont, mode },
            Self::Array {
                pool,
                cont,
                oid,
                geometry,
                mode,
            } => GlobalBody::Array {
                pool,
                cont,
                oid,
                geometry,
                mode,
            },
        }
    }
}

struct ClientState {
    init_count: u32,
    next_cookie: u32,
    handles: HashMap<u64, LocalHandle>,
}

/// One process's view of an [`InMemoryCluster`].
pub struct InMemoryEngine {
    cluster: Arc<InMemoryCluster>,
    client_id: u32,
    state: Mutex<ClientState>,
}

impl InMemoryEngine {
    pub fn cluster(&self) -> &Arc<InMemoryCluster> {
        &self.cluster
    }

    /// Number of handles this client currently holds open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().expect("lock poisoned").handles.len()
    }

    fn ensure_init(state: &ClientState) -> EngineResult<()> {
        if state.init_count == 0 {
            return Err(EngineError::Uninitialized);
        }
        Ok(())
    }

    /// Register a local handle. Cookies embed the client id so that a handle
    /// leaking into another client is rejected rather than aliased.
    fn insert(&self, local: LocalHandle) -> EngineResult<Handle> {
        let mut state = self.state.lock().expect("lock poisoned");
        Self::ensure_init(&state)?;
        let kind = local.kind();
        let cookie = (u64::from(self.client_id) << 32) | u64::from(state.next_cookie);
        state.next_cookie = state.next_cookie.wrapping_add(1).max(1);
        state.handles.insert(cookie, local);
        Ok(Handle::new(kind, cookie))
    }

    fn lookup(&self, handle: Handle) -> EngineResult<LocalHandle> {
        let state = self.state.lock().expect("lock poisoned");
        Self::ensure_init(&state)?;
        match state.handles.get(&handle.cookie()) {
            Some(local) if local.kind() == handle.kind() => Ok(local.clone()),
            _ => Err(EngineError::NoHandle(handle)),
        }
    }

    fn remove(&self, handle: Handle) -> EngineResult<LocalHandle> {
        let mut state = self.state.lock().expect("lock poisoned");
        Self::ensure_init(&state)?;
        match state.handles.get(&handle.cookie()) {
            Some(local) if local.kind() == handle.kind() => {}
            _ => return Err(EngineError::NoHandle(handle)),
        }
        state
            .handles
            .remove(&handle.cookie())
            .ok_or(EngineError::NoHandle(handle))
    }

    fn pool_of(&self, poh: Handle) -> EngineResult<(Uuid, OpenMode)> {
        match self.lookup(poh)? {
            LocalHandle::Pool { pool, mode } => Ok((pool, mode)),
            _ => Err(EngineError::NoHandle(poh)),
        }
    }

    fn container_of(&self, coh: Handle) -> EngineResult<(Uuid, Uuid, OpenMode)> {
        match self.lookup(coh)? {
            LocalHandle::Container { pool, cont, mode } => Ok((pool, cont, mode)),
            _ => Err(EngineError::NoHandle(coh)),
        }
    }

    fn array_of(&self, aoh: Handle) -> EngineResult<(Uuid, Uuid, ObjectIdentity, OpenMode)> {
        match self.lookup(aoh)? {
            LocalHandle::Array {
                pool,
                cont,
                oid,
                mode,
                ..
            } => Ok((pool, cont, oid, mode)),
            _ => Err(EngineError::NoHandle(aoh)),
        }
    }

    fn check_extents(iod: &ArrayIod, mem_len: u64) -> EngineResult<()> {
        if iod.ranges.iter().any(|r| r.end().is_none()) {
            return Err(EngineError::InvalidArgument("array range overflows".into()));
        }
        if iod.total_len() != mem_len {
            return Err(EngineError::InvalidArgument(format!(
                "descriptor covers {} bytes but memory holds {mem_len}",
                iod.total_len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("client_id", &self.client_id)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

impl HandleCodec for InMemoryEngine {
    fn global_size(&self, handle: Handle) -> EngineResult<usize> {
        let local = self.lookup(handle)?;
        Ok(global::encode(&local.to_global())?.len())
    }

    fn local2global(&self, handle: Handle, buf: &mut [u8]) -> EngineResult<usize> {
        let local = self.lookup(handle)?;
        let blob = global::encode(&local.to_global())?;
        if buf.len() < blob.len() {
            return Err(EngineError::Truncated {
                needed: blob.len(),
                available: buf.len(),
            });
        }
        buf[..blob.len()].copy_from_slice(&blob);
        self.cluster.bump(|s| s.local2global += 1);
        Ok(blob.len())
    }

    fn global2local(
        &self,
        kind: HandleKind,
        parent: Option<Handle>,
        buf: &[u8],
    ) -> EngineResult<Handle> {
        match (kind.parent(), parent) {
            (Some(expected), Some(p)) if p.kind() != expected => {
                return Err(EngineError::InvalidArgument(format!(
                    "{kind} handle imported under a {} handle",
                    p.kind()
                )));
            }
            (None, Some(p)) => {
                return Err(EngineError::InvalidArgument(format!(
                    "{kind} handle takes no parent, got a {} handle",
                    p.kind()
                )));
            }
            _ => {}
        }
        let body = global::decode(kind, buf)?;
        let local = match body {
            GlobalBody::Pool { pool, mode } => {
                if !self.cluster.pools.read().expect("lock poisoned").contains_key(&pool) {
                    return Err(EngineError::NonExistent(format!("pool {pool}")));
                }
                LocalHandle::Pool { pool, mode }
            }
            GlobalBody::Container { pool, cont, mode } => {
                let poh = parent.ok_or_else(|| {
                    EngineError::InvalidArgument("container handle needs a pool handle".into())
                })?;
                let (parent_pool, _) = self.pool_of(poh)?;
                if parent_pool != pool {
                    return Err(EngineError::InvalidArgument(format!(
                        "container of pool {pool} under pool handle of {parent_pool}"
                    )));
                }
                if !self.cluster.container_exists(pool, cont) {
                    return Err(EngineError::NonExistent(format!("container {cont}")));
                }
                LocalHandle::Container { pool, cont, mode }
            }
            GlobalBody::Array {
                pool,
                cont,
                oid,
                geometry,
                mode,
            } => {
                let coh = parent.ok_or_else(|| {
                    EngineError::InvalidArgument("array handle needs a container handle".into())
                })?;
                let (parent_pool, parent_cont, _) = self.container_of(coh)?;
                if (parent_pool, parent_cont) != (pool, cont) {
                    return Err(EngineError::InvalidArgument(format!(
                        "array of container {cont} under container handle of {parent_cont}"
                    )));
                }
                if !self.cluster.array_exists(pool, cont, oid) {
                    return Err(EngineError::NonExistent(format!("array {oid}")));
                }
                LocalHandle::Array {
                    pool,
                    cont,
                    oid,
                    geometry,
                    mode,
                }
            }
        };
        let handle = self.insert(local)?;
        self.cluster.bump(|s| s.global2local += 1);
        debug!(client = self.client_id, ?handle, "global handle imported");
        Ok(handle)
    }
}

impl StorageEngine for InMemoryEngine {
    fn init(&self) -> EngineResult<()> {
        self.state.lock().expect("lock poisoned").init_count += 1;
        Ok(())
    }

    fn fini(&self) -> EngineResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        Self::ensure_init(&state)?;
        state.init_count -= 1;
        if state.init_count == 0 {
            state.handles.clear();
        }
        Ok(())
    }

    fn pool_connect(
        &self,
        pool: Uuid,
        group: Option<&str>,
        svcl: &RankList,
        mode: OpenMode,
    ) -> EngineResult<Handle> {
        Self::ensure_init(&self.state.lock().expect("lock poisoned"))?;
        if let Some(group) = group {
            if group != self.cluster.group {
                return Err(EngineError::NonExistent(format!("server group {group}")));
            }
        }
        {
            let pools = self.cluster.pools.read().expect("lock poisoned");
            let state = pools
                .get(&pool)
                .ok_or_else(|| EngineError::NonExistent(format!("pool {pool}")))?;
            if svcl.is_empty() || !svcl.ranks().iter().all(|r| state.svc.ranks().contains(r)) {
                return Err(EngineError::InvalidArgument(format!(
                    "service ranks {svcl} do not serve pool {pool}"
                )));
            }
        }
        let handle = self.insert(LocalHandle::Pool { pool, mode })?;
        self.cluster.bump(|s| s.pool_connects += 1);
        debug!(client = self.client_id, %pool, "pool connected");
        Ok(handle)
    }

    fn pool_disconnect(&self, poh: Handle) -> EngineResult<()> {
        match self.remove(poh)? {
            LocalHandle::Pool { .. } => Ok(()),
            _ => Err(EngineError::NoHandle(poh)),
        }
    }

    fn cont_create(&self, poh: Handle, cont: Uuid) -> EngineResult<()> {
        let (pool, mode) = self.pool_of(poh)?;
        if !mode.is_writable() {
            return Err(EngineError::NoPermission(format!("pool {pool} is read-only")));
        }
        let mut pools = self.cluster.pools.write().expect("lock poisoned");
        let state = pools
            .get_mut(&pool)
            .ok_or_else(|| EngineError::NonExistent(format!("pool {pool}")))?;
        if state.containers.contains_key(&cont) {
            return Err(EngineError::Exists(format!("container {cont}")));
        }
        state.containers.insert(cont, ContainerState::default());
        drop(pools);
        self.cluster.bump(|s| s.cont_creates += 1);
        debug!(client = self.client_id, %cont, "container created");
        Ok(())
    }

    fn cont_open(&self, poh: Handle, cont: Uuid, mode: OpenMode) -> EngineResult<Handle> {
        let (pool, pool_mode) = self.pool_of(poh)?;
        if mode.is_writable() && !pool_mode.is_writable() {
            return Err(EngineError::NoPermission(format!("pool {pool} is read-only")));
        }
        if !self.cluster.container_exists(pool, cont) {
            return Err(EngineError::NonExistent(format!("container {cont}")));
        }
        let handle = self.insert(LocalHandle::Container { pool, cont, mode })?;
        self.cluster.bump(|s| s.cont_opens += 1);
        Ok(handle)
    }

    fn cont_close(&self, coh: Handle) -> EngineResult<()> {
        match self.remove(coh)? {
            LocalHandle::Container { .. } => Ok(()),
            _ => Err(EngineError::NoHandle(coh)),
        }
    }

    fn cont_destroy(&self, poh: Handle, cont: Uuid, force: bool) -> EngineResult<()> {
        let (pool, _) = self.pool_of(poh)?;
        let mut pools = self.cluster.pools.write().expect("lock poisoned");
        let state = pools
            .get_mut(&pool)
            .ok_or_else(|| EngineError::NonExistent(format!("pool {pool}")))?;
        let existing = state
            .containers
            .get(&cont)
            .ok_or_else(|| EngineError::NonExistent(format!("container {cont}")))?;
        if !force && !existing.arrays.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "container {cont} is not empty"
            )));
        }
        state.containers.remove(&cont);
        drop(pools);
        self.cluster.bump(|s| s.cont_destroys += 1);
        debug!(client = self.client_id, %cont, "container destroyed");
        Ok(())
    }

    fn array_create(
        &self,
        coh: Handle,
        oid: ObjectIdentity,
        geometry: ArrayGeometry,
    ) -> EngineResult<Handle> {
        let (pool, cont, mode) = self.container_of(coh)?;
        if !mode.is_writable() {
            return Err(EngineError::NoPermission(format!("container {cont} is read-only")));
        }
        if !geometry.is_valid() {
            return Err(EngineError::InvalidArgument(format!(
                "cell size {} / chunk size {}",
                geometry.cell_size, geometry.chunk_size
            )));
        }
        self.cluster.with_container(pool, cont, |c| {
            if c.arrays.contains_key(&oid) {
                return Err(EngineError::Exists(format!("array {oid}")));
            }
            c.arrays.insert(oid, ArrayObject::new(geometry));
            Ok(())
        })?;
        let handle = self.insert(LocalHandle::Array {
            pool,
            cont,
            oid,
            geometry,
            mode: OpenMode::ReadWrite,
        })?;
        self.cluster.bump(|s| s.array_creates += 1);
        debug!(client = self.client_id, %oid, "array created");
        Ok(handle)
    }

    fn array_open(
        &self,
        coh: Handle,
        oid: ObjectIdentity,
        mode: OpenMode,
    ) -> EngineResult<(Handle, ArrayGeometry)> {
        let (pool, cont, cont_mode) = self.container_of(coh)?;
        if mode.is_writable() && !cont_mode.is_writable() {
            return Err(EngineError::NoPermission(format!("container {cont} is read-only")));
        }
        let geometry = self.cluster.with_container(pool, cont, |c| {
            c.arrays
                .get(&oid)
                .map(|a| a.geometry)
                .ok_or_else(|| EngineError::NonExistent(format!("array {oid}")))
        })?;
        let handle = self.insert(LocalHandle::Array {
            pool,
            cont,
            oid,
            geometry,
            mode,
        })?;
        self.cluster.bump(|s| s.array_opens += 1);
        Ok((handle, geometry))
    }

    fn array_close(&self, aoh: Handle) -> EngineResult<()> {
        match self.remove(aoh)? {
            LocalHandle::Array { .. } => Ok(()),
            _ => Err(EngineError::NoHandle(aoh)),
        }
    }

    fn array_destroy(&self, aoh: Handle) -> EngineResult<()> {
        let (pool, cont, oid, mode) = self.array_of(aoh)?;
        if !mode.is_writable() {
            return Err(EngineError::NoPermission(format!("array {oid} opened read-only")));
        }
        self.cluster.with_container(pool, cont, |c| {
            c.arrays
                .remove(&oid)
                .map(|_| ())
                .ok_or_else(|| EngineError::NonExistent(format!("array {oid}")))
        })?;
        self.cluster.bump(|s| s.array_destroys += 1);
        debug!(client = self.client_id, %oid, "array destroyed");
        Ok(())
    }

    fn array_get_size(&self, aoh: Handle) -> EngineResult<u64> {
        let (pool, cont, oid, _) = self.array_of(aoh)?;
        self.cluster.with_container(pool, cont, |c| {
            c.arrays
                .get(&oid)
                .map(|a| a.size / a.geometry.cell_size.max(1))
                .ok_or_else(|| EngineError::NonExistent(format!("array {oid}")))
        })
    }

    fn array_read(
        &self,
        aoh: Handle,
        iod: &ArrayIod,
        sgl: &mut SgListMut<'_>,
    ) -> EngineResult<u64> {
        let (pool, cont, oid, _) = self.array_of(aoh)?;
        Self::check_extents(iod, sgl.total_len())?;
        let moved = self.cluster.with_container(pool, cont, |c| {
            let array = c
                .arrays
                .get(&oid)
                .ok_or_else(|| EngineError::NonExistent(format!("array {oid}")))?;
            let cell = array.geometry.cell_size;
            let mut iovs = sgl.iovs.iter_mut();
            let mut current: &mut [u8] = iovs.next().map(|b| &mut **b).unwrap_or(&mut []);
            let mut moved = 0u64;
            for range in &iod.ranges {
                let mut offset = range.index * cell;
                let mut remaining = (range.len * cell) as usize;
                while remaining > 0 {
                    while current.is_empty() {
                        current = iovs
                            .next()
                            .map(|b| &mut **b)
                            .ok_or_else(|| EngineError::InvalidArgument("short sgl".into()))?;
                    }
                    let n = remaining.min(current.len());
                    let (head, tail) = std::mem::take(&mut current).split_at_mut(n);
                    array.read_at(offset, head);
                    current = tail;
                    offset += n as u64;
                    remaining -= n;
                    moved += n as u64;
                }
            }
            Ok(moved)
        })?;
        self.cluster.bump(|s| {
            s.reads += 1;
            s.bytes_read += moved;
        });
        Ok(moved)
    }

    fn array_write(&self, aoh: Handle, iod: &ArrayIod, sgl: &SgList<'_>) -> EngineResult<u64> {
        let (pool, cont, oid, mode) = self.array_of(aoh)?;
        if !mode.is_writable() {
            return Err(EngineError::NoPermission(format!("array {oid} opened read-only")));
        }
        Self::check_extents(iod, sgl.total_len())?;
        let moved = self.cluster.with_container(pool, cont, |c| {
            let array = c
                .arrays
                .get_mut(&oid)
                .ok_or_else(|| EngineError::NonExistent(format!("array {oid}")))?;
            let cell = array.geometry.cell_size;
            let mut iovs = sgl.iovs.iter();
            let mut current: &[u8] = iovs.next().copied().unwrap_or(&[]);
            let mut moved = 0u64;
            for range in &iod.ranges {
                let mut offset = range.index * cell;
                let mut remaining = (range.len * cell) as usize;
                while remaining > 0 {
                    while current.is_empty() {
                        current = iovs
                            .next()
                            .copied()
                            .ok_or_else(|| EngineError::InvalidArgument("short sgl".into()))?;
                    }
                    let n = remaining.min(current.len());
                    array.write_at(offset, &current[..n]);
                    current = &current[n..];
                    offset += n as u64;
                    remaining -= n;
                    moved += n as u64;
                }
            }
            Ok(moved)
        })?;
        self.cluster.bump(|s| {
            s.writes += 1;
            s.bytes_written += moved;
        });
        Ok(moved)
    }
}
