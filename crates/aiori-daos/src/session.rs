use std::fmt;

use aiori_engine::{OpenMode, StorageEngine};
use aiori_group::ProcessGroup;
use aiori_types::{
    AddressingMode, ArrayGeometry, Handle, HandleKind, ObjectClass, ObjectIdentity,
};
use tracing::debug;

use crate::context::ConnectionContext;
use crate::coordinator::HandleCoordinator;
use crate::error::{CollectiveResultExt, DaosError, DaosResult, EngineCallExt};

/// Lifecycle of an [`ArraySession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unbound,
    Creating,
    Opening,
    Bound,
    Closing,
    /// The last array was deleted. Behaves like `Unbound`.
    Destroyed,
}

impl SessionState {
    fn accepts_bind(self) -> bool {
        matches!(self, Self::Unbound | Self::Destroyed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unbound => "unbound",
            Self::Creating => "creating",
            Self::Opening => "opening",
            Self::Bound => "bound",
            Self::Closing => "closing",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// The array object behind the harness's current test file.
///
/// In [`AddressingMode::Exclusive`] every member creates or opens its own
/// object. In [`AddressingMode::Shared`] only the leader does, and the others
/// import its handle, so the engine sees a single create for the whole group.
#[derive(Debug)]
pub struct ArraySession {
    class: ObjectClass,
    chunk_size: u64,
    addressing: AddressingMode,
    state: SessionState,
    handle: Handle,
    oid: Option<ObjectIdentity>,
}

impl ArraySession {
    pub fn new(class: ObjectClass, chunk_size: u64, addressing: AddressingMode) -> Self {
        Self {
            class,
            chunk_size,
            addressing,
            state: SessionState::Unbound,
            handle: Handle::invalid(HandleKind::Array),
            oid: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn addressing(&self) -> AddressingMode {
        self.addressing
    }

    /// Switch addressing for the next bind. Ignored while an array is bound,
    /// which keeps the mode it was bound with.
    pub fn set_addressing(&mut self, addressing: AddressingMode) {
        if self.state.accepts_bind() {
            self.addressing = addressing;
        }
    }

    /// Local array handle; invalid unless bound.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Identity of the bound object.
    pub fn oid(&self) -> Option<ObjectIdentity> {
        self.oid
    }

    /// The bound handle, or [`DaosError::NotBound`].
    pub fn bound_handle(&self) -> DaosResult<Handle> {
        match self.state {
            SessionState::Bound => Ok(self.handle),
            _ => Err(DaosError::NotBound),
        }
    }

    pub fn derive_oid(&self, name: &str) -> ObjectIdentity {
        ObjectIdentity::derive(name, self.class)
    }

    /// Create the array for `name` and bind to it.
    pub fn create<E, G>(
        &mut self,
        engine: &E,
        group: &G,
        ctx: &ConnectionContext,
        name: &str,
    ) -> DaosResult<()>
    where
        E: StorageEngine + ?Sized,
        G: ProcessGroup + ?Sized,
    {
        self.begin(SessionState::Creating)?;
        let oid = self.derive_oid(name);
        let geometry = ArrayGeometry::bytes(self.chunk_size);
        let result = self.acquire(engine, group, ctx, |coh| {
            engine
                .array_create(coh, oid, geometry)
                .engine_call("daos_array_create")
        });
        self.finish(name, oid, result)
    }

    /// Open the existing array for `name` read-write and bind to it.
    pub fn open<E, G>(
        &mut self,
        engine: &E,
        group: &G,
        ctx: &ConnectionContext,
        name: &str,
    ) -> DaosResult<()>
    where
        E: StorageEngine + ?Sized,
        G: ProcessGroup + ?Sized,
    {
        self.begin(SessionState::Opening)?;
        let oid = self.derive_oid(name);
        let result = self.acquire(engine, group, ctx, |coh| {
            open_validated(engine, coh, oid, OpenMode::ReadWrite)
        });
        self.finish(name, oid, result)
    }

    /// Check whether the array for `name` exists. Purely local: opens
    /// read-only, checks the cell size and closes again. A missing object
    /// yields `false`.
    pub fn access<E>(&self, engine: &E, ctx: &ConnectionContext, name: &str) -> DaosResult<bool>
    where
        E: StorageEngine + ?Sized,
    {
        let oid = self.derive_oid(name);
        let aoh = match engine.array_open(ctx.cont_handle(), oid, OpenMode::ReadOnly) {
            Ok((aoh, geometry)) => check_cell_size(engine, aoh, oid, geometry)?,
            Err(e) if e.is_nonexistent() => return Ok(false),
            Err(e) => return Err(e).engine_call("daos_array_open"),
        };
        engine.array_close(aoh).engine_call("daos_array_close")?;
        Ok(true)
    }

    /// Destroy the array for `name`. The session must not be bound.
    pub fn delete<E>(&mut self, engine: &E, ctx: &ConnectionContext, name: &str) -> DaosResult<()>
    where
        E: StorageEngine + ?Sized,
    {
        if !self.state.accepts_bind() {
            return Err(DaosError::Usage(format!(
                "cannot delete {name} while the session is {}",
                self.state
            )));
        }
        let oid = self.derive_oid(name);
        let aoh = open_validated(engine, ctx.cont_handle(), oid, OpenMode::ReadWrite)?;
        if let Err(e) = engine.array_destroy(aoh).engine_call("daos_array_destroy") {
            let _ = engine.array_close(aoh);
            self.state = SessionState::Unbound;
            return Err(e);
        }
        self.state = SessionState::Closing;
        let closed = engine.array_close(aoh).engine_call("daos_array_close");
        self.state = SessionState::Destroyed;
        closed?;
        debug!(name, %oid, "array destroyed");
        Ok(())
    }

    /// Release the local handle.
    pub fn close<E>(&mut self, engine: &E) -> DaosResult<()>
    where
        E: StorageEngine + ?Sized,
    {
        let aoh = self.bound_handle()?;
        self.state = SessionState::Closing;
        engine.array_close(aoh).engine_call("daos_array_close")?;
        self.handle.take();
        self.oid = None;
        self.state = SessionState::Unbound;
        Ok(())
    }

    /// Current size of the array for `name` in bytes.
    ///
    /// Shared: the leader queries and broadcasts, so every member returns the
    /// same value. Exclusive: every member queries its own object.
    pub fn get_size<E, G>(
        &self,
        engine: &E,
        group: &G,
        ctx: &ConnectionContext,
        name: &str,
    ) -> DaosResult<u64>
    where
        E: StorageEngine + ?Sized,
        G: ProcessGroup + ?Sized,
    {
        let oid = self.derive_oid(name);
        let leader = ctx.leader();
        let mut size = 0u64;
        if !self.addressing.is_shared() || group.is_root(leader) {
            let aoh = open_validated(engine, ctx.cont_handle(), oid, OpenMode::ReadOnly)?;
            size = engine.array_get_size(aoh).engine_call("daos_array_get_size")?;
            engine.array_close(aoh).engine_call("daos_array_close")?;
        }
        if self.addressing.is_shared() {
            group
                .broadcast_u64(&mut size, leader)
                .collective("broadcast array size")?;
        }
        Ok(size)
    }

    fn begin(&mut self, next: SessionState) -> DaosResult<()> {
        if !self.state.accepts_bind() {
            return Err(DaosError::Usage(format!(
                "array session is {}; close it first",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Run the privileged call where this member owns it, then distribute in
    /// shared mode.
    fn acquire<E, G>(
        &self,
        engine: &E,
        group: &G,
        ctx: &ConnectionContext,
        privileged: impl FnOnce(Handle) -> DaosResult<Handle>,
    ) -> DaosResult<Handle>
    where
        E: StorageEngine + ?Sized,
        G: ProcessGroup + ?Sized,
    {
        let coh = ctx.cont_handle();
        let coord = HandleCoordinator::new(engine, group, ctx.leader());
        let shared = self.addressing.is_shared();

        let mut aoh = Handle::invalid(HandleKind::Array);
        if !shared || coord.is_leader() {
            aoh = privileged(coh)?;
        }
        if shared {
            coord.distribute(&mut aoh, Some(coh))?;
        }
        Ok(aoh)
    }

    fn finish(
        &mut self,
        name: &str,
        oid: ObjectIdentity,
        result: DaosResult<Handle>,
    ) -> DaosResult<()> {
        match result {
            Ok(aoh) => {
                debug!(name, %oid, ?aoh, via = %self.state, "array bound");
                self.handle = aoh;
                self.oid = Some(oid);
                self.state = SessionState::Bound;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Unbound;
                Err(e)
            }
        }
    }
}

/// Open `oid` and check it is a byte array.
fn open_validated<E>(
    engine: &E,
    coh: Handle,
    oid: ObjectIdentity,
    mode: OpenMode,
) -> DaosResult<Handle>
where
    E: StorageEngine + ?Sized,
{
    let (aoh, geometry) = engine
        .array_open(coh, oid, mode)
        .engine_call("daos_array_open")?;
    check_cell_size(engine, aoh, oid, geometry)
}

/// Arrays written by this backend always use one-byte cells. Anything else
/// was created by someone else; the handle is closed and the open refused.
fn check_cell_size<E>(
    engine: &E,
    aoh: Handle,
    oid: ObjectIdentity,
    geometry: ArrayGeometry,
) -> DaosResult<Handle>
where
    E: StorageEngine + ?Sized,
{
    if !geometry.is_byte_array() {
        let _ = engine.array_close(aoh);
        return Err(DaosError::InvalidArray {
            oid,
            cell_size: geometry.cell_size,
        });
    }
    Ok(aoh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, options, Fault, FaultyEngine, CHUNK, CONT, POOL};
    use crate::transfer::{Access, TransferEngine};
    use aiori_engine::InMemoryEngine;
    use aiori_group::{SoloGroup, ThreadGroup};
    use aiori_types::Rank;

    fn connect<G: ProcessGroup>(engine: &InMemoryEngine, group: &G) -> ConnectionContext {
        ConnectionContext::connect(engine, group, &options()).unwrap()
    }

    fn session(addressing: AddressingMode) -> ArraySession {
        ArraySession::new(ObjectClass::SX, CHUNK, addressing)
    }

    // ---------------------------------------------------------------
    // Exclusive addressing
    // ---------------------------------------------------------------

    #[test]
    fn exclusive_members_create_their_own_objects() {
        let cluster = cluster();
        let states = ThreadGroup::run(4, |m| {
            let engine = cluster.client();
            let ctx = connect(&engine, &m);
            let mut s = session(AddressingMode::Exclusive);
            s.create(&engine, &m, &ctx, &format!("testfile.{:08}", m.rank().0))
                .unwrap();
            let state = s.state();
            s.close(&engine).unwrap();
            ctx.disconnect(&engine, &m, false).unwrap();
            state
        });
        assert!(states.iter().all(|s| *s == SessionState::Bound));
        let stats = cluster.stats();
        assert_eq!(stats.array_creates, 4);
        // Only the pool and container handles travelled.
        assert_eq!(stats.local2global, 2);
        assert_eq!(cluster.array_count(POOL, CONT), 4);
    }

    #[test]
    fn exclusive_get_size_is_per_member() {
        let cluster = cluster();
        let sizes = ThreadGroup::run(3, |m| {
            let engine = cluster.client();
            let ctx = connect(&engine, &m);
            let mut s = session(AddressingMode::Exclusive);
            let name = format!("testfile.{}", m.rank());
            s.create(&engine, &m, &ctx, &name).unwrap();
            let len = 100 * (m.rank().0 as u64 + 1);
            TransferEngine::new(&engine)
                .write(s.handle(), &vec![1u8; len as usize], 0)
                .unwrap();
            s.close(&engine).unwrap();
            s.get_size(&engine, &m, &ctx, &name).unwrap()
        });
        assert_eq!(sizes, vec![100, 200, 300]);
    }

    // ---------------------------------------------------------------
    // Shared addressing
    // ---------------------------------------------------------------

    #[test]
    fn shared_create_is_a_single_privileged_call() {
        const P: usize = 5;
        let cluster = cluster();
        let results = ThreadGroup::run(P, |m| {
            let engine = cluster.client();
            let ctx = connect(&engine, &m);
            m.barrier().unwrap();
            let before = cluster.stats();
            m.barrier().unwrap();
            let mut s = session(AddressingMode::Shared);
            s.create(&engine, &m, &ctx, "testfile").unwrap();
            (before, s.state(), s.oid())
        });
        let stats = cluster.stats();
        let before = results[0].0;
        assert_eq!(stats.array_creates, 1);
        assert_eq!(stats.global2local - before.global2local, (P - 1) as u64);
        let oid = results[0].2;
        for (_, state, o) in &results {
            assert_eq!(*state, SessionState::Bound);
            assert_eq!(*o, oid);
        }
    }

    #[test]
    fn shared_read_after_write_across_members() {
        let cluster = cluster();
        let observed = ThreadGroup::run(4, |m| {
            let engine = cluster.client();
            let ctx = connect(&engine, &m);
            let mut s = session(AddressingMode::Shared);
            s.create(&engine, &m, &ctx, "shared").unwrap();
            let xfer = TransferEngine::new(&engine);

            // Each member writes its own block, everyone reads every block.
            let block = CHUNK + 7;
            let mut mine = vec![m.rank().0 as u8 + 1; block as usize];
            xfer.xfer(s.handle(), Access::Write, &mut mine, block, block * m.rank().0 as u64)
                .unwrap();
            m.barrier().unwrap();

            let mut all = vec![0u8; (block * 4) as usize];
            xfer.read(s.handle(), &mut all, 0).unwrap();
            s.close(&engine).unwrap();
            let size = s.get_size(&engine, &m, &ctx, "shared").unwrap();
            (all, size)
        });
        let block = (CHUNK + 7) as usize;
        for (all, size) in &observed {
            assert_eq!(*size, (block * 4) as u64);
            for r in 0..4 {
                assert!(all[r * block..(r + 1) * block].iter().all(|b| *b == r as u8 + 1));
            }
        }
    }

    #[test]
    fn shared_get_size_matches_leader_write() {
        let cluster = cluster();
        let sizes = ThreadGroup::run(4, |m| {
            let engine = cluster.client();
            let ctx = connect(&engine, &m);
            let mut s = session(AddressingMode::Shared);
            s.create(&engine, &m, &ctx, "sized").unwrap();
            if m.rank() == Rank::ZERO {
                TransferEngine::new(&engine)
                    .write(s.handle(), &[9u8; 1234], 3 * CHUNK)
                    .unwrap();
            }
            m.barrier().unwrap();
            s.close(&engine).unwrap();
            let opens_before = cluster.stats().array_opens;
            m.barrier().unwrap();
            let size = s.get_size(&engine, &m, &ctx, "sized").unwrap();
            (size, opens_before)
        });
        assert!(sizes.iter().all(|(s, _)| *s == 3 * CHUNK + 1234));
        // One read-only open by the leader for the size query.
        assert_eq!(cluster.stats().array_opens, sizes[0].1 + 1);
    }

    #[test]
    fn shared_open_imports_leader_handle() {
        let cluster = cluster();
        let ok = ThreadGroup::run(3, |m| {
            let engine = cluster.client();
            let ctx = connect(&engine, &m);
            let mut s = session(AddressingMode::Shared);
            s.create(&engine, &m, &ctx, "reopen").unwrap();
            s.close(&engine).unwrap();
            m.barrier().unwrap();
            s.open(&engine, &m, &ctx, "reopen").unwrap();
            s.state() == SessionState::Bound && s.handle().is_valid()
        });
        assert_eq!(ok, vec![true; 3]);
        assert_eq!(cluster.stats().array_opens, 1);
    }

    // ---------------------------------------------------------------
    // access / delete / close
    // ---------------------------------------------------------------

    #[test]
    fn access_is_idempotent_and_read_only() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Shared);

        assert!(!s.access(&engine, &ctx, "present").unwrap());
        s.create(&engine, &group, &ctx, "present").unwrap();
        TransferEngine::new(&engine)
            .write(s.handle(), b"payload", 0)
            .unwrap();
        s.close(&engine).unwrap();

        let writes = cluster.stats().writes;
        for _ in 0..5 {
            assert!(s.access(&engine, &ctx, "present").unwrap());
        }
        assert_eq!(cluster.stats().writes, writes);
        assert_eq!(s.get_size(&engine, &group, &ctx, "present").unwrap(), 7);
        assert_eq!(s.state(), SessionState::Unbound);
        assert_eq!(engine.open_handles(), 2);
    }

    #[test]
    fn delete_destroys_and_allows_recreate() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Exclusive);

        s.create(&engine, &group, &ctx, "victim").unwrap();
        let err = s.delete(&engine, &ctx, "victim").unwrap_err();
        assert!(matches!(err, DaosError::Usage(_)));

        s.close(&engine).unwrap();
        s.delete(&engine, &ctx, "victim").unwrap();
        assert_eq!(s.state(), SessionState::Destroyed);
        assert!(!s.access(&engine, &ctx, "victim").unwrap());
        assert_eq!(cluster.array_count(POOL, CONT), 0);

        s.create(&engine, &group, &ctx, "victim").unwrap();
        assert_eq!(s.state(), SessionState::Bound);
    }

    #[test]
    fn delete_of_missing_object_fails() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Exclusive);
        let err = s.delete(&engine, &ctx, "ghost").unwrap_err();
        assert_eq!(err.status(), -1005);
        assert_eq!(s.state(), SessionState::Unbound);
    }

    #[test]
    fn failed_destroy_leaves_session_unbound() {
        let cluster = cluster();
        let engine = FaultyEngine::new(cluster.client(), Fault::Destroy);
        let group = SoloGroup::new();
        let ctx = ConnectionContext::connect(&engine, &group, &options()).unwrap();
        let mut s = session(AddressingMode::Exclusive);
        s.create(&engine, &group, &ctx, "stuck").unwrap();
        s.close(&engine).unwrap();
        let open = engine.inner().open_handles();

        let err = s.delete(&engine, &ctx, "stuck").unwrap_err();
        assert_eq!(err.status(), -2001);
        assert_eq!(s.state(), SessionState::Unbound);
        assert!(!s.handle().is_valid());
        assert!(matches!(s.bound_handle(), Err(DaosError::NotBound)));
        assert!(matches!(s.close(&engine), Err(DaosError::NotBound)));
        assert_eq!(engine.inner().open_handles(), open);
        assert!(cluster.array_exists(POOL, CONT, s.derive_oid("stuck")));
    }

    #[test]
    fn addressing_changes_only_between_files() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Shared);
        s.create(&engine, &group, &ctx, "a").unwrap();
        s.set_addressing(AddressingMode::Exclusive);
        assert_eq!(s.addressing(), AddressingMode::Shared);
        s.close(&engine).unwrap();
        s.set_addressing(AddressingMode::Exclusive);
        assert_eq!(s.addressing(), AddressingMode::Exclusive);
    }

    #[test]
    fn close_twice_is_not_bound() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Exclusive);
        s.create(&engine, &group, &ctx, "twice").unwrap();
        s.close(&engine).unwrap();
        assert!(!s.handle().is_valid());
        assert!(matches!(s.close(&engine), Err(DaosError::NotBound)));
    }

    #[test]
    fn create_while_bound_is_rejected() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Exclusive);
        s.create(&engine, &group, &ctx, "a").unwrap();
        assert!(matches!(
            s.create(&engine, &group, &ctx, "b"),
            Err(DaosError::Usage(_))
        ));
        assert_eq!(s.state(), SessionState::Bound);
    }

    #[test]
    fn create_of_existing_object_fails_and_unbinds() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Exclusive);
        s.create(&engine, &group, &ctx, "dup").unwrap();
        s.close(&engine).unwrap();
        let err = s.create(&engine, &group, &ctx, "dup").unwrap_err();
        assert_eq!(err.status(), -1004);
        assert_eq!(s.state(), SessionState::Unbound);
    }

    // ---------------------------------------------------------------
    // Cell size validation
    // ---------------------------------------------------------------

    #[test]
    fn foreign_cell_size_is_refused_everywhere() {
        let cluster = cluster();
        let engine = cluster.client();
        let group = SoloGroup::new();
        let ctx = connect(&engine, &group);
        let mut s = session(AddressingMode::Exclusive);

        let oid = s.derive_oid("foreign");
        let geometry = ArrayGeometry {
            cell_size: 8,
            chunk_size: CHUNK,
        };
        let aoh = engine
            .array_create(ctx.cont_handle(), oid, geometry)
            .unwrap();
        engine.array_close(aoh).unwrap();
        let open = engine.open_handles();

        for err in [
            s.open(&engine, &group, &ctx, "foreign").unwrap_err(),
            s.access(&engine, &ctx, "foreign").unwrap_err(),
            s.get_size(&engine, &group, &ctx, "foreign").unwrap_err(),
            s.delete(&engine, &ctx, "foreign").unwrap_err(),
        ] {
            assert!(
                matches!(err, DaosError::InvalidArray { cell_size: 8, .. }),
                "{err}"
            );
        }
        assert_eq!(engine.open_handles(), open);
        assert!(cluster.array_exists(POOL, CONT, oid));
        assert_eq!(s.state(), SessionState::Unbound);
    }
}
