use aiori_engine::StorageEngine;
use aiori_group::ProcessGroup;
use tracing::{debug, info};

use crate::config::{DaosOptions, XferHints};
use crate::context::ConnectionContext;
use crate::error::{DaosError, DaosResult};
use crate::session::{ArraySession, SessionState};
use crate::transfer::{Access, TransferEngine};

/// Version string reported to the harness.
pub const VERSION: &str = "DAOS";

/// The operations the benchmark harness drives a backend through.
///
/// Every member of the group calls the same operations in the same order.
/// Errors are fatal; pass them to [`crate::fatal::abort_on_error`].
pub trait Aiori {
    fn get_version(&self) -> &'static str;

    /// Validate the options before the run starts.
    fn check_params(&self) -> DaosResult<()>;

    fn initialize(&mut self) -> DaosResult<()>;

    fn finalize(&mut self) -> DaosResult<()>;

    fn create(&mut self, name: &str) -> DaosResult<()>;

    fn open(&mut self, name: &str) -> DaosResult<()>;

    /// `true` if a test file called `name` exists.
    fn access(&self, name: &str) -> DaosResult<bool>;

    /// Move `length` bytes between `buf` and the open file at `offset`.
    fn xfer(&mut self, access: Access, buf: &mut [u8], length: u64, offset: u64)
        -> DaosResult<u64>;

    fn close(&mut self) -> DaosResult<()>;

    fn delete(&mut self, name: &str) -> DaosResult<()>;

    /// No-op. Durability is left to the storage engine.
    fn fsync(&mut self) -> DaosResult<()>;

    fn get_file_size(&self, name: &str) -> DaosResult<u64>;

    /// Whether the metadata stress mode is supported.
    fn enable_mdtest(&self) -> bool;

    fn set_xfer_hints(&mut self, hints: XferHints);
}

/// DAOS array backend for one member of the group.
pub struct DaosBackend<E, G> {
    engine: E,
    group: G,
    options: DaosOptions,
    hints: XferHints,
    context: Option<ConnectionContext>,
    session: Option<ArraySession>,
}

impl<E, G> DaosBackend<E, G>
where
    E: StorageEngine,
    G: ProcessGroup,
{
    pub fn new(engine: E, group: G, options: DaosOptions) -> Self {
        Self {
            engine,
            group,
            options,
            hints: XferHints::default(),
            context: None,
            session: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn options(&self) -> &DaosOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(ArraySession::state)
    }

    fn connected(&self) -> DaosResult<(&ConnectionContext, &ArraySession)> {
        match (&self.context, &self.session) {
            (Some(ctx), Some(session)) => Ok((ctx, session)),
            _ => Err(DaosError::NotInitialized),
        }
    }

    /// Split borrows for the operations that move the session.
    fn connected_mut(&mut self) -> DaosResult<(&E, &G, &ConnectionContext, &mut ArraySession)> {
        match (&self.context, &mut self.session) {
            (Some(ctx), Some(session)) => Ok((&self.engine, &self.group, ctx, session)),
            _ => Err(DaosError::NotInitialized),
        }
    }

    fn new_session(&self) -> DaosResult<ArraySession> {
        Ok(ArraySession::new(
            self.options.object_class()?,
            self.options.chunk_size,
            self.hints.addressing(),
        ))
    }
}

impl<E, G> Aiori for DaosBackend<E, G>
where
    E: StorageEngine,
    G: ProcessGroup,
{
    fn get_version(&self) -> &'static str {
        VERSION
    }

    fn check_params(&self) -> DaosResult<()> {
        self.options.check_params()
    }

    /// Connect the group. A no-op when already connected, or when pool,
    /// service ranks and container are not all configured.
    fn initialize(&mut self) -> DaosResult<()> {
        if self.context.is_some() {
            return Ok(());
        }
        if !self.options.is_complete() {
            debug!(rank = %self.group.rank(), "pool or container not configured; skipping init");
            return Ok(());
        }
        let session = self.new_session()?;
        let context = ConnectionContext::connect(&self.engine, &self.group, &self.options)?;
        if self.group.is_root(context.leader()) {
            info!(
                pool = %context.pool(),
                cont = %context.cont(),
                oclass = self.options.object_class()?.name(),
                chunk_size = self.options.chunk_size,
                "DAOS initialized"
            );
        }
        self.context = Some(context);
        self.session = Some(session);
        Ok(())
    }

    fn finalize(&mut self) -> DaosResult<()> {
        let Some(context) = self.context.take() else {
            return Ok(());
        };
        if self.group.is_root(context.leader()) {
            info!("finalizing DAOS");
        }
        self.session = None;
        context.disconnect(&self.engine, &self.group, self.options.destroy)
    }

    fn create(&mut self, name: &str) -> DaosResult<()> {
        let addressing = self.hints.addressing();
        let (engine, group, ctx, session) = self.connected_mut()?;
        session.set_addressing(addressing);
        session.create(engine, group, ctx, name)
    }

    fn open(&mut self, name: &str) -> DaosResult<()> {
        let addressing = self.hints.addressing();
        let (engine, group, ctx, session) = self.connected_mut()?;
        session.set_addressing(addressing);
        session.open(engine, group, ctx, name)
    }

    fn access(&self, name: &str) -> DaosResult<bool> {
        let (ctx, session) = self.connected()?;
        session.access(&self.engine, ctx, name)
    }

    fn xfer(
        &mut self,
        access: Access,
        buf: &mut [u8],
        length: u64,
        offset: u64,
    ) -> DaosResult<u64> {
        let (_, session) = self.connected()?;
        let aoh = session.bound_handle()?;
        TransferEngine::new(&self.engine).xfer(aoh, access, buf, length, offset)
    }

    fn close(&mut self) -> DaosResult<()> {
        let addressing = self.hints.addressing();
        let (engine, _, _, session) = self.connected_mut()?;
        session.close(engine)?;
        session.set_addressing(addressing);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> DaosResult<()> {
        let (engine, _, ctx, session) = self.connected_mut()?;
        session.delete(engine, ctx, name)
    }

    fn fsync(&mut self) -> DaosResult<()> {
        Ok(())
    }

    fn get_file_size(&self, name: &str) -> DaosResult<u64> {
        let (ctx, session) = self.connected()?;
        session.get_size(&self.engine, &self.group, ctx, name)
    }

    fn enable_mdtest(&self) -> bool {
        false
    }

    /// Takes effect for the next file; an open file keeps its addressing.
    fn set_xfer_hints(&mut self, hints: XferHints) {
        self.hints = hints;
        if let Some(session) = &mut self.session {
            session.set_addressing(hints.addressing());
        }
    }
}

impl<E, G> std::fmt::Debug for DaosBackend<E, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaosBackend")
            .field("options", &self.options)
            .field("hints", &self.hints)
            .field("context", &self.context)
            .field("session", &self.session)
            .finish()
    }
}
