use aiori_engine::{EngineError, OpenMode, StorageEngine};
use aiori_group::ProcessGroup;
use aiori_types::{Handle, HandleKind, Rank};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DaosOptions;
use crate::coordinator::HandleCoordinator;
use crate::error::{CollectiveResultExt, DaosError, DaosResult, EngineCallExt};

/// Pool and container handles for one run.
///
/// Built by [`connect`](Self::connect) and torn down by
/// [`disconnect`](Self::disconnect). Every later operation borrows it.
#[derive(Debug)]
pub struct ConnectionContext {
    pool: Uuid,
    cont: Uuid,
    poh: Handle,
    coh: Handle,
    leader: Rank,
}

impl ConnectionContext {
    /// Initialize the engine and connect every member.
    ///
    /// The leader connects to the pool and opens the container, creating it
    /// first if it does not exist. Both handles then go to the other members
    /// through the [`HandleCoordinator`].
    pub fn connect<E, G>(engine: &E, group: &G, options: &DaosOptions) -> DaosResult<Self>
    where
        E: StorageEngine + ?Sized,
        G: ProcessGroup + ?Sized,
    {
        let pool = options.pool_uuid()?;
        let cont = options.cont_uuid()?;
        let svcl = options.service_ranks()?;
        let leader = options.leader();
        if leader.index() >= group.size() {
            return Err(DaosError::Usage(format!(
                "leader rank {leader} outside a group of {}",
                group.size()
            )));
        }

        engine.init().engine_call("daos_init")?;

        let coord = HandleCoordinator::new(engine, group, leader);
        let mut poh = Handle::invalid(HandleKind::Pool);
        let mut coh = Handle::invalid(HandleKind::Container);

        if coord.is_leader() {
            info!(%pool, %svcl, "connecting to pool");
            poh = engine
                .pool_connect(pool, options.group.as_deref(), &svcl, OpenMode::ReadWrite)
                .engine_call("daos_pool_connect")?;
            coh = open_or_create(engine, poh, cont)?;
        }

        coord.distribute(&mut poh, None)?;
        coord.distribute(&mut coh, Some(poh))?;
        debug!(rank = %group.rank(), ?poh, ?coh, "connection established");

        Ok(Self {
            pool,
            cont,
            poh,
            coh,
            leader,
        })
    }

    /// Close the container, optionally destroy it, disconnect from the pool,
    /// and finalize the engine.
    ///
    /// Only the leader destroys. It broadcasts the outcome so every member
    /// fails together if the destroy fails.
    pub fn disconnect<E, G>(self, engine: &E, group: &G, destroy: bool) -> DaosResult<()>
    where
        E: StorageEngine + ?Sized,
        G: ProcessGroup + ?Sized,
    {
        group.barrier().collective("barrier")?;
        engine.cont_close(self.coh).engine_call("daos_cont_close")?;
        group.barrier().collective("barrier")?;

        if destroy {
            let mut status = 0i32;
            if group.is_root(self.leader) {
                info!(cont = %self.cont, "destroying container");
                let start = group.wtime();
                if let Err(e) = engine.cont_destroy(self.poh, self.cont, true) {
                    status = e.status();
                }
                let elapsed = group.wtime() - start;
                info!(cont = %self.cont, elapsed_secs = elapsed, status, "container destroy done");
            }
            group
                .broadcast_i32(&mut status, self.leader)
                .collective("broadcast container destroy status")?;
            if let Some(e) = EngineError::from_status(status, &format!("container {}", self.cont)) {
                return Err(e).engine_call("daos_cont_destroy");
            }
        }

        engine
            .pool_disconnect(self.poh)
            .engine_call("daos_pool_disconnect")?;
        group.barrier().collective("barrier")?;
        engine.fini().engine_call("daos_fini")?;
        debug!(rank = %group.rank(), pool = %self.pool, "disconnected");
        Ok(())
    }

    pub fn pool_handle(&self) -> Handle {
        self.poh
    }

    pub fn cont_handle(&self) -> Handle {
        self.coh
    }

    pub fn pool(&self) -> Uuid {
        self.pool
    }

    pub fn cont(&self) -> Uuid {
        self.cont
    }

    pub fn leader(&self) -> Rank {
        self.leader
    }
}

/// Open the container, creating it once if the engine reports it missing.
fn open_or_create<E>(engine: &E, poh: Handle, cont: Uuid) -> DaosResult<Handle>
where
    E: StorageEngine + ?Sized,
{
    match engine.cont_open(poh, cont, OpenMode::ReadWrite) {
        Ok(coh) => Ok(coh),
        Err(e) if e.is_nonexistent() => {
            info!(%cont, "creating container");
            engine.cont_create(poh, cont).engine_call("daos_cont_create")?;
            engine
                .cont_open(poh, cont, OpenMode::ReadWrite)
                .engine_call("daos_cont_open")
        }
        Err(e) => Err(e).engine_call("daos_cont_open"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, options, CONT, POOL};
    use aiori_group::{SoloGroup, ThreadGroup};

    // ---------------------------------------------------------------
    // connect
    // ---------------------------------------------------------------

    #[test]
    fn leader_creates_missing_container_once() {
        let cluster = cluster();
        let opts = options();
        let results = ThreadGroup::run(4, |m| {
            let engine = cluster.client();
            let ctx = ConnectionContext::connect(&engine, &m, &opts).unwrap();
            assert!(ctx.pool_handle().is_valid());
            assert!(ctx.cont_handle().is_valid());
            ctx.disconnect(&engine, &m, false).unwrap();
            engine.open_handles()
        });
        assert!(results.iter().all(|open| *open == 0));
        let stats = cluster.stats();
        assert_eq!(stats.pool_connects, 1);
        assert_eq!(stats.cont_creates, 1);
        assert_eq!(stats.cont_opens, 1);
        assert_eq!(stats.global2local, 6);
        assert!(cluster.container_exists(POOL, CONT));
    }

    #[test]
    fn existing_container_is_opened_not_created() {
        let cluster = cluster();
        let opts = options();
        for _ in 0..2 {
            let engine = cluster.client();
            let group = SoloGroup::new();
            let ctx = ConnectionContext::connect(&engine, &group, &opts).unwrap();
            assert_eq!(ctx.cont(), CONT);
            ctx.disconnect(&engine, &group, false).unwrap();
        }
        let stats = cluster.stats();
        assert_eq!(stats.cont_creates, 1);
        assert_eq!(stats.cont_opens, 2);
    }

    #[test]
    fn unknown_pool_fails_on_the_leader() {
        let cluster = cluster();
        let mut opts = options();
        opts.pool = Some(Uuid::nil().to_string());
        let engine = cluster.client();
        let err = ConnectionContext::connect(&engine, &SoloGroup::new(), &opts).unwrap_err();
        assert_eq!(err.status(), -1005);
        assert!(err.to_string().starts_with("daos_pool_connect failed"));
    }

    #[test]
    fn wrong_server_group_is_rejected() {
        let cluster = cluster();
        let mut opts = options();
        opts.group = Some("other_group".into());
        let engine = cluster.client();
        assert!(ConnectionContext::connect(&engine, &SoloGroup::new(), &opts).is_err());
    }

    #[test]
    fn leader_outside_group_is_a_usage_error() {
        let cluster = cluster();
        let mut opts = options();
        opts.leader = 3;
        let engine = cluster.client();
        let err = ConnectionContext::connect(&engine, &SoloGroup::new(), &opts).unwrap_err();
        assert!(matches!(err, DaosError::Usage(_)));
    }

    // ---------------------------------------------------------------
    // disconnect
    // ---------------------------------------------------------------

    #[test]
    fn destroy_removes_container_for_everyone() {
        let cluster = cluster();
        let opts = options();
        let results = ThreadGroup::run(3, |m| {
            let engine = cluster.client();
            let ctx = ConnectionContext::connect(&engine, &m, &opts).unwrap();
            ctx.disconnect(&engine, &m, true)
        });
        assert!(results.iter().all(Result::is_ok));
        assert!(!cluster.container_exists(POOL, CONT));
        assert_eq!(cluster.stats().cont_destroys, 1);
    }

    #[test]
    fn failed_destroy_fails_every_member() {
        let cluster = cluster();
        let opts = options();
        let results = ThreadGroup::run(3, |m| {
            let engine = cluster.client();
            let ctx = ConnectionContext::connect(&engine, &m, &opts).unwrap();
            m.barrier().unwrap();
            if m.rank() == Rank::ZERO {
                // Pull the container out from under the run.
                let side = cluster.client();
                side.init().unwrap();
                let poh = side
                    .pool_connect(POOL, None, &options().service_ranks().unwrap(), OpenMode::ReadWrite)
                    .unwrap();
                side.cont_destroy(poh, CONT, true).unwrap();
            }
            ctx.disconnect(&engine, &m, true)
        });
        for r in results {
            let err = r.unwrap_err();
            assert_eq!(err.status(), -1005);
            assert!(err.to_string().starts_with("daos_cont_destroy failed"));
        }
    }
}
