use std::panic::Location;

use aiori_engine::HandleCodec;
use aiori_group::ProcessGroup;
use aiori_types::{Handle, Rank};
use tracing::debug;

use crate::error::{CollectiveResultExt, DaosError, DaosResult, EngineCallExt};

/// Distributes a handle held by the leader to every member of the group.
///
/// Written once against [`HandleCodec`]; the handle kind is carried by the
/// handle itself. Every member must call [`distribute`](Self::distribute)
/// for the same handle in the same order.
pub struct HandleCoordinator<'a, E: ?Sized, G: ?Sized> {
    engine: &'a E,
    group: &'a G,
    leader: Rank,
}

impl<'a, E, G> HandleCoordinator<'a, E, G>
where
    E: HandleCodec + ?Sized,
    G: ProcessGroup + ?Sized,
{
    pub fn new(engine: &'a E, group: &'a G, leader: Rank) -> Self {
        Self {
            engine,
            group,
            leader,
        }
    }

    pub fn leader(&self) -> Rank {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.group.is_root(self.leader)
    }

    /// Make the leader's `handle` usable on every member.
    ///
    /// On the leader `handle` is read and left untouched. On every other
    /// member its current value is ignored and replaced with a local handle
    /// imported under `parent` (the local pool handle for a container, the
    /// local container handle for an array).
    ///
    /// The blob length goes out first so followers can size their buffer,
    /// then the blob itself.
    pub fn distribute(&self, handle: &mut Handle, parent: Option<Handle>) -> DaosResult<()> {
        let kind = handle.kind();
        let leader = self.is_leader();

        let mut len = 0u64;
        if leader {
            len = self.engine.global_size(*handle).engine_call("local2global size")? as u64;
        }
        self.group
            .broadcast_u64(&mut len, self.leader)
            .collective("broadcast global handle size")?;

        let mut buf = alloc_blob(len)?;
        if leader {
            self.engine
                .local2global(*handle, &mut buf)
                .engine_call("local2global")?;
        }
        self.group
            .broadcast(&mut buf, self.leader)
            .collective("broadcast global handle")?;

        if !leader {
            *handle = self
                .engine
                .global2local(kind, parent, &buf)
                .engine_call("global2local")?;
        }
        debug!(rank = %self.group.rank(), %kind, len, "handle distributed");
        Ok(())
    }
}

/// Zeroed buffer for a global handle. Allocation failure is reported instead
/// of aborting the process so the group can go down together.
#[track_caller]
fn alloc_blob(len: u64) -> DaosResult<Vec<u8>> {
    let location = Location::caller();
    let alloc_err = || DaosError::Alloc { len, location };
    let n = usize::try_from(len).map_err(|_| alloc_err())?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(n).map_err(|_| alloc_err())?;
    buf.resize(n, 0);
    Ok(buf)
}
