use std::time::{SystemTime, UNIX_EPOCH};

use aiori_types::Rank;

use crate::error::GroupResult;

/// The collective capabilities the backend consumes from its group substrate.
///
/// All collectives block until every member has entered them. Members must
/// call them in the same order with the same root.
pub trait ProcessGroup {
    /// Rank of the calling member.
    fn rank(&self) -> Rank;

    /// Number of members.
    fn size(&self) -> usize;

    /// Copy the root's `buf` into every member's `buf`.
    ///
    /// Every member must pass a buffer of the root's length.
    fn broadcast(&self, buf: &mut [u8], root: Rank) -> GroupResult<()>;

    fn barrier(&self) -> GroupResult<()>;

    /// Take the whole group down. Members blocked in or entering a
    /// collective fail with `Aborted`.
    fn abort(&self, code: i32);

    /// Broadcast a single `u64` from the root.
    fn broadcast_u64(&self, value: &mut u64, root: Rank) -> GroupResult<()> {
        let mut buf = value.to_le_bytes();
        self.broadcast(&mut buf, root)?;
        *value = u64::from_le_bytes(buf);
        Ok(())
    }

    /// Broadcast a single `i32` status from the root.
    fn broadcast_i32(&self, value: &mut i32, root: Rank) -> GroupResult<()> {
        let mut buf = value.to_le_bytes();
        self.broadcast(&mut buf, root)?;
        *value = i32::from_le_bytes(buf);
        Ok(())
    }

    /// Wall-clock seconds, for timing collective phases.
    fn wtime(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn is_root(&self, root: Rank) -> bool {
        self.rank() == root
    }
}

impl<G: ProcessGroup + ?Sized> ProcessGroup for &G {
    fn rank(&self) -> Rank {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn broadcast(&self, buf: &mut [u8], root: Rank) -> GroupResult<()> {
        (**self).broadcast(buf, root)
    }

    fn barrier(&self) -> GroupResult<()> {
        (**self).barrier()
    }

    fn abort(&self, code: i32) {
        (**self).abort(code)
    }

    fn wtime(&self) -> f64 {
        (**self).wtime()
    }
}
