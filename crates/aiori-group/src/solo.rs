use std::sync::atomic::{AtomicI32, Ordering};

use aiori_types::Rank;
use tracing::warn;

use crate::error::{GroupError, GroupResult};
use crate::traits::ProcessGroup;

/// A group of exactly one member (rank 0).
#[derive(Debug, Default)]
pub struct SoloGroup {
    aborted: AtomicI32,
}

impl SoloGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort code, if the group has been aborted.
    pub fn aborted(&self) -> Option<i32> {
        match self.aborted.load(Ordering::Acquire) {
            0 => None,
            code => Some(code),
        }
    }

    fn check(&self) -> GroupResult<()> {
        match self.aborted() {
            Some(code) => Err(GroupError::Aborted {
                by: Rank::ZERO,
                code,
            }),
            None => Ok(()),
        }
    }
}

impl ProcessGroup for SoloGroup {
    fn rank(&self) -> Rank {
        Rank::ZERO
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _buf: &mut [u8], root: Rank) -> GroupResult<()> {
        if root != Rank::ZERO {
            return Err(GroupError::InvalidRoot { root, size: 1 });
        }
        self.check()
    }

    fn barrier(&self) -> GroupResult<()> {
        self.check()
    }

    fn abort(&self, code: i32) {
        warn!(code, "group abort");
        // Zero means "not aborted"; keep the flag set for a zero code.
        let code = if code == 0 { -1 } else { code };
        self.aborted.store(code, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectives_are_local() {
        let g = SoloGroup::new();
        let mut v = 42u64;
        g.broadcast_u64(&mut v, Rank::ZERO).unwrap();
        assert_eq!(v, 42);
        g.barrier().unwrap();
        assert_eq!(g.size(), 1);
        assert!(g.is_root(Rank::ZERO));
    }

    #[test]
    fn borrowed_member_shares_abort() {
        let g = SoloGroup::new();
        let borrowed = &g;
        assert_eq!(borrowed.rank(), Rank::ZERO);
        borrowed.abort(-3);
        assert_eq!(g.aborted(), Some(-3));
    }

    #[test]
    fn foreign_root_is_rejected() {
        let g = SoloGroup::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            g.broadcast(&mut buf, Rank(1)),
            Err(GroupError::InvalidRoot {
                root: Rank(1),
                size: 1
            })
        );
    }

    #[test]
    fn abort_poisons_later_collectives() {
        let g = SoloGroup::new();
        g.abort(-1);
        assert_eq!(g.aborted(), Some(-1));
        assert!(matches!(g.barrier(), Err(GroupError::Aborted { code: -1, .. })));
    }
}
