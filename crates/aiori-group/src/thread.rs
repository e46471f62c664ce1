use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use aiori_types::Rank;
use tracing::{debug, warn};

use crate::error::{GroupError, GroupResult};
use crate::traits::ProcessGroup;

/// Payload posted by the root of the current collective step.
struct Step {
    root: Rank,
    payload: Vec<u8>,
}

/// Rendezvous state shared by all members.
///
/// Collectives are numbered. A step is open while `generation` equals its
/// number; the root posts its payload, every member copies it, and the last
/// member to copy closes the step by bumping `generation`.
struct State {
    generation: u64,
    posted: Option<Step>,
    copied: usize,
    aborted: Option<(Rank, i32)>,
}

struct Shared {
    size: usize,
    state: Mutex<State>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("group mutex poisoned")
    }

    /// Block until `ready` holds, failing if the group is aborted first.
    fn wait_until<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
        ready: impl Fn(&State) -> bool,
    ) -> GroupResult<MutexGuard<'a, State>> {
        loop {
            if let Some((by, code)) = state.aborted {
                return Err(GroupError::Aborted { by, code });
            }
            if ready(&state) {
                return Ok(state);
            }
            state = self.cv.wait(state).expect("group mutex poisoned");
        }
    }

    fn abort(&self, by: Rank, code: i32) {
        let mut state = self.lock();
        if state.aborted.is_none() {
            state.aborted = Some((by, code));
        }
        drop(state);
        self.cv.notify_all();
    }
}

/// A process group whose ranks are threads of the current process.
///
/// Create the group, hand one [`ThreadMember`] to each thread, and have every
/// thread issue the same collectives. [`ThreadGroup::run`] does all of that
/// for a closure.
pub struct ThreadGroup {
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Create a group of `size` members (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                size: size.max(1),
                state: Mutex::new(State {
                    generation: 0,
                    posted: None,
                    copied: 0,
                    aborted: None,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// One member per rank, in rank order.
    pub fn members(&self) -> Vec<ThreadMember> {
        (0..self.shared.size)
            .map(|r| ThreadMember {
                rank: Rank(r as u32),
                shared: Arc::clone(&self.shared),
                generation: Cell::new(0),
            })
            .collect()
    }

    /// Abort code, if any member aborted the group.
    pub fn aborted(&self) -> Option<i32> {
        self.shared.lock().aborted.map(|(_, code)| code)
    }

    /// Run `f` once per rank on its own thread and collect the results in
    /// rank order. A member that panics aborts the group so the others do not
    /// block forever; the panic is then propagated.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ThreadMember) -> T + Sync,
    {
        let group = ThreadGroup::new(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = group
                .members()
                .into_iter()
                .map(|member| {
                    let guard = AbortOnPanic {
                        shared: Arc::clone(&member.shared),
                        rank: member.rank,
                    };
                    scope.spawn(move || {
                        let out = f(member);
                        drop(guard);
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("size", &self.shared.size)
            .field("aborted", &self.aborted())
            .finish()
    }
}

struct AbortOnPanic {
    shared: Arc<Shared>,
    rank: Rank,
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(rank = %self.rank, "member panicked; aborting group");
            self.shared.abort(self.rank, -1);
        }
    }
}

/// One rank of a [`ThreadGroup`]. Owned by exactly one thread.
pub struct ThreadMember {
    rank: Rank,
    shared: Arc<Shared>,
    generation: Cell<u64>,
}

impl ThreadMember {
    /// Enter the next collective step. The root contributes `payload`; every
    /// member gets a copy of it back. With `wait_all`, return only once every
    /// member has arrived.
    fn collective(&self, root: Rank, payload: &[u8], wait_all: bool) -> GroupResult<Vec<u8>> {
        let size = self.shared.size;
        if root.index() >= size {
            return Err(GroupError::InvalidRoot { root, size });
        }
        let step = self.generation.get();

        let state = self.shared.lock();
        let mut state = self.shared.wait_until(state, |s| s.generation >= step)?;
        if self.rank == root {
            state.posted = Some(Step {
                root,
                payload: payload.to_vec(),
            });
            self.shared.cv.notify_all();
        }

        let mut state = self.shared.wait_until(state, |s| s.posted.is_some())?;
        let (posted_root, out) = match state.posted.as_ref() {
            Some(posted) => (posted.root, posted.payload.clone()),
            None => unreachable!("wait_until guarantees a posted step"),
        };
        if posted_root != root {
            debug!(rank = %self.rank, %root, %posted_root, "collective root disagreement");
        }
        state.copied += 1;
        if state.copied == size {
            state.generation += 1;
            state.posted = None;
            state.copied = 0;
            self.shared.cv.notify_all();
        }
        self.generation.set(step + 1);

        if wait_all {
            self.shared.wait_until(state, |s| s.generation > step)?;
        }
        Ok(out)
    }
}

impl ProcessGroup for ThreadMember {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, buf: &mut [u8], root: Rank) -> GroupResult<()> {
        let out = self.collective(root, buf, false)?;
        if out.len() != buf.len() {
            return Err(GroupError::LengthMismatch {
                expected: out.len(),
                actual: buf.len(),
            });
        }
        buf.copy_from_slice(&out);
        Ok(())
    }

    fn barrier(&self) -> GroupResult<()> {
        self.collective(Rank::ZERO, &[], true).map(|_| ())
    }

    fn abort(&self, code: i32) {
        warn!(rank = %self.rank, code, "group abort");
        self.shared.abort(self.rank, code);
    }
}

impl std::fmt::Debug for ThreadMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadMember")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}
