use std::fmt;

use aiori_engine::{ArrayIod, SgList, SgListMut, StorageEngine};
use aiori_types::Handle;
use serde::{Deserialize, Serialize};

use crate::error::{DaosError, DaosResult, EngineCallExt};

/// Transfer direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Moves bytes between a caller buffer and an open array.
///
/// Every transfer is one extent `[offset, offset + length)` against one
/// memory region of `length` bytes. Nothing is synced after a write.
pub struct TransferEngine<'a, E: ?Sized> {
    engine: &'a E,
}

impl<'a, E> TransferEngine<'a, E>
where
    E: StorageEngine + ?Sized,
{
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Transfer `length` bytes at `offset`. Returns `length`; anything less
    /// is an error.
    pub fn xfer(
        &self,
        aoh: Handle,
        access: Access,
        buf: &mut [u8],
        length: u64,
        offset: u64,
    ) -> DaosResult<u64> {
        let available = buf.len();
        let region = usize::try_from(length)
            .ok()
            .and_then(|n| buf.get_mut(..n))
            .ok_or_else(|| {
                DaosError::Usage(format!(
                    "transfer of {length} bytes from a {available}-byte buffer"
                ))
            })?;
        let iod = ArrayIod::single(offset, length);

        let moved = match access {
            Access::Read => self
                .engine
                .array_read(aoh, &iod, &mut SgListMut::single(region))
                .engine_call("daos_array_read")?,
            Access::Write => self
                .engine
                .array_write(aoh, &iod, &SgList::single(region))
                .engine_call("daos_array_write")?,
        };
        check_moved(access, offset, length, moved)
    }

    pub fn write(&self, aoh: Handle, data: &[u8], offset: u64) -> DaosResult<u64> {
        let moved = self
            .engine
            .array_write(aoh, &ArrayIod::single(offset, data.len() as u64), &SgList::single(data))
            .engine_call("daos_array_write")?;
        check_moved(Access::Write, offset, data.len() as u64, moved)
    }

    pub fn read(&self, aoh: Handle, buf: &mut [u8], offset: u64) -> DaosResult<u64> {
        let length = buf.len() as u64;
        self.xfer(aoh, Access::Read, buf, length, offset)
    }
}

fn check_moved(access: Access, offset: u64, expected: u64, moved: u64) -> DaosResult<u64> {
    if moved != expected {
        return Err(DaosError::ShortTransfer {
            access,
            offset,
            expected,
            moved,
        });
    }
    Ok(moved)
}
