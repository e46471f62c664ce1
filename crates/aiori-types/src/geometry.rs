use serde::{Deserialize, Serialize};

/// Cell size of every array created by this backend. Opening an array whose
/// recorded cell size differs means it was not created here.
pub const CELL_SIZE: u64 = 1;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest chunk, in bytes, an array may be created with: 1 GiB.
pub const MAX_CHUNK_BYTES: u64 = 1024 * 1024 * 1024;

/// Cell and chunk size of an array object, as recorded by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayGeometry {
    pub cell_size: u64,
    pub chunk_size: u64,
}

impl ArrayGeometry {
    /// Byte-array geometry with the given chunk size.
    pub const fn bytes(chunk_size: u64) -> Self {
        Self {
            cell_size: CELL_SIZE,
            chunk_size,
        }
    }

    /// Returns `true` if the array uses 1-byte cells.
    pub fn is_byte_array(&self) -> bool {
        self.cell_size == CELL_SIZE
    }

    /// Bytes per chunk, `None` on overflow.
    pub fn chunk_bytes(&self) -> Option<u64> {
        self.cell_size.checked_mul(self.chunk_size)
    }

    /// Non-zero cells and chunks, and a chunk no larger than
    /// [`MAX_CHUNK_BYTES`].
    pub fn is_valid(&self) -> bool {
        self.cell_size > 0
            && self.chunk_size > 0
            && self.chunk_bytes().is_some_and(|n| n <= MAX_CHUNK_BYTES)
    }
}

impl Default for ArrayGeometry {
    fn default() -> Self {
        Self::bytes(DEFAULT_CHUNK_SIZE)
    }
}
