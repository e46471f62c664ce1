//! Global handle blobs of the in-process engine.
//!
//! Blob format:
//! ```text
//! [4 bytes: magic (little-endian u32)]
//! [1 byte : handle kind tag]
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized GlobalBody)]
//! ```

use aiori_types::{ArrayGeometry, HandleKind, ObjectIdentity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::traits::OpenMode;

const GLOBAL_MAGIC: u32 = 0x6169_6f68;

/// Header size: magic + kind + length + CRC.
const HEADER_SIZE: usize = 13;

/// What a global handle carries: enough to reopen the object locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalBody {
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

impl GlobalBody {
    pub fn kind(&self) -> HandleKind {
        match self {
            Self::Pool { .. } => HandleKind::Pool,
            Self::Container { .. } => HandleKind::Container,
            Self::Array { .. } => HandleKind::Array,
        }
    }
}

fn kind_tag(kind: HandleKind) -> u8 {
    match kind {
        HandleKind::Pool => 1,
        HandleKind::Container => 2,
        HandleKind::Array => 3,
    }
}

/// Serialize a body into a framed blob.
pub fn encode(body: &GlobalBody) -> EngineResult<Vec<u8>> {
    let payload =
        bincode::serialize(body).map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&GLOBAL_MAGIC.to_le_bytes());
    buf.push(kind_tag(body.kind()));
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a framed blob, checking that it carries a handle of `kind`.
pub fn decode(kind: HandleKind, buf: &[u8]) -> EngineResult<GlobalBody> {
    if buf.len() < HEADER_SIZE {
        return Err(EngineError::Corrupt(format!(
            "blob of {} bytes is shorter than the header",
            buf.len()
        )));
    }
    let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

    if word(0) != GLOBAL_MAGIC {
        return Err(EngineError::Corrupt(format!("bad magic {:#010x}", word(0))));
    }
    if buf[4] != kind_tag(kind) {
        return Err(EngineError::InvalidArgument(format!(
            "blob tag {} is not a {kind} handle",
            buf[4]
        )));
    }
    let length = word(5) as usize;
    let expected_crc = word(9);
    let payload = buf
        .get(HEADER_SIZE..HEADER_SIZE + length)
        .ok_or_else(|| EngineError::Corrupt(format!("truncated payload: want {length} bytes")))?;

    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(EngineError::Corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }

    let body: GlobalBody =
        bincode::deserialize(payload).map_err(|e| EngineError::Corrupt(e.to_string()))?;
    if body.kind() != kind {
        return Err(EngineError::InvalidArgument(format!(
            "blob carries a {} handle, expected {kind}",
            body.kind()
        )));
    }
    Ok(body)
}
