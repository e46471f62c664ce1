use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Seed for hashing test-file names into the low half of an object id.
pub const OID_NAME_SEED: u32 = 0xDEAD_10CC;

/// Bits of `hi` owned by the engine. Everything above is reserved for the
/// format header (version, features, class).
const OID_FMT_INTR_BITS: u32 = 32;
const OID_FMT_VER: u64 = 1;
const OID_FMT_VER_SHIFT: u32 = 60;
const OID_FMT_FEAT_SHIFT: u32 = 48;
const OID_FMT_CLASS_SHIFT: u32 = 32;
const OID_FMT_FEAT_MASK: u64 = 0xfff;
const OID_FMT_CLASS_MASK: u64 = 0xffff;

/// Object feature bits stamped into the id header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OidFeatures(u16);

impl OidFeatures {
    pub const DKEY_UINT64: Self = Self(1 << 0);
    pub const DKEY_LEXICAL: Self = Self(1 << 1);
    pub const AKEY_UINT64: Self = Self(1 << 2);
    pub const AKEY_LEXICAL: Self = Self(1 << 3);
    pub const KV_FLAT: Self = Self(1 << 4);
    /// Array object whose cell/chunk attributes are stored with the object.
    pub const ARRAY: Self = Self(1 << 5);
    /// Byte array whose attributes are supplied by the caller on every open.
    pub const ARRAY_BYTE: Self = Self(1 << 6);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Features for an array id. With `add_attr` the engine records cell and
    /// chunk size at create time and hands them back on open.
    pub const fn for_array(add_attr: bool) -> Self {
        let base = Self::DKEY_UINT64.union(Self::KV_FLAT);
        if add_attr {
            base.union(Self::ARRAY)
        } else {
            base.union(Self::ARRAY_BYTE)
        }
    }
}

/// Object class: the redundancy and striping layout of an object.
///
/// `S*` classes stripe without redundancy, `RP_*` replicate, `EC_*` use
/// erasure coding. `SX` stripes over every target and is the default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    S1,
    S2,
    S4,
    S8,
    S16,
    S32,
    SX,
    Rp2G1,
    Rp2G2,
    Rp2GX,
    Rp3G1,
    Rp3GX,
    Ec2P1G1,
    Ec4P2G1,
    Ec8P2G1,
}

static CLASS_TABLE: [(ObjectClass, &str, u16); 15] = [
    (ObjectClass::S1, "S1", 200),
    (ObjectClass::S2, "S2", 201),
    (ObjectClass::S4, "S4", 202),
    (ObjectClass::S8, "S8", 203),
    (ObjectClass::S16, "S16", 204),
    (ObjectClass::S32, "S32", 205),
    (ObjectClass::SX, "SX", 214),
    (ObjectClass::Rp2G1, "RP_2G1", 220),
    (ObjectClass::Rp2G2, "RP_2G2", 221),
    (ObjectClass::Rp2GX, "RP_2GX", 235),
    (ObjectClass::Rp3G1, "RP_3G1", 240),
    (ObjectClass::Rp3GX, "RP_3GX", 255),
    (ObjectClass::Ec2P1G1, "EC_2P1G1", 400),
    (ObjectClass::Ec4P2G1, "EC_4P2G1", 410),
    (ObjectClass::Ec8P2G1, "EC_8P2G1", 420),
];

impl ObjectClass {
    /// Look up a class by its engine name (case-insensitive, optional `OC_`
    /// prefix). Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name
            .strip_prefix("OC_")
            .or_else(|| name.strip_prefix("oc_"))
            .unwrap_or(name);
        CLASS_TABLE
            .iter()
            .find(|(_, n, _)| n.eq_ignore_ascii_case(name))
            .map(|(class, _, _)| *class)
    }

    /// Look up a class by its numeric id.
    pub fn from_id(id: u16) -> Option<Self> {
        CLASS_TABLE
            .iter()
            .find(|(_, _, i)| *i == id)
            .map(|(class, _, _)| *class)
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    pub fn id(self) -> u16 {
        self.entry().2
    }

    fn entry(self) -> (ObjectClass, &'static str, u16) {
        CLASS_TABLE[self as usize]
    }
}

impl Default for ObjectClass {
    fn default() -> Self {
        Self::SX
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectClass {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| TypeError::UnknownObjectClass(s.to_string()))
    }
}

/// 128-bit object identifier.
///
/// Test files are named, storage objects are not: the backend maps a file name
/// onto an id by hashing it into `lo` and letting the engine stamp `hi` with the
/// object class and features. The id is recomputed from the name on every
/// access and never persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub lo: u64,
    pub hi: u64,
}

impl ObjectIdentity {
    pub const fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Raw name hash with an empty header. Still needs
    /// [`generate_array_id`](Self::generate_array_id) before use as an array id.
    ///
    /// `lo` is the low half of murmur3 x64_128, not the MurmurHash64A that
    /// IOR's C backend uses, so ids do not match objects created by a real
    /// IOR run against the same container.
    pub fn from_name(name: &str) -> Self {
        let mut cursor = Cursor::new(name.as_bytes());
        let hash = murmur3::murmur3_x64_128(&mut cursor, OID_NAME_SEED)
            .expect("reading from an in-memory cursor cannot fail");
        Self {
            lo: hash as u64,
            hi: 0,
        }
    }

    /// Derive the array id for a test file.
    pub fn derive(name: &str, class: ObjectClass) -> Self {
        Self::from_name(name).generate_array_id(class, true)
    }

    /// Stamp the format header into `hi`.
    ///
    /// The caller-chosen bits (`lo` and the low 32 bits of `hi`) are kept, the
    /// header is replaced, so applying this twice with the same arguments is a
    /// no-op.
    pub fn generate_array_id(self, class: ObjectClass, add_attr: bool) -> Self {
        let features = OidFeatures::for_array(add_attr);
        let mut hi = self.hi & ((1u64 << OID_FMT_INTR_BITS) - 1);
        hi |= OID_FMT_VER << OID_FMT_VER_SHIFT;
        hi |= (u64::from(features.bits()) & OID_FMT_FEAT_MASK) << OID_FMT_FEAT_SHIFT;
        hi |= (u64::from(class.id()) & OID_FMT_CLASS_MASK) << OID_FMT_CLASS_SHIFT;
        Self { lo: self.lo, hi }
    }

    /// Object class recorded in the header, if the id has been generated.
    pub fn class(&self) -> Option<ObjectClass> {
        let id = (self.hi >> OID_FMT_CLASS_SHIFT) & OID_FMT_CLASS_MASK;
        ObjectClass::from_id(id as u16)
    }

    /// Feature bits recorded in the header.
    pub fn features(&self) -> OidFeatures {
        OidFeatures(((self.hi >> OID_FMT_FEAT_SHIFT) & OID_FMT_FEAT_MASK) as u16)
    }

    /// Format version recorded in the header (0 for a raw id).
    pub fn version(&self) -> u8 {
        (self.hi >> OID_FMT_VER_SHIFT) as u8
    }

    /// Big-endian `hi` followed by big-endian `lo`.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.hi.to_be_bytes());
        out[8..].copy_from_slice(&self.lo.to_be_bytes());
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 16 {
            return Err(TypeError::InvalidLength {
                expected: 16,
                actual: bytes.len(),
            });
        }
        let mut hi = [0u8; 8];
        let mut lo = [0u8; 8];
        hi.copy_from_slice(&bytes[..8]);
        lo.copy_from_slice(&bytes[8..]);
        Ok(Self {
            lo: u64::from_be_bytes(lo),
            hi: u64::from_be_bytes(hi),
        })
    }
}

impl fmt::Debug for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentity({self})")
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}.{:#x}", self.hi, self.lo)
    }
}
