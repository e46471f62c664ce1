use std::path::Path;

use aiori_types::{
    AddressingMode, ArrayGeometry, ObjectClass, Rank, RankList, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_BYTES,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DaosError, DaosResult};

/// Prefix of harness-style option strings (`daos.pool=...`).
pub const OPTION_PREFIX: &str = "daos.";

/// Backend options.
///
/// Read from the `[daos]` table of a TOML file or from `daos.key=value`
/// strings. Pool, service ranks and container are required before
/// [`initialize`](crate::Aiori::initialize) connects; everything else has a
/// default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaosOptions {
    /// Pool uuid.
    pub pool: Option<String>,
    /// Pool service replica ranks, `:`-separated.
    pub svcl: Option<String>,
    /// Server group name.
    pub group: Option<String>,
    /// Container uuid. Created on first connect if absent.
    pub cont: Option<String>,
    /// Array chunk size in bytes.
    pub chunk_size: u64,
    /// Destroy the container in `finalize`.
    pub destroy: bool,
    /// Object class name, e.g. `SX` or `RP_3GX`.
    pub oclass: Option<String>,
    /// Rank that performs every privileged call in shared mode.
    pub leader: u32,
}

impl Default for DaosOptions {
    fn default() -> Self {
        Self {
            pool: None,
            svcl: None,
            group: None,
            cont: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            destroy: false,
            oclass: None,
            leader: 0,
        }
    }
}

#[derive(Deserialize)]
struct OptionsFile {
    #[serde(default)]
    daos: DaosOptions,
}

impl DaosOptions {
    /// Parse the `[daos]` table of a TOML document. A document without the
    /// table yields the defaults.
    pub fn from_toml_str(s: &str) -> DaosResult<Self> {
        let file: OptionsFile =
            toml::from_str(s).map_err(|e| DaosError::Usage(format!("invalid DAOS options: {e}")))?;
        Ok(file.daos)
    }

    pub fn load(path: impl AsRef<Path>) -> DaosResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DaosError::Usage(format!("cannot read options file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply one option. `key` may carry the `daos.` prefix.
    pub fn set(&mut self, key: &str, value: &str) -> DaosResult<()> {
        let key = key.strip_prefix(OPTION_PREFIX).unwrap_or(key);
        match key {
            "pool" => self.pool = Some(value.to_string()),
            "svcl" => self.svcl = Some(value.to_string()),
            "group" => self.group = Some(value.to_string()),
            "cont" => self.cont = Some(value.to_string()),
            "oclass" => self.oclass = Some(value.to_string()),
            "chunk_size" => self.chunk_size = parse_size(value)?,
            "destroy" => {
                self.destroy = match value {
                    "" | "1" | "true" | "yes" => true,
                    "0" | "false" | "no" => false,
                    other => {
                        return Err(DaosError::Usage(format!(
                            "invalid value for daos.destroy: {other}"
                        )))
                    }
                }
            }
            "leader" => {
                self.leader = value
                    .parse()
                    .map_err(|_| DaosError::Usage(format!("invalid leader rank: {value}")))?
            }
            other => return Err(DaosError::Usage(format!("unknown DAOS option: {other}"))),
        }
        Ok(())
    }

    /// Apply `daos.key=value` strings on top of the current values. A bare
    /// `daos.destroy` sets the flag.
    pub fn apply_args<I, S>(&mut self, args: I) -> DaosResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            let arg = arg.trim_start_matches('-');
            let (key, value) = arg.split_once('=').unwrap_or((arg, ""));
            if !key.starts_with(OPTION_PREFIX) {
                return Err(DaosError::Usage(format!("not a DAOS option: {arg}")));
            }
            self.set(key, value)?;
        }
        Ok(())
    }

    /// `true` once pool, service ranks and container are all given.
    pub fn is_complete(&self) -> bool {
        self.pool.is_some() && self.svcl.is_some() && self.cont.is_some()
    }

    pub fn check_params(&self) -> DaosResult<()> {
        if !self.is_complete() {
            return Err(DaosError::Usage("Invalid pool or container options".into()));
        }
        if !ArrayGeometry::bytes(self.chunk_size).is_valid() {
            return Err(DaosError::Usage(format!(
                "Invalid DAOS chunk size {} (1 to {MAX_CHUNK_BYTES} bytes)",
                self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn pool_uuid(&self) -> DaosResult<Uuid> {
        parse_uuid("pool", self.pool.as_deref())
    }

    pub fn cont_uuid(&self) -> DaosResult<Uuid> {
        parse_uuid("container", self.cont.as_deref())
    }

    pub fn service_ranks(&self) -> DaosResult<RankList> {
        let svcl = self
            .svcl
            .as_deref()
            .ok_or_else(|| DaosError::Usage("Invalid pool or container options".into()))?;
        Ok(svcl.parse::<RankList>()?)
    }

    /// Configured object class, `SX` when unset.
    pub fn object_class(&self) -> DaosResult<ObjectClass> {
        match self.oclass.as_deref() {
            None => Ok(ObjectClass::default()),
            Some(name) => ObjectClass::from_name(name)
                .ok_or_else(|| DaosError::Usage(format!("Invalid DAOS Object class {name}"))),
        }
    }

    pub fn leader(&self) -> Rank {
        Rank(self.leader)
    }
}

fn parse_uuid(what: &str, value: Option<&str>) -> DaosResult<Uuid> {
    let value =
        value.ok_or_else(|| DaosError::Usage("Invalid pool or container options".into()))?;
    Uuid::parse_str(value).map_err(|e| DaosError::Usage(format!("invalid {what} uuid {value}: {e}")))
}

/// Byte count with an optional `k`/`m`/`g` suffix (powers of 1024).
pub fn parse_size(value: &str) -> DaosResult<u64> {
    let value = value.trim();
    let (digits, shift) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 10),
        Some((i, 'm' | 'M')) => (&value[..i], 20),
        Some((i, 'g' | 'G')) => (&value[..i], 30),
        _ => (value, 0),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(1u64 << shift))
        .ok_or_else(|| DaosError::Usage(format!("invalid size: {value}")))
}

/// Per-run transfer hints from the harness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XferHints {
    pub file_per_proc: bool,
}

impl XferHints {
    pub fn addressing(&self) -> AddressingMode {
        AddressingMode::from_file_per_proc(self.file_per_proc)
    }
}
