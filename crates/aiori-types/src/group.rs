use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Rank of a process within its group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank(pub u32);

impl Rank {
    /// Conventional group leader.
    pub const ZERO: Rank = Rank(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Rank {
    fn from(r: u32) -> Self {
        Self(r)
    }
}

/// How the processes of a run address their test files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// Each process owns a distinct object (file per process).
    Exclusive,
    /// All processes address one object; handles are distributed.
    #[default]
    Shared,
}

impl AddressingMode {
    pub fn from_file_per_proc(file_per_proc: bool) -> Self {
        if file_per_proc {
            Self::Exclusive
        } else {
            Self::Shared
        }
    }

    pub fn is_shared(self) -> bool {
        self == Self::Shared
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => f.write_str("exclusive"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// Pool service replica ranks, written `0:1:2`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankList(Vec<u32>);

impl RankList {
    pub fn new(ranks: Vec<u32>) -> Self {
        Self(ranks)
    }

    /// Parse a list of ranks separated by any character in `sep`.
    pub fn parse(s: &str, sep: &str) -> Result<Self, TypeError> {
        let mut ranks = Vec::new();
        for part in s.split(|c| sep.contains(c)).filter(|p| !p.is_empty()) {
            let rank = part.trim().parse::<u32>().map_err(|e| TypeError::InvalidRankList {
                list: s.to_string(),
                reason: format!("{part:?}: {e}"),
            })?;
            ranks.push(rank);
        }
        if ranks.is_empty() {
            return Err(TypeError::InvalidRankList {
                list: s.to_string(),
                reason: "no ranks".into(),
            });
        }
        Ok(Self(ranks))
    }

    pub fn ranks(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for RankList {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, ":")
    }
}

impl fmt::Display for RankList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join(":"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_svcl() {
        let list: RankList = "0:1:2".parse().unwrap();
        assert_eq!(list.ranks(), &[0, 1, 2]);
        assert_eq!(list.to_string(), "0:1:2");
    }

    #[test]
    fn parse_single_rank() {
        let list = RankList::parse("7", ":").unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "0:x:2".parse::<RankList>(),
            Err(TypeError::InvalidRankList { .. })
        ));
        assert!("".parse::<RankList>().is_err());
    }

    #[test]
    fn addressing_from_fpp() {
        assert_eq!(AddressingMode::from_file_per_proc(true), AddressingMode::Exclusive);
        assert_eq!(AddressingMode::from_file_per_proc(false), AddressingMode::Shared);
        assert!(AddressingMode::default().is_shared());
    }

    #[test]
    fn rank_display() {
        assert_eq!(Rank(3).to_string(), "3");
        assert_eq!(Rank::ZERO.index(), 0);
    }
}
