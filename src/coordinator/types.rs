//! Identifiers shared by the topology and the vacuum protocol

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Logical volume identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(pub u32);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VolumeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(VolumeId)
            .map_err(|_| Error::Other(format!("invalid volume id: {}", s)))
    }
}

impl From<u32> for VolumeId {
    fn from(v: u32) -> Self {
        VolumeId(v)
    }
}

/// Network address of a storage node (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeEndpoint(Arc<str>);

impl NodeEndpoint {
    pub fn new(addr: impl AsRef<str>) -> Self {
        Self(Arc::from(addr.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeEndpoint {
    fn from(s: &str) -> Self {
        NodeEndpoint::new(s)
    }
}

impl From<String> for NodeEndpoint {
    fn from(s: String) -> Self {
        NodeEndpoint::new(s)
    }
}

/// Replica placement class, e.g. `"001"`.
///
/// The digits count extra copies on other data centers, other racks and the
/// same rack respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicationClass {
    pub diff_data_center: u8,
    pub diff_rack: u8,
    pub same_rack: u8,
}

impl ReplicationClass {
    /// Total number of copies a volume of this class should have
    pub fn copy_count(&self) -> usize {
        1 + self.diff_data_center as usize + self.diff_rack as usize + self.same_rack as usize
    }
}

impl FromStr for ReplicationClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits: Vec<u8> = s
            .chars()
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::InvalidReplication(s.to_string()))?;

        match digits.as_slice() {
            [] => Ok(Self::default()),
            [dc, rack, same] => Ok(Self {
                diff_data_center: *dc,
                diff_rack: *rack,
                same_rack: *same,
            }),
            _ => Err(Error::InvalidReplication(s.to_string())),
        }
    }
}

impl fmt::Display for ReplicationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.diff_data_center, self.diff_rack, self.same_rack
        )
    }
}

impl Serialize for ReplicationClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReplicationClass {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
