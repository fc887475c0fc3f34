//! Records held by the local cache

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which namespace an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Content identifier assigned by the remote store
    Remote,
    /// Key minted locally after the remote write failed
    Local,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Remote => f.write_str("remote"),
            Origin::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

/// A content blob keyed by remote id or local key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub payload: String,
    /// Unix milliseconds of the last write
    pub timestamp: u64,
    pub origin: Origin,
}

/// One entry of the append-only message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Monotonic sequence number, starting at 1
    pub id: u64,
    pub text: String,
    pub role: Role,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub blob_count: usize,
    pub message_count: usize,
}

/// On-disk form of a blob: the record plus a digest of its payload
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredBlob {
    #[serde(flatten)]
    pub record: ContentRecord,
    pub sha1: String,
}
