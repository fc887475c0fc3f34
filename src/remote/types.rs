//! Remote store API types
//!
//! Wire types for the IPFS HTTP API plus the values the client hands back to callers.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a number that might be encoded as a string or null.
/// The IPFS API returns `Size` as a string (e.g. "27") on `/api/v0/add`.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Response from `/api/v0/id`, used as the liveness probe
#[derive(Debug, Clone, Deserialize)]
pub struct NodeIdentity {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "AgentVersion", default)]
    pub agent_version: Option<String>,
}

/// Response from `/api/v0/add`
#[derive(Debug, Clone, Deserialize)]
pub struct AddResponse {
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Content identifier derived from the payload
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Size", default, deserialize_with = "deserialize_flexible_u64")]
    pub size: u64,
}

/// Per-call options for `add`
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Also request a secondary pin (when pinning is configured)
    pub pin: bool,
    /// Name recorded by the store for the uploaded part
    pub file_name: Option<String>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            pin: true,
            file_name: None,
        }
    }
}

/// Successful write to the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddResult {
    pub id: String,
    pub size: u64,
}

/// Outcome of an initialize attempt, shared by every concurrent caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Connected { endpoint: String },
    Failed { reason: String },
}

impl InitOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, InitOutcome::Connected { .. })
    }
}

/// A recent error entry for tracking
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub operation: String,
    pub target: String,
    pub error: String,
}

/// Snapshot of the client's connectivity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub connected: bool,
    pub endpoint: Option<String>,
    pub last_error: Option<String>,
    pub health: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_response_string_size() {
        let json = r#"{"Name":"message.txt","Hash":"QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o","Size":"19"}"#;
        let resp: AddResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.hash, "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o");
        assert_eq!(resp.size, 19);
    }

    #[test]
    fn test_add_response_numeric_size() {
        let json = r#"{"Hash":"bafkqaaa","Size":7}"#;
        let resp: AddResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.size, 7);
        assert!(resp.name.is_empty());
    }

    #[test]
    fn test_node_identity() {
        let json = r#"{"ID":"12D3KooW","PublicKey":"x","Addresses":[],"AgentVersion":"kubo/0.29.0"}"#;
        let id: NodeIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(id.id, "12D3KooW");
        assert_eq!(id.agent_version.as_deref(), Some("kubo/0.29.0"));
    }
}
