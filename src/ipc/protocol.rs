//! IPC protocol definitions
//!
//! Newline-delimited JSON over a Unix domain socket. Every command gets exactly
//! one response line.

use serde::{Deserialize, Serialize};

use crate::cache::{MessageRecord, Origin};
use crate::orchestrator::OrchestratorStatus;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Store a text message
    Submit { text: String },
    /// Read content by remote id or local key
    Fetch { id: String },
    /// Recent message history, oldest first
    History {
        #[serde(default)]
        limit: Option<usize>,
    },
    GetStatus,
    /// Online/offline signal from the host environment
    SetOnline { online: bool },
    /// Evict cached blobs older than the retention window
    #[serde(rename_all = "camelCase")]
    Purge {
        #[serde(default)]
        retention_days: Option<u64>,
    },
}

/// Responses sent back to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Submitted {
        id: String,
        origin: Origin,
        size: u64,
    },
    Content {
        id: String,
        data: String,
    },
    History {
        messages: Vec<MessageRecord>,
    },
    Status {
        version: u32,
        #[serde(flatten)]
        status: OrchestratorStatus,
    },
    #[serde(rename_all = "camelCase")]
    Purged {
        deleted_count: usize,
    },
    Success {
        message: Option<String>,
    },
    Error {
        /// One of the `StoreError` kinds, or `invalid_command`
        kind: String,
        error: String,
    },
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    Ok(json)
}
