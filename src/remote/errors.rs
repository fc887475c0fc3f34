//! Remote Store Error Types
//!
//! Transport-level failures from the IPFS HTTP API.
//! The network/non-network split drives the retry decision in the client.

/// Substrings that mark an opaque failure as network-class
const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnrefused",
    "etimedout",
    "connection refused",
    "unreachable",
    "fetch failed",
    "failed to fetch",
];

/// Remote API error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rejected ({0}): {1}")]
    Rejected(u16, String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Whether this error is network-class and worth retrying
    pub fn is_network(&self) -> bool {
        match self {
            RemoteError::Timeout
            | RemoteError::ConnectionRefused(_)
            | RemoteError::Unreachable(_)
            | RemoteError::Network(_) => true,
            RemoteError::Other(message) => is_network_message(message),
            RemoteError::Rejected(_, _) | RemoteError::Decode(_) => false,
        }
    }

    /// Create a RemoteError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            408 => RemoteError::Timeout,
            502..=504 => RemoteError::Unreachable(format!("HTTP {}: {}", status, body)),
            _ => RemoteError::Rejected(status, extract_message(body)),
        }
    }

    /// Classify a free-form failure message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_network_message(&message) {
            RemoteError::Network(message)
        } else {
            RemoteError::Other(message)
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() {
            RemoteError::ConnectionRefused(err.to_string())
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if err.is_request() || err.is_body() {
            RemoteError::Network(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::from_status(status.as_u16(), &err.to_string())
        } else {
            RemoteError::from_message(err.to_string())
        }
    }
}

fn is_network_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// The IPFS API reports failures as `{"Message": "...", "Code": 0, "Type": "error"}`
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("Message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}
