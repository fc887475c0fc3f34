//! Remote backend seam
//!
//! `Connector` opens a handle to one endpoint; `RemoteBackend` is that live handle.
//! The HTTP implementations speak the IPFS RPC API (`/api/v0/*`, POST only).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use super::errors::RemoteError;
use super::types::{AddOptions, AddResponse, NodeIdentity};
use crate::config::Endpoint;

/// A live connection to a content-addressable store
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Identity query, used as the liveness probe
    async fn id(&self) -> Result<NodeIdentity, RemoteError>;

    /// Store `data`, returning the content identifier assigned by the store
    async fn add(&self, data: &[u8], options: &AddOptions) -> Result<AddResponse, RemoteError>;

    /// Read the full content behind `cid`
    async fn cat(&self, cid: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Opens backend handles; injected so the remote path can be absent or faked
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteBackend>, RemoteError>;
}

/// Connector for the IPFS HTTP RPC API
#[derive(Debug, Default, Clone)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteBackend>, RemoteError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Other(format!("Failed to create HTTP client: {}", e)))?;

        let auth_header = match (&endpoint.username, &endpoint.password) {
            (Some(user), Some(pass)) => {
                let credentials = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                Some(format!("Basic {}", encoded))
            }
            _ => None,
        };

        Ok(Arc::new(HttpBackend {
            http_client,
            api_url: format!("{}/api/v0", endpoint.base_url()),
            auth_header,
        }))
    }
}

/// IPFS RPC API handle bound to one endpoint
pub struct HttpBackend {
    http_client: Client,
    api_url: String,
    auth_header: Option<String>,
}

impl HttpBackend {
    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.http_client.post(format!("{}/{}", self.api_url, path));
        match &self.auth_header {
            Some(header) => request.header("Authorization", header),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status, &body));
        }

        Ok(response)
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn id(&self) -> Result<NodeIdentity, RemoteError> {
        let response = self.send(self.post("id")).await?;
        let identity: NodeIdentity = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        debug!(node = %identity.id, agent = ?identity.agent_version, "Node identity");
        Ok(identity)
    }

    async fn add(&self, data: &[u8], options: &AddOptions) -> Result<AddResponse, RemoteError> {
        let file_name = options
            .file_name
            .clone()
            .unwrap_or_else(|| "message.txt".to_string());
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        // pin=true keeps the object out of the node's garbage collection
        let request = self.post("add?pin=true&cid-version=1").multipart(form);
        let response = self.send(request).await?;

        response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>, RemoteError> {
        let path = format!("cat?arg={}", urlencoding::encode(cid));
        let response = self.send(self.post(&path)).await?;
        let bytes = response.bytes().await?;

        debug!(cid = cid, size = bytes.len(), "Read content from remote store");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_builds_api_url() {
        let mut endpoint = Endpoint::new("https", "ipfs.example.org", 5001);
        endpoint.username = Some("project".to_string());
        endpoint.password = Some("secret".to_string());

        let backend = HttpConnector
            .connect(&endpoint, Duration::from_secs(1))
            .await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        // Port 9 (discard) on localhost is not an IPFS node
        let endpoint = Endpoint::new("http", "127.0.0.1", 9);
        let backend = HttpConnector
            .connect(&endpoint, Duration::from_millis(500))
            .await
            .unwrap();

        let err = backend.id().await.unwrap_err();
        assert!(err.is_network(), "unexpected classification: {:?}", err);
    }
}
