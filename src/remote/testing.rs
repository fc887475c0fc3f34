//! Scripted fakes for the remote seam, shared by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::backend::{Connector, RemoteBackend};
use super::errors::RemoteError;
use super::pin::Pinner;
use super::types::{AddOptions, AddResponse, NodeIdentity};
use crate::config::{Endpoint, RemoteConfig};

/// Backend whose `add`/`cat` results are queued up front.
/// When a queue runs dry, `add` derives a fake id from the payload and `cat` fails.
#[derive(Default)]
pub struct ScriptedBackend {
    pub add_results: Mutex<VecDeque<Result<AddResponse, RemoteError>>>,
    pub cat_results: Mutex<VecDeque<Result<Vec<u8>, RemoteError>>>,
    pub add_calls: AtomicUsize,
    pub cat_calls: AtomicUsize,
    /// When each `add` started, in tokio time (virtual under a paused clock)
    pub add_times: Mutex<Vec<Instant>>,
    pub probe_error: Option<RemoteError>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            probe_error: Some(RemoteError::ConnectionRefused("ECONNREFUSED".to_string())),
            ..Self::default()
        })
    }

    pub fn push_add(&self, result: Result<AddResponse, RemoteError>) {
        self.add_results.lock().unwrap().push_back(result);
    }

    pub fn push_cat(&self, result: Result<Vec<u8>, RemoteError>) {
        self.cat_results.lock().unwrap().push_back(result);
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn cat_calls(&self) -> usize {
        self.cat_calls.load(Ordering::SeqCst)
    }

    /// Time between consecutive `add` calls
    pub fn add_gaps(&self) -> Vec<Duration> {
        let times = self.add_times.lock().unwrap();
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

pub fn added(hash: &str, size: u64) -> AddResponse {
    AddResponse {
        name: "message.txt".to_string(),
        hash: hash.to_string(),
        size,
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    async fn id(&self) -> Result<NodeIdentity, RemoteError> {
        match &self.probe_error {
            Some(err) => Err(err.clone()),
            None => Ok(NodeIdentity {
                id: "12D3KooWfake".to_string(),
                agent_version: Some("fake/0.1".to_string()),
            }),
        }
    }

    async fn add(&self, data: &[u8], _options: &AddOptions) -> Result<AddResponse, RemoteError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.add_times.lock().unwrap().push(Instant::now());
        let scripted = self.add_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(added(&format!("bafy{}", data.len()), data.len() as u64)))
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>, RemoteError> {
        self.cat_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.cat_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Err(RemoteError::Rejected(500, format!("no link named {}", cid))))
    }
}

/// Connector handing out pre-built backends, one per endpoint host
pub struct FakeConnector {
    backends: Vec<(String, Arc<ScriptedBackend>)>,
    pub connects: AtomicUsize,
    pub connect_delay: Duration,
}

impl FakeConnector {
    pub fn new(backends: Vec<(&str, Arc<ScriptedBackend>)>) -> Arc<Self> {
        Self::with_delay(backends, Duration::ZERO)
    }

    pub fn with_delay(backends: Vec<(&str, Arc<ScriptedBackend>)>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            backends: backends
                .into_iter()
                .map(|(host, backend)| (host.to_string(), backend))
                .collect(),
            connects: AtomicUsize::new(0),
            connect_delay: delay,
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteBackend>, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.backends
            .iter()
            .find(|(host, _)| *host == endpoint.host)
            .map(|(_, backend)| Arc::clone(backend) as Arc<dyn RemoteBackend>)
            .ok_or_else(|| RemoteError::Unreachable(endpoint.to_string()))
    }
}

/// Pinner that counts calls and optionally fails every one
#[derive(Default)]
pub struct FakePinner {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakePinner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pinner for FakePinner {
    async fn pin(&self, _cid: &str) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(RemoteError::Rejected(401, "invalid pinning credentials".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Two endpoints (`primary`, `secondary`), 100ms base backoff
pub fn test_config() -> RemoteConfig {
    RemoteConfig {
        endpoints: vec![
            Endpoint::new("http", "primary", 5001),
            Endpoint::new("http", "secondary", 5001),
        ],
        retry_delay_ms: 100,
        ..RemoteConfig::default()
    }
}
