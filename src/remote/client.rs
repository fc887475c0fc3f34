//! Remote Store Client
//!
//! Connects to the first reachable endpoint of an ordered list, then adds and reads
//! content with linear backoff on network-class failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::{Connector, HttpConnector, RemoteBackend};
use super::errors::RemoteError;
use super::pin::{PinataPinner, Pinner};
use super::types::{AddOptions, AddResult, ErrorEntry, InitOutcome, RemoteStatus};
use crate::config::{Endpoint, RemoteConfig};
use crate::error::{StoreError, StoreResult};

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// Backoff before retry number `attempt` (1-based): `base * attempt`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt.max(1)
}

/// Live handle plus the endpoint it was opened against
#[derive(Clone)]
struct Connection {
    backend: Arc<dyn RemoteBackend>,
    endpoint: Endpoint,
}

/// Why a retried operation gave up
enum RetryFailure {
    /// Non-network failure; no retries were spent on it
    Rejected(RemoteError),
    /// Every attempt failed with a network-class error
    Exhausted { attempts: u32, last: RemoteError },
}

type InitWatch = watch::Receiver<Option<InitOutcome>>;

/// Clears the in-flight initialize slot even if the leading caller is dropped
struct InflightGuard<'a> {
    slot: &'a Mutex<Option<InitWatch>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

/// Client for the remote content-addressable store
pub struct RemoteStoreClient {
    config: RemoteConfig,
    /// Absent when no remote backend is available in this process
    connector: Option<Arc<dyn Connector>>,
    pinner: Option<Arc<dyn Pinner>>,
    connection: RwLock<Option<Connection>>,
    last_error: RwLock<Option<String>>,
    /// Outcome channel of the initialize attempt currently running, if any
    inflight: Mutex<Option<InitWatch>>,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: AtomicU8,
    /// Recent error log
    error_log: RwLock<VecDeque<ErrorEntry>>,
}

impl RemoteStoreClient {
    /// Create a client with explicit collaborators
    ///
    /// # Arguments
    /// * `config` - Endpoints, timeout and retry policy
    /// * `connector` - Opens backend handles; `None` means the remote path is unavailable
    /// * `pinner` - Optional secondary pinning service
    pub fn new(
        config: RemoteConfig,
        connector: Option<Arc<dyn Connector>>,
        pinner: Option<Arc<dyn Pinner>>,
    ) -> Self {
        Self {
            config,
            connector,
            pinner,
            connection: RwLock::new(None),
            last_error: RwLock::new(None),
            inflight: Mutex::new(None),
            health: AtomicU8::new(HEALTH_HEALTHY),
            error_log: RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY)),
        }
    }

    /// Create a client speaking HTTP to the configured endpoints
    pub fn from_config(config: RemoteConfig) -> Self {
        let pinner = PinataPinner::from_config(&config.pinning, config.timeout())
            .map(|p| Arc::new(p) as Arc<dyn Pinner>);
        if config.pinning.enabled && pinner.is_none() {
            warn!("Pinning enabled but credentials are incomplete; secondary pinning disabled");
        }
        Self::new(config, Some(Arc::new(HttpConnector)), pinner)
    }

    /// Connect to the first endpoint that answers an identity probe.
    ///
    /// Returns immediately when already connected. While an attempt is running,
    /// further callers wait for that attempt and receive the same outcome.
    pub async fn initialize(&self) -> InitOutcome {
        if let Some(endpoint) = self.active_endpoint() {
            return InitOutcome::Connected { endpoint };
        }

        let mut leader = None;
        let waiter = {
            let mut inflight = lock(&self.inflight);
            match inflight.as_ref() {
                Some(rx) => Some(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx);
                    leader = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = waiter {
            debug!("Initialize already in flight, awaiting its outcome");
            return match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone().unwrap_or_else(abandoned),
                Err(_) => abandoned(),
            };
        }

        let _guard = InflightGuard {
            slot: &self.inflight,
        };
        let outcome = self.connect_first_reachable().await;
        if let Some(tx) = leader {
            let _ = tx.send(Some(outcome.clone()));
        }
        outcome
    }

    async fn connect_first_reachable(&self) -> InitOutcome {
        let Some(connector) = self.connector.clone() else {
            let reason = "remote backend unavailable".to_string();
            warn!("No remote backend available, staying disconnected");
            self.record_failure("initialize", "", &reason);
            self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
            return InitOutcome::Failed { reason };
        };

        if self.config.debug_mode {
            debug!(config = ?self.config, "Initializing remote store client");
        }

        let mut last_error = "no endpoints configured".to_string();
        for endpoint in &self.config.endpoints {
            info!(endpoint = %endpoint, "Connecting to remote store...");

            let probe = async {
                let backend = connector.connect(endpoint, self.config.timeout()).await?;
                let identity = backend.id().await?;
                Ok::<_, RemoteError>((backend, identity))
            };

            match probe.await {
                Ok((backend, identity)) => {
                    *write(&self.connection) = Some(Connection {
                        backend,
                        endpoint: endpoint.clone(),
                    });
                    *write(&self.last_error) = None;
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    info!(endpoint = %endpoint, node = %identity.id, "Remote store connected");
                    return InitOutcome::Connected {
                        endpoint: endpoint.to_string(),
                    };
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Endpoint unreachable");
                    last_error = format!("{}: {}", endpoint, e);
                    self.record_failure("initialize", &endpoint.to_string(), &e.to_string());
                }
            }
        }

        self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
        let reason = format!(
            "all {} endpoints unreachable (last: {})",
            self.config.endpoints.len(),
            last_error
        );
        warn!(reason = %reason, "Remote store initialization failed");
        InitOutcome::Failed { reason }
    }

    /// Store `payload` on the remote store.
    ///
    /// Fails with `Validation` on blank input, `Connectivity` when disconnected or
    /// after every retry failed, `RemoteRejection` on the first non-network failure.
    pub async fn add(&self, payload: &[u8], options: &AddOptions) -> StoreResult<AddResult> {
        if is_blank(payload) {
            return Err(StoreError::Validation(
                "cannot add empty data to the remote store".to_string(),
            ));
        }

        let connection = self.connection().ok_or_else(|| {
            StoreError::Connectivity("remote store not connected; call initialize() first".to_string())
        })?;

        let response = self
            .with_retry("add", "", || connection.backend.add(payload, options))
            .await
            .map_err(|failure| match failure {
                RetryFailure::Rejected(e) => StoreError::RemoteRejection(e.to_string()),
                RetryFailure::Exhausted { attempts, last } => {
                    self.disconnect();
                    StoreError::Connectivity(format!(
                        "failed to add data after {} attempts: {}",
                        attempts, last
                    ))
                }
            })?;

        info!(
            cid = %response.hash,
            size = response.size,
            endpoint = %connection.endpoint,
            "Content added to remote store"
        );

        if options.pin {
            self.pin_best_effort(&response.hash).await;
        }

        Ok(AddResult {
            id: response.hash,
            size: response.size,
        })
    }

    /// Read the content behind `cid`. There is no local fallback for remote ids.
    pub async fn get(&self, cid: &str) -> StoreResult<String> {
        if cid.trim().is_empty() {
            return Err(StoreError::Validation(
                "content identifier is required to retrieve data".to_string(),
            ));
        }

        let connection = self.connection().ok_or_else(|| {
            StoreError::Connectivity("remote store not connected; cannot retrieve data".to_string())
        })?;

        let bytes = self
            .with_retry("get", cid, || connection.backend.cat(cid))
            .await
            .map_err(|failure| match failure {
                RetryFailure::Rejected(e) => StoreError::NotFound(format!("{}: {}", cid, e)),
                RetryFailure::Exhausted { attempts, last } => StoreError::NotFound(format!(
                    "{} not retrievable after {} attempts: {}",
                    cid, attempts, last
                )),
            })?;

        debug!(cid = cid, size = bytes.len(), "Content retrieved from remote store");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Drop the live connection; the next `initialize()` probes the endpoints again
    pub fn disconnect(&self) {
        if write(&self.connection).take().is_some() {
            info!("Remote store connection dropped");
        }
    }

    /// Snapshot of connectivity, last error and active endpoint
    pub fn status(&self) -> RemoteStatus {
        let endpoint = self.active_endpoint();
        RemoteStatus {
            connected: endpoint.is_some(),
            endpoint,
            last_error: read(&self.last_error).clone(),
            health: self.health_status(),
        }
    }

    pub fn is_connected(&self) -> bool {
        read(&self.connection).is_some()
    }

    pub fn active_endpoint(&self) -> Option<String> {
        read(&self.connection)
            .as_ref()
            .map(|c| c.endpoint.to_string())
    }

    /// Get connection health status string
    pub fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    /// Get recent errors
    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        read(&self.error_log).iter().cloned().collect()
    }

    fn connection(&self) -> Option<Connection> {
        read(&self.connection).clone()
    }

    /// Execute an operation, retrying network-class failures with linear backoff
    async fn with_retry<F, Fut, T>(
        &self,
        operation: &str,
        target: &str,
        f: F,
    ) -> Result<T, RetryFailure>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.config.debug_mode {
                debug!(operation = operation, attempt = attempt, max = max_attempts, "Remote attempt");
            }

            match f().await {
                Ok(result) => {
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) if !e.is_network() => {
                    warn!(operation = operation, error = %e, "Remote store rejected request, not retrying");
                    self.health.store(HEALTH_DEGRADED, Ordering::Relaxed);
                    self.record_failure(operation, target, &e.to_string());
                    return Err(RetryFailure::Rejected(e));
                }
                Err(e) if attempt >= max_attempts => {
                    self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
                    self.record_failure(operation, target, &e.to_string());
                    return Err(RetryFailure::Exhausted {
                        attempts: max_attempts,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(self.config.retry_delay(), attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying remote operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn pin_best_effort(&self, cid: &str) {
        let Some(pinner) = &self.pinner else {
            return;
        };

        match pinner.pin(cid).await {
            Ok(()) => info!(cid = cid, "Pinned content on secondary service"),
            Err(e) => {
                warn!(cid = cid, error = %e, "Secondary pin failed, continuing");
                self.log_error("pin", cid, &e.to_string());
            }
        }
    }

    fn record_failure(&self, operation: &str, target: &str, error: &str) {
        *write(&self.last_error) = Some(error.to_string());
        self.log_error(operation, target, error);
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, operation: &str, target: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            target: target.to_string(),
            error: error.to_string(),
        };

        let mut log = write(&self.error_log);
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);
    }
}

fn abandoned() -> InitOutcome {
    InitOutcome::Failed {
        reason: "initialize attempt abandoned".to_string(),
    }
}

/// Empty, or text made only of (Unicode) whitespace
fn is_blank(payload: &[u8]) -> bool {
    std::str::from_utf8(payload).map_or(false, |text| text.trim().is_empty())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
