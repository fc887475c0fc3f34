//! Orchestrator - routes writes and reads between the remote store and the local cache
//!
//! Owns the connectivity state. Writes go to the remote store while connected and
//! online; anything the remote store does not accept lands in the local cache under a
//! freshly minted local key. Reads are routed by the id's namespace, never by state.

pub mod keys;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheStats, Clock, ContentMemo, LocalCacheStore, MemoStats, MessageRecord, Origin, Role, SystemClock,
};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::remote::{AddOptions, RemoteStatus, RemoteStoreClient};

pub use keys::{is_local_key, LocalKeyMinter, LOCAL_KEY_PREFIX};
pub use state::{ConnectivityState, StateCell};

/// System note appended to history when a write falls back to the local cache
pub const FALLBACK_NOTICE: &str = "stored locally: remote store unavailable";

/// Result of a successful `submit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub id: String,
    pub origin: Origin,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub state: ConnectivityState,
    pub online: bool,
    pub remote: RemoteStatus,
    pub cache: CacheStats,
    /// Memo of remote reads
    pub memo: MemoStats,
}

pub struct Orchestrator {
    remote: RemoteStoreClient,
    cache: LocalCacheStore,
    state: StateCell,
    /// Last online/offline signal from the environment
    online: AtomicBool,
    memo: ContentMemo,
    keys: LocalKeyMinter,
    message_limit: usize,
}

impl Orchestrator {
    pub fn new(remote: RemoteStoreClient, cache: LocalCacheStore) -> Self {
        Self::with_clock(remote, cache, Arc::new(SystemClock))
    }

    /// # Arguments
    /// * `clock` - Time source for the timestamp part of local keys
    pub fn with_clock(remote: RemoteStoreClient, cache: LocalCacheStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            cache,
            state: StateCell::new(),
            online: AtomicBool::new(true),
            memo: ContentMemo::new(),
            keys: LocalKeyMinter::new(clock),
            message_limit: crate::config::CacheConfig::default().message_limit,
        }
    }

    /// Wire an HTTP remote client and a disk cache from configuration
    pub fn from_config(config: &Config) -> Self {
        let remote = RemoteStoreClient::from_config(config.remote.clone());
        let cache = LocalCacheStore::new(&config.cache);
        let mut orchestrator = Self::new(remote, cache);
        orchestrator.message_limit = config.cache.message_limit;
        orchestrator
    }

    /// Initialize the local cache, then try to reach the remote store
    pub async fn start(&self) -> StoreResult<ConnectivityState> {
        self.cache.initialize().await?;
        Ok(self.connect().await)
    }

    /// (Re-)initialize the remote client and settle on `Connected` or `Fallback`
    pub async fn connect(&self) -> ConnectivityState {
        if !self.is_online() {
            debug!("Offline, skipping remote initialization");
            self.state.transition(ConnectivityState::Fallback);
            return self.state();
        }

        if self.state() != ConnectivityState::Connected {
            self.state.transition(ConnectivityState::Initializing);
        }

        let outcome = self.remote.initialize().await;
        let next = if outcome.is_connected() && self.is_online() {
            ConnectivityState::Connected
        } else {
            ConnectivityState::Fallback
        };
        self.state.transition(next);
        debug!(outcome = ?outcome, state = %next, "Initialization settled");
        self.state()
    }

    /// Store `text`, remotely when possible, otherwise in the local cache
    pub async fn submit(&self, text: &str) -> StoreResult<SubmitReceipt> {
        if text.trim().is_empty() {
            return Err(StoreError::Validation("cannot submit an empty message".to_string()));
        }

        if self.state() == ConnectivityState::Connected && self.is_online() {
            match self.remote.add(text.as_bytes(), &AddOptions::default()).await {
                Ok(added) => {
                    if let Err(e) = self.cache.put_blob(&added.id, text, Origin::Remote).await {
                        warn!(cid = %added.id, error = %e, "Failed to record remote content locally");
                    }
                    self.record_message(text, Role::User).await;
                    return Ok(SubmitReceipt {
                        id: added.id,
                        origin: Origin::Remote,
                        size: added.size,
                    });
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind(), "Remote add failed, falling back to local cache");
                    self.enter_fallback().await;
                }
            }
        }

        self.store_locally(text).await
    }

    /// Read content by id. Local keys are served by the cache, everything else by
    /// the remote store with no fallback.
    pub async fn fetch(&self, id: &str) -> StoreResult<String> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::Validation("id is required".to_string()));
        }

        if is_local_key(id) {
            return self
                .cache
                .get_blob(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("{} is not in the local cache", id)));
        }

        if let Some(payload) = self.memo.get(id) {
            return Ok(payload);
        }

        let payload = self.remote.get(id).await?;
        self.memo.insert(id, &payload);
        Ok(payload)
    }

    /// Apply an online/offline signal from the environment
    pub async fn set_online(&self, online: bool) -> ConnectivityState {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online != online {
            info!(online = online, "Connectivity signal received");
        }

        if online {
            if matches!(
                self.state(),
                ConnectivityState::Fallback | ConnectivityState::Uninitialized
            ) {
                return self.connect().await;
            }
        } else {
            self.remote.disconnect();
            self.state.transition(ConnectivityState::Fallback);
        }
        self.state()
    }

    /// Feed online/offline signals from `signals` until its sender is dropped
    pub fn watch_connectivity(self: Arc<Self>, mut signals: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while signals.changed().await.is_ok() {
                let online = *signals.borrow_and_update();
                self.set_online(online).await;
            }
            debug!("Connectivity signal source closed");
        })
    }

    /// Most recent messages, oldest first; `None` uses the configured limit
    pub async fn history(&self, limit: Option<usize>) -> StoreResult<Vec<MessageRecord>> {
        self.cache
            .recent_messages(limit.unwrap_or(self.message_limit))
            .await
    }

    /// Evict local blobs older than `retention_days`
    pub async fn purge(&self, retention_days: u64) -> StoreResult<usize> {
        self.cache.purge_older_than(retention_days).await
    }

    pub async fn status(&self) -> StoreResult<OrchestratorStatus> {
        Ok(OrchestratorStatus {
            state: self.state(),
            online: self.is_online(),
            remote: self.remote.status(),
            cache: self.cache.stats().await?,
            memo: self.memo.stats(),
        })
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.get()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> &RemoteStoreClient {
        &self.remote
    }

    pub fn cache(&self) -> &LocalCacheStore {
        &self.cache
    }

    async fn store_locally(&self, text: &str) -> StoreResult<SubmitReceipt> {
        let key = self.keys.mint();
        let record = self.cache.put_blob(&key, text, Origin::Local).await?;
        self.record_message(text, Role::User).await;

        info!(id = %record.id, size = text.len(), "Stored message in local cache");
        Ok(SubmitReceipt {
            id: record.id,
            origin: Origin::Local,
            size: text.len() as u64,
        })
    }

    async fn enter_fallback(&self) {
        if self.state.transition(ConnectivityState::Fallback) {
            self.record_message(FALLBACK_NOTICE, Role::System).await;
        }
    }

    /// History is for display only; a failed append is logged, not surfaced
    async fn record_message(&self, text: &str, role: Role) {
        if let Err(e) = self.cache.append_message(text, role).await {
            warn!(error = %e, role = ?role, "Failed to append message to history");
        }
    }
}
