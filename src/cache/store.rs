//! Local Cache Store
//!
//! Persists content blobs and an append-only message log under one directory.
//! Recency indexes live in memory and are rebuilt from disk on `initialize()`.
//!
//! Layout:
//! - `blobs/<hex(id)>.json` - one `StoredBlob` per file, written atomically
//! - `messages.log` - newline-delimited `MessageRecord`s in sequence order

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::records::{CacheStats, ContentRecord, MessageRecord, Origin, Role, StoredBlob};
use crate::config::CacheConfig;
use crate::error::{StoreError, StoreResult};

const BLOB_DIR: &str = "blobs";
const MESSAGE_LOG: &str = "messages.log";
const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
struct BlobMeta {
    timestamp: u64,
    size: u64,
}

/// In-memory view of what is on disk
#[derive(Debug, Default)]
struct Index {
    blobs: HashMap<String, BlobMeta>,
    /// (timestamp, id), oldest first
    blob_recency: BTreeSet<(u64, String)>,
    total_bytes: u64,
    /// (timestamp, sequence) -> record, oldest first
    messages: BTreeMap<(u64, u64), MessageRecord>,
    next_seq: u64,
}

impl Index {
    fn insert_blob(&mut self, id: &str, meta: BlobMeta) {
        self.remove_blob(id);
        self.blob_recency.insert((meta.timestamp, id.to_string()));
        self.total_bytes += meta.size;
        self.blobs.insert(id.to_string(), meta);
    }

    fn remove_blob(&mut self, id: &str) -> Option<BlobMeta> {
        let meta = self.blobs.remove(id)?;
        self.blob_recency.remove(&(meta.timestamp, id.to_string()));
        self.total_bytes = self.total_bytes.saturating_sub(meta.size);
        Some(meta)
    }

    fn insert_message(&mut self, record: MessageRecord) {
        self.next_seq = self.next_seq.max(record.id + 1);
        self.messages.insert((record.timestamp, record.id), record);
    }

    /// Rebuild from the cache directory, skipping unreadable entries
    fn load(root: &Path) -> StoreResult<Self> {
        let blob_dir = root.join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).map_err(|e| {
            StoreError::Storage(format!("Failed to create cache directory {:?}: {}", blob_dir, e))
        })?;

        let mut index = Index {
            next_seq: 1,
            ..Index::default()
        };

        for entry in fs::read_dir(&blob_dir)?.flatten() {
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("tmp") => {
                    // Left behind by an interrupted write
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
                Some("json") => match read_stored_blob(&path) {
                    Ok(stored) => {
                        let meta = BlobMeta {
                            timestamp: stored.record.timestamp,
                            size: stored.record.payload.len() as u64,
                        };
                        index.insert_blob(&stored.record.id, meta);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable blob"),
                },
                _ => {}
            }
        }

        let log_path = root.join(MESSAGE_LOG);
        if log_path.exists() {
            let raw = fs::read(&log_path)?;
            let complete = raw
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(0, |pos| pos + 1);
            if complete < raw.len() {
                // Torn tail of an interrupted append; the next append must start on a fresh line
                warn!(bytes = raw.len() - complete, "Truncating partial line at end of message log");
                fs::OpenOptions::new()
                    .write(true)
                    .open(&log_path)?
                    .set_len(complete as u64)?;
            }

            for (line_no, line) in raw[..complete].split(|&b| b == b'\n').enumerate() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<MessageRecord>(line) {
                    Ok(record) => index.insert_message(record),
                    Err(e) => warn!(line = line_no + 1, error = %e, "Skipping corrupt message"),
                }
            }
        }

        Ok(index)
    }
}

/// Durable local store for blobs and messages
pub struct LocalCacheStore {
    root: PathBuf,
    max_total_bytes: u64,
    clock: Arc<dyn Clock>,
    /// `None` until `initialize()` has run
    index: RwLock<Option<Index>>,
}

impl LocalCacheStore {
    /// Create a store rooted at the configured cache directory
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(
            config.directory.clone(),
            config.max_total_bytes,
            Arc::new(SystemClock),
        )
    }

    /// Create a store with an explicit root, quota and time source
    pub fn with_clock(root: PathBuf, max_total_bytes: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            root,
            max_total_bytes,
            clock,
            index: RwLock::new(None),
        }
    }

    /// Create the collections if absent and load their indexes. Idempotent.
    pub async fn initialize(&self) -> StoreResult<()> {
        let mut index = self.index.write().await;
        if index.is_some() {
            debug!("Local cache already initialized");
            return Ok(());
        }

        let root = self.root.clone();
        let loaded = blocking(move || Index::load(&root)).await?;

        info!(
            cache_dir = %self.root.display(),
            blobs = loaded.blobs.len(),
            messages = loaded.messages.len(),
            bytes = loaded.total_bytes,
            "Local cache initialized"
        );
        *index = Some(loaded);
        Ok(())
    }

    /// Insert or replace a blob, stamping it with the current time
    pub async fn put_blob(
        &self,
        id: &str,
        payload: &str,
        origin: Origin,
    ) -> StoreResult<ContentRecord> {
        if id.trim().is_empty() {
            return Err(StoreError::Validation("blob id is required".to_string()));
        }

        let mut guard = self.index.write().await;
        let index = guard.as_mut().ok_or_else(not_initialized)?;

        let size = payload.len() as u64;
        let replaced = index.blobs.get(id).map(|m| m.size).unwrap_or(0);
        let projected = index.total_bytes - replaced + size;
        if projected > self.max_total_bytes {
            warn!(
                id = id,
                size = size,
                used = index.total_bytes,
                max = self.max_total_bytes,
                "Local cache over quota"
            );
            return Err(StoreError::Storage(format!(
                "over quota: {} bytes would exceed the {} byte limit",
                projected, self.max_total_bytes
            )));
        }

        let record = ContentRecord {
            id: id.to_string(),
            payload: payload.to_string(),
            timestamp: self.clock.now_millis(),
            origin,
        };
        let stored = StoredBlob {
            sha1: digest(payload),
            record,
        };
        let bytes = serde_json::to_vec(&stored)?;
        let path = self.blob_path(id);
        blocking(move || write_atomic(&path, &bytes)).await?;

        index.insert_blob(
            id,
            BlobMeta {
                timestamp: stored.record.timestamp,
                size,
            },
        );
        debug!(id = id, size = size, origin = %origin, "Stored blob in local cache");
        Ok(stored.record)
    }

    /// Payload for `id`, or `None` when no record exists
    pub async fn get_blob(&self, id: &str) -> StoreResult<Option<String>> {
        Ok(self.get_record(id).await?.map(|record| record.payload))
    }

    /// Full record for `id`, verified against its stored digest
    pub async fn get_record(&self, id: &str) -> StoreResult<Option<ContentRecord>> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or_else(not_initialized)?;
        if !index.blobs.contains_key(id) {
            debug!(id = id, "Local cache MISS");
            return Ok(None);
        }

        let path = self.blob_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(id = id, path = %path.display(), "Indexed blob missing on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredBlob = serde_json::from_slice(&bytes)?;
        if stored.sha1 != digest(&stored.record.payload) {
            return Err(StoreError::Storage(format!("digest mismatch for {}", id)));
        }

        debug!(id = id, "Local cache HIT");
        Ok(Some(stored.record))
    }

    /// Append a message with the next sequence id and the current time
    pub async fn append_message(&self, text: &str, role: Role) -> StoreResult<MessageRecord> {
        let mut guard = self.index.write().await;
        let index = guard.as_mut().ok_or_else(not_initialized)?;

        let record = MessageRecord {
            id: index.next_seq,
            text: text.to_string(),
            role,
            timestamp: self.clock.now_millis(),
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(MESSAGE_LOG))
            .await?;
        log.write_all(&line).await?;
        log.flush().await?;

        index.insert_message(record.clone());
        debug!(seq = record.id, role = ?role, "Appended message");
        Ok(record)
    }

    /// Up to `limit` most recent messages, oldest first
    pub async fn recent_messages(&self, limit: usize) -> StoreResult<Vec<MessageRecord>> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or_else(not_initialized)?;

        let mut recent: Vec<MessageRecord> =
            index.messages.values().rev().take(limit).cloned().collect();
        recent.reverse();
        Ok(recent)
    }

    /// Up to `limit` most recently written blobs, oldest first
    pub async fn recent_blobs(&self, limit: usize) -> StoreResult<Vec<ContentRecord>> {
        let ids: Vec<String> = {
            let guard = self.index.read().await;
            let index = guard.as_ref().ok_or_else(not_initialized)?;
            index
                .blob_recency
                .iter()
                .rev()
                .take(limit)
                .map(|(_, id)| id.clone())
                .collect()
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids.iter().rev() {
            // Purged between the snapshot and the read
            if let Some(record) = self.get_record(id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Delete blobs strictly older than `retention_days`; returns how many were removed
    pub async fn purge_older_than(&self, retention_days: u64) -> StoreResult<usize> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(retention_days.saturating_mul(DAY_MILLIS));

        let mut guard = self.index.write().await;
        let index = guard.as_mut().ok_or_else(not_initialized)?;

        // "" sorts first, so this range holds exactly the timestamps below the cutoff
        let expired: Vec<String> = index
            .blob_recency
            .range(..(cutoff, String::new()))
            .map(|(_, id)| id.clone())
            .collect();

        let mut deleted = 0;
        for id in expired {
            match tokio::fs::remove_file(self.blob_path(&id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to delete expired blob");
                    continue;
                }
            }
            index.remove_blob(&id);
            deleted += 1;
        }

        info!(deleted = deleted, retention_days = retention_days, "Purged expired blobs");
        Ok(deleted)
    }

    /// Counts of blob and message records
    pub async fn stats(&self) -> StoreResult<CacheStats> {
        let guard = self.index.read().await;
        let index = guard.as_ref().ok_or_else(not_initialized)?;
        Ok(CacheStats {
            blob_count: index.blobs.len(),
            message_count: index.messages.len(),
        })
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root
            .join(BLOB_DIR)
            .join(format!("{}.json", hex_name(id)))
    }
}

fn not_initialized() -> StoreError {
    StoreError::Storage("cache not initialized".to_string())
}

async fn blocking<F, T>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Storage(format!("storage task failed: {}", e)))?
}

fn read_stored_blob(path: &Path) -> StoreResult<StoredBlob> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write via a temp file in the same directory, then rename into place
fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| StoreError::from(e.error))?;
    Ok(())
}

fn digest(payload: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Filesystem-safe file stem for an arbitrary id
fn hex_name(id: &str) -> String {
    id.bytes().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use tempfile::TempDir;

    const START: u64 = 1_700_000_000_000;

    fn store_in(dir: &TempDir, clock: Arc<ManualClock>) -> LocalCacheStore {
        LocalCacheStore::with_clock(dir.path().to_path_buf(), 1024 * 1024, clock)
    }

    async fn ready_store() -> (TempDir, Arc<ManualClock>, LocalCacheStore) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let store = store_in(&dir, clock.clone());
        store.initialize().await.unwrap();
        (dir, clock, store)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (dir, _, store) = ready_store().await;
        store.put_blob("local-1-a", "one", Origin::Local).await.unwrap();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.stats().await.unwrap().blob_count, 1);
        assert!(dir.path().join(BLOB_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, Arc::new(ManualClock::new(START)));

        let err = store.put_blob("id", "x", Origin::Local).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(store.stats().await.is_err());
    }

    #[tokio::test]
    async fn test_put_get_blob() {
        let (_dir, _, store) = ready_store().await;

        let record = store.put_blob("local-1-a", "hello", Origin::Local).await.unwrap();
        assert_eq!(record.timestamp, START);

        assert_eq!(store.get_blob("local-1-a").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(store.get_blob("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_blob_upserts() {
        let (_dir, clock, store) = ready_store().await;
        store.put_blob("bafy1", "v1", Origin::Remote).await.unwrap();
        clock.advance(10);
        store.put_blob("bafy1", "v2", Origin::Remote).await.unwrap();

        let record = store.get_record("bafy1").await.unwrap().unwrap();
        assert_eq!(record.payload, "v2");
        assert_eq!(record.timestamp, START + 10);
        assert_eq!(store.stats().await.unwrap().blob_count, 1);
    }

    #[tokio::test]
    async fn test_quota_rejects_write() {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::with_clock(
            dir.path().to_path_buf(),
            8,
            Arc::new(ManualClock::new(START)),
        );
        store.initialize().await.unwrap();

        store.put_blob("a", "12345", Origin::Local).await.unwrap();
        let err = store.put_blob("b", "12345", Origin::Local).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(ref m) if m.contains("quota")));

        // Replacing does not double count
        store.put_blob("a", "12345678", Origin::Local).await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_blob_fails_digest() {
        let (dir, _, store) = ready_store().await;
        store.put_blob("local-1-a", "original", Origin::Local).await.unwrap();

        let path = dir
            .path()
            .join(BLOB_DIR)
            .join(format!("{}.json", hex_name("local-1-a")));
        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("original", "tampered")).unwrap();

        let err = store.get_blob("local-1-a").await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_blobs() {
        let (_dir, clock, store) = ready_store().await;

        // Two blobs written 40 days ago, three written now
        store.put_blob("old-1", "a", Origin::Local).await.unwrap();
        store.put_blob("old-2", "b", Origin::Remote).await.unwrap();
        clock.advance(40 * DAY_MILLIS);
        for id in ["new-1", "new-2", "new-3"] {
            store.put_blob(id, "c", Origin::Local).await.unwrap();
        }
        store.append_message("kept", Role::User).await.unwrap();

        let deleted = store.purge_older_than(30).await.unwrap();
        assert_eq!(deleted, 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.blob_count, 3);
        assert_eq!(stats.message_count, 1);
        assert_eq!(store.get_blob("old-1").await.unwrap(), None);
        assert!(store.get_blob("new-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_keeps_blob_exactly_at_cutoff() {
        let (_dir, clock, store) = ready_store().await;
        store.put_blob("edge", "x", Origin::Local).await.unwrap();
        clock.advance(DAY_MILLIS);

        assert_eq!(store.purge_older_than(1).await.unwrap(), 0);
        clock.advance(1);
        assert_eq!(store.purge_older_than(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_messages_oldest_first_and_bounded() {
        let (_dir, clock, store) = ready_store().await;
        for i in 0..5 {
            store
                .append_message(&format!("message {}", i), Role::User)
                .await
                .unwrap();
            clock.advance(1);
        }

        let recent = store.recent_messages(3).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["message 2", "message 3", "message 4"]);

        assert_eq!(store.recent_messages(50).await.unwrap().len(), 5);
        assert!(store.recent_messages(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_timestamp_ordered_by_sequence() {
        let (_dir, _, store) = ready_store().await;
        let first = store.append_message("first", Role::User).await.unwrap();
        let second = store.append_message("second", Role::System).await.unwrap();
        assert_eq!(first.timestamp, second.timestamp);
        assert!(second.id > first.id);

        let recent = store.recent_messages(2).await.unwrap();
        assert_eq!(recent[0].text, "first");
        assert_eq!(recent[1].text, "second");
    }

    #[tokio::test]
    async fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(START));
        {
            let store = store_in(&dir, clock.clone());
            store.initialize().await.unwrap();
            store.put_blob("local-1-a", "persisted", Origin::Local).await.unwrap();
            store.append_message("one", Role::User).await.unwrap();
            store.append_message("two", Role::System).await.unwrap();
        }

        // Garbage a crash could leave behind
        fs::write(dir.path().join(BLOB_DIR).join("junk.tmp"), b"partial").unwrap();
        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(MESSAGE_LOG))
            .unwrap();
        writeln!(log, "{{not json").unwrap();

        let store = store_in(&dir, clock);
        store.initialize().await.unwrap();

        assert_eq!(
            store.get_blob("local-1-a").await.unwrap().as_deref(),
            Some("persisted")
        );
        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CacheStats { blob_count: 1, message_count: 2 });
        assert!(!dir.path().join(BLOB_DIR).join("junk.tmp").exists());

        let next = store.append_message("three", Role::User).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn test_torn_log_tail_does_not_swallow_next_append() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(START));
        {
            let store = store_in(&dir, clock.clone());
            store.initialize().await.unwrap();
            store.append_message("one", Role::User).await.unwrap();
        }

        // Crash in the middle of writing the second record
        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(MESSAGE_LOG))
            .unwrap();
        log.write_all(br#"{"id":2,"te"#).unwrap();
        drop(log);

        {
            let store = store_in(&dir, clock.clone());
            store.initialize().await.unwrap();
            assert_eq!(store.stats().await.unwrap().message_count, 1);
            store.append_message("after crash", Role::User).await.unwrap();
        }

        let store = store_in(&dir, clock);
        store.initialize().await.unwrap();
        let texts: Vec<String> = store
            .recent_messages(10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["one", "after crash"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(START));
        {
            let store = store_in(&dir, clock.clone());
            store.initialize().await.unwrap();
            store.append_message("kept", Role::User).await.unwrap();
        }

        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(MESSAGE_LOG))
            .unwrap();
        log.write_all(b"{\"text\":\"\xe2\x82\"}\n").unwrap();
        drop(log);

        let store = store_in(&dir, clock);
        store.initialize().await.unwrap();
        let messages = store.recent_messages(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "kept");

        let next = store.append_message("later", Role::User).await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_recent_blobs() {
        let (_dir, clock, store) = ready_store().await;
        for id in ["a", "b", "c"] {
            store.put_blob(id, id, Origin::Local).await.unwrap();
            clock.advance(1);
        }

        let recent = store.recent_blobs(2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
