//! Resilient IPFS client
//!
//! Stores text content on an IPFS node when one is reachable and falls back to a
//! persistent local cache when it is not. Content written during an outage is
//! addressed by a local key and stays readable from disk.

pub mod cache;
pub mod config;
pub mod error;
pub mod ipc;
pub mod orchestrator;
pub mod remote;

pub use cache::LocalCacheStore;
pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use orchestrator::{ConnectivityState, Orchestrator, SubmitReceipt};
pub use remote::RemoteStoreClient;
