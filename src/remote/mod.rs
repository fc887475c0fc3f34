//! Remote content-addressable store client

pub mod backend;
pub mod client;
pub mod errors;
pub mod pin;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Connector, HttpConnector, RemoteBackend};
pub use client::{backoff_delay, RemoteStoreClient};
pub use errors::RemoteError;
pub use pin::{PinataPinner, Pinner};
pub use types::*;
