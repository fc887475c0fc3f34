//! Local key minting
//!
//! Local keys look like `local-<millis>-<suffix>`. Remote content identifiers are
//! base58 (`Qm...`) or base32 (`bafy...`) and never contain `-`, so the prefix alone
//! decides which namespace an id belongs to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::cache::Clock;

pub const LOCAL_KEY_PREFIX: &str = "local-";

const SUFFIX_LEN: usize = 8;

pub fn is_local_key(id: &str) -> bool {
    id.starts_with(LOCAL_KEY_PREFIX)
}

/// Mints keys whose timestamp component strictly increases within the process
pub struct LocalKeyMinter {
    clock: Arc<dyn Clock>,
    last: AtomicU64,
}

impl LocalKeyMinter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: AtomicU64::new(0),
        }
    }

    pub fn mint(&self) -> String {
        let stamp = self.next_stamp();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("{}{}-{}", LOCAL_KEY_PREFIX, stamp, suffix)
    }

    fn next_stamp(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
