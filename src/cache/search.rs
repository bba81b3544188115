//! Short-TTL cache of search result sets, keyed by the query, the scope and
//! the identity that ran it. Empty result sets bypass the cache so a search
//! that raced an upload is not pinned for five minutes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::cache::Clock;
use crate::models::SearchHit;

pub const DEFAULT_SEARCH_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub query: String,
    pub scope: String,
    pub scope_target: String,
    pub principal: String,
}

impl SearchKey {
    pub fn new(query: &str, scope: &str, scope_target: Option<&str>, principal: &str) -> Self {
        Self {
            query: query.to_lowercase(),
            scope: scope.to_string(),
            scope_target: scope_target.unwrap_or("").to_string(),
            principal: principal.to_string(),
        }
    }
}

struct Entry {
    hits: Vec<SearchHit>,
    inserted_at: i64,
    ttl_ms: i64,
}

pub struct SearchCache {
    inner: Mutex<HashMap<SearchKey, Entry>>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
}

impl SearchCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, DEFAULT_SEARCH_TTL_SECS)
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            clock,
            ttl_secs,
        }
    }

    pub fn get(&self, key: &SearchKey) -> Option<Vec<SearchHit>> {
        let now = self.clock.now_ms();
        let mut map = match self.inner.lock() {
            Ok(m) => m,
            Err(e) => {
                warn!("search cache poisoned on get: {}", e);
                return None;
            }
        };
        match map.get(key) {
            Some(entry) if now - entry.inserted_at >= entry.ttl_ms => {
                map.remove(key);
                None
            }
            Some(entry) => Some(entry.hits.clone()),
            None => None,
        }
    }

    pub fn set(&self, key: SearchKey, hits: Vec<SearchHit>) {
        if hits.is_empty() {
            return;
        }
        let entry = Entry {
            hits,
            inserted_at: self.clock.now_ms(),
            ttl_ms: (self.ttl_secs as i64) * 1000,
        };
        match self.inner.lock() {
            Ok(mut map) => {
                map.insert(key, entry);
            }
            Err(e) => warn!("search cache poisoned on set: {}", e),
        }
    }

    /// Drop everything. Called when mounts or configs change shape.
    pub fn clear(&self) -> usize {
        match self.inner.lock() {
            Ok(mut map) => {
                let n = map.len();
                map.clear();
                n
            }
            Err(e) => {
                warn!("search cache poisoned on clear: {}", e);
                0
            }
        }
    }
}
