//! # Decision cache
//!
//! ```text
//! DecisionCache              <- typed get/set of EvaluationDecision, never fails
//!   └── dyn CacheStore       <- raw string key/value with TTL
//!         ├── RedisCacheStore
//!         └── MemoryCacheStore (tests)
//! ```
//!
//! Caching is an optimisation: store failures turn reads into misses and
//! writes into log lines, and never reach the evaluation pipeline.

#[cfg(test)]
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::evaluation::{EvaluationDecision, Fingerprint};

pub use self::redis::RedisCacheStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache backend error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` on miss or expiry.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    fn provider_name(&self) -> &'static str;
}

/// Typed, failure-tolerant view of the store keyed by fingerprint.
#[derive(Clone)]
pub struct DecisionCache {
    store: Arc<dyn CacheStore>,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn provider_name(&self) -> &'static str {
        self.store.provider_name()
    }

    /// Unavailable stores and undecodable entries both read as a miss.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<EvaluationDecision> {
        let raw = match self.store.get(fingerprint.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(fingerprint = %fingerprint, "decision cache miss");
                return None;
            }
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "decision cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<EvaluationDecision>(&raw) {
            Ok(decision) => {
                debug!(fingerprint = %fingerprint, "decision cache hit");
                Some(decision)
            }
            Err(e) => {
                let e = CacheError::Serialization(e.to_string());
                warn!(fingerprint = %fingerprint, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Write-through; failures are logged and swallowed.
    pub async fn set(&self, fingerprint: &Fingerprint, decision: &EvaluationDecision, ttl: Duration) {
        let raw = match serde_json::to_string(decision) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "could not serialize decision for cache");
                return;
            }
        };

        if let Err(e) = self.store.set(fingerprint.as_str(), &raw, ttl).await {
            warn!(fingerprint = %fingerprint, error = %e, "decision cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryCacheStore;
    use super::*;
    use crate::evaluation::{EvaluationContext, Reason};
    use crate::testing::UnavailableCacheStore;

    fn fingerprint() -> Fingerprint {
        Fingerprint::compute("new_checkout", &EvaluationContext::new())
    }

    fn decision() -> EvaluationDecision {
        EvaluationDecision {
            flag_key: "new_checkout".to_string(),
            enabled: true,
            reason: Reason::TargetingMatch,
            evaluated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips_every_field() {
        let cache = DecisionCache::new(Arc::new(MemoryCacheStore::new()));
        let decision = decision();

        cache.set(&fingerprint(), &decision, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&fingerprint()).await, Some(decision));
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_miss() {
        let cache = DecisionCache::new(Arc::new(UnavailableCacheStore));

        cache.set(&fingerprint(), &decision(), Duration::from_secs(60)).await;
        assert_eq!(cache.get(&fingerprint()).await, None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        store
            .set(fingerprint().as_str(), "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        let cache = DecisionCache::new(store.clone());
        assert_eq!(cache.get(&fingerprint()).await, None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = DecisionCache::new(Arc::new(MemoryCacheStore::new()));
        cache.set(&fingerprint(), &decision(), Duration::from_secs(5)).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get(&fingerprint()).await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&fingerprint()).await.is_none());
    }
}
