//! Publisher issuing keyed payloads to the remote store.
//!
//! Wraps an injected [`StoreClient`] with the pool/subgroup settings of the
//! run. `publish` returns the pending handle immediately; no retries are
//! performed here. A failed publish is surfaced through the resolved
//! outcome, and the caller decides whether to retry with a fresh key.

use crate::config::StoreConfig;
use crate::store::{PendingResult, PublishError, PutOutcome, StoreClient};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Statistics for the publisher.
#[derive(Debug, Default, Clone)]
pub struct PublisherStats {
    pub puts_issued: u64,
    pub puts_succeeded: u64,
    pub puts_failed: u64,
    pub bytes_sent: u64,
}

/// Publisher bound to one pool/subgroup of the remote store.
pub struct Publisher {
    client: Arc<dyn StoreClient>,
    config: StoreConfig,
    stats: Arc<RwLock<PublisherStats>>,
}

impl Publisher {
    /// Create a publisher over the given store client.
    ///
    /// The client handle is shared read-only across all publishes in a run;
    /// its lifecycle is owned by the entry point that constructed it.
    pub fn new(client: Arc<dyn StoreClient>, config: StoreConfig) -> Self {
        Self {
            client,
            config,
            stats: Arc::new(RwLock::new(PublisherStats::default())),
        }
    }

    /// Pool this publisher addresses.
    pub fn pool(&self) -> &str {
        &self.config.pool
    }

    /// Current publisher statistics.
    pub fn stats(&self) -> PublisherStats {
        self.stats.read().clone()
    }

    /// Issue a payload under the given key and return the pending handle.
    ///
    /// At most one outstanding publish is tracked per handle. Publishes to
    /// the same key must be serialized by the caller; the pipeline does so
    /// by processing frames strictly in source order.
    pub async fn publish(&self, key: &str, payload: Bytes) -> PendingResult {
        let size = payload.len() as u64;

        debug!(
            pool = %self.config.pool,
            key = %key,
            size_bytes = size,
            subgroup_index = self.config.subgroup_index,
            "Publishing payload"
        );

        let pending = self
            .client
            .put(
                &self.config.pool,
                key,
                payload,
                self.config.version_hint,
                self.config.subgroup_index,
                self.config.is_trigger,
            )
            .await;

        {
            let mut stats = self.stats.write();
            stats.puts_issued += 1;
            stats.bytes_sent += size;
        }

        pending
    }

    /// Issue a payload and await its outcome.
    pub async fn publish_and_wait(
        &self,
        key: &str,
        payload: Bytes,
    ) -> Result<PutOutcome, PublishError> {
        let pending = self.publish(key, payload).await;

        match pending.get_result().await {
            Ok(outcome) => {
                self.stats.write().puts_succeeded += 1;
                debug!(key = %key, version = outcome.version, "Publish resolved");
                Ok(outcome)
            }
            Err(e) => {
                self.stats.write().puts_failed += 1;
                warn!(key = %key, error = %e, "Publish failed");
                Err(e)
            }
        }
    }
}
