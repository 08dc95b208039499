//! Remote store client interface.
//!
//! The pipeline publishes payloads through the [`StoreClient`] trait:
//! `put(pool, key, bytes, version_hint, subgroup_index, is_trigger)` returns
//! a [`PendingResult`] immediately; the eventual outcome (store-assigned
//! version or a [`PublishError`]) is obtained by awaiting the handle. The
//! store's replication and consistency internals are opaque to this crate.
//!
//! [`MemoryStore`] is an in-process reference implementation used by the
//! default binary backend and the test suite.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Errors reported through a resolved publish outcome.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("Connection to store lost: {0}")]
    ConnectionLost(String),

    #[error("Pool {0:?} is unavailable")]
    PoolUnavailable(String),

    #[error("Store rejected put for key {key:?}: {reason}")]
    Rejected { key: String, reason: String },

    #[error("Publish dropped before resolution")]
    Dropped,
}

/// Successful outcome of a publish: the version and timestamp the store
/// assigned to the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Store-assigned version, monotonically increasing per (pool, key)
    pub version: u64,

    /// Store-side timestamp of the write, nanoseconds since the epoch
    pub timestamp_ns: u64,
}

/// Lifecycle state of a single publish.
///
/// Transitions are `Created -> InFlight -> Resolved`; `Resolved` is
/// terminal and is entered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutState {
    Created,
    InFlight,
    Resolved,
}

/// Asynchronous handle for an in-flight store write.
///
/// Created when a publish is issued, resolved exactly once by the store
/// client, then discarded. Awaiting [`PendingResult::get_result`] consumes
/// the handle.
#[derive(Debug)]
pub struct PendingResult {
    state: Arc<Mutex<PutState>>,
    rx: oneshot::Receiver<Result<PutOutcome, PublishError>>,
}

/// Resolution side of a [`PendingResult`], held by the store client.
///
/// Dropping the slot without resolving surfaces [`PublishError::Dropped`]
/// to the waiting caller.
#[derive(Debug)]
pub struct ResultSlot {
    state: Arc<Mutex<PutState>>,
    tx: oneshot::Sender<Result<PutOutcome, PublishError>>,
}

impl PendingResult {
    /// Create a linked handle/slot pair in the `Created` state.
    pub fn pending() -> (PendingResult, ResultSlot) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(PutState::Created));

        (
            PendingResult {
                state: state.clone(),
                rx,
            },
            ResultSlot { state, tx },
        )
    }

    /// Current lifecycle state of the publish.
    pub fn state(&self) -> PutState {
        *self.state.lock()
    }

    /// Await the final outcome of the publish.
    pub async fn get_result(self) -> Result<PutOutcome, PublishError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(PublishError::Dropped),
        }
    }
}

impl ResultSlot {
    /// Mark the publish as issued to the store.
    pub fn mark_in_flight(&self) {
        let mut state = self.state.lock();
        if *state == PutState::Created {
            *state = PutState::InFlight;
        }
    }

    /// Resolve the publish with its final outcome. Consumes the slot.
    pub fn resolve(self, outcome: Result<PutOutcome, PublishError>) {
        *self.state.lock() = PutState::Resolved;
        // The receiver may have been dropped by a caller that no longer
        // cares about the outcome; that is not an error here.
        let _ = self.tx.send(outcome);
    }
}

/// Client interface to the remote keyed object store.
///
/// `put` issues the payload to the named pool/subgroup and returns promptly
/// with a pending handle; failures are reported through the resolved
/// outcome, never raised synchronously. Implementations must not retry
/// internally.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn put(
        &self,
        pool: &str,
        key: &str,
        payload: Bytes,
        version_hint: u64,
        subgroup_index: u32,
        is_trigger: bool,
    ) -> PendingResult;
}

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub version: u64,
    pub timestamp_ns: u64,
    pub subgroup_index: u32,
    pub is_trigger: bool,
}

/// In-process reference store.
///
/// Assigns monotonically increasing versions per (pool, key), honors
/// non-zero version hints as optimistic concurrency checks, and records
/// the order in which puts were issued so tests can verify call ordering.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    put_order: Mutex<Vec<String>>,
    known_pools: Option<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the store to a fixed set of pools; puts addressed to any
    /// other pool resolve with [`PublishError::PoolUnavailable`].
    pub fn with_pools<I, S>(pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            objects: Mutex::new(HashMap::new()),
            put_order: Mutex::new(Vec::new()),
            known_pools: Some(pools.into_iter().map(Into::into).collect()),
        }
    }

    /// Fetch a stored object.
    pub fn get(&self, pool: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(pool.to_string(), key.to_string()))
            .cloned()
    }

    /// Current version of a stored object, if present.
    pub fn version(&self, pool: &str, key: &str) -> Option<u64> {
        self.get(pool, key).map(|obj| obj.version)
    }

    /// Keys in the order their puts were issued.
    pub fn put_order(&self) -> Vec<String> {
        self.put_order.lock().clone()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn put(
        &self,
        pool: &str,
        key: &str,
        payload: Bytes,
        version_hint: u64,
        subgroup_index: u32,
        is_trigger: bool,
    ) -> PendingResult {
        let (pending, slot) = PendingResult::pending();
        slot.mark_in_flight();

        self.put_order.lock().push(key.to_string());

        if let Some(pools) = &self.known_pools {
            if !pools.contains(pool) {
                slot.resolve(Err(PublishError::PoolUnavailable(pool.to_string())));
                return pending;
            }
        }

        let mut objects = self.objects.lock();
        let entry = (pool.to_string(), key.to_string());
        let current_version = objects.get(&entry).map(|obj| obj.version).unwrap_or(0);

        // A non-zero hint must match the stored version; zero means
        // unconditional write.
        if version_hint != 0 && version_hint != current_version {
            slot.resolve(Err(PublishError::Rejected {
                key: key.to_string(),
                reason: format!(
                    "version hint {version_hint} does not match stored version {current_version}"
                ),
            }));
            return pending;
        }

        let version = current_version + 1;
        let timestamp_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default() as u64;

        objects.insert(
            entry,
            StoredObject {
                data: payload,
                version,
                timestamp_ns,
                subgroup_index,
                is_trigger,
            },
        );

        debug!(pool = %pool, key = %key, version = version, "Stored object");

        slot.resolve(Ok(PutOutcome {
            version,
            timestamp_ns,
        }));
        pending
    }
}
