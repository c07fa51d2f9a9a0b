//! Document-store abstraction (spec §4.1).
//!
//! The billing core never speaks to a concrete database; every component
//! takes a `Arc<dyn Store>` through the [`crate::context::ServiceContext`].
//! This keeps the vendor choice out of scope, as required by spec §1, while
//! still giving the billing logic atomic multi-document commits, bounded
//! concurrent connections, and a uniform retry policy for transient faults.

mod batch;
mod batch_processor;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{instrument, warn};

pub use batch::{Batch, BatchOp};
pub use batch_processor::{run_batch_processor, BatchProcessorResult, BatchResult};

/// A logical document path, e.g. `/clients/acme/projects/waterBills/bills/2026-00`.
/// Kept as an owned `String` rather than a structured type: the path layout
/// is an external contract (spec §6.2), not something the store interprets.
pub type DocPath = String;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {path}")]
    NotFound { path: DocPath },
    #[error("optimistic concurrency conflict: {path}")]
    Conflict { path: DocPath },
    #[error("transient store error: {message}")]
    Transient { message: String },
    #[error("permanent store error: {message}")]
    Permanent { message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Merge into the existing document rather than replacing it wholesale —
    /// used by the distributor to update only a bill's affected unit entry.
    pub merge: bool,
    /// Fail the write with `Conflict` if a document already exists at the
    /// path, checked as part of the same atomic commit as the write itself —
    /// used by the scheduler lease to make "create if absent" race-free
    /// instead of a separate read-then-write.
    pub create_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum QueryFilter {
    Eq { field: String, value: serde_json::Value },
    Range { field: String, gte: Option<serde_json::Value>, lte: Option<serde_json::Value> },
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub filters: Vec<QueryFilter>,
    pub order_by: Option<String>,
}

/// The document-store contract billing components are written against.
///
/// All methods are suspension points (spec §5). Implementations must
/// classify every failure into one of the four [`StoreError`] kinds so the
/// retry policy in [`with_retry`] behaves correctly — misclassifying a
/// permanent failure as `Transient` would make it retry forever, while the
/// reverse would abandon a recoverable operation immediately.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_raw(&self, path: &DocPath) -> StoreResult<Option<serde_json::Value>>;
    async fn set_raw(&self, path: &DocPath, doc: serde_json::Value, options: SetOptions) -> StoreResult<()>;
    async fn update_raw(&self, path: &DocPath, fields: serde_json::Value) -> StoreResult<()>;
    async fn delete(&self, path: &DocPath) -> StoreResult<()>;
    async fn list(&self, path: &DocPath, options: ListOptions) -> StoreResult<Vec<(DocPath, serde_json::Value)>>;
    async fn query(&self, collection: &DocPath, options: QueryOptions) -> StoreResult<Vec<(DocPath, serde_json::Value)>>;

    /// Begin a new atomic batch. Committing it is all-or-nothing: either
    /// every operation lands, or none do (spec §4.1, §5 cancellation).
    fn batch(&self) -> Box<dyn Batch>;

    /// Acquire a bounded connection handle. Implementations that don't model
    /// a real connection pool (e.g. the in-memory store) can return an
    /// always-available handle, but must still honor `max_concurrent_handles`.
    async fn scoped_handle(&self) -> StoreResult<ScopedHandle>;

    fn max_concurrent_handles(&self) -> usize {
        100
    }
}

/// Typed convenience wrapper over [`Store::get_raw`] / [`Store::set_raw`].
#[async_trait]
pub trait TypedStore: Store {
    async fn get<T: DeserializeOwned>(&self, path: &DocPath) -> StoreResult<Option<T>> {
        match self.get_raw(path).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Permanent { message: format!("decode {path}: {e}") }),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Sync>(&self, path: &DocPath, doc: &T, options: SetOptions) -> StoreResult<()> {
        let value = serde_json::to_value(doc)
            .map_err(|e| StoreError::Permanent { message: format!("encode {path}: {e}") })?;
        self.set_raw(path, value, options).await
    }
}

impl<S: Store + ?Sized> TypedStore for S {}

/// RAII guard representing one checked-out slot in the store's connection
/// pool (spec §5: "operations acquire a scoped handle and MUST release on
/// every exit path including panics"). Dropping it releases the slot.
pub struct ScopedHandle {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl ScopedHandle {
    pub fn from_permit(permit: tokio::sync::OwnedSemaphorePermit) -> Self {
        ScopedHandle { _permit: Some(permit) }
    }

    pub fn unbounded() -> Self {
        ScopedHandle { _permit: None }
    }
}

/// Shared connection-pool limiter any [`Store`] implementation can embed.
/// Acquiring beyond capacity fails fast with `Transient` rather than queuing
/// forever, matching spec §4.1 ("when the pool is exhausted the call fails
/// with Transient").
#[derive(Clone)]
pub struct ConnectionPool {
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl ConnectionPool {
    pub fn new(max_concurrent: usize) -> Self {
        ConnectionPool { semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)) }
    }

    pub async fn acquire(&self) -> StoreResult<ScopedHandle> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(ScopedHandle::from_permit(permit)),
            Err(_) => Err(StoreError::Transient { message: "connection pool exhausted".to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 3, initial_backoff: Duration::from_secs(1), factor: 2 }
    }
}

/// Run `op` under the store's retry policy: only [`StoreError::Transient`]
/// failures are retried, with exponential backoff; `Conflict` and
/// `Permanent` propagate on the first attempt (spec §4.1).
#[instrument(skip(op))]
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op: F) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient { message }) if attempt < policy.max_attempts => {
                warn!(attempt, %message, "transient store error, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= policy.factor;
            }
            Err(err) => return Err(err),
        }
    }
}
