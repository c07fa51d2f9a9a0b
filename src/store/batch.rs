use async_trait::async_trait;

use super::{DocPath, SetOptions, StoreResult};

#[derive(Debug, Clone)]
pub enum BatchOp {
    Set { path: DocPath, doc: serde_json::Value, options: SetOptions },
    Update { path: DocPath, fields: serde_json::Value },
    Delete { path: DocPath },
}

/// A set of mutations that commit as a single atomic unit (spec §4.1,
/// §4.5.8): "at-most-one committed outcome per batch." Callers stage
/// operations with `set`/`update`/`delete` and call `commit` exactly once;
/// on cancellation the batch is simply dropped and nothing lands (spec §5).
#[async_trait]
pub trait Batch: Send {
    fn set(&mut self, path: DocPath, doc: serde_json::Value, options: SetOptions);
    fn update(&mut self, path: DocPath, fields: serde_json::Value);
    fn delete(&mut self, path: DocPath);

    /// Commit all staged operations atomically. On `Err`, no operation in
    /// the batch has taken effect.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// The operations staged so far, for diagnostics and for the in-memory
    /// store's conflict-detection tests.
    fn staged(&self) -> &[BatchOp];
}
