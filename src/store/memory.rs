//! In-memory reference [`Store`] implementation.
//!
//! The concrete document-store vendor is out of scope (spec §1), but every
//! component needs something to run its tests against. This backend gives
//! the same `NotFound`/`Conflict`/`Transient` semantics a real backend would,
//! including injectable failure modes so retry logic can be exercised
//! deterministically, grounded on the teacher's `TimeSource::Test` pattern of
//! giving tests a seam instead of mocking at the trait boundary.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use super::{
    with_retry, Batch, BatchOp, ConnectionPool, DocPath, ListOptions, QueryFilter, QueryOptions,
    RetryPolicy, ScopedHandle, SetOptions, Store, StoreError, StoreResult,
};

#[derive(Clone)]
struct StoredDoc {
    value: serde_json::Value,
}

/// Per-path injected failure, consumed on first match. Lets tests simulate a
/// single transient hiccup or a concurrent-writer conflict without building
/// a second writer.
#[derive(Clone, Copy, Debug)]
pub enum InjectedFailure {
    Transient,
    Conflict,
}

pub struct InMemoryStore {
    docs: Arc<DashMap<DocPath, StoredDoc>>,
    // Serializes batch commits so "atomic" really means atomic: a commit
    // either applies every staged op under this lock or none of them.
    commit_lock: Arc<AsyncMutex<()>>,
    injected: DashMap<DocPath, InjectedFailure>,
    pool: ConnectionPool,
    pool_limit: usize,
    // Every read/write below goes through this so an injected or real
    // `Transient` failure is actually retried (spec §4.1), not just defined.
    retry_policy: RetryPolicy,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            docs: Arc::new(DashMap::new()),
            commit_lock: Arc::new(AsyncMutex::new(())),
            injected: DashMap::new(),
            pool: ConnectionPool::new(100),
            pool_limit: 100,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_pool_limit(max_concurrent: usize) -> Self {
        InMemoryStore {
            pool: ConnectionPool::new(max_concurrent),
            pool_limit: max_concurrent,
            ..Self::new()
        }
    }

    /// Arrange for the next operation touching `path` to fail once with the
    /// given failure kind, then behave normally.
    pub fn inject_failure(&self, path: impl Into<DocPath>, failure: InjectedFailure) {
        self.injected.insert(path.into(), failure);
    }

    fn take_injected(&self, path: &DocPath) -> Option<InjectedFailure> {
        self.injected.remove(path).map(|(_, f)| f)
    }

    fn check_injected(&self, path: &DocPath) -> StoreResult<()> {
        match self.take_injected(path) {
            Some(InjectedFailure::Transient) => {
                Err(StoreError::Transient { message: format!("injected transient failure on {path}") })
            }
            Some(InjectedFailure::Conflict) => Err(StoreError::Conflict { path: path.clone() }),
            None => Ok(()),
        }
    }

    fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
        match (base, patch) {
            (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
                for (k, v) in patch_map {
                    base_map.insert(k, v);
                }
            }
            (base_slot, patch) => *base_slot = patch,
        }
    }

    fn apply_op(&self, op: &BatchOp) -> StoreResult<()> {
        match op {
            BatchOp::Set { path, doc, options } => {
                if options.create_only && self.docs.contains_key(path) {
                    return Err(StoreError::Conflict { path: path.clone() });
                }
                if options.merge {
                    let mut entry = self
                        .docs
                        .entry(path.clone())
                        .or_insert_with(|| StoredDoc { value: serde_json::Value::Null });
                    Self::merge_json(&mut entry.value, doc.clone());
                } else {
                    self.docs.insert(path.clone(), StoredDoc { value: doc.clone() });
                }
                Ok(())
            }
            BatchOp::Update { path, fields } => match self.docs.get_mut(path) {
                Some(mut entry) => {
                    Self::merge_json(&mut entry.value, fields.clone());
                    Ok(())
                }
                None => Err(StoreError::NotFound { path: path.clone() }),
            },
            BatchOp::Delete { path } => {
                self.docs.remove(path);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_raw(&self, path: &DocPath) -> StoreResult<Option<serde_json::Value>> {
        with_retry(self.retry_policy, || async {
            self.check_injected(path)?;
            Ok(self.docs.get(path).map(|d| d.value.clone()))
        })
        .await
    }

    async fn set_raw(&self, path: &DocPath, doc: serde_json::Value, options: SetOptions) -> StoreResult<()> {
        with_retry(self.retry_policy, || async {
            self.check_injected(path)?;
            self.apply_op(&BatchOp::Set { path: path.clone(), doc: doc.clone(), options: options.clone() })
        })
        .await
    }

    async fn update_raw(&self, path: &DocPath, fields: serde_json::Value) -> StoreResult<()> {
        with_retry(self.retry_policy, || async {
            self.check_injected(path)?;
            self.apply_op(&BatchOp::Update { path: path.clone(), fields: fields.clone() })
        })
        .await
    }

    async fn delete(&self, path: &DocPath) -> StoreResult<()> {
        with_retry(self.retry_policy, || async {
            self.check_injected(path)?;
            self.apply_op(&BatchOp::Delete { path: path.clone() })
        })
        .await
    }

    async fn list(&self, path: &DocPath, options: ListOptions) -> StoreResult<Vec<(DocPath, serde_json::Value)>> {
        with_retry(self.retry_policy, || async {
            let prefix = options.prefix.clone().unwrap_or_else(|| path.clone());
            let mut matches: Vec<(DocPath, serde_json::Value)> = self
                .docs
                .iter()
                .filter(|entry| entry.key().starts_with(&prefix))
                .map(|entry| (entry.key().clone(), entry.value().value.clone()))
                .collect();
            matches.sort_by(|a, b| a.0.cmp(&b.0));
            if let Some(cursor) = &options.cursor {
                matches.retain(|(p, _)| p.as_str() > cursor.as_str());
            }
            if let Some(limit) = options.limit {
                matches.truncate(limit);
            }
            Ok(matches)
        })
        .await
    }

    async fn query(&self, collection: &DocPath, options: QueryOptions) -> StoreResult<Vec<(DocPath, serde_json::Value)>> {
        with_retry(self.retry_policy, || async {
            let all = self
                .list(collection, ListOptions { prefix: Some(collection.clone()), cursor: None, limit: None })
                .await?;
            let filtered: Vec<(DocPath, serde_json::Value)> = all
                .into_iter()
                .filter(|(_, value)| options.filters.iter().all(|f| matches_filter(value, f)))
                .collect();
            Ok(filtered)
        })
        .await
    }

    fn batch(&self) -> Box<dyn Batch> {
        Box::new(InMemoryBatch { store: self.shared_ref(), ops: Vec::new() })
    }

    async fn scoped_handle(&self) -> StoreResult<ScopedHandle> {
        self.pool.acquire().await
    }

    fn max_concurrent_handles(&self) -> usize {
        self.pool_limit()
    }
}

fn matches_filter(doc: &serde_json::Value, filter: &QueryFilter) -> bool {
    match filter {
        QueryFilter::Eq { field, value } => doc.get(field) == Some(value),
        QueryFilter::Range { field, gte, lte } => {
            let Some(actual) = doc.get(field) else { return false };
            let above = gte.as_ref().map(|g| json_ge(actual, g)).unwrap_or(true);
            let below = lte.as_ref().map(|l| json_le(actual, l)).unwrap_or(true);
            above && below
        }
    }
}

fn json_ge(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    a.as_str().zip(b.as_str()).map(|(a, b)| a >= b).unwrap_or(true)
}

fn json_le(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    a.as_str().zip(b.as_str()).map(|(a, b)| a <= b).unwrap_or(true)
}

/// `InMemoryStore` hands out `Arc`-backed batches so a batch can outlive the
/// borrow of the store reference that created it.
impl InMemoryStore {
    fn shared_ref(&self) -> Arc<InMemoryStoreHandle> {
        Arc::new(InMemoryStoreHandle {
            docs: self.docs.clone(),
            commit_lock: self.commit_lock.clone(),
        })
    }

    fn pool_limit(&self) -> usize {
        self.pool_limit
    }
}

/// Cheap clonable view over the pieces an `InMemoryBatch` needs, so batches
/// don't borrow from `&InMemoryStore` (which would prevent concurrent use).
/// Both fields are `Arc`s shared with the owning store, so mutations through
/// a batch are visible through the store and vice versa.
struct InMemoryStoreHandle {
    docs: Arc<DashMap<DocPath, StoredDoc>>,
    commit_lock: Arc<AsyncMutex<()>>,
}

struct InMemoryBatch {
    store: Arc<InMemoryStoreHandle>,
    ops: Vec<BatchOp>,
}

#[async_trait]
impl Batch for InMemoryBatch {
    fn set(&mut self, path: DocPath, doc: serde_json::Value, options: SetOptions) {
        self.ops.push(BatchOp::Set { path, doc, options });
    }

    fn update(&mut self, path: DocPath, fields: serde_json::Value) {
        self.ops.push(BatchOp::Update { path, fields });
    }

    fn delete(&mut self, path: DocPath) {
        self.ops.push(BatchOp::Delete { path });
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let _guard = self.store.commit_lock.lock().await;

        // Validate every precondition against the current state before
        // mutating anything, so a failure partway through never leaves a
        // partial write.
        let mut staged: HashMap<DocPath, serde_json::Value> = HashMap::new();
        for op in &self.ops {
            match op {
                BatchOp::Update { path, .. } if !self.store.docs.contains_key(path) && !staged.contains_key(path) => {
                    return Err(StoreError::NotFound { path: path.clone() });
                }
                BatchOp::Set { path, options, .. } if options.create_only && self.store.docs.contains_key(path) => {
                    return Err(StoreError::Conflict { path: path.clone() });
                }
                _ => {}
            }
        }

        for op in &self.ops {
            match op {
                BatchOp::Set { path, doc, options } => {
                    let next = if options.merge {
                        let mut base = staged
                            .get(path)
                            .cloned()
                            .or_else(|| self.store.docs.get(path).map(|d| d.value.clone()))
                            .unwrap_or(serde_json::Value::Null);
                        merge_json(&mut base, doc.clone());
                        base
                    } else {
                        doc.clone()
                    };
                    staged.insert(path.clone(), next);
                }
                BatchOp::Update { path, fields } => {
                    let mut base = staged
                        .get(path)
                        .cloned()
                        .or_else(|| self.store.docs.get(path).map(|d| d.value.clone()))
                        .unwrap_or(serde_json::Value::Null);
                    merge_json(&mut base, fields.clone());
                    staged.insert(path.clone(), base);
                }
                BatchOp::Delete { .. } => {}
            }
        }

        for (path, value) in staged {
            self.store.docs.insert(path, StoredDoc { value });
        }
        for op in &self.ops {
            if let BatchOp::Delete { path } = op {
                self.store.docs.remove(path);
            }
        }
        Ok(())
    }

    fn staged(&self) -> &[BatchOp] {
        &self.ops
    }
}

fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k, v);
            }
        }
        (base_slot, patch) => *base_slot = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = InMemoryStore::new();
        store.set_raw(&"/a".to_string(), json!({"x": 1}), SetOptions::default()).await.unwrap();
        let got = store.get_raw(&"/a".to_string()).await.unwrap();
        assert_eq!(got, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn update_on_missing_doc_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.update_raw(&"/missing".to_string(), json!({"x": 1})).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn batch_commits_all_or_nothing() {
        let store = InMemoryStore::new();
        store.set_raw(&"/a".to_string(), json!({"x": 1}), SetOptions::default()).await.unwrap();

        let mut batch = store.batch();
        batch.update("/a".to_string(), json!({"x": 2}));
        batch.update("/missing".to_string(), json!({"y": 1}));
        let result = batch.commit().await;
        assert!(result.is_err());

        // /a must be untouched since the batch as a whole failed
        let got = store.get_raw(&"/a".to_string()).await.unwrap();
        assert_eq!(got, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn injected_conflict_fires_once() {
        let store = InMemoryStore::new();
        store.inject_failure("/a", InjectedFailure::Conflict);
        let err = store.get_raw(&"/a".to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        // second call succeeds, the injected failure was consumed
        assert!(store.get_raw(&"/a".to_string()).await.is_ok());
    }
}
