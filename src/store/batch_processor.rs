use futures::stream::{self, StreamExt};

use super::{Batch, BatchOp, DocPath, SetOptions, Store, StoreError};

const MAX_CHUNK_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub paths: Vec<DocPath>,
    pub outcome: Result<(), StoreError>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchProcessorResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchResult>,
}

/// Split `ops` into chunks of at most [`MAX_CHUNK_SIZE`], commit each chunk as
/// its own atomic batch, and run chunks concurrently up to
/// `pool_limit / 2` in flight (spec §4.1). One chunk's failure never aborts
/// its siblings — results are collected independently per chunk.
pub async fn run_batch_processor(
    store: &dyn Store,
    ops: Vec<BatchOp>,
    pool_limit: usize,
) -> BatchProcessorResult {
    let total = ops.len();
    let concurrency = (pool_limit / 2).max(1);
    let chunks: Vec<Vec<BatchOp>> = ops.chunks(MAX_CHUNK_SIZE).map(|c| c.to_vec()).collect();

    let results: Vec<BatchResult> = stream::iter(chunks.into_iter().map(|chunk| async move {
        let paths: Vec<DocPath> = chunk
            .iter()
            .map(|op| match op {
                BatchOp::Set { path, .. } => path.clone(),
                BatchOp::Update { path, .. } => path.clone(),
                BatchOp::Delete { path } => path.clone(),
            })
            .collect();

        let mut batch = store.batch();
        for op in chunk {
            match op {
                BatchOp::Set { path, doc, options } => batch.set(path, doc, options),
                BatchOp::Update { path, fields } => batch.update(path, fields),
                BatchOp::Delete { path } => batch.delete(path),
            }
        }
        let outcome = batch.commit().await;
        BatchResult { paths, outcome }
    }))
    .buffer_unordered(concurrency)
    .collect()
    .await;

    let successful = results.iter().filter(|r| r.outcome.is_ok()).map(|r| r.paths.len()).sum();
    let failed = results.iter().filter(|r| r.outcome.is_err()).map(|r| r.paths.len()).sum();

    BatchProcessorResult { total, successful, failed, results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::SetOptions;

    #[tokio::test]
    async fn splits_into_chunks_and_reports_summary() {
        let store = InMemoryStore::new();
        let ops: Vec<BatchOp> = (0..60)
            .map(|i| BatchOp::Set {
                path: format!("/docs/{i}"),
                doc: serde_json::json!({ "i": i }),
                options: SetOptions::default(),
            })
            .collect();

        let result = run_batch_processor(&store, ops, 10).await;
        assert_eq!(result.total, 60);
        assert_eq!(result.successful, 60);
        assert_eq!(result.failed, 0);
        // 60 ops / 25 per chunk -> 3 chunks
        assert_eq!(result.results.len(), 3);
    }
}
