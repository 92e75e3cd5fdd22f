//! Ingest, read and clear-all over one store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pingmap_core::{
    aggregate, classify, normalize_batch, success_rate, BucketId, Cell, SourceInfo, Tier,
};
use pingmap_db::{KvStore, StoreError, Versioned};
use serde::Serialize;

use crate::budget::OpBudget;
use crate::coordinator::{decode_cell, BucketFailure, MergeCoordinator};
use crate::{bucket_from_key, cell_key, EngineConfig, EngineError, CELL_KEY_PREFIX};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 500;
/// Keys listed per page while clearing.
const CLEAR_PAGE_SIZE: usize = 100;

/// Counts reported back to the submitter of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    /// Items in the request body.
    pub received: usize,
    /// Probes folded into some bucket delta.
    pub processed: usize,
    pub malformed: usize,
    pub duplicates: usize,
    /// Distinct buckets the batch touched.
    pub buckets: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub deferred: Vec<BucketId>,
    pub timed_out: Vec<BucketId>,
    pub failures: Vec<BucketFailure>,
}

/// A persisted cell with its derived classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub bucket: BucketId,
    pub received: f64,
    pub lost: f64,
    pub samples: u64,
    /// `None` when the cell holds no evidence.
    pub rate: Option<f64>,
    pub tier: Tier,
    pub label: &'static str,
    pub color: &'static str,
    pub last_update: Option<DateTime<Utc>>,
    pub sources: BTreeMap<String, SourceInfo>,
}

impl CellView {
    #[must_use]
    pub fn new(bucket: BucketId, cell: Cell) -> Self {
        let tier = classify(cell.received, cell.lost);
        Self {
            bucket,
            received: cell.received,
            lost: cell.lost,
            samples: cell.samples,
            rate: success_rate(cell.received, cell.lost),
            tier,
            label: tier.label(),
            color: tier.color(),
            last_update: cell.last_update,
            sources: cell.sources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPage {
    pub cells: Vec<CellView>,
    /// Opaque; pass back as `cursor` to fetch the next page. `None` on the
    /// last page.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted: usize,
    pub failed: usize,
    /// `false` when the operation budget ran out before the listing ended,
    /// so cells may remain; run clear-all again to continue.
    pub complete: bool,
}

pub struct PingMapService<S> {
    store: Arc<S>,
    coordinator: MergeCoordinator<S>,
    config: EngineConfig,
}

impl<S: KvStore> PingMapService<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        let store = Arc::new(store);
        Self {
            coordinator: MergeCoordinator::new(Arc::clone(&store), config.clone()),
            store,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend is unreachable.
    pub async fn health(&self) -> Result<(), EngineError> {
        self.store.health_check().await.map_err(EngineError::from)
    }

    /// # Errors
    ///
    /// See [`PingMapService::ingest_at`].
    pub async fn ingest(&self, body: serde_json::Value) -> Result<IngestSummary, EngineError> {
        self.ingest_at(body, Utc::now()).await
    }

    /// Normalize, aggregate and merge one request body, using `now` for decay.
    ///
    /// Per-probe and per-bucket problems are counted in the summary.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Batch`] if the body is neither an array nor an object
    ///   with a `pings` array.
    /// - [`EngineError::StorageUnavailable`] if buckets were attempted and
    ///   every one of them failed against storage.
    pub async fn ingest_at(
        &self,
        body: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<IngestSummary, EngineError> {
        let batch = normalize_batch(body)?;
        // Persisted seen-lists are checked at merge time, after the fresh read.
        let outcome = aggregate(&batch.probes, self.config.precision, |_, _| false);
        let buckets = outcome.deltas.len();

        let report = self.coordinator.merge_at(outcome.deltas, now).await;
        if report.is_total_storage_failure() {
            tracing::error!(
                failed = report.failed(),
                "every bucket merge failed against storage"
            );
            return Err(EngineError::StorageUnavailable {
                failed: report.failed(),
            });
        }

        let summary = IngestSummary {
            received: batch.total,
            processed: outcome.accepted,
            malformed: batch.malformed + outcome.malformed,
            duplicates: outcome.duplicates,
            buckets,
            created: report.created,
            updated: report.updated,
            unchanged: report.unchanged,
            failed: report.failed(),
            deferred: report.deferred,
            timed_out: report.timed_out,
            failures: report.failures,
        };

        tracing::info!(
            received = summary.received,
            processed = summary.processed,
            malformed = summary.malformed,
            duplicates = summary.duplicates,
            buckets = summary.buckets,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            deferred = summary.deferred.len(),
            timed_out = summary.timed_out.len(),
            "ingest complete"
        );
        Ok(summary)
    }

    /// One page of cells in bucket order, resuming after `cursor`.
    ///
    /// `limit` defaults to [`DEFAULT_PAGE_SIZE`], is clamped to
    /// `1..=MAX_PAGE_SIZE`, and shrinks further to fit the operation budget.
    /// One list call plus one read per listed key; a page can come back short
    /// and still carry a cursor. Cells deleted or unreadable between the
    /// listing and the read are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if listing or reading fails, or
    /// [`EngineError::BudgetExceeded`] if the budget cannot cover one read.
    pub async fn list_cells(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<CellPage, EngineError> {
        let budget = OpBudget::new(self.config.max_store_ops_per_request);
        budget.try_acquire(1)?;
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
            .min(budget.remaining())
            .max(1);
        budget.try_acquire(limit)?;

        let listed = self
            .store
            .list_page(CELL_KEY_PREFIX, cursor, limit)
            .await?;
        let page: Vec<BucketId> = listed
            .keys
            .iter()
            .filter_map(|key| bucket_from_key(key))
            .collect();
        let next_cursor = listed.cursor;

        let store = &self.store;
        let fetched: Vec<(BucketId, Result<Option<Versioned>, StoreError>)> = stream::iter(page)
            .map(|id| async move {
                let result = store.get(&cell_key(&id)).await;
                (id, result)
            })
            .buffered(self.config.max_concurrent_merges.max(1))
            .collect()
            .await;

        let mut cells = Vec::with_capacity(fetched.len());
        for (id, result) in fetched {
            let Some(stored) = result? else {
                continue;
            };
            match decode_cell(&cell_key(&id), stored.value) {
                Ok(cell) => cells.push(CellView::new(id, cell)),
                Err(err) => tracing::warn!(bucket = %id, error = %err, "skipping unreadable cell"),
            }
        }

        Ok(CellPage { cells, next_cursor })
    }

    /// Delete every persisted cell, one listed page at a time.
    ///
    /// Each page costs one list call plus one delete per key. When the
    /// operation budget cannot cover another page the report comes back with
    /// `complete: false`. Individual delete failures are counted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if a page cannot be listed.
    pub async fn clear_all(&self) -> Result<ClearReport, EngineError> {
        let budget = OpBudget::new(self.config.max_store_ops_per_request);
        let mut report = ClearReport::default();
        let mut cursor: Option<String> = None;

        loop {
            // Room for one list call and at least one delete.
            if budget.remaining() < 2 {
                break;
            }
            budget.try_acquire(1)?;
            let page_size = budget.remaining().min(CLEAR_PAGE_SIZE);
            let page = self
                .store
                .list_page(CELL_KEY_PREFIX, cursor.as_deref(), page_size)
                .await?;
            budget.try_acquire(page.keys.len())?;

            self.delete_keys(page.keys, &mut report).await;

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => {
                    report.complete = true;
                    break;
                }
            }
        }

        tracing::info!(
            deleted = report.deleted,
            failed = report.failed,
            complete = report.complete,
            "clear-all finished"
        );
        Ok(report)
    }

    async fn delete_keys(&self, keys: Vec<String>, report: &mut ClearReport) {
        let store = &self.store;
        let results: Vec<(String, Result<bool, StoreError>)> = stream::iter(keys)
            .map(|key| async move {
                let result = store.delete(&key).await;
                (key, result)
            })
            .buffer_unordered(self.config.max_concurrent_merges.max(1))
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "failed to delete cell");
                    report.failed += 1;
                }
            }
        }
    }
}
