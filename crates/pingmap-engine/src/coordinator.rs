//! Folding per-bucket deltas into persisted cells.
//!
//! One read-modify-write per bucket, buckets in parallel up to
//! `max_concurrent_merges`. Within a bucket the write is conditional on the
//! version that was read when the store supports it; otherwise it is a blind
//! overwrite and two requests racing on one cell can lose one side's counts.
//!
//! Admission happens before any I/O. At most
//! `min(max_buckets_per_request, max_store_ops_per_request / 2)` buckets are
//! merged, most recently updated first; the rest are reported as deferred.
//! Every admitted bucket has its first attempt paid for up front, so only
//! conflict retries can run out of budget.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pingmap_core::{BucketId, Cell, CellDelta, MergedCell};
use pingmap_db::{KvStore, PutCondition, PutOutcome};
use serde::Serialize;
use tokio::time::Instant;

use crate::budget::OpBudget;
use crate::retry::{retry_on_conflict, Attempt, OPS_PER_ATTEMPT};
use crate::{cell_key, EngineConfig, EngineError};

/// What happened to one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketOutcome {
    Created,
    Updated,
    /// Every entry of the delta was already in the persisted seen-list.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Storage,
    Conflict,
    Budget,
    CorruptCell,
}

impl From<&EngineError> for FailureKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Store(_) | EngineError::StorageUnavailable { .. } => Self::Storage,
            EngineError::Conflict { .. } => Self::Conflict,
            EngineError::BudgetExceeded { .. } => Self::Budget,
            EngineError::CorruptCell { .. } | EngineError::Batch(_) => Self::CorruptCell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketFailure {
    pub bucket: BucketId,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Over the per-request bucket ceiling; not attempted.
    pub deferred: Vec<BucketId>,
    /// Not started before the request deadline.
    pub timed_out: Vec<BucketId>,
    pub failures: Vec<BucketFailure>,
}

impl MergeReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Buckets that were started, whatever their outcome.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.created + self.updated + self.unchanged + self.failed()
    }

    /// At least one bucket was started and every one of them failed against
    /// storage.
    #[must_use]
    pub fn is_total_storage_failure(&self) -> bool {
        !self.failures.is_empty()
            && self.failed() == self.attempted()
            && self.failures.iter().all(|f| f.kind == FailureKind::Storage)
    }
}

pub struct MergeCoordinator<S> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: KvStore> MergeCoordinator<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Largest number of buckets a single request may touch.
    #[must_use]
    pub fn bucket_ceiling(&self) -> usize {
        self.config
            .max_buckets_per_request
            .min(self.config.max_store_ops_per_request / OPS_PER_ATTEMPT)
    }

    pub async fn merge(&self, deltas: BTreeMap<BucketId, CellDelta>) -> MergeReport {
        self.merge_at(deltas, Utc::now()).await
    }

    /// Merge with an explicit clock for decay.
    pub async fn merge_at(
        &self,
        deltas: BTreeMap<BucketId, CellDelta>,
        now: DateTime<Utc>,
    ) -> MergeReport {
        let deadline = Instant::now() + self.config.request_timeout;
        let mut report = MergeReport::default();

        let (admitted, deferred) = admit(deltas, self.bucket_ceiling());
        report.deferred = deferred;
        if !report.deferred.is_empty() {
            tracing::warn!(
                deferred = report.deferred.len(),
                ceiling = self.bucket_ceiling(),
                "batch touches more buckets than allowed per request; oldest deferred"
            );
        }

        let budget = OpBudget::new(self.config.max_store_ops_per_request);
        // Cannot fail: the ceiling keeps admitted * OPS_PER_ATTEMPT within the limit.
        if let Err(err) = budget.try_acquire(admitted.len() * OPS_PER_ATTEMPT) {
            tracing::error!(error = %err, "could not reserve first attempts");
        }

        let budget = &budget;
        let results: Vec<(BucketId, Option<Result<BucketOutcome, EngineError>>)> =
            stream::iter(admitted)
                .map(|(id, delta)| async move {
                    if Instant::now() >= deadline {
                        return (id, None);
                    }
                    let outcome = self.merge_bucket(&id, &delta, now, budget).await;
                    (id, Some(outcome))
                })
                .buffer_unordered(self.config.max_concurrent_merges.max(1))
                .collect()
                .await;

        for (id, result) in results {
            match result {
                None => report.timed_out.push(id),
                Some(Ok(BucketOutcome::Created)) => report.created += 1,
                Some(Ok(BucketOutcome::Updated)) => report.updated += 1,
                Some(Ok(BucketOutcome::Unchanged)) => report.unchanged += 1,
                Some(Err(err)) => {
                    tracing::warn!(bucket = %id, error = %err, "cell merge failed");
                    report.failures.push(BucketFailure {
                        bucket: id,
                        kind: FailureKind::from(&err),
                        reason: err.to_string(),
                    });
                }
            }
        }

        report.timed_out.sort();
        report.failures.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        if !report.timed_out.is_empty() {
            tracing::warn!(
                timed_out = report.timed_out.len(),
                "request deadline passed before every bucket started"
            );
        }
        report
    }

    async fn merge_bucket(
        &self,
        id: &BucketId,
        delta: &CellDelta,
        now: DateTime<Utc>,
        budget: &OpBudget,
    ) -> Result<BucketOutcome, EngineError> {
        let key = cell_key(id);
        let key = key.as_str();
        let cas = self.store.supports_conditional_writes();
        let max_retries = if cas { self.config.max_cas_retries } else { 0 };

        retry_on_conflict(
            id,
            max_retries,
            self.config.cas_backoff_base_ms,
            budget,
            || self.attempt(key, delta, now, cas),
        )
        .await
    }

    /// One read, one fold, one write. Nothing else runs between the read and
    /// the write.
    async fn attempt(
        &self,
        key: &str,
        delta: &CellDelta,
        now: DateTime<Utc>,
        cas: bool,
    ) -> Result<Attempt<BucketOutcome>, EngineError> {
        let (existing, condition) = match self.store.get(key).await? {
            None => (None, if cas { PutCondition::Absent } else { PutCondition::Any }),
            Some(stored) => {
                let condition = match (cas, stored.version) {
                    (true, Some(version)) => PutCondition::Version(version),
                    _ => PutCondition::Any,
                };
                (Some(decode_cell(key, stored.value)?), condition)
            }
        };

        let Some(merged) =
            MergedCell::apply(existing.as_ref(), delta, now, self.config.seen_cap)
        else {
            tracing::debug!(key, "every probe already merged; skipping write");
            return Ok(Attempt::Done(BucketOutcome::Unchanged));
        };

        let value = serde_json::to_value(&merged.cell).map_err(|source| {
            EngineError::CorruptCell {
                key: key.to_owned(),
                source,
            }
        })?;

        match self.store.put(key, &value, condition).await? {
            PutOutcome::Written => {
                tracing::debug!(
                    key,
                    created = merged.created,
                    decay = merged.decay,
                    applied = merged.applied.samples,
                    "cell written"
                );
                Ok(Attempt::Done(if merged.created {
                    BucketOutcome::Created
                } else {
                    BucketOutcome::Updated
                }))
            }
            PutOutcome::Conflict => Ok(Attempt::Conflict),
        }
    }
}

/// Parse a stored cell, clamping its totals to valid values.
pub(crate) fn decode_cell(key: &str, value: serde_json::Value) -> Result<Cell, EngineError> {
    serde_json::from_value::<Cell>(value)
        .map(Cell::sanitized)
        .map_err(|source| EngineError::CorruptCell {
            key: key.to_owned(),
            source,
        })
}

/// Split non-empty deltas into those merged now and those deferred.
///
/// Keeps the `ceiling` deltas with the latest `last_update`, ties broken by
/// bucket id. Deferred ids come back sorted.
fn admit(
    deltas: BTreeMap<BucketId, CellDelta>,
    ceiling: usize,
) -> (Vec<(BucketId, CellDelta)>, Vec<BucketId>) {
    let mut ranked: Vec<(BucketId, CellDelta)> =
        deltas.into_iter().filter(|(_, d)| !d.is_empty()).collect();
    if ranked.len() <= ceiling {
        return (ranked, Vec::new());
    }

    ranked.sort_by(|(a_id, a), (b_id, b)| {
        b.last_update
            .cmp(&a.last_update)
            .then_with(|| a_id.cmp(b_id))
    });
    let mut deferred: Vec<BucketId> = ranked
        .split_off(ceiling)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    deferred.sort();
    (ranked, deferred)
}
