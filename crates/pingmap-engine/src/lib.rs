//! Merge coordination and the service facade over a [`pingmap_db::KvStore`].

pub mod budget;
pub mod coordinator;
pub mod error;
mod retry;
pub mod service;

use std::time::Duration;

use pingmap_core::{AppConfig, BucketId, DEFAULT_PRECISION};

pub use budget::OpBudget;
pub use coordinator::{BucketFailure, FailureKind, MergeCoordinator, MergeReport};
pub use error::EngineError;
pub use service::{CellPage, CellView, ClearReport, IngestSummary, PingMapService};

/// Key prefix shared by every persisted cell.
pub const CELL_KEY_PREFIX: &str = "cell:";

#[must_use]
pub fn cell_key(bucket: &BucketId) -> String {
    format!("{CELL_KEY_PREFIX}{bucket}")
}

/// Inverse of [`cell_key`]. `None` for keys outside the cell namespace or
/// with a malformed bucket part.
#[must_use]
pub fn bucket_from_key(key: &str) -> Option<BucketId> {
    key.strip_prefix(CELL_KEY_PREFIX).and_then(BucketId::parse)
}

/// Tunables for merging and reading, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub precision: usize,
    pub seen_cap: usize,
    pub max_buckets_per_request: usize,
    pub max_store_ops_per_request: usize,
    pub max_concurrent_merges: usize,
    pub max_cas_retries: u32,
    pub cas_backoff_base_ms: u64,
    /// Buckets not started within this window are skipped.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            seen_cap: 150,
            max_buckets_per_request: 500,
            max_store_ops_per_request: 1_000,
            max_concurrent_merges: 16,
            max_cas_retries: 3,
            cas_backoff_base_ms: 20,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            precision: config.geohash_precision,
            seen_cap: config.seen_cap,
            max_buckets_per_request: config.max_buckets_per_request,
            max_store_ops_per_request: config.max_store_ops_per_request,
            max_concurrent_merges: config.max_concurrent_merges,
            max_cas_retries: config.max_cas_retries,
            cas_backoff_base_ms: config.cas_backoff_base_ms,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_key_round_trips_through_bucket_from_key() {
        let id = BucketId::parse("dr5ru6j").unwrap();
        assert_eq!(cell_key(&id), "cell:dr5ru6j");
        assert_eq!(bucket_from_key("cell:dr5ru6j"), Some(id));
    }

    #[test]
    fn bucket_from_key_rejects_foreign_keys() {
        assert_eq!(bucket_from_key("other:dr5ru6j"), None);
        assert_eq!(bucket_from_key("cell:"), None);
        assert_eq!(bucket_from_key("cell:ABC"), None);
    }
}
