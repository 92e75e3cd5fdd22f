//! Pure domain logic for the ping reliability map: probe normalization,
//! spatial bucketing, deduplication keys, time decay, cell merging and tier
//! classification. Nothing in this crate performs I/O.

pub mod aggregate;
pub mod app_config;
pub mod cell;
pub mod config;
pub mod decay;
pub mod dedup;
pub mod geohash;
pub mod probe;
pub mod tier;

use thiserror::Error;

pub use aggregate::{aggregate, AggregateOutcome};
pub use app_config::{AppConfig, Environment, StoreKind};
pub use cell::{Cell, CellDelta, DeltaEntry, MergedCell, SourceInfo};
pub use config::{load_app_config, load_app_config_from_env};
pub use decay::decay_factor;
pub use dedup::dedup_key;
pub use geohash::{bucket, BucketId, DEFAULT_PRECISION, MAX_PRECISION};
pub use probe::{normalize_batch, NormalizedBatch, Outcome, Probe, RawProbe};
pub use tier::{classify, success_rate, Tier};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid probe batch: {0}")]
    InvalidBatch(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
