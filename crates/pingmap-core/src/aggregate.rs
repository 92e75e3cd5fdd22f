//! Batch aggregation: group probes by bucket, drop duplicates, fold the rest
//! into one [`CellDelta`] per bucket.
//!
//! Pure and synchronous. Duplicate detection runs to completion over the whole
//! batch before any count is committed, so the result depends only on the
//! input order of the probes.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::cell::{CellDelta, DeltaEntry, SourceInfo};
use crate::dedup::dedup_key;
use crate::geohash::{bucket, BucketId};
use crate::probe::Probe;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOutcome {
    pub deltas: BTreeMap<BucketId, CellDelta>,
    /// Probes folded into some delta.
    pub accepted: usize,
    /// Probes skipped because their key was already seen, either upstream or
    /// earlier in this batch.
    pub duplicates: usize,
    /// Probes with non-finite coordinates.
    pub malformed: usize,
}

/// Fold `probes` into per-bucket deltas.
///
/// `already_seen(bucket, key)` lets the caller veto keys it already knows were
/// merged; within-batch repeats are caught regardless of what it returns.
pub fn aggregate<F>(probes: &[Probe], precision: usize, already_seen: F) -> AggregateOutcome
where
    F: Fn(&BucketId, &str) -> bool,
{
    let mut outcome = AggregateOutcome::default();
    let mut consumed: HashMap<BucketId, HashSet<String>> = HashMap::new();
    let mut accepted: Vec<(BucketId, String, &Probe)> = Vec::with_capacity(probes.len());

    for probe in probes {
        if !probe.latitude.is_finite() || !probe.longitude.is_finite() {
            outcome.malformed += 1;
            continue;
        }
        let id = bucket(probe.latitude, probe.longitude, precision);
        let key = dedup_key(probe);

        if already_seen(&id, &key) {
            outcome.duplicates += 1;
            continue;
        }
        if !consumed.entry(id.clone()).or_default().insert(key.clone()) {
            outcome.duplicates += 1;
            continue;
        }
        accepted.push((id, key, probe));
    }

    outcome.accepted = accepted.len();
    for (id, key, probe) in accepted {
        outcome
            .deltas
            .entry(id)
            .or_default()
            .record(entry_for(key, probe));
    }

    outcome
}

fn entry_for(key: String, probe: &Probe) -> DeltaEntry {
    let source = probe.valid_source().map(|id| {
        (
            id.to_owned(),
            SourceInfo {
                display_name: probe.source_name.clone().unwrap_or_else(|| id.to_owned()),
                signal_strength: probe.signal_strength,
                signal_quality: probe.signal_quality,
                last_seen: probe.timestamp,
            },
        )
    });
    DeltaEntry {
        key,
        outcome: probe.outcome(),
        source,
        timestamp: probe.timestamp,
    }
}
