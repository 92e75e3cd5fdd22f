//! Persisted cell state, per-batch deltas, and the merge arithmetic between
//! them.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decay::decay_factor;
use crate::probe::Outcome;

/// Latest known state of one radio source inside a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub display_name: String,
    pub signal_strength: Option<f64>,
    #[serde(default)]
    pub signal_quality: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

/// Insert `info` for `source_id` unless the map already holds an entry that
/// is at least as recent. Returns whether the map changed.
pub fn offer_source(
    sources: &mut BTreeMap<String, SourceInfo>,
    source_id: &str,
    info: &SourceInfo,
) -> bool {
    match sources.get(source_id) {
        Some(existing) if existing.last_seen >= info.last_seen => false,
        _ => {
            sources.insert(source_id.to_owned(), info.clone());
            true
        }
    }
}

/// Persisted aggregate for one bucket.
///
/// `received` and `lost` are decayed evidence mass, not raw counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    #[serde(default)]
    pub received: f64,
    #[serde(default)]
    pub lost: f64,
    /// Every accepted probe, neutral ones included. Never decayed.
    #[serde(default)]
    pub samples: u64,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    /// Most recent dedup keys, oldest first, bounded by the seen cap.
    #[serde(default)]
    pub seen_probe_ids: Vec<String>,
}

impl Cell {
    /// Clamp totals read back from storage to finite, non-negative values.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.received = non_negative(self.received);
        self.lost = non_negative(self.lost);
        self
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// One accepted probe as it lands in a delta.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    pub key: String,
    pub outcome: Outcome,
    pub source: Option<(String, SourceInfo)>,
    pub timestamp: DateTime<Utc>,
}

/// Fresh evidence for one bucket from one batch.
///
/// Keeps the entries it was folded from so the merge step can drop any that
/// the persisted seen-list already contains and re-fold the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellDelta {
    pub received: f64,
    pub lost: f64,
    pub samples: u64,
    pub sources: BTreeMap<String, SourceInfo>,
    pub last_update: Option<DateTime<Utc>>,
    entries: Vec<DeltaEntry>,
}

impl CellDelta {
    pub fn record(&mut self, entry: DeltaEntry) {
        match entry.outcome {
            Outcome::Success => self.received += 1.0,
            Outcome::Failure => self.lost += 1.0,
            Outcome::Neutral => {}
        }
        self.samples += 1;
        if let Some((id, info)) = &entry.source {
            offer_source(&mut self.sources, id, info);
        }
        self.last_update = Some(
            self.last_update
                .map_or(entry.timestamp, |t| t.max(entry.timestamp)),
        );
        self.entries.push(entry);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[DeltaEntry] {
        &self.entries
    }

    pub fn dedup_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Re-fold only the entries whose key is not in `seen`.
    #[must_use]
    pub fn retain_unseen(&self, seen: &HashSet<&str>) -> CellDelta {
        let mut out = CellDelta::default();
        for entry in &self.entries {
            if !seen.contains(entry.key.as_str()) {
                out.record(entry.clone());
            }
        }
        out
    }
}

/// Result of folding a delta into a persisted cell.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCell {
    pub cell: Cell,
    /// The part of the delta that was not already seen.
    pub applied: CellDelta,
    pub created: bool,
    pub decay: f64,
}

impl MergedCell {
    /// Fold `delta` into `existing` (absent means a new, zero-valued cell).
    ///
    /// The existing totals are decayed once, by the cell's own `last_update`
    /// against `now`; the fresh totals are added at full weight. Entries whose
    /// key the existing seen-list already holds are dropped first. Returns
    /// `None` when nothing new remains, in which case no write is needed.
    ///
    /// The seen-list keeps the newest `seen_cap` keys, but never evicts a key
    /// applied by this merge: a bucket delta larger than the cap grows the
    /// list to the delta's size so an immediate resubmission is still caught.
    #[must_use]
    pub fn apply(
        existing: Option<&Cell>,
        delta: &CellDelta,
        now: DateTime<Utc>,
        seen_cap: usize,
    ) -> Option<MergedCell> {
        let created = existing.is_none();
        let base = existing.cloned().unwrap_or_default().sanitized();

        let applied = {
            let seen: HashSet<&str> = base.seen_probe_ids.iter().map(String::as_str).collect();
            delta.retain_unseen(&seen)
        };
        if applied.is_empty() {
            return None;
        }

        let decay = base.last_update.map_or(1.0, |t| decay_factor(t, now));

        let mut sources = base.sources;
        for (id, info) in &applied.sources {
            offer_source(&mut sources, id, info);
        }

        let last_update = match (base.last_update, applied.last_update) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let mut seen_probe_ids = base.seen_probe_ids;
        seen_probe_ids.extend(applied.dedup_keys().map(str::to_owned));
        let cap = seen_cap.max(applied.entries().len()).max(1);
        if seen_probe_ids.len() > cap {
            seen_probe_ids.drain(..seen_probe_ids.len() - cap);
        }

        let cell = Cell {
            received: base.received * decay + applied.received,
            lost: base.lost * decay + applied.lost,
            samples: base.samples + applied.samples,
            sources,
            last_update,
            seen_probe_ids,
        };

        Some(MergedCell {
            cell,
            applied,
            created,
            decay,
        })
    }
}
