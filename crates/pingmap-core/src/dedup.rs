//! Deduplication keys for probes.
//!
//! A client-supplied id is authoritative and returned verbatim. Without one,
//! the key is a truncated SHA-256 over the rounded location, the raw
//! timestamp string and the source id. Truncation to 64 bits makes
//! collisions possible in principle; at realistic batch and seen-window sizes
//! they are rare enough to be treated as an accepted approximation rather
//! than a correctness guarantee.

use sha2::{Digest, Sha256};

use crate::probe::Probe;

/// Prefix for derived keys, so they can never equal a plain client id that
/// happens to look like a hex string.
const DERIVED_PREFIX: &str = "h:";

/// Stable dedup key for `probe`.
#[must_use]
pub fn dedup_key(probe: &Probe) -> String {
    if let Some(id) = &probe.id {
        return id.clone();
    }

    let input = format!(
        "{}\x00{}\x00{}\x00{}",
        round6(probe.latitude),
        round6(probe.longitude),
        probe.timestamp_raw,
        probe.source_id.as_deref().unwrap_or(""),
    );
    let hash = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(DERIVED_PREFIX.len() + 16);
    out.push_str(DERIVED_PREFIX);
    for byte in &hash[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Six-decimal rendering with negative zero folded into zero, so `-0.0000001`
/// and `0.0` hash identically.
fn round6(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6 + 0.0;
    format!("{rounded:.6}")
}
