//! Spatial bucketing.
//!
//! Interleaved binary partition of the longitude range `[-180, 180]` and the
//! latitude range `[-90, 90]`, packed five bits per base-32 symbol. At the
//! default precision of 7 a bucket is roughly 150 m on a side.

use std::fmt;

use serde::{Deserialize, Serialize};

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

pub const DEFAULT_PRECISION: usize = 7;

/// Beyond 12 symbols the partition is finer than `f64` coordinates resolve.
pub const MAX_PRECISION: usize = 12;

/// Fixed-length geohash identifier of one map cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    /// Wraps an already-encoded bucket string, e.g. one read back from a
    /// storage key. Returns `None` when the string contains characters
    /// outside the geohash alphabet or is empty.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_PRECISION {
            return None;
        }
        raw.bytes()
            .all(|b| BASE32.contains(&b))
            .then(|| Self(raw.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Map a coordinate to its bucket at `precision` symbols.
///
/// Pure and deterministic. A point exactly on a bisection midpoint goes to the
/// upper half on both axes. Coordinates must already be finite and in range;
/// filtering them is the caller's job (see [`crate::probe::normalize_batch`]).
#[must_use]
pub fn bucket(lat: f64, lon: f64, precision: usize) -> BucketId {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut out = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0u8;
    let mut index = 0usize;

    while out.len() < precision {
        let (value, range) = if even {
            (lon, &mut lon_range)
        } else {
            (lat, &mut lat_range)
        };
        let mid = (range.0 + range.1) / 2.0;
        index <<= 1;
        if value >= mid {
            index |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;

        bits += 1;
        if bits == 5 {
            out.push(char::from(BASE32[index]));
            bits = 0;
            index = 0;
        }
    }

    BucketId(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_matches_known_geohash() {
        // Reference value from the canonical geohash test vectors.
        assert_eq!(bucket(57.64911, 10.40744, 11).as_str(), "u4pruydqqvj");
    }

    #[test]
    fn bucket_has_requested_length() {
        for precision in 1..=MAX_PRECISION {
            let id = bucket(37.7749, -122.4194, precision);
            assert_eq!(id.as_str().len(), precision);
        }
    }

    #[test]
    fn bucket_is_deterministic() {
        let a = bucket(-33.8688, 151.2093, DEFAULT_PRECISION);
        let b = bucket(-33.8688, 151.2093, DEFAULT_PRECISION);
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_prefix_is_stable_across_precisions() {
        let coarse = bucket(51.5074, -0.1278, 5);
        let fine = bucket(51.5074, -0.1278, 9);
        assert!(fine.as_str().starts_with(coarse.as_str()));
    }

    #[test]
    fn midpoint_goes_to_upper_half() {
        // (0, 0) sits on the first bisection of both axes.
        assert_eq!(bucket(0.0, 0.0, 1).as_str(), "s");
        assert_eq!(bucket(-0.000_001, -0.000_001, 1).as_str(), "7");
    }

    #[test]
    fn extreme_corners_encode() {
        assert_eq!(bucket(-90.0, -180.0, 3).as_str(), "000");
        assert_eq!(bucket(90.0, 180.0, 3).as_str(), "zzz");
    }

    #[test]
    fn nearby_points_share_a_bucket() {
        let a = bucket(40.748_40, -73.985_60, DEFAULT_PRECISION);
        let b = bucket(40.748_45, -73.985_65, DEFAULT_PRECISION);
        assert_eq!(a, b);
    }

    #[test]
    fn parse_accepts_geohash_alphabet_only() {
        assert!(BucketId::parse("dr5ru7k").is_some());
        assert!(BucketId::parse("dr5rua").is_none(), "'a' is not in the alphabet");
        assert!(BucketId::parse("").is_none());
        assert!(BucketId::parse("0123456789bcd").is_none(), "too long");
    }
}
