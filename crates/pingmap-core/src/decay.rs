//! Age-based weighting of persisted evidence.

use chrono::{DateTime, Utc};

/// Weight applied to a cell's existing `received`/`lost` before fresh
/// evidence is added.
///
/// Age is counted in whole elapsed days since `last_update`. A `last_update`
/// in the future counts as age zero.
///
/// | Age (days) | Factor |
/// |------------|--------|
/// | 0..=7      | 1.0    |
/// | 8..=14     | 0.85   |
/// | 15..=30    | 0.7    |
/// | 31..=90    | 0.5    |
/// | > 90       | 0.2    |
#[must_use]
pub fn decay_factor(last_update: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now - last_update).num_days().max(0);
    match age_days {
        0..=7 => 1.0,
        8..=14 => 0.85,
        15..=30 => 0.7,
        31..=90 => 0.5,
        _ => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn same_instant_is_full_weight() {
        assert!((decay_factor(t0(), t0()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tier_edges() {
        let cases = [
            (Duration::days(7), 1.0),
            (Duration::days(7) + Duration::hours(23), 1.0),
            (Duration::days(8), 0.85),
            (Duration::days(14), 0.85),
            (Duration::days(15), 0.7),
            (Duration::days(30), 0.7),
            (Duration::days(31), 0.5),
            (Duration::days(90), 0.5),
            (Duration::days(91), 0.2),
            (Duration::days(4_000), 0.2),
        ];
        for (age, expected) in cases {
            let got = decay_factor(t0(), t0() + age);
            assert!(
                (got - expected).abs() < f64::EPSILON,
                "age {age:?}: expected {expected}, got {got}"
            );
        }
    }

    #[test]
    fn future_last_update_is_not_decayed() {
        assert!((decay_factor(t0() + Duration::days(3), t0()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn factor_never_increases_as_time_advances() {
        let mut previous = decay_factor(t0(), t0());
        for hours in (0..24 * 120).step_by(6) {
            let current = decay_factor(t0(), t0() + Duration::hours(hours));
            assert!(current <= previous, "increased at +{hours}h");
            assert!(current > 0.0 && current <= 1.0);
            previous = current;
        }
    }
}
