//! Reliability tiers used to color the map.
//!
//! Always derived from merged, decayed totals; never persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    NoData,
    VeryReliable,
    UsuallyWorks,
    Spotty,
    RarelyWorks,
    DeadZone,
}

impl Tier {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Tier::NoData => "No data",
            Tier::VeryReliable => "Very reliable",
            Tier::UsuallyWorks => "Usually works",
            Tier::Spotty => "Spotty",
            Tier::RarelyWorks => "Rarely works",
            Tier::DeadZone => "Dead zone",
        }
    }

    /// Hex fill color for the map layer.
    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Tier::NoData => "#9ca3af",
            Tier::VeryReliable => "#16a34a",
            Tier::UsuallyWorks => "#a3e635",
            Tier::Spotty => "#facc15",
            Tier::RarelyWorks => "#f97316",
            Tier::DeadZone => "#dc2626",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `received / (received + lost)`, or `None` when there is no evidence.
/// Negative or non-finite inputs count as zero.
#[must_use]
pub fn success_rate(received: f64, lost: f64) -> Option<f64> {
    let received = if received.is_finite() { received.max(0.0) } else { 0.0 };
    let lost = if lost.is_finite() { lost.max(0.0) } else { 0.0 };
    let total = received + lost;
    (total > 0.0).then(|| received / total)
}

/// Bands are lower-inclusive, upper-exclusive; the top band includes 1.0.
#[must_use]
pub fn classify(received: f64, lost: f64) -> Tier {
    match success_rate(received, lost) {
        None => Tier::NoData,
        Some(rate) if rate >= 0.8 => Tier::VeryReliable,
        Some(rate) if rate >= 0.5 => Tier::UsuallyWorks,
        Some(rate) if rate >= 0.3 => Tier::Spotty,
        Some(rate) if rate >= 0.1 => Tier::RarelyWorks,
        Some(_) => Tier::DeadZone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_evidence_is_no_data() {
        assert_eq!(classify(0.0, 0.0), Tier::NoData);
        assert_eq!(success_rate(0.0, 0.0), None);
    }

    #[test]
    fn boundaries_are_lower_inclusive() {
        assert_eq!(classify(8.0, 2.0), Tier::VeryReliable);
        assert_eq!(classify(79.0, 21.0), Tier::UsuallyWorks);
        assert_eq!(classify(5.0, 5.0), Tier::UsuallyWorks);
        assert_eq!(classify(3.0, 7.0), Tier::Spotty);
        assert_eq!(classify(1.0, 9.0), Tier::RarelyWorks);
        assert_eq!(classify(9.0, 91.0), Tier::DeadZone);
    }

    #[test]
    fn extremes() {
        assert_eq!(classify(4.0, 0.0), Tier::VeryReliable);
        assert_eq!(classify(0.0, 4.0), Tier::DeadZone);
    }

    #[test]
    fn fractional_decayed_totals_classify_by_ratio() {
        assert_eq!(classify(0.85 * 8.0, 0.85 * 2.0 + 0.5), Tier::UsuallyWorks);
        assert_eq!(classify(0.2, 0.05), Tier::VeryReliable);
    }

    #[test]
    fn negative_inputs_are_clamped() {
        assert_eq!(classify(-1.0, 0.0), Tier::NoData);
        assert_eq!(classify(3.0, -2.0), Tier::VeryReliable);
    }

    #[test]
    fn tier_serializes_snake_case() {
        let json = serde_json::to_string(&Tier::DeadZone).expect("serialize");
        assert_eq!(json, "\"dead_zone\"");
    }
}
