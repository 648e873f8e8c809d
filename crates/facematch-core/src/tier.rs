//! Confidence tiers derived from descriptor distance.
//!
//! The band boundaries are empirical and tied to the embedding model; they
//! are configuration, not constants of the algorithm.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_EXCELLENT_BELOW: f32 = 0.3;
pub const DEFAULT_GOOD_BELOW: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BandsError {
    #[error("{name} must be a finite, non-negative distance, got {value}")]
    Invalid { name: &'static str, value: f32 },
    #[error("excellent_below ({excellent_below}) must not exceed good_below ({good_below})")]
    Inverted {
        excellent_below: f32,
        good_below: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Excellent,
    Good,
    Weak,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 3] = [Self::Excellent, Self::Good, Self::Weak];

    /// Human-readable label shown next to a match.
    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent Match",
            Self::Good => "Good Match",
            Self::Weak => "No Strong Match",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Distance bands: `[0, excellent_below)` Excellent, `[excellent_below, good_below)` Good,
/// anything further Weak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBands {
    excellent_below: f32,
    good_below: f32,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self {
            excellent_below: DEFAULT_EXCELLENT_BELOW,
            good_below: DEFAULT_GOOD_BELOW,
        }
    }
}

impl ConfidenceBands {
    pub fn new(excellent_below: f32, good_below: f32) -> Result<Self, BandsError> {
        for (name, value) in [("excellent_below", excellent_below), ("good_below", good_below)] {
            if !value.is_finite() || value < 0.0 {
                return Err(BandsError::Invalid { name, value });
            }
        }
        if excellent_below > good_below {
            return Err(BandsError::Inverted {
                excellent_below,
                good_below,
            });
        }
        Ok(Self {
            excellent_below,
            good_below,
        })
    }

    pub fn excellent_below(&self) -> f32 {
        self.excellent_below
    }

    pub fn good_below(&self) -> f32 {
        self.good_below
    }

    pub fn classify(&self, distance: f32) -> ConfidenceTier {
        if distance < self.excellent_below {
            ConfidenceTier::Excellent
        } else if distance < self.good_below {
            ConfidenceTier::Good
        } else {
            ConfidenceTier::Weak
        }
    }
}

/// Per-tier tally, e.g. for a dashboard distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub excellent: usize,
    pub good: usize,
    pub weak: usize,
}

impl TierCounts {
    pub fn record(&mut self, tier: ConfidenceTier) {
        match tier {
            ConfidenceTier::Excellent => self.excellent += 1,
            ConfidenceTier::Good => self.good += 1,
            ConfidenceTier::Weak => self.weak += 1,
        }
    }

    pub fn get(&self, tier: ConfidenceTier) -> usize {
        match tier {
            ConfidenceTier::Excellent => self.excellent,
            ConfidenceTier::Good => self.good,
            ConfidenceTier::Weak => self.weak,
        }
    }

    pub fn total(&self) -> usize {
        self.excellent + self.good + self.weak
    }

    /// Share of Excellent matches in percent, `None` when nothing was tallied.
    pub fn excellent_rate(&self) -> Option<f32> {
        let total = self.total();
        (total > 0).then(|| self.excellent as f32 / total as f32 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let bands = ConfidenceBands::default();
        assert_eq!(bands.classify(0.0), ConfidenceTier::Excellent);
        assert_eq!(bands.classify(0.29), ConfidenceTier::Excellent);
        assert_eq!(bands.classify(0.3), ConfidenceTier::Good);
        assert_eq!(bands.classify(0.59), ConfidenceTier::Good);
        assert_eq!(bands.classify(0.6), ConfidenceTier::Weak);
        assert_eq!(bands.classify(0.69), ConfidenceTier::Weak);
    }

    #[test]
    fn test_custom_bands() {
        let bands = ConfidenceBands::new(0.4, 0.5).unwrap();
        assert_eq!(bands.classify(0.35), ConfidenceTier::Excellent);
        assert_eq!(bands.classify(0.45), ConfidenceTier::Good);
        assert_eq!(bands.classify(0.5), ConfidenceTier::Weak);
    }

    #[test]
    fn test_bands_reject_inverted() {
        assert!(matches!(
            ConfidenceBands::new(0.6, 0.3),
            Err(BandsError::Inverted { .. })
        ));
    }

    #[test]
    fn test_bands_reject_non_finite() {
        assert!(matches!(
            ConfidenceBands::new(f32::NAN, 0.6),
            Err(BandsError::Invalid { name: "excellent_below", .. })
        ));
        assert!(matches!(
            ConfidenceBands::new(0.3, -1.0),
            Err(BandsError::Invalid { name: "good_below", .. })
        ));
    }

    #[test]
    fn test_tier_labels() {
        assert_eq!(ConfidenceTier::Excellent.to_string(), "Excellent Match");
        assert_eq!(ConfidenceTier::Weak.label(), "No Strong Match");
    }

    #[test]
    fn test_tier_counts() {
        let mut counts = TierCounts::default();
        assert_eq!(counts.excellent_rate(), None);

        counts.record(ConfidenceTier::Excellent);
        counts.record(ConfidenceTier::Good);
        counts.record(ConfidenceTier::Good);
        counts.record(ConfidenceTier::Weak);

        assert_eq!(counts.total(), 4);
        assert_eq!(counts.get(ConfidenceTier::Good), 2);
        assert_eq!(counts.excellent_rate(), Some(25.0));
    }
}
