//! The agent's emotional state: a pure function of treasury runway that
//! modulates cycle cadence, LLM tier selection, and the ROI bar a decision
//! must clear.

use serde::{Deserialize, Serialize};

/// Ordered from least to most stable: `Desperate < Cautious < Stable <
/// Confident`. The ordering backs the monotonicity invariants on
/// `Scheduler::next_interval` and the required-multiplier table below —
/// both must move in lock-step with this enum's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Desperate,
    Cautious,
    Stable,
    Confident,
}

impl Emotion {
    /// `required_multiplier(emotion)` from §4.6 step 3: the action gas
    /// gate's 24h-net-gain-over-gas-cost bar.
    #[must_use]
    pub fn required_multiplier(self) -> f64 {
        match self {
            Emotion::Desperate => 3.0,
            Emotion::Cautious => 2.0,
            Emotion::Stable | Emotion::Confident => 1.5,
        }
    }

    /// Minimum prediction confidence a candidate pool must clear in the
    /// decider's filter step (§4.6 step 1).
    #[must_use]
    pub fn min_prediction_confidence(self) -> f64 {
        match self {
            Emotion::Desperate => 0.9,
            Emotion::Cautious => 0.8,
            Emotion::Stable => 0.7,
            Emotion::Confident => 0.6,
        }
    }

    /// `Scheduler::next_interval` — monotonically non-increasing in
    /// stability (more desperate implies a longer or equal wait).
    #[must_use]
    pub fn default_interval(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            Emotion::Desperate => Duration::from_secs(4 * 3600),
            Emotion::Cautious => Duration::from_secs(2 * 3600),
            Emotion::Stable => Duration::from_secs(3600),
            Emotion::Confident => Duration::from_secs(30 * 60),
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Emotion::Desperate => "DESPERATE",
            Emotion::Cautious => "CAUTIOUS",
            Emotion::Stable => "STABLE",
            Emotion::Confident => "CONFIDENT",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_spec_monotonicity() {
        assert!(Emotion::Desperate < Emotion::Cautious);
        assert!(Emotion::Cautious < Emotion::Stable);
        assert!(Emotion::Stable < Emotion::Confident);
    }

    #[test]
    fn interval_is_non_increasing_in_stability() {
        let ordered = [
            Emotion::Desperate,
            Emotion::Cautious,
            Emotion::Stable,
            Emotion::Confident,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].default_interval() >= pair[1].default_interval());
        }
    }

    #[test]
    fn required_multiplier_is_non_increasing_in_stability() {
        let ordered = [
            Emotion::Desperate,
            Emotion::Cautious,
            Emotion::Stable,
            Emotion::Confident,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].required_multiplier() >= pair[1].required_multiplier());
        }
    }
}
