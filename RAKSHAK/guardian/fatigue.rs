use std::fmt;

use serde::{Deserialize, Serialize};

/// Driver attention signals captured for a single reading window.
///
/// Range checks are performed by the ingestion boundary; the classifier
/// trusts these values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverSignals {
    /// Percentage of the window with eyes closed (PERCLOS-style), 0-100.
    pub eye_closure_pct: f64,
    /// Average blink duration in milliseconds.
    pub blink_duration_ms: f64,
    /// Yawns per minute.
    pub yawning_rate_per_min: f64,
    /// Normalized steering variability, 0-1.
    pub steering_variability: f64,
    /// Lane departures counted in the window.
    pub lane_departures: u32,
}

impl Default for DriverSignals {
    fn default() -> Self {
        Self {
            eye_closure_pct: 0.0,
            blink_duration_ms: 150.0,
            yawning_rate_per_min: 0.0,
            steering_variability: 0.0,
            lane_departures: 0,
        }
    }
}

/// Driver condition derived from a single reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FatigueState {
    /// Attentive driver.
    #[default]
    Normal,
    /// Fatigue indicators present.
    Fatigue,
    /// Micro-sleep detected.
    Sleep,
}

impl FatigueState {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Fatigue => "fatigue",
            Self::Sleep => "sleep",
        }
    }
}

impl fmt::Display for FatigueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classification output, echoing the metrics it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FatigueResult {
    /// Additive fatigue score.
    pub fatigue_score: u32,
    /// Selected state.
    pub state: FatigueState,
    /// Input signals.
    pub metrics: DriverSignals,
}

/// Stateless additive fatigue scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatigueClassifier;

impl FatigueClassifier {
    /// Eye closure above which the driver is considered asleep outright.
    pub const EYE_CLOSURE_SLEEP_PCT: f64 = 80.0;
    /// Eye closure above which partial closure is scored.
    pub const EYE_CLOSURE_DROWSY_PCT: f64 = 40.0;
    /// Blink duration above which blinks count as slow.
    pub const SLOW_BLINK_MS: f64 = 400.0;
    /// Yawning rate above which yawning is scored.
    pub const YAWNS_PER_MIN: f64 = 4.0;
    /// Steering variability above which steering is scored.
    pub const STEERING_VARIABILITY: f64 = 0.2;
    /// Minimum score for the sleep state.
    pub const SLEEP_SCORE: u32 = 60;
    /// Minimum score for the fatigue state.
    pub const FATIGUE_SCORE: u32 = 30;

    /// Creates the classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Scores the signals and selects a state.
    ///
    /// Eye closure above [`Self::EYE_CLOSURE_SLEEP_PCT`] selects
    /// [`FatigueState::Sleep`] regardless of the total score.
    #[must_use]
    pub fn classify(&self, signals: &DriverSignals) -> FatigueResult {
        let score = Self::score(signals);
        let state = if signals.eye_closure_pct > Self::EYE_CLOSURE_SLEEP_PCT
            || score >= Self::SLEEP_SCORE
        {
            FatigueState::Sleep
        } else if score >= Self::FATIGUE_SCORE {
            FatigueState::Fatigue
        } else {
            FatigueState::Normal
        };

        FatigueResult {
            fatigue_score: score,
            state,
            metrics: *signals,
        }
    }

    fn score(signals: &DriverSignals) -> u32 {
        let eyes = if signals.eye_closure_pct > Self::EYE_CLOSURE_SLEEP_PCT {
            50
        } else if signals.eye_closure_pct > Self::EYE_CLOSURE_DROWSY_PCT {
            30
        } else {
            0
        };
        let blink = if signals.blink_duration_ms > Self::SLOW_BLINK_MS { 20 } else { 0 };
        let yawn = if signals.yawning_rate_per_min > Self::YAWNS_PER_MIN { 20 } else { 0 };
        let steering = if signals.steering_variability > Self::STEERING_VARIABILITY {
            10
        } else {
            0
        };
        let lane = if signals.lane_departures > 0 { 20 } else { 0 };

        eyes + blink + yawn + steering + lane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> DriverSignals {
        DriverSignals {
            eye_closure_pct: 0.0,
            blink_duration_ms: 1.0,
            yawning_rate_per_min: 0.0,
            steering_variability: 0.0,
            lane_departures: 0,
        }
    }

    #[test]
    fn signals_at_thresholds_stay_normal() {
        let classifier = FatigueClassifier::new();
        for eye in [0.0, 20.0, 40.0] {
            for blink in [1.0, 250.0, 400.0] {
                for yawn in [0.0, 4.0] {
                    for steering in [0.0, 0.2] {
                        let signals = DriverSignals {
                            eye_closure_pct: eye,
                            blink_duration_ms: blink,
                            yawning_rate_per_min: yawn,
                            steering_variability: steering,
                            lane_departures: 0,
                        };
                        let result = classifier.classify(&signals);
                        assert_eq!(result.state, FatigueState::Normal, "{signals:?}");
                        assert_eq!(result.fatigue_score, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn heavy_eye_closure_overrides_score() {
        let result = FatigueClassifier::new().classify(&DriverSignals {
            eye_closure_pct: 85.0,
            ..quiet()
        });
        assert_eq!(result.fatigue_score, 50);
        assert_eq!(result.state, FatigueState::Sleep);
    }

    #[test]
    fn score_is_the_sum_of_independent_contributions() {
        // (contribution, signals with only that condition raised)
        let conditions: [(u32, fn(&mut DriverSignals)); 5] = [
            (30, |s| s.eye_closure_pct = 55.0),
            (20, |s| s.blink_duration_ms = 450.0),
            (20, |s| s.yawning_rate_per_min = 6.0),
            (10, |s| s.steering_variability = 0.35),
            (20, |s| s.lane_departures = 2),
        ];
        let classifier = FatigueClassifier::new();
        for mask in 0u32..(1 << conditions.len()) {
            let mut forward = quiet();
            let mut backward = quiet();
            let mut expected = 0;
            for (idx, (weight, raise)) in conditions.iter().enumerate() {
                if mask & (1 << idx) != 0 {
                    raise(&mut forward);
                    expected += weight;
                }
            }
            for (idx, (_, raise)) in conditions.iter().enumerate().rev() {
                if mask & (1 << idx) != 0 {
                    raise(&mut backward);
                }
            }
            assert_eq!(classifier.classify(&forward).fatigue_score, expected);
            assert_eq!(classifier.classify(&backward).fatigue_score, expected);
        }
    }

    #[test]
    fn graded_states() {
        let classifier = FatigueClassifier::new();
        let fatigue = classifier.classify(&DriverSignals {
            eye_closure_pct: 45.0,
            ..quiet()
        });
        assert_eq!(fatigue.fatigue_score, 30);
        assert_eq!(fatigue.state, FatigueState::Fatigue);

        let just_below = classifier.classify(&DriverSignals {
            blink_duration_ms: 500.0,
            ..quiet()
        });
        assert_eq!(just_below.state, FatigueState::Normal);

        let sleep_by_score = classifier.classify(&DriverSignals {
            eye_closure_pct: 50.0,
            blink_duration_ms: 450.0,
            lane_departures: 1,
            ..quiet()
        });
        assert_eq!(sleep_by_score.fatigue_score, 70);
        assert_eq!(sleep_by_score.state, FatigueState::Sleep);
    }

    #[test]
    fn result_echoes_metrics() {
        let signals = DriverSignals {
            yawning_rate_per_min: 5.0,
            lane_departures: 3,
            ..quiet()
        };
        let result = FatigueClassifier::new().classify(&signals);
        assert_eq!(result.metrics, signals);
        assert_eq!(result.fatigue_score, 40);
        assert_eq!(result.state.to_string(), "fatigue");
    }
}
