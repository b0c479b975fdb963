use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Graded overspeed level reported for a reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// At or within tolerance of the limit.
    #[default]
    Normal,
    /// At least the warning share over the limit.
    Warning,
    /// At least the high share over the limit.
    High,
    /// At least the critical share over the limit.
    Critical,
    /// Any non-normal level held longer than the sustained duration.
    Sustained,
}

impl AlertLevel {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Sustained => "sustained",
        }
    }

    /// Whether the level should raise an incident.
    #[must_use]
    pub const fn is_alerting(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tunable overspeed thresholds, expressed as a share of the limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedThresholds {
    /// Share over the limit that raises a warning.
    pub warn_pct: f64,
    /// Share over the limit that raises a high alert.
    pub high_pct: f64,
    /// Share over the limit that raises a critical alert.
    pub critical_pct: f64,
    /// Seconds of continuous overspeed before it counts as sustained.
    pub sustained_duration_s: u64,
}

impl Default for SpeedThresholds {
    fn default() -> Self {
        Self {
            warn_pct: 0.10,
            high_pct: 0.30,
            critical_pct: 0.50,
            sustained_duration_s: 10,
        }
    }
}

impl SpeedThresholds {
    /// Maps an overspeed share to its base level.
    #[must_use]
    pub fn level_for(&self, over_pct: f64) -> AlertLevel {
        if over_pct >= self.critical_pct {
            AlertLevel::Critical
        } else if over_pct >= self.high_pct {
            AlertLevel::High
        } else if over_pct >= self.warn_pct {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }

    fn sustained_ms(&self) -> i64 {
        i64::try_from(self.sustained_duration_s.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// A single speed sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReading {
    /// Measured speed.
    pub current_speed_kmh: f64,
    /// Posted limit; the ingestion boundary guarantees it is positive.
    pub speed_limit_kmh: f64,
    /// Sample time; `None` means "now".
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SpeedReading {
    /// Reading stamped at processing time.
    #[must_use]
    pub const fn new(current_speed_kmh: f64, speed_limit_kmh: f64) -> Self {
        Self {
            current_speed_kmh,
            speed_limit_kmh,
            timestamp: None,
        }
    }

    /// Sets an explicit sample time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the sample time from unix milliseconds; out-of-range values are ignored.
    #[must_use]
    pub fn at_millis(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Utc.timestamp_millis_opt(timestamp_ms).single();
        self
    }
}

/// Outcome of processing one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedResult {
    /// Measured speed.
    pub current_speed_kmh: f64,
    /// Posted limit.
    pub speed_limit_kmh: f64,
    /// Kilometres per hour over the limit, never negative.
    pub over_by_kmh: f64,
    /// Share over the limit, rounded to three decimals.
    pub over_pct: f64,
    /// Reported level.
    pub alert_level: AlertLevel,
    /// Whether the overspeed has lasted at least the sustained duration.
    pub sustained: bool,
    /// Sample time used for the computation.
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a tracker's internal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SpeedStatus {
    /// Whether the vehicle is currently over the limit.
    pub is_over_speed: bool,
    /// Start of the current overspeed episode.
    pub over_start_time: Option<DateTime<Utc>>,
    /// Most recent result.
    pub last_status: Option<SpeedResult>,
}

/// Per-vehicle overspeed tracker.
///
/// Not synchronized; callers serialize access per vehicle.
#[derive(Debug, Clone, Default)]
pub struct SpeedTracker {
    thresholds: SpeedThresholds,
    is_over_speed: bool,
    over_start_time: Option<DateTime<Utc>>,
    last_status: Option<SpeedResult>,
}

impl SpeedTracker {
    /// Creates a tracker with the given thresholds.
    #[must_use]
    pub const fn new(thresholds: SpeedThresholds) -> Self {
        Self {
            thresholds,
            is_over_speed: false,
            over_start_time: None,
            last_status: None,
        }
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn thresholds(&self) -> &SpeedThresholds {
        &self.thresholds
    }

    /// Processes a reading, updating the overspeed episode.
    pub fn process(&mut self, reading: &SpeedReading) -> SpeedResult {
        let now = reading.timestamp.unwrap_or_else(Utc::now);
        let speed = reading.current_speed_kmh;
        let limit = reading.speed_limit_kmh;

        let over_by_kmh = (speed - limit).max(0.0);
        let over_pct = if limit > 0.0 { over_by_kmh / limit } else { 0.0 };
        let base_level = self.thresholds.level_for(over_pct);

        let sustained = if over_by_kmh > 0.0 {
            let start = *self.over_start_time.get_or_insert(now);
            self.is_over_speed = true;
            (now - start).num_milliseconds() >= self.thresholds.sustained_ms()
        } else {
            self.is_over_speed = false;
            self.over_start_time = None;
            false
        };

        let alert_level = if base_level.is_alerting() && sustained {
            AlertLevel::Sustained
        } else {
            base_level
        };

        if alert_level.is_alerting() {
            tracing::warn!(
                speed_kmh = speed,
                limit_kmh = limit,
                over_by_kmh,
                level = alert_level.label(),
                "speed alert"
            );
        }

        let result = SpeedResult {
            current_speed_kmh: speed,
            speed_limit_kmh: limit,
            over_by_kmh,
            over_pct: (over_pct * 1000.0).round() / 1000.0,
            alert_level,
            sustained,
            timestamp: now,
        };
        self.last_status = Some(result.clone());
        result
    }

    /// Clears the episode and the last result.
    pub fn reset(&mut self) {
        self.is_over_speed = false;
        self.over_start_time = None;
        self.last_status = None;
        tracing::info!("speed tracker state reset");
    }

    /// Current state snapshot.
    #[must_use]
    pub fn status(&self) -> SpeedStatus {
        SpeedStatus {
            is_over_speed: self.is_over_speed,
            over_start_time: self.over_start_time,
            last_status: self.last_status.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap()
    }

    fn reading(speed: f64, limit: f64, offset_s: i64) -> SpeedReading {
        SpeedReading::new(speed, limit).at(t0() + Duration::seconds(offset_s))
    }

    #[test]
    fn high_overspeed_becomes_sustained_after_ten_seconds() {
        let mut tracker = SpeedTracker::default();

        let first = tracker.process(&reading(88.0, 60.0, 0));
        assert!((first.over_by_kmh - 28.0).abs() < f64::EPSILON);
        assert!((first.over_pct - 0.467).abs() < 1e-9);
        assert_eq!(first.alert_level, AlertLevel::High);
        assert!(!first.sustained);

        let mid = tracker.process(&reading(88.0, 60.0, 9));
        assert_eq!(mid.alert_level, AlertLevel::High);
        assert!(!mid.sustained);

        let later = tracker.process(&reading(88.0, 60.0, 10));
        assert_eq!(later.alert_level, AlertLevel::Sustained);
        assert!(later.sustained);
        assert_eq!(tracker.status().over_start_time, Some(t0()));
    }

    #[test]
    fn returning_to_limit_clears_episode() {
        let mut tracker = SpeedTracker::default();
        tracker.process(&reading(100.0, 60.0, 0));
        assert!(tracker.process(&reading(100.0, 60.0, 15)).sustained);

        let normal = tracker.process(&reading(60.0, 60.0, 16));
        assert!(!normal.sustained);
        assert_eq!(normal.alert_level, AlertLevel::Normal);
        let status = tracker.status();
        assert!(!status.is_over_speed);
        assert_eq!(status.over_start_time, None);

        // A new episode starts its own clock.
        let again = tracker.process(&reading(100.0, 60.0, 17));
        assert_eq!(again.alert_level, AlertLevel::Critical);
        assert!(!again.sustained);
    }

    #[test]
    fn sustained_uses_freshest_base_level() {
        let mut tracker = SpeedTracker::default();
        tracker.process(&reading(95.0, 60.0, 0));
        // Still over the limit but under the warning share at the check.
        let slight = tracker.process(&reading(63.0, 60.0, 12));
        assert!(slight.sustained);
        assert_eq!(slight.alert_level, AlertLevel::Normal);
    }

    #[test]
    fn thresholds_are_configurable() {
        let mut tracker = SpeedTracker::new(SpeedThresholds {
            warn_pct: 0.05,
            high_pct: 0.20,
            critical_pct: 0.40,
            sustained_duration_s: 2,
        });
        assert_eq!(tracker.process(&reading(64.0, 60.0, 0)).alert_level, AlertLevel::Warning);
        assert_eq!(tracker.process(&reading(73.0, 60.0, 1)).alert_level, AlertLevel::High);
        assert_eq!(
            tracker.process(&reading(90.0, 60.0, 2)).alert_level,
            AlertLevel::Sustained
        );
    }

    #[test]
    fn zero_limit_does_not_divide() {
        let mut tracker = SpeedTracker::default();
        let result = tracker.process(&reading(30.0, 0.0, 0));
        assert!((result.over_pct).abs() < f64::EPSILON);
        assert_eq!(result.alert_level, AlertLevel::Normal);
    }

    #[test]
    fn earlier_timestamp_is_not_sustained() {
        let mut tracker = SpeedTracker::default();
        tracker.process(&reading(90.0, 60.0, 30));
        let stale = tracker.process(&reading(90.0, 60.0, 0));
        assert!(!stale.sustained);
    }

    #[test]
    fn reset_matches_fresh_tracker() {
        let mut used = SpeedTracker::default();
        used.process(&reading(120.0, 60.0, 0));
        used.process(&reading(120.0, 60.0, 20));
        used.reset();
        assert_eq!(used.status(), SpeedStatus::default());

        let mut fresh = SpeedTracker::default();
        let below = reading(55.0, 60.0, 40);
        assert_eq!(used.process(&below), fresh.process(&below));

        let over = reading(70.0, 60.0, 41);
        assert_eq!(used.process(&over), fresh.process(&over));
    }

    #[test]
    fn millisecond_timestamps() {
        let reading = SpeedReading::new(70.0, 60.0).at_millis(1_700_000_000_000);
        assert_eq!(reading.timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
    }
}
