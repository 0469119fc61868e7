//! Recency weighting for retrieved chunks.

use chrono::{DateTime, Duration, Utc};
use storyloom_config::RecencyConfig;

/// Multiplier that favors newer content.
///
/// Full weight up to `full_weight_hours`, then a straight line down to
/// `floor_weight` at `floor_days`, held flat afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyDecay {
    full_weight_hours: f64,
    floor_hours: f64,
    floor_weight: f32,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self::from(&RecencyConfig::default())
    }
}

impl From<&RecencyConfig> for RecencyDecay {
    fn from(config: &RecencyConfig) -> Self {
        Self {
            full_weight_hours: config.full_weight_hours,
            floor_hours: config.floor_days * 24.0,
            floor_weight: config.floor_weight,
        }
    }
}

impl RecencyDecay {
    /// Weight for content of the given age. Negative ages count as fresh.
    pub fn weight(&self, age: Duration) -> f32 {
        let hours = age.num_milliseconds() as f64 / 3_600_000.0;
        if hours <= self.full_weight_hours {
            return 1.0;
        }
        if hours >= self.floor_hours {
            return self.floor_weight;
        }

        let progress = (hours - self.full_weight_hours) / (self.floor_hours - self.full_weight_hours);
        let weight = 1.0 - progress * (1.0 - self.floor_weight as f64);
        (weight as f32).max(self.floor_weight)
    }

    /// Similarity scaled by the weight of something created at `created_at`.
    pub fn weigh(&self, similarity: f32, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        similarity * self.weight(now - created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_content_has_full_weight() {
        let decay = RecencyDecay::default();
        assert_eq!(decay.weight(Duration::zero()), 1.0);
        assert_eq!(decay.weight(Duration::hours(24)), 1.0);
        assert_eq!(decay.weight(Duration::hours(-3)), 1.0);
    }

    #[test]
    fn weight_decays_linearly_to_floor() {
        let decay = RecencyDecay::default();
        let midpoint = 24.0 + (30.0 * 24.0 - 24.0) / 2.0;
        let w = decay.weight(Duration::minutes((midpoint * 60.0) as i64));
        assert!((w - 0.75).abs() < 1e-3, "got {w}");

        assert_eq!(decay.weight(Duration::days(30)), 0.5);
        assert_eq!(decay.weight(Duration::days(60)), 0.5);
    }

    #[test]
    fn weight_is_monotonic() {
        let decay = RecencyDecay::default();
        let mut last = 1.0;
        for day in 0..40 {
            let w = decay.weight(Duration::days(day));
            assert!(w <= last);
            last = w;
        }
    }

    #[test]
    fn threshold_examples() {
        let decay = RecencyDecay::default();
        let now = Utc::now();
        assert!(decay.weigh(0.35, now, now) > 0.3);
        assert!(decay.weigh(0.35, now - Duration::days(60), now) < 0.3);
    }

    #[test]
    fn custom_policy() {
        let decay = RecencyDecay::from(&RecencyConfig {
            full_weight_hours: 1.0,
            floor_days: 1.0,
            floor_weight: 0.2,
        });
        assert_eq!(decay.weight(Duration::minutes(30)), 1.0);
        assert_eq!(decay.weight(Duration::hours(48)), 0.2);
    }
}
