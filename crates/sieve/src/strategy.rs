//! Choosing between real-time and batched evaluation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a dataset should be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Evaluate on every edit.
    RealTime,
    /// Evaluate in batches, on demand.
    Batch,
}

/// Thresholds above which batched evaluation is recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub max_realtime_rows: usize,
    pub max_realtime_rules: usize,
    #[serde(with = "millis")]
    pub max_realtime_latency: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_realtime_rows: 10_000,
            max_realtime_rules: 50,
            max_realtime_latency: Duration::from_millis(100),
        }
    }
}

/// Recommends an [`EvaluationMode`] from dataset size, rule count and the
/// duration of the last full evaluation.
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Real-time only when every known measure is under its threshold.
    pub fn recommend(
        &self,
        row_count: usize,
        rule_count: usize,
        last_duration: Option<Duration>,
    ) -> EvaluationMode {
        let fast_enough = last_duration.is_none_or(|d| d < self.config.max_realtime_latency);
        if row_count < self.config.max_realtime_rows
            && rule_count < self.config.max_realtime_rules
            && fast_enough
        {
            EvaluationMode::RealTime
        } else {
            EvaluationMode::Batch
        }
    }
}

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommend_thresholds() {
        let selector = StrategySelector::default();
        assert_eq!(selector.recommend(100, 5, None), EvaluationMode::RealTime);
        assert_eq!(selector.recommend(10_000, 5, None), EvaluationMode::Batch);
        assert_eq!(selector.recommend(100, 50, None), EvaluationMode::Batch);
        assert_eq!(
            selector.recommend(100, 5, Some(Duration::from_millis(99))),
            EvaluationMode::RealTime
        );
        assert_eq!(
            selector.recommend(100, 5, Some(Duration::from_millis(100))),
            EvaluationMode::Batch
        );
    }

    #[test]
    fn test_config_from_json() {
        let config: StrategyConfig =
            serde_json::from_str(r#"{"max_realtime_rows": 500, "max_realtime_latency": 20}"#).unwrap();
        assert_eq!(config.max_realtime_rows, 500);
        assert_eq!(config.max_realtime_rules, 50);
        assert_eq!(config.max_realtime_latency, Duration::from_millis(20));
    }
}
