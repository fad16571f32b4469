//! Runtime configuration
//!
//! Every tunable threshold of the analysers lives here so policy can change
//! without touching the algorithms. Values come from the environment (a
//! `.env` file is honoured) and fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::{InsightsError, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite://trainer-insights.db?mode=rwc";

/// ---------------------------------------------------------------------------
/// Record Policy
/// ---------------------------------------------------------------------------

/// Equality tolerances for record reconciliation, per observation origin.
/// Times closer than the tolerance are treated as the same performance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordPolicy {
  /// Tolerance for times derived from our own series extraction or workout scan
  pub derived_tolerance_s: f64,
  /// Tolerance for exact splits reported by an external provider
  pub reported_tolerance_s: f64,
}

impl Default for RecordPolicy {
  fn default() -> Self {
    Self {
      derived_tolerance_s: 0.1,
      reported_tolerance_s: 0.1,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Merge Policy
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
  /// Calendar days apart two workouts may be (0 = same day only)
  pub max_day_gap: i64,
  /// Relative distance difference allowed, e.g. 0.10 for ±10%
  pub distance_tolerance_pct: f64,
  /// Absolute duration difference allowed in seconds
  pub duration_tolerance_s: f64,
  pub distance_weight: f64,
  pub duration_weight: f64,
  /// Minimum similarity score for a merge
  pub min_confidence: f64,
  /// Scores within this margin of `min_confidence` need manual confirmation
  pub ambiguity_margin: f64,
}

impl Default for MergePolicy {
  fn default() -> Self {
    Self {
      max_day_gap: 0,
      distance_tolerance_pct: 0.10,
      duration_tolerance_s: 300.0,
      distance_weight: 0.6,
      duration_weight: 0.4,
      min_confidence: 0.6,
      ambiguity_margin: 0.05,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Load Policy
/// ---------------------------------------------------------------------------

/// What counts as training volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMetric {
  /// Kilometres
  Distance,
  /// Hours
  Duration,
}

impl FromStr for LoadMetric {
  type Err = String;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "distance" => Ok(Self::Distance),
      "duration" => Ok(Self::Duration),
      _ => Err(format!("Unknown load metric: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadPolicy {
  pub metric: LoadMetric,
  pub acute_days: i64,
  pub chronic_days: i64,
  /// ACWR above this is critical overload
  pub critical_above: f64,
  /// ACWR above this (up to critical) is caution
  pub caution_above: f64,
  /// ACWR below this is under-loading
  pub underload_below: f64,
}

impl Default for LoadPolicy {
  fn default() -> Self {
    Self {
      metric: LoadMetric::Distance,
      acute_days: 7,
      chronic_days: 28,
      critical_above: 1.5,
      caution_above: 1.3,
      underload_below: 0.8,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Block Thresholds
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockThresholds {
  /// RPE strictly above this marks a session as too hard
  pub too_hard_rpe: f64,
  /// Percent of sessions with pain (0-100)
  pub pain_critical_pct: f64,
  pub pain_high_pct: f64,
  /// Percent of sessions rated too hard (0-100)
  pub too_hard_high_pct: f64,
  pub avg_rpe_high: f64,
  /// Average RPE at or below which a block counts as comfortable
  pub avg_rpe_comfortable: f64,
  /// Completion rates (0-1)
  pub completion_low: f64,
  pub completion_good: f64,
  /// Positive variance = slower than planned
  pub pace_variance_slow_pct: f64,
}

impl Default for BlockThresholds {
  fn default() -> Self {
    Self {
      too_hard_rpe: 8.0,
      pain_critical_pct: 30.0,
      pain_high_pct: 15.0,
      too_hard_high_pct: 40.0,
      avg_rpe_high: 8.0,
      avg_rpe_comfortable: 7.0,
      completion_low: 0.70,
      completion_good: 0.90,
      pace_variance_slow_pct: 5.0,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Top-level Config
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsConfig {
  pub database_url: String,
  pub records: RecordPolicy,
  pub merge: MergePolicy,
  pub load: LoadPolicy,
  pub block: BlockThresholds,
}

impl Default for InsightsConfig {
  fn default() -> Self {
    Self {
      database_url: DEFAULT_DATABASE_URL.to_string(),
      records: RecordPolicy::default(),
      merge: MergePolicy::default(),
      load: LoadPolicy::default(),
      block: BlockThresholds::default(),
    }
  }
}

impl InsightsConfig {
  /// Load from the environment, reading `.env` first if present
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();

    let defaults = Self::default();

    let records = RecordPolicy {
      derived_tolerance_s: env_or("PR_TOLERANCE_DERIVED_S", defaults.records.derived_tolerance_s)?,
      reported_tolerance_s: env_or("PR_TOLERANCE_REPORTED_S", defaults.records.reported_tolerance_s)?,
    };

    let merge = MergePolicy {
      max_day_gap: env_or("MERGE_MAX_DAY_GAP", defaults.merge.max_day_gap)?,
      distance_tolerance_pct: env_or("MERGE_DISTANCE_TOLERANCE_PCT", defaults.merge.distance_tolerance_pct)?,
      duration_tolerance_s: env_or("MERGE_DURATION_TOLERANCE_S", defaults.merge.duration_tolerance_s)?,
      distance_weight: env_or("MERGE_DISTANCE_WEIGHT", defaults.merge.distance_weight)?,
      duration_weight: env_or("MERGE_DURATION_WEIGHT", defaults.merge.duration_weight)?,
      min_confidence: env_or("MERGE_MIN_CONFIDENCE", defaults.merge.min_confidence)?,
      ambiguity_margin: env_or("MERGE_AMBIGUITY_MARGIN", defaults.merge.ambiguity_margin)?,
    };

    let load = LoadPolicy {
      metric: env_or("LOAD_METRIC", defaults.load.metric)?,
      acute_days: env_or("LOAD_ACUTE_DAYS", defaults.load.acute_days)?,
      chronic_days: env_or("LOAD_CHRONIC_DAYS", defaults.load.chronic_days)?,
      ..defaults.load
    };

    let block = BlockThresholds {
      too_hard_rpe: env_or("BLOCK_TOO_HARD_RPE", defaults.block.too_hard_rpe)?,
      ..defaults.block
    };

    let config = Self {
      database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
      records,
      merge,
      load,
      block,
    };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.records.derived_tolerance_s < 0.0 || self.records.reported_tolerance_s < 0.0 {
      return Err(InsightsError::Config("record tolerances must be non-negative".into()));
    }
    if self.merge.distance_weight + self.merge.duration_weight <= 0.0 {
      return Err(InsightsError::Config("merge weights must sum to a positive value".into()));
    }
    if self.merge.distance_tolerance_pct <= 0.0 || self.merge.duration_tolerance_s <= 0.0 {
      return Err(InsightsError::Config("merge tolerances must be positive".into()));
    }
    if !(0.0..=1.0).contains(&self.merge.min_confidence) {
      return Err(InsightsError::Config("MERGE_MIN_CONFIDENCE must be within 0..=1".into()));
    }
    if self.load.acute_days <= 0 || self.load.chronic_days < self.load.acute_days {
      return Err(InsightsError::Config(
        "LOAD_ACUTE_DAYS must be positive and not exceed LOAD_CHRONIC_DAYS".into(),
      ));
    }
    Ok(())
  }
}

/// Read `key` and parse it, using `default` when unset
fn env_or<T>(key: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|e| InsightsError::Config(format!("{}={:?}: {}", key, raw, e))),
    Err(_) => Ok(default),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn test_from_env_defaults() {
    temp_env::with_vars_unset(
      ["MERGE_MIN_CONFIDENCE", "PR_TOLERANCE_DERIVED_S", "LOAD_METRIC", "LOAD_ACUTE_DAYS"],
      || {
        let config = InsightsConfig::from_env().unwrap();
        assert_eq!(config.records.derived_tolerance_s, 0.1);
        assert_eq!(config.merge.min_confidence, 0.6);
        assert_eq!(config.load.metric, LoadMetric::Distance);
        assert_eq!(config.load.acute_days, 7);
      },
    );
  }

  #[test]
  #[serial]
  fn test_from_env_overrides() {
    temp_env::with_vars(
      [
        ("MERGE_MIN_CONFIDENCE", Some("0.75")),
        ("PR_TOLERANCE_REPORTED_S", Some("0.5")),
        ("LOAD_METRIC", Some("duration")),
      ],
      || {
        let config = InsightsConfig::from_env().unwrap();
        assert_eq!(config.merge.min_confidence, 0.75);
        assert_eq!(config.records.reported_tolerance_s, 0.5);
        assert_eq!(config.load.metric, LoadMetric::Duration);
      },
    );
  }

  #[test]
  #[serial]
  fn test_from_env_rejects_garbage() {
    temp_env::with_var("MERGE_DURATION_TOLERANCE_S", Some("five minutes"), || {
      let err = InsightsConfig::from_env().unwrap_err();
      assert!(matches!(err, InsightsError::Config(_)));
      assert!(err.to_string().contains("MERGE_DURATION_TOLERANCE_S"));
    });
  }

  #[test]
  #[serial]
  fn test_from_env_rejects_out_of_range_confidence() {
    temp_env::with_var("MERGE_MIN_CONFIDENCE", Some("1.5"), || {
      assert!(InsightsConfig::from_env().is_err());
    });
  }
}
