use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workout {
  pub id: i64,
  pub user_id: i64,
  /// Provider that produced this row, e.g. "strava" or "garmin"
  pub source: String,
  pub external_id: String,
  pub activity_type: String,
  pub started_at: DateTime<Utc>,
  pub duration_seconds: Option<i64>,
  pub distance_meters: Option<f64>,
  pub elevation_gain_meters: Option<f64>,
  pub average_heartrate: Option<i64>,
  pub max_heartrate: Option<i64>,
  pub raw_json: Option<String>,
  pub samples_json: Option<String>,
  pub samples_fetched_at: Option<DateTime<Utc>>,
  pub best_efforts_json: Option<String>,
  pub best_efforts_computed_at: Option<DateTime<Utc>>,
  /// Set when this row was archived as a duplicate of another workout
  pub merged_into_id: Option<i64>,
  pub created_at: Option<DateTime<Utc>>,
}

impl Workout {
  pub fn date(&self) -> NaiveDate {
    self.started_at.date_naive()
  }

  pub fn distance_km(&self) -> Option<f64> {
    self.distance_meters.map(|m| m / 1000.0)
  }

  /// Whether the cached best efforts are missing or older than the series
  pub fn best_efforts_stale(&self) -> bool {
    if self.samples_json.is_none() {
      return false;
    }
    match (self.best_efforts_computed_at, self.samples_fetched_at) {
      (None, _) => true,
      (Some(computed), Some(fetched)) => fetched > computed,
      (Some(_), None) => false,
    }
  }

  /// Number of populated optional payloads. More is richer.
  pub fn richness(&self) -> usize {
    [
      self.samples_json.is_some(),
      self.best_efforts_json.is_some() || self.has_reported_best_efforts(),
      self.average_heartrate.is_some(),
      self.max_heartrate.is_some(),
      self.elevation_gain_meters.is_some(),
      self.raw_json.is_some(),
    ]
    .iter()
    .filter(|populated| **populated)
    .count()
  }

  fn has_reported_best_efforts(&self) -> bool {
    self
      .raw_json
      .as_deref()
      .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
      .and_then(|v| v.get("best_efforts").and_then(|b| b.as_array().map(|a| !a.is_empty())))
      .unwrap_or(false)
  }
}

/// For inserting new workouts (without id, created_at)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkout {
  pub user_id: i64,
  pub source: String,
  pub external_id: String,
  pub activity_type: String,
  pub started_at: DateTime<Utc>,
  pub duration_seconds: Option<i64>,
  pub distance_meters: Option<f64>,
  pub elevation_gain_meters: Option<f64>,
  pub average_heartrate: Option<i64>,
  pub max_heartrate: Option<i64>,
  pub raw_json: Option<String>,
  pub samples_json: Option<String>,
}
