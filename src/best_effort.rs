//! Best-effort extraction
//!
//! For each target distance, finds the fastest contiguous stretch of a single
//! workout covering exactly that distance. Windows start at any sample; the
//! end point is linearly interpolated inside the one interval that brackets
//! the target, so no interpolation error accumulates across intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::error::{InsightsError, ItemFailure, Result};
use crate::models::Workout;
use crate::records::BUCKET_LADDER;
use crate::series::{Sample, SampleSeries};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceTarget {
  pub key: String,
  pub distance_m: f64,
}

impl DistanceTarget {
  pub fn new(key: &str, distance_m: f64) -> Self {
    Self {
      key: key.to_string(),
      distance_m,
    }
  }
}

/// Targets for every rung of the record ladder, so extracted efforts and
/// whole-workout records share one key space
pub fn standard_targets() -> Vec<DistanceTarget> {
  BUCKET_LADDER
    .iter()
    .map(|b| DistanceTarget::new(b.key, b.distance_m))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEffort {
  pub target_key: String,
  pub time_seconds: f64,
  pub pace_seconds_per_km: f64,
  pub start_timestamp: DateTime<Utc>,
  pub end_timestamp: DateTime<Utc>,
  pub workout_id: Option<i64>,
}

/// ---------------------------------------------------------------------------
/// Extraction
/// ---------------------------------------------------------------------------

/// Fastest time for each target. Targets the series never reaches are absent.
pub fn extract_best_efforts(
  series: &SampleSeries,
  targets: &[DistanceTarget],
) -> BTreeMap<String, BestEffort> {
  let mut efforts = BTreeMap::new();

  for target in targets {
    if !(target.distance_m > 0.0) {
      tracing::debug!(key = %target.key, "skipping non-positive target distance");
      continue;
    }
    if let Some(effort) = best_effort_for(series, target) {
      efforts.insert(target.key.clone(), effort);
    }
  }

  efforts
}

struct Window {
  start: usize,
  duration_s: f64,
  end_timestamp: DateTime<Utc>,
}

fn best_effort_for(series: &SampleSeries, target: &DistanceTarget) -> Option<BestEffort> {
  let samples = series.samples();
  let d = target.distance_m;

  let mut best: Option<Window> = None;
  // End index only ever moves forward: the goal distance grows with the start
  let mut k = 1;

  for i in 0..samples.len().saturating_sub(1) {
    let start = &samples[i];
    let goal = start.distance_m + d;

    if k <= i {
      k = i + 1;
    }
    while k < samples.len() && samples[k].distance_m < goal {
      k += 1;
    }
    if k == samples.len() {
      // Later starts have an even further goal
      break;
    }

    let (end_elapsed, end_timestamp) = interpolate_end(&samples[k - 1], &samples[k], goal);
    let duration_s = end_elapsed - start.elapsed_s;

    let faster = best.as_ref().map_or(true, |w| duration_s < w.duration_s);
    if faster {
      best = Some(Window {
        start: i,
        duration_s,
        end_timestamp,
      });
    }
  }

  best.map(|w| BestEffort {
    target_key: target.key.clone(),
    time_seconds: w.duration_s,
    pace_seconds_per_km: w.duration_s / (d / 1000.0),
    start_timestamp: samples[w.start].timestamp,
    end_timestamp: w.end_timestamp,
    workout_id: series.workout_id,
  })
}

/// Elapsed time and timestamp at `goal` metres, with `lo.distance < goal <= hi.distance`
/// (or `lo` itself when the goal sits exactly on it)
fn interpolate_end(lo: &Sample, hi: &Sample, goal: f64) -> (f64, DateTime<Utc>) {
  let span = hi.distance_m - lo.distance_m;
  if span <= 0.0 || goal <= lo.distance_m {
    return (lo.elapsed_s, lo.timestamp);
  }
  if goal >= hi.distance_m {
    return (hi.elapsed_s, hi.timestamp);
  }

  let ratio = (goal - lo.distance_m) / span;
  let elapsed = lo.elapsed_s + ratio * (hi.elapsed_s - lo.elapsed_s);
  let delta_ms = (hi.timestamp - lo.timestamp).num_milliseconds() as f64;
  let timestamp = lo.timestamp + Duration::milliseconds((ratio * delta_ms).round() as i64);

  (elapsed, timestamp)
}

/// ---------------------------------------------------------------------------
/// Cached Efforts per Workout
/// ---------------------------------------------------------------------------

/// Parse the efforts cached on a workout row
pub fn cached_best_efforts(workout: &Workout) -> Result<BTreeMap<String, BestEffort>> {
  match workout.best_efforts_json.as_deref() {
    Some(json) => Ok(serde_json::from_str(json)?),
    None => Ok(BTreeMap::new()),
  }
}

/// Extract efforts for one workout's stored series
pub fn extract_for_workout(
  workout: &Workout,
  targets: &[DistanceTarget],
) -> Result<BTreeMap<String, BestEffort>> {
  let json = workout
    .samples_json
    .as_deref()
    .ok_or_else(|| InsightsError::InvalidSeries(format!("workout {} has no samples", workout.id)))?;
  let series = SampleSeries::from_json(Some(workout.id), json)?;
  Ok(extract_best_efforts(&series, targets))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BestEffortBatch {
  /// Workouts whose efforts were recomputed
  pub refreshed: usize,
  /// Workouts whose cache was already current
  pub up_to_date: usize,
  pub failures: Vec<ItemFailure>,
}

/// Recompute cached efforts for every workout of `user_id` whose series changed.
/// A bad series is reported and skipped; store errors abort.
pub async fn refresh_best_efforts(
  pool: &SqlitePool,
  user_id: i64,
  targets: &[DistanceTarget],
) -> Result<BestEffortBatch> {
  let workouts = sqlx::query_as::<_, Workout>(
    r#"
    SELECT * FROM workouts
    WHERE user_id = ?1 AND merged_into_id IS NULL AND samples_json IS NOT NULL
    ORDER BY started_at
    "#,
  )
  .bind(user_id)
  .fetch_all(pool)
  .await?;

  let mut batch = BestEffortBatch::default();

  for workout in &workouts {
    if !workout.best_efforts_stale() {
      batch.up_to_date += 1;
      continue;
    }

    let efforts = match extract_for_workout(workout, targets) {
      Ok(efforts) => efforts,
      Err(e) => {
        tracing::warn!(workout_id = workout.id, error = %e, "skipping workout with invalid series");
        batch.failures.push(ItemFailure::new(workout.id, &e));
        continue;
      }
    };

    sqlx::query(
      r#"
      UPDATE workouts
      SET best_efforts_json = ?1, best_efforts_computed_at = ?2
      WHERE id = ?3
      "#,
    )
    .bind(serde_json::to_string(&efforts)?)
    .bind(Utc::now())
    .bind(workout.id)
    .execute(pool)
    .await?;

    batch.refreshed += 1;
  }

  tracing::info!(
    user_id,
    refreshed = batch.refreshed,
    up_to_date = batch.up_to_date,
    failed = batch.failures.len(),
    "best efforts refreshed"
  );

  Ok(batch)
}
