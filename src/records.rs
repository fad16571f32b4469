//! Personal-record ledger
//!
//! Performances reach the ledger two ways:
//! - whole workouts that fall inside a distance bucket's tolerance window
//! - exact efforts, either extracted from our own series or reported by a provider
//!
//! Both are projected onto one `RecordObservation` and go through the same
//! decision function, so the two pathways converge on the same current rows.
//! Rows are append-only: a faster performance supersedes the current row and
//! inserts a new one. Only near-equal times correct the current row in place.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;

use crate::best_effort::cached_best_efforts;
use crate::config::RecordPolicy;
use crate::error::{ItemFailure, Result};
use crate::models::{PersonalRecord, Workout};

/// ---------------------------------------------------------------------------
/// Distance Ladder
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceBucket {
  pub key: &'static str,
  pub distance_m: f64,
  /// Inclusive window a whole workout must fall into, in km
  pub min_km: f64,
  pub max_km: f64,
}

/// Standard race distances. Windows do not overlap, so a workout matches at most one rung.
pub const BUCKET_LADDER: &[DistanceBucket] = &[
  DistanceBucket { key: "400m", distance_m: 400.0, min_km: 0.39, max_km: 0.42 },
  DistanceBucket { key: "500m", distance_m: 500.0, min_km: 0.49, max_km: 0.52 },
  DistanceBucket { key: "800m", distance_m: 800.0, min_km: 0.78, max_km: 0.83 },
  DistanceBucket { key: "1km", distance_m: 1000.0, min_km: 0.98, max_km: 1.05 },
  DistanceBucket { key: "1mile", distance_m: 1609.34, min_km: 1.59, max_km: 1.66 },
  DistanceBucket { key: "2km", distance_m: 2000.0, min_km: 1.95, max_km: 2.10 },
  DistanceBucket { key: "3km", distance_m: 3000.0, min_km: 2.95, max_km: 3.15 },
  DistanceBucket { key: "5km", distance_m: 5000.0, min_km: 4.90, max_km: 5.25 },
  DistanceBucket { key: "10km", distance_m: 10000.0, min_km: 9.80, max_km: 10.50 },
  DistanceBucket { key: "15km", distance_m: 15000.0, min_km: 14.70, max_km: 15.50 },
  DistanceBucket { key: "half_marathon", distance_m: 21097.5, min_km: 20.90, max_km: 21.50 },
  DistanceBucket { key: "marathon", distance_m: 42195.0, min_km: 41.80, max_km: 42.80 },
];

pub fn bucket_for_distance(distance_km: f64) -> Option<&'static DistanceBucket> {
  BUCKET_LADDER
    .iter()
    .find(|b| b.min_km <= distance_km && distance_km <= b.max_km)
}

/// ---------------------------------------------------------------------------
/// Candidate Performances
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
  /// Whole workout inside a bucket window
  RangeBucket,
  /// Extracted from our own sample series
  Derived,
  /// Exact split reported by an external provider
  Reported,
}

impl std::fmt::Display for RecordOrigin {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::RangeBucket => write!(f, "range_bucket"),
      Self::Derived => write!(f, "derived"),
      Self::Reported => write!(f, "reported"),
    }
  }
}

impl std::str::FromStr for RecordOrigin {
  type Err = String;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "range_bucket" => Ok(Self::RangeBucket),
      "derived" => Ok(Self::Derived),
      "reported" => Ok(Self::Reported),
      _ => Err(format!("Unknown record origin: {}", s)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidatePerformance {
  /// Whole-workout performance matched by tolerance window, selected by pace.
  /// Its record time is that pace held over the bucket's nominal distance.
  RangeBucket {
    bucket_key: String,
    bucket_distance_m: f64,
    workout_id: i64,
    distance_km: f64,
    duration_s: f64,
    date: NaiveDate,
  },
  /// Exact split keyed by target, compared by time
  ExactEffort {
    target_key: String,
    workout_id: Option<i64>,
    time_seconds: f64,
    date: NaiveDate,
    reported: bool,
  },
}

impl CandidatePerformance {
  pub fn observation(&self) -> RecordObservation {
    match self {
      Self::RangeBucket {
        bucket_key,
        bucket_distance_m,
        workout_id,
        distance_km,
        duration_s,
        date,
      } => RecordObservation {
        distance_key: bucket_key.clone(),
        time_seconds: duration_s / distance_km * bucket_distance_m / 1000.0,
        date: *date,
        workout_id: Some(*workout_id),
        origin: RecordOrigin::RangeBucket,
      },
      Self::ExactEffort {
        target_key,
        workout_id,
        time_seconds,
        date,
        reported,
      } => RecordObservation {
        distance_key: target_key.clone(),
        time_seconds: *time_seconds,
        date: *date,
        workout_id: *workout_id,
        origin: if *reported {
          RecordOrigin::Reported
        } else {
          RecordOrigin::Derived
        },
      },
    }
  }
}

/// Common projection every candidate reduces to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordObservation {
  pub distance_key: String,
  pub time_seconds: f64,
  pub date: NaiveDate,
  pub workout_id: Option<i64>,
  pub origin: RecordOrigin,
}

impl RecordObservation {
  fn notes(&self) -> String {
    match self.origin {
      RecordOrigin::RangeBucket => "whole workout within bucket window".to_string(),
      RecordOrigin::Derived => "best effort extracted from sample series".to_string(),
      RecordOrigin::Reported => "exact split reported by provider".to_string(),
    }
  }
}

fn is_run(workout: &Workout) -> bool {
  workout.activity_type.to_lowercase().contains("run")
}

/// Fastest-pace run per bucket
pub fn range_bucket_candidates(workouts: &[Workout]) -> Vec<CandidatePerformance> {
  let mut winners: BTreeMap<&'static str, (f64, &Workout, &'static DistanceBucket, f64, f64)> = BTreeMap::new();

  for w in workouts.iter().filter(|w| is_run(w)) {
    let (Some(distance_km), Some(duration)) = (w.distance_km(), w.duration_seconds) else {
      continue;
    };
    if distance_km <= 0.0 || duration <= 0 {
      continue;
    }
    let Some(bucket) = bucket_for_distance(distance_km) else {
      continue;
    };

    let duration_s = duration as f64;
    let pace = duration_s / distance_km;
    let better = match winners.get(bucket.key) {
      None => true,
      Some((best_pace, best, ..)) => {
        pace < *best_pace || (pace == *best_pace && (w.started_at, w.id) < (best.started_at, best.id))
      }
    };
    if better {
      winners.insert(bucket.key, (pace, w, bucket, distance_km, duration_s));
    }
  }

  winners
    .into_iter()
    .map(|(key, (_, w, bucket, distance_km, duration_s))| CandidatePerformance::RangeBucket {
      bucket_key: key.to_string(),
      bucket_distance_m: bucket.distance_m,
      workout_id: w.id,
      distance_km,
      duration_s,
      date: w.date(),
    })
    .collect()
}

/// Provider-reported split, e.g. Strava's `best_efforts` entries
#[derive(Debug, Clone, Deserialize)]
struct ReportedEffort {
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  distance: Option<f64>,
  elapsed_time: f64,
  #[serde(default)]
  start_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ReportedPayload {
  #[serde(default)]
  best_efforts: Vec<ReportedEffort>,
}

/// Map a provider split onto a ladder key, by name first and then by distance
fn reported_key(effort: &ReportedEffort) -> Option<&'static str> {
  let by_name = effort.name.as_deref().and_then(|name| {
    match name.to_lowercase().as_str() {
      "400m" => Some("400m"),
      "1k" => Some("1km"),
      "1 mile" => Some("1mile"),
      "5k" => Some("5km"),
      "10k" => Some("10km"),
      "15k" => Some("15km"),
      "half-marathon" => Some("half_marathon"),
      "marathon" => Some("marathon"),
      _ => None,
    }
  });

  by_name.or_else(|| {
    let distance = effort.distance?;
    BUCKET_LADDER
      .iter()
      .find(|b| (distance - b.distance_m).abs() <= b.distance_m * 0.005)
      .map(|b| b.key)
  })
}

/// Exact splits embedded in the workout's raw provider payload
pub fn reported_candidates(workout: &Workout) -> Result<Vec<CandidatePerformance>> {
  let Some(raw) = workout.raw_json.as_deref() else {
    return Ok(vec![]);
  };
  let payload: ReportedPayload = serde_json::from_str(raw)?;

  Ok(
    payload
      .best_efforts
      .iter()
      .filter(|e| e.elapsed_time > 0.0)
      .filter_map(|e| {
        reported_key(e).map(|key| CandidatePerformance::ExactEffort {
          target_key: key.to_string(),
          workout_id: Some(workout.id),
          time_seconds: e.elapsed_time,
          date: e.start_date.map(|d| d.date_naive()).unwrap_or_else(|| workout.date()),
          reported: true,
        })
      })
      .collect(),
  )
}

/// Efforts previously extracted from the workout's own series
pub fn derived_candidates(workout: &Workout) -> Result<Vec<CandidatePerformance>> {
  Ok(
    cached_best_efforts(workout)?
      .into_values()
      .map(|e| CandidatePerformance::ExactEffort {
        target_key: e.target_key,
        workout_id: Some(workout.id),
        time_seconds: e.time_seconds,
        date: e.start_timestamp.date_naive(),
        reported: false,
      })
      .collect(),
  )
}

/// Every candidate for a set of workouts. Unparseable payloads are reported per workout.
pub fn collect_candidates(workouts: &[Workout]) -> (Vec<CandidatePerformance>, Vec<ItemFailure>) {
  let mut candidates = range_bucket_candidates(workouts);
  let mut failures = Vec::new();

  for w in workouts.iter().filter(|w| is_run(w)) {
    for extracted in [derived_candidates(w), reported_candidates(w)] {
      match extracted {
        Ok(mut found) => candidates.append(&mut found),
        Err(e) => {
          tracing::warn!(workout_id = w.id, error = %e, "skipping unreadable effort payload");
          failures.push(ItemFailure::new(w.id, &e));
        }
      }
    }
  }

  (candidates, failures)
}

/// ---------------------------------------------------------------------------
/// Decision
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecordAction {
  Insert,
  Supersede { previous_id: i64 },
  Correct { record_id: i64 },
  Unchanged,
}

impl RecordPolicy {
  pub fn tolerance_for(&self, origin: RecordOrigin) -> f64 {
    match origin {
      RecordOrigin::Reported => self.reported_tolerance_s,
      RecordOrigin::RangeBucket | RecordOrigin::Derived => self.derived_tolerance_s,
    }
  }
}

/// What the ledger should do with `obs` given the current row for its key
pub fn decide(
  current: Option<&PersonalRecord>,
  obs: &RecordObservation,
  policy: &RecordPolicy,
) -> RecordAction {
  let Some(current) = current else {
    return RecordAction::Insert;
  };

  let improvement = current.time_seconds - obs.time_seconds;
  let tolerance = policy.tolerance_for(obs.origin);

  if improvement > tolerance {
    return RecordAction::Supersede {
      previous_id: current.id,
    };
  }

  if improvement.abs() <= tolerance {
    // Same performance. Only move toward the faster reading, or fix a drifted
    // date on the very same workout, so reruns settle.
    let faster = improvement > 0.0;
    let date_drift = improvement == 0.0
      && obs.workout_id.is_some()
      && obs.workout_id == current.workout_id
      && obs.date != current.date_achieved;
    if faster || date_drift {
      return RecordAction::Correct {
        record_id: current.id,
      };
    }
  }

  RecordAction::Unchanged
}

/// Best observation per key: lowest time, then earliest date, then lowest workout id
pub fn collapse_observations(observations: Vec<RecordObservation>) -> Vec<RecordObservation> {
  let mut best: BTreeMap<String, RecordObservation> = BTreeMap::new();

  for obs in observations {
    if !obs.time_seconds.is_finite() || obs.time_seconds <= 0.0 {
      continue;
    }
    let replace = match best.get(&obs.distance_key) {
      None => true,
      Some(b) => {
        (obs.time_seconds, obs.date, obs.workout_id.unwrap_or(i64::MAX))
          < (b.time_seconds, b.date, b.workout_id.unwrap_or(i64::MAX))
      }
    };
    if replace {
      best.insert(obs.distance_key.clone(), obs);
    }
  }

  best.into_values().collect()
}

/// ---------------------------------------------------------------------------
/// Ledger Operations
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
  pub created: Vec<PersonalRecord>,
  /// Rows as they are after being superseded
  pub superseded: Vec<PersonalRecord>,
  pub corrected: Vec<PersonalRecord>,
  pub unchanged: usize,
  pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
  pub fn changed(&self) -> bool {
    !self.created.is_empty() || !self.superseded.is_empty() || !self.corrected.is_empty()
  }
}

/// Apply observations for one user in a single transaction
pub async fn reconcile_records(
  pool: &SqlitePool,
  user_id: i64,
  observations: Vec<RecordObservation>,
  policy: &RecordPolicy,
) -> Result<ReconcileReport> {
  let now = Utc::now();
  let mut report = ReconcileReport::default();
  let mut tx = pool.begin().await?;

  for obs in collapse_observations(observations) {
    let current = load_current(&mut tx, user_id, &obs.distance_key).await?;

    match decide(current.as_ref(), &obs, policy) {
      RecordAction::Insert => {
        let created = insert_record(&mut tx, user_id, &obs).await?;
        tracing::info!(user_id, key = %obs.distance_key, time = obs.time_seconds, "first record");
        report.created.push(created);
      }
      RecordAction::Supersede { previous_id } => {
        let old = supersede_record(&mut tx, previous_id, now).await?;
        let created = insert_record(&mut tx, user_id, &obs).await?;
        tracing::info!(
          user_id,
          key = %obs.distance_key,
          previous = old.time_seconds,
          time = obs.time_seconds,
          "record improved"
        );
        report.superseded.push(old);
        report.created.push(created);
      }
      RecordAction::Correct { record_id } => {
        let corrected = correct_record(&mut tx, record_id, &obs).await?;
        tracing::debug!(user_id, key = %obs.distance_key, time = obs.time_seconds, "record corrected in place");
        report.corrected.push(corrected);
      }
      RecordAction::Unchanged => report.unchanged += 1,
    }
  }

  tx.commit().await?;
  Ok(report)
}

/// Scan every active workout of `user_id` and reconcile what it contains
pub async fn reconcile_user_records(
  pool: &SqlitePool,
  user_id: i64,
  policy: &RecordPolicy,
) -> Result<ReconcileReport> {
  let workouts = sqlx::query_as::<_, Workout>(
    "SELECT * FROM workouts WHERE user_id = ?1 AND merged_into_id IS NULL ORDER BY started_at",
  )
  .bind(user_id)
  .fetch_all(pool)
  .await?;

  let (candidates, failures) = collect_candidates(&workouts);
  let observations = candidates.iter().map(|c| c.observation()).collect();

  let mut report = reconcile_records(pool, user_id, observations, policy).await?;
  report.failures = failures;

  tracing::info!(
    user_id,
    created = report.created.len(),
    superseded = report.superseded.len(),
    corrected = report.corrected.len(),
    unchanged = report.unchanged,
    "records reconciled"
  );

  Ok(report)
}

pub async fn load_current_records(pool: &SqlitePool, user_id: i64) -> Result<Vec<PersonalRecord>> {
  Ok(
    sqlx::query_as::<_, PersonalRecord>(
      "SELECT * FROM personal_records WHERE user_id = ?1 AND is_current = 1 ORDER BY distance_key",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?,
  )
}

/// Full history for one key, oldest row first
pub async fn load_record_history(
  pool: &SqlitePool,
  user_id: i64,
  distance_key: &str,
) -> Result<Vec<PersonalRecord>> {
  Ok(
    sqlx::query_as::<_, PersonalRecord>(
      "SELECT * FROM personal_records WHERE user_id = ?1 AND distance_key = ?2 ORDER BY id",
    )
    .bind(user_id)
    .bind(distance_key)
    .fetch_all(pool)
    .await?,
  )
}

async fn load_current(
  conn: &mut SqliteConnection,
  user_id: i64,
  distance_key: &str,
) -> Result<Option<PersonalRecord>> {
  Ok(
    sqlx::query_as::<_, PersonalRecord>(
      "SELECT * FROM personal_records WHERE user_id = ?1 AND distance_key = ?2 AND is_current = 1",
    )
    .bind(user_id)
    .bind(distance_key)
    .fetch_optional(&mut *conn)
    .await?,
  )
}

async fn insert_record(
  conn: &mut SqliteConnection,
  user_id: i64,
  obs: &RecordObservation,
) -> Result<PersonalRecord> {
  Ok(
    sqlx::query_as::<_, PersonalRecord>(
      r#"
      INSERT INTO personal_records
        (user_id, distance_key, time_seconds, date_achieved, workout_id, origin, is_current, notes)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
      RETURNING *
      "#,
    )
    .bind(user_id)
    .bind(&obs.distance_key)
    .bind(obs.time_seconds)
    .bind(obs.date)
    .bind(obs.workout_id)
    .bind(obs.origin.to_string())
    .bind(obs.notes())
    .fetch_one(&mut *conn)
    .await?,
  )
}

async fn supersede_record(
  conn: &mut SqliteConnection,
  record_id: i64,
  now: DateTime<Utc>,
) -> Result<PersonalRecord> {
  Ok(
    sqlx::query_as::<_, PersonalRecord>(
      r#"
      UPDATE personal_records
      SET is_current = 0, superseded_at = ?1
      WHERE id = ?2
      RETURNING *
      "#,
    )
    .bind(now)
    .bind(record_id)
    .fetch_one(&mut *conn)
    .await?,
  )
}

async fn correct_record(
  conn: &mut SqliteConnection,
  record_id: i64,
  obs: &RecordObservation,
) -> Result<PersonalRecord> {
  Ok(
    sqlx::query_as::<_, PersonalRecord>(
      r#"
      UPDATE personal_records
      SET time_seconds = ?1, date_achieved = ?2, workout_id = COALESCE(?3, workout_id),
          notes = 'corrected: ' || ?4
      WHERE id = ?5
      RETURNING *
      "#,
    )
    .bind(obs.time_seconds)
    .bind(obs.date)
    .bind(obs.workout_id)
    .bind(obs.notes())
    .bind(record_id)
    .fetch_one(&mut *conn)
    .await?,
  )
}
