//! Test utilities and helpers for unit and store-backed testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories
//! - Seed helpers for workouts, blocks, feedback and injuries
//! - Helper assertions

use crate::models::{NewWorkout, Workout};
use crate::series::Sample;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};

static EXTERNAL_ID: AtomicU64 = AtomicU64::new(1);

fn next_external_id(source: &str) -> String {
  format!("{}_{}", source, EXTERNAL_ID.fetch_add(1, Ordering::Relaxed))
}

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  // Run migrations
  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// Insert a workout row. Rows carrying samples are marked as freshly fetched.
pub async fn seed_workout(pool: &SqlitePool, workout: &NewWorkout) -> i64 {
  let fetched_at = workout.samples_json.as_ref().map(|_| Utc::now());

  let result = sqlx::query(
    r#"
    INSERT INTO workouts (
      user_id, source, external_id, activity_type, started_at, duration_seconds,
      distance_meters, elevation_gain_meters, average_heartrate, max_heartrate,
      raw_json, samples_json, samples_fetched_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
    "#,
  )
  .bind(workout.user_id)
  .bind(&workout.source)
  .bind(&workout.external_id)
  .bind(&workout.activity_type)
  .bind(workout.started_at)
  .bind(workout.duration_seconds)
  .bind(workout.distance_meters)
  .bind(workout.elevation_gain_meters)
  .bind(workout.average_heartrate)
  .bind(workout.max_heartrate)
  .bind(&workout.raw_json)
  .bind(&workout.samples_json)
  .bind(fetched_at)
  .execute(pool)
  .await
  .expect("Failed to insert test workout");

  result.last_insert_rowid()
}

fn summary_workout(user_id: i64, source: &str, distance_km: f64, duration_s: i64, started_at: DateTime<Utc>) -> NewWorkout {
  NewWorkout {
    user_id,
    source: source.to_string(),
    external_id: next_external_id(source),
    activity_type: "Run".to_string(),
    started_at,
    duration_seconds: Some(duration_s),
    distance_meters: Some(distance_km * 1000.0),
    elevation_gain_meters: None,
    average_heartrate: Some(150),
    max_heartrate: None,
    raw_json: None,
    samples_json: None,
  }
}

/// Seed a bare run summary (heart rate only) `days_ago` days before the base date
pub async fn seed_summary_workout(
  pool: &SqlitePool,
  user_id: i64,
  source: &str,
  distance_km: f64,
  duration_s: i64,
  days_ago: i64,
) -> i64 {
  seed_summary_workout_at(pool, user_id, source, distance_km, duration_s, days_before_base(days_ago)).await
}

/// Seed a bare run summary at an exact start time
pub async fn seed_summary_workout_at(
  pool: &SqlitePool,
  user_id: i64,
  source: &str,
  distance_km: f64,
  duration_s: i64,
  started_at: DateTime<Utc>,
) -> i64 {
  seed_workout(pool, &summary_workout(user_id, source, distance_km, duration_s, started_at)).await
}

/// Seed a run carrying a sample series of `(distance_m, elapsed_s)` points.
/// Distance and duration are taken from the last point.
pub async fn seed_workout_with_series(
  pool: &SqlitePool,
  user_id: i64,
  source: &str,
  points: &[(f64, f64)],
) -> i64 {
  let started_at = days_before_base(1);
  let samples: Vec<Sample> = points
    .iter()
    .map(|(d, t)| Sample::new(*d, *t, started_at + Duration::milliseconds((*t * 1000.0) as i64)))
    .collect();
  let (distance_m, elapsed_s) = points.last().copied().unwrap_or((0.0, 0.0));

  let mut workout = summary_workout(user_id, source, distance_m / 1000.0, elapsed_s as i64, started_at);
  workout.samples_json = Some(serde_json::to_string(&samples).expect("Failed to serialize samples"));
  seed_workout(pool, &workout).await
}

/// Seed a run whose `samples_json` is stored verbatim, valid or not
pub async fn seed_workout_with_raw_samples(pool: &SqlitePool, user_id: i64, source: &str, samples_json: &str) -> i64 {
  let mut workout = summary_workout(user_id, source, 5.0, 1500, days_before_base(2));
  workout.samples_json = Some(samples_json.to_string());
  seed_workout(pool, &workout).await
}

pub async fn load_workout(pool: &SqlitePool, id: i64) -> Workout {
  sqlx::query_as::<_, Workout>("SELECT * FROM workouts WHERE id = ?1")
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("Failed to load workout")
}

/// Seed a training block and return its id
pub async fn seed_training_block(
  pool: &SqlitePool,
  user_id: i64,
  phase: &str,
  start_date: NaiveDate,
  end_date: NaiveDate,
) -> i64 {
  sqlx::query(
    "INSERT INTO training_blocks (user_id, phase, start_date, end_date) VALUES (?1, ?2, ?3, ?4)",
  )
  .bind(user_id)
  .bind(phase)
  .bind(start_date)
  .bind(end_date)
  .execute(pool)
  .await
  .expect("Failed to seed training block")
  .last_insert_rowid()
}

pub async fn seed_planned_workout(pool: &SqlitePool, block_id: i64, scheduled_date: NaiveDate, distance_km: f64) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO planned_workouts (block_id, scheduled_date, workout_type, planned_distance_km)
    VALUES (?1, ?2, 'easy', ?3)
    "#,
  )
  .bind(block_id)
  .bind(scheduled_date)
  .bind(distance_km)
  .execute(pool)
  .await
  .expect("Failed to seed planned workout")
  .last_insert_rowid()
}

pub async fn seed_feedback(
  pool: &SqlitePool,
  planned_workout_id: i64,
  rpe: i64,
  pain_location: Option<&str>,
  pace_variance_pct: f64,
  completed: bool,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO workout_feedback (planned_workout_id, rpe, pain_location, pace_variance_pct, completed)
    VALUES (?1, ?2, ?3, ?4, ?5)
    "#,
  )
  .bind(planned_workout_id)
  .bind(rpe)
  .bind(pain_location)
  .bind(pace_variance_pct)
  .bind(completed)
  .execute(pool)
  .await
  .expect("Failed to seed feedback")
  .last_insert_rowid()
}

pub async fn seed_injury(pool: &SqlitePool, user_id: i64, location: &str, status: &str, recurrence_count: i64) -> i64 {
  sqlx::query("INSERT INTO injuries (user_id, location, status, recurrence_count) VALUES (?1, ?2, ?3, ?4)")
    .bind(user_id)
    .bind(location)
    .bind(status)
    .bind(recurrence_count)
    .execute(pool)
    .await
    .expect("Failed to seed injury")
    .last_insert_rowid()
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// In-memory run for pure tests: heart rate and elevation set, no payloads
pub fn mock_workout(
  id: i64,
  source: &str,
  activity_type: &str,
  distance_km: f64,
  duration_s: i64,
  days_ago: i64,
) -> Workout {
  Workout {
    id,
    user_id: 1,
    source: source.to_string(),
    external_id: format!("{}_{}", source, id),
    activity_type: activity_type.to_string(),
    started_at: days_before_base(days_ago),
    duration_seconds: Some(duration_s),
    distance_meters: Some(distance_km * 1000.0),
    elevation_gain_meters: Some(50.0),
    average_heartrate: Some(150),
    max_heartrate: Some(170),
    raw_json: None,
    samples_json: None,
    samples_fetched_at: None,
    best_efforts_json: None,
    best_efforts_computed_at: None,
    merged_into_id: None,
    created_at: None,
  }
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

/// Fixed reference instant, morning so day arithmetic never crosses midnight
pub fn base_datetime() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap()
}

pub fn days_before_base(days: i64) -> DateTime<Utc> {
  base_datetime() - Duration::days(days)
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    // Verify key tables exist
    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('workouts', 'personal_records', 'training_blocks', 'workout_merges')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4, "Expected 4 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_seeded_series_workout_round_trips() {
    let pool = setup_test_db().await;

    let id = seed_workout_with_series(&pool, 7, "garmin", &[(0.0, 0.0), (1000.0, 300.0)]).await;
    let workout = load_workout(&pool, id).await;

    assert_eq!(workout.user_id, 7);
    assert_eq!(workout.distance_meters, Some(1000.0));
    assert_eq!(workout.duration_seconds, Some(300));
    assert!(workout.samples_fetched_at.is_some());
    assert!(workout.best_efforts_stale());
    assert_eq!(workout.richness(), 2);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_external_ids_do_not_collide() {
    let pool = setup_test_db().await;

    seed_summary_workout(&pool, 1, "strava", 5.0, 1500, 1).await;
    seed_summary_workout(&pool, 1, "strava", 5.0, 1500, 1).await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workouts")
      .fetch_one(&pool)
      .await
      .expect("Failed to count workouts");
    assert_eq!(count, 2);

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_mock_workout_is_stable() {
    let w = mock_workout(3, "strava", "Run", 10.0, 3000, 2);
    assert_eq!(w.date(), NaiveDate::from_ymd_opt(2025, 6, 13).unwrap());
    assert_eq!(w.distance_km(), Some(10.0));
    assert_eq!(w.richness(), 3);
  }
}
