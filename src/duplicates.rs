//! Cross-source duplicate detection and merging
//!
//! Two providers often describe the same run. `plan_merges` is the only place
//! deciding what gets merged; the dry-run report and the apply path both
//! consume its output, so a preview always matches what apply would commit.

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;

use crate::config::MergePolicy;
use crate::error::{InsightsError, Result};
use crate::models::Workout;

/// ---------------------------------------------------------------------------
/// Decision Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeResolution {
  /// A is richer and stays canonical
  KeepA,
  /// B is richer and stays canonical
  KeepB,
  /// Equally rich with complementary data: A stays canonical and takes B's extras
  Merge,
}

impl std::fmt::Display for MergeResolution {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::KeepA => write!(f, "keep_a"),
      Self::KeepB => write!(f, "keep_b"),
      Self::Merge => write!(f, "merge"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
  /// Confident enough to merge automatically
  AutoMerge,
  /// Near the threshold, needs manual confirmation
  Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCandidatePair {
  /// Always the lower id of the pair
  pub workout_a: i64,
  pub workout_b: i64,
  pub source_a: String,
  pub source_b: String,
  pub similarity_score: f64,
  pub decision: MergeResolution,
  pub status: CandidateStatus,
}

impl DuplicateCandidatePair {
  pub fn canonical_id(&self) -> i64 {
    match self.decision {
      MergeResolution::KeepB => self.workout_b,
      MergeResolution::KeepA | MergeResolution::Merge => self.workout_a,
    }
  }

  pub fn duplicate_id(&self) -> i64 {
    match self.decision {
      MergeResolution::KeepB => self.workout_a,
      MergeResolution::KeepA | MergeResolution::Merge => self.workout_b,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Scoring
/// ---------------------------------------------------------------------------

/// Similarity in 0..=1, or None when the pair fails a hard gate
/// (same source, too many days apart, distance or duration out of tolerance)
pub fn similarity(a: &Workout, b: &Workout, policy: &MergePolicy) -> Option<f64> {
  if a.source == b.source || a.user_id != b.user_id {
    return None;
  }

  let day_gap = (a.date() - b.date()).num_days().abs();
  if day_gap > policy.max_day_gap {
    return None;
  }

  let (dist_a, dist_b) = (a.distance_meters?, b.distance_meters?);
  let (dur_a, dur_b) = (a.duration_seconds?, b.duration_seconds?);
  if dist_a <= 0.0 || dist_b <= 0.0 {
    return None;
  }

  let distance_rel = (dist_a - dist_b).abs() / dist_a.max(dist_b);
  let duration_diff = (dur_a - dur_b).abs() as f64;
  if distance_rel > policy.distance_tolerance_pct || duration_diff > policy.duration_tolerance_s {
    return None;
  }

  let distance_term = distance_rel / policy.distance_tolerance_pct;
  let duration_term = duration_diff / policy.duration_tolerance_s;
  let total_weight = policy.distance_weight + policy.duration_weight;
  let penalty = (policy.distance_weight * distance_term + policy.duration_weight * duration_term) / total_weight;

  Some((1.0 - penalty).clamp(0.0, 1.0))
}

/// Which record survives. Lower id wins ties.
pub fn resolve(a: &Workout, b: &Workout) -> MergeResolution {
  let (rich_a, rich_b) = (a.richness(), b.richness());
  if rich_a > rich_b {
    return MergeResolution::KeepA;
  }
  if rich_b > rich_a {
    return MergeResolution::KeepB;
  }

  let backfilled = backfill(a, b);
  if backfilled.richness() > rich_a {
    MergeResolution::Merge
  } else {
    MergeResolution::KeepA
  }
}

/// Canonical row with any missing optional data taken from the duplicate
pub fn backfill(canonical: &Workout, duplicate: &Workout) -> Workout {
  let mut merged = canonical.clone();

  if merged.samples_json.is_none() && duplicate.samples_json.is_some() {
    merged.samples_json = duplicate.samples_json.clone();
    merged.samples_fetched_at = duplicate.samples_fetched_at;
    merged.best_efforts_json = duplicate.best_efforts_json.clone();
    merged.best_efforts_computed_at = duplicate.best_efforts_computed_at;
  }
  merged.raw_json = merged.raw_json.or_else(|| duplicate.raw_json.clone());
  merged.average_heartrate = merged.average_heartrate.or(duplicate.average_heartrate);
  merged.max_heartrate = merged.max_heartrate.or(duplicate.max_heartrate);
  merged.elevation_gain_meters = merged.elevation_gain_meters.or(duplicate.elevation_gain_meters);

  merged
}

/// ---------------------------------------------------------------------------
/// Planning (shared by dry run and apply)
/// ---------------------------------------------------------------------------

/// Live view of a snapshot while merges are folded in, in plan order.
/// Planning and applying both walk the plan through one of these.
struct MergeState {
  live: HashMap<i64, Workout>,
  /// Archived id -> the row it was folded into
  merged_into: HashMap<i64, i64>,
}

impl MergeState {
  fn new(workouts: &[Workout]) -> Self {
    Self {
      live: workouts.iter().map(|w| (w.id, w.clone())).collect(),
      merged_into: HashMap::new(),
    }
  }

  /// Surviving row a workout has been folded into (itself when still live)
  fn root_of(&self, mut id: i64) -> i64 {
    while let Some(&next) = self.merged_into.get(&id) {
      id = next;
    }
    id
  }

  fn get(&self, id: i64) -> Option<&Workout> {
    self.live.get(&id)
  }

  /// Archive `duplicate_id` into `canonical_id`, returning the back-filled survivor
  fn fold(&mut self, canonical_id: i64, duplicate_id: i64) -> Option<Workout> {
    let duplicate = self.live.remove(&duplicate_id)?;
    let merged = backfill(self.live.get(&canonical_id)?, &duplicate);
    self.live.insert(canonical_id, merged.clone());
    self.merged_into.insert(duplicate_id, canonical_id);
    Some(merged)
  }
}

/// Decide every merge for one snapshot of a user's active workouts.
/// Pairs are taken by descending score. A pair touching an already merged
/// workout is re-read against the row that workout now lives in, so a run
/// recorded by three or more sources collapses into one row in one pass.
pub fn plan_merges(workouts: &[Workout], policy: &MergePolicy) -> Vec<DuplicateCandidatePair> {
  let mut scored: Vec<(f64, &Workout, &Workout)> = Vec::new();

  for (i, a) in workouts.iter().enumerate() {
    for b in &workouts[i + 1..] {
      let (a, b) = if a.id < b.id { (a, b) } else { (b, a) };
      if let Some(score) = similarity(a, b, policy) {
        if score >= policy.min_confidence - policy.ambiguity_margin {
          scored.push((score, a, b));
        }
      }
    }
  }

  scored.sort_by(|x, y| {
    y.0
      .total_cmp(&x.0)
      .then_with(|| (x.1.id, x.2.id).cmp(&(y.1.id, y.2.id)))
  });

  let mut state = MergeState::new(workouts);
  let mut plan = Vec::new();

  for (score, a, b) in scored {
    let (root_a, root_b) = (state.root_of(a.id), state.root_of(b.id));
    if root_a == root_b {
      continue;
    }
    let (Some(left), Some(right)) = (state.get(root_a.min(root_b)), state.get(root_a.max(root_b))) else {
      continue;
    };
    // Two rows from one provider are two activities, however similar
    if left.source == right.source {
      continue;
    }

    let status = if score >= policy.min_confidence + policy.ambiguity_margin {
      CandidateStatus::AutoMerge
    } else {
      CandidateStatus::Ambiguous
    };

    let pair = DuplicateCandidatePair {
      workout_a: left.id,
      workout_b: right.id,
      source_a: left.source.clone(),
      source_b: right.source.clone(),
      similarity_score: score,
      decision: resolve(left, right),
      status,
    };

    if pair.status == CandidateStatus::AutoMerge {
      state.fold(pair.canonical_id(), pair.duplicate_id());
    }
    plan.push(pair);
  }

  plan
}

/// ---------------------------------------------------------------------------
/// Operations
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
  pub dry_run: bool,
  pub candidates_found: usize,
  /// Merged (or, in a dry run, would be merged)
  pub merged: usize,
  pub ambiguous: usize,
  pub details: Vec<DuplicateCandidatePair>,
}

/// Find duplicate pairs for `user_id`. With `dry_run` nothing is written.
pub async fn find_and_merge_duplicates(
  pool: &SqlitePool,
  user_id: i64,
  policy: &MergePolicy,
  dry_run: bool,
) -> Result<MergeReport> {
  let workouts = sqlx::query_as::<_, Workout>(
    "SELECT * FROM workouts WHERE user_id = ?1 AND merged_into_id IS NULL ORDER BY id",
  )
  .bind(user_id)
  .fetch_all(pool)
  .await?;

  let plan = plan_merges(&workouts, policy);
  let auto: Vec<&DuplicateCandidatePair> = plan
    .iter()
    .filter(|p| p.status == CandidateStatus::AutoMerge)
    .collect();

  if !dry_run && !auto.is_empty() {
    let mut state = MergeState::new(&workouts);
    let mut tx = pool.begin().await?;
    for pair in &auto {
      apply_merge(&mut tx, user_id, &mut state, pair).await?;
    }
    tx.commit().await?;
  }

  let report = MergeReport {
    dry_run,
    candidates_found: plan.len(),
    merged: auto.len(),
    ambiguous: plan.len() - auto.len(),
    details: plan,
  };

  tracing::info!(
    user_id,
    dry_run,
    candidates = report.candidates_found,
    merged = report.merged,
    ambiguous = report.ambiguous,
    "duplicate pass complete"
  );

  Ok(report)
}

async fn apply_merge(
  conn: &mut SqliteConnection,
  user_id: i64,
  state: &mut MergeState,
  pair: &DuplicateCandidatePair,
) -> Result<()> {
  let (canonical_id, duplicate_id) = (pair.canonical_id(), pair.duplicate_id());
  let merged = state.fold(canonical_id, duplicate_id).ok_or_else(|| {
    InsightsError::NotFound(format!("workout {} or {} in merge snapshot", canonical_id, duplicate_id))
  })?;

  sqlx::query(
    r#"
    UPDATE workouts
    SET raw_json = ?1, samples_json = ?2, samples_fetched_at = ?3,
        best_efforts_json = ?4, best_efforts_computed_at = ?5,
        average_heartrate = ?6, max_heartrate = ?7, elevation_gain_meters = ?8
    WHERE id = ?9
    "#,
  )
  .bind(&merged.raw_json)
  .bind(&merged.samples_json)
  .bind(merged.samples_fetched_at)
  .bind(&merged.best_efforts_json)
  .bind(merged.best_efforts_computed_at)
  .bind(merged.average_heartrate)
  .bind(merged.max_heartrate)
  .bind(merged.elevation_gain_meters)
  .bind(canonical_id)
  .execute(&mut *conn)
  .await?;

  // Anything already archived into the duplicate now points at the survivor
  sqlx::query("UPDATE workouts SET merged_into_id = ?1 WHERE id = ?2 OR merged_into_id = ?2")
    .bind(canonical_id)
    .bind(duplicate_id)
    .execute(&mut *conn)
    .await?;

  sqlx::query(
    r#"
    INSERT INTO workout_merges (user_id, canonical_id, duplicate_id, similarity_score, resolution, merged_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    "#,
  )
  .bind(user_id)
  .bind(canonical_id)
  .bind(duplicate_id)
  .bind(pair.similarity_score)
  .bind(pair.decision.to_string())
  .bind(Utc::now())
  .execute(&mut *conn)
  .await?;

  tracing::debug!(
    canonical = canonical_id,
    duplicate = duplicate_id,
    score = pair.similarity_score,
    "workouts merged"
  );

  Ok(())
}
