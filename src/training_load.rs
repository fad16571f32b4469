//! Training load and block feedback analysis
//!
//! Computes the acute:chronic workload ratio over a user's workouts and
//! aggregates per-session feedback for a training block. The rule table at
//! the bottom turns both into severity-tagged warnings, a signed volume
//! adjustment and a suggested phase for the next block. Output is fully
//! structured; nothing downstream feeds back into the numbers.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use crate::config::{BlockThresholds, InsightsConfig, LoadMetric, LoadPolicy};
use crate::error::{InsightsError, Result};
use crate::models::{Injury, PlannedSession, TrainingBlock, Workout};
use crate::plan::{suggest_phase, PhaseDecision, TrainingPhase};

/// Largest single-block reduction the rules will ask for
const MAX_VOLUME_REDUCTION_PCT: f64 = -30.0;

/// ---------------------------------------------------------------------------
/// ACWR
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBand {
  CriticalOverload,
  Caution,
  Safe,
  Underloading,
  /// No chronic history to compare against
  NotApplicable,
}

impl LoadBand {
  pub fn classify(ratio: Option<f64>, policy: &LoadPolicy) -> Self {
    match ratio {
      None => LoadBand::NotApplicable,
      Some(r) if r > policy.critical_above => LoadBand::CriticalOverload,
      Some(r) if r > policy.caution_above => LoadBand::Caution,
      Some(r) if r >= policy.underload_below => LoadBand::Safe,
      Some(_) => LoadBand::Underloading,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcwrReport {
  pub as_of: DateTime<Utc>,
  pub metric: LoadMetric,
  /// Volume over the acute window ending at `as_of`
  pub acute_load: f64,
  /// Average volume per acute-window length over the preceding chronic window
  pub chronic_load: f64,
  /// None when there is no chronic load
  pub ratio: Option<f64>,
  pub band: LoadBand,
}

/// Volume of one workout in the configured unit (km or hours)
fn workout_volume(workout: &Workout, metric: LoadMetric) -> f64 {
  match metric {
    LoadMetric::Distance => workout.distance_km().unwrap_or(0.0),
    LoadMetric::Duration => workout.duration_seconds.map(|s| s as f64 / 3600.0).unwrap_or(0.0),
  }
}

/// Sum of volume for workouts in `(from, to]`
fn window_volume(workouts: &[Workout], from: DateTime<Utc>, to: DateTime<Utc>, metric: LoadMetric) -> f64 {
  workouts
    .iter()
    .filter(|w| w.merged_into_id.is_none())
    .filter(|w| w.started_at > from && w.started_at <= to)
    .map(|w| workout_volume(w, metric))
    .sum()
}

/// ACWR at `as_of`. The acute window is `(as_of - acute_days, as_of]`, the
/// chronic window is the `chronic_days` immediately before it.
pub fn compute_acwr(workouts: &[Workout], as_of: DateTime<Utc>, policy: &LoadPolicy) -> AcwrReport {
  let acute_start = as_of - Duration::days(policy.acute_days);
  let chronic_start = acute_start - Duration::days(policy.chronic_days);

  let acute_load = window_volume(workouts, acute_start, as_of, policy.metric);
  let chronic_total = window_volume(workouts, chronic_start, acute_start, policy.metric);
  let chronic_load = chronic_total * policy.acute_days as f64 / policy.chronic_days as f64;

  let ratio = if chronic_load > 0.0 {
    Some(acute_load / chronic_load)
  } else {
    None
  };

  AcwrReport {
    as_of,
    metric: policy.metric,
    acute_load,
    chronic_load,
    ratio,
    band: LoadBand::classify(ratio, policy),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyVolume {
  /// First day of the 7-day window
  pub week_start: NaiveDate,
  pub volume: f64,
  pub workouts: usize,
}

/// Trailing 7-day volumes ending at `as_of`, oldest first
pub fn weekly_volumes(
  workouts: &[Workout],
  as_of: DateTime<Utc>,
  weeks: usize,
  metric: LoadMetric,
) -> Vec<WeeklyVolume> {
  (0..weeks)
    .rev()
    .map(|i| {
      let end = as_of - Duration::days(7 * i as i64);
      let start = end - Duration::days(7);
      let in_week: Vec<&Workout> = workouts
        .iter()
        .filter(|w| w.merged_into_id.is_none() && w.started_at > start && w.started_at <= end)
        .collect();
      WeeklyVolume {
        week_start: (start + Duration::days(1)).date_naive(),
        volume: in_week.iter().map(|w| workout_volume(w, metric)).sum(),
        workouts: in_week.len(),
      }
    })
    .collect()
}

async fn load_active_workouts(pool: &SqlitePool, user_id: i64) -> Result<Vec<Workout>> {
  Ok(
    sqlx::query_as::<_, Workout>(
      "SELECT * FROM workouts WHERE user_id = ?1 AND merged_into_id IS NULL ORDER BY started_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?,
  )
}

/// ACWR for `user_id` from stored workouts
pub async fn calculate_acwr(
  pool: &SqlitePool,
  user_id: i64,
  as_of: DateTime<Utc>,
  policy: &LoadPolicy,
) -> Result<AcwrReport> {
  let workouts = load_active_workouts(pool, user_id).await?;
  let report = compute_acwr(&workouts, as_of, policy);

  tracing::debug!(
    user_id,
    acute = report.acute_load,
    chronic = report.chronic_load,
    ratio = ?report.ratio,
    band = ?report.band,
    "acwr computed"
  );

  Ok(report)
}

/// ---------------------------------------------------------------------------
/// Block Summary
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
  pub sessions_planned: usize,
  /// Sample size behind every aggregate below
  pub sessions_with_feedback: usize,
  pub avg_rpe: Option<f64>,
  /// Percent of sessions with feedback that reported pain (0-100)
  pub pain_percentage: Option<f64>,
  /// Percent of rated sessions above the too-hard RPE (0-100)
  pub too_hard_percentage: Option<f64>,
  /// Signed percent, positive = slower than planned
  pub avg_pace_variance: Option<f64>,
  /// Completed sessions over sessions with feedback (0-1)
  pub completion_rate: Option<f64>,
  pub pain_locations: Vec<String>,
}

fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() {
    None
  } else {
    Some(values.iter().sum::<f64>() / values.len() as f64)
  }
}

/// Aggregate whatever feedback exists; sessions without any are only counted
pub fn summarize_feedback(sessions: &[PlannedSession], thresholds: &BlockThresholds) -> BlockSummary {
  let feedback: Vec<_> = sessions.iter().filter_map(|s| s.feedback()).collect();
  let n = feedback.len();

  let rpes: Vec<f64> = feedback.iter().filter_map(|f| f.rpe).map(|r| r as f64).collect();
  let variances: Vec<f64> = feedback.iter().filter_map(|f| f.pace_variance_pct).collect();

  let pain_count = feedback.iter().filter(|f| f.pain_location.is_some()).count();
  let too_hard_count = rpes.iter().filter(|r| **r > thresholds.too_hard_rpe).count();
  let completed = feedback.iter().filter(|f| f.completed).count();

  let pain_locations: BTreeSet<String> = feedback
    .iter()
    .filter_map(|f| f.pain_location.as_ref())
    .map(|loc| loc.trim().to_lowercase())
    .collect();

  BlockSummary {
    sessions_planned: sessions.len(),
    sessions_with_feedback: n,
    avg_rpe: mean(&rpes),
    pain_percentage: (n > 0).then(|| pain_count as f64 / n as f64 * 100.0),
    too_hard_percentage: (!rpes.is_empty()).then(|| too_hard_count as f64 / rpes.len() as f64 * 100.0),
    avg_pace_variance: mean(&variances),
    completion_rate: (n > 0).then(|| completed as f64 / n as f64),
    pain_locations: pain_locations.into_iter().collect(),
  }
}

/// ---------------------------------------------------------------------------
/// Warnings & Recommendations
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Critical,
  High,
  Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
  AcwrCriticalOverload,
  AcwrCaution,
  AcwrUnderloading,
  FrequentPain,
  TooHard,
  HighRpe,
  LowCompletion,
  PaceOffTarget,
  InjuryHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
  pub kind: WarningKind,
  pub severity: Severity,
  /// Observed value that tripped the rule
  pub value: f64,
  pub threshold: f64,
  /// Body location for pain and injury warnings
  pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
  ReduceVolume,
  IncreaseVolume,
  Strengthening,
  RepeatPhase,
  AdjustPaceTargets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
  pub kind: RecommendationKind,
  pub severity: Severity,
  /// Signed percent change to next block volume, if this rule asks for one
  pub volume_change_pct: Option<f64>,
  /// Body location for strengthening work
  pub focus: Option<String>,
}

impl Recommendation {
  fn volume(kind: RecommendationKind, severity: Severity, pct: f64) -> Self {
    Self {
      kind,
      severity,
      volume_change_pct: Some(pct),
      focus: None,
    }
  }

  fn strengthening(severity: Severity, location: &str) -> Self {
    Self {
      kind: RecommendationKind::Strengthening,
      severity,
      volume_change_pct: None,
      focus: Some(location.to_string()),
    }
  }
}

/// Outcome of the rule table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
  pub warnings: Vec<Warning>,
  pub recommendations: Vec<Recommendation>,
  pub suggested_volume_adjustment_pct: f64,
  pub decision: PhaseDecision,
}

fn warn(kind: WarningKind, severity: Severity, value: f64, threshold: f64) -> Warning {
  Warning {
    kind,
    severity,
    value,
    threshold,
    location: None,
  }
}

/// Apply the rule table to a block summary, the load ratio and injury history
pub fn assess(
  summary: &BlockSummary,
  acwr: &AcwrReport,
  injuries: &[Injury],
  thresholds: &BlockThresholds,
  load: &LoadPolicy,
) -> Assessment {
  let mut warnings = Vec::new();
  let mut recs = Vec::new();
  let mut strengthen: BTreeSet<String> = BTreeSet::new();

  // Load ratio
  if let Some(ratio) = acwr.ratio {
    match acwr.band {
      LoadBand::CriticalOverload => {
        warnings.push(warn(WarningKind::AcwrCriticalOverload, Severity::Critical, ratio, load.critical_above));
        recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::Critical, -20.0));
      }
      LoadBand::Caution => {
        warnings.push(warn(WarningKind::AcwrCaution, Severity::High, ratio, load.caution_above));
        recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::High, -10.0));
      }
      LoadBand::Underloading => {
        warnings.push(warn(WarningKind::AcwrUnderloading, Severity::Medium, ratio, load.underload_below));
        recs.push(Recommendation::volume(RecommendationKind::IncreaseVolume, Severity::Medium, 10.0));
      }
      LoadBand::Safe | LoadBand::NotApplicable => {}
    }
  }

  // Pain
  if let Some(pain) = summary.pain_percentage {
    if pain >= thresholds.pain_critical_pct {
      warnings.push(warn(WarningKind::FrequentPain, Severity::Critical, pain, thresholds.pain_critical_pct));
      recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::Critical, -25.0));
      strengthen.extend(summary.pain_locations.iter().cloned());
    } else if pain >= thresholds.pain_high_pct {
      warnings.push(warn(WarningKind::FrequentPain, Severity::High, pain, thresholds.pain_high_pct));
      recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::High, -10.0));
    }
  }

  // Effort
  if let Some(pct) = summary.too_hard_percentage {
    if pct >= thresholds.too_hard_high_pct {
      warnings.push(warn(WarningKind::TooHard, Severity::High, pct, thresholds.too_hard_high_pct));
      recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::High, -10.0));
    }
  }
  if let Some(rpe) = summary.avg_rpe {
    if rpe > thresholds.avg_rpe_high {
      warnings.push(warn(WarningKind::HighRpe, Severity::High, rpe, thresholds.avg_rpe_high));
      recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::High, -10.0));
    }
  }

  // Adherence
  if let Some(rate) = summary.completion_rate {
    if rate < thresholds.completion_low {
      warnings.push(warn(WarningKind::LowCompletion, Severity::Medium, rate, thresholds.completion_low));
      recs.push(Recommendation::volume(RecommendationKind::RepeatPhase, Severity::Medium, -10.0));
    }
  }
  if let Some(variance) = summary.avg_pace_variance {
    if variance.abs() > thresholds.pace_variance_slow_pct {
      warnings.push(warn(WarningKind::PaceOffTarget, Severity::Medium, variance, thresholds.pace_variance_slow_pct));
      recs.push(Recommendation {
        kind: RecommendationKind::AdjustPaceTargets,
        severity: Severity::Medium,
        volume_change_pct: None,
        focus: None,
      });
    }
  }

  // Injury history. A relevant injury that hurt again this block is critical.
  let relevant: Vec<&Injury> = injuries.iter().filter(|i| i.is_relevant()).collect();
  for injury in &relevant {
    let location = injury.location.trim().to_lowercase();
    let flared = summary.pain_locations.contains(&location);
    let severity = if flared { Severity::Critical } else { Severity::High };
    warnings.push(Warning {
      kind: WarningKind::InjuryHistory,
      severity,
      value: injury.recurrence_count as f64,
      threshold: 0.0,
      location: Some(location.clone()),
    });
    if flared {
      recs.push(Recommendation::volume(RecommendationKind::ReduceVolume, Severity::Critical, -15.0));
    }
    strengthen.insert(location);
  }

  for location in &strengthen {
    let severity = if relevant.is_empty() { Severity::Medium } else { Severity::High };
    recs.push(Recommendation::strengthening(severity, location));
  }

  // Nothing wrong and the block felt comfortable
  let comfortable = matches!(summary.completion_rate, Some(rate) if rate >= thresholds.completion_good)
    && matches!(summary.avg_rpe, Some(rpe) if rpe <= thresholds.avg_rpe_comfortable);
  if warnings.is_empty() && comfortable {
    recs.push(Recommendation::volume(RecommendationKind::IncreaseVolume, Severity::Medium, 10.0));
  }

  let suggested_volume_adjustment_pct = volume_adjustment(&recs, !relevant.is_empty());

  let decision = if warnings.iter().any(|w| w.severity == Severity::Critical) {
    PhaseDecision::Deload
  } else if suggested_volume_adjustment_pct < 0.0
    || matches!(summary.completion_rate, Some(rate) if rate < thresholds.completion_low)
  {
    PhaseDecision::Hold
  } else if comfortable && relevant.is_empty() {
    PhaseDecision::Advance
  } else {
    PhaseDecision::Hold
  };

  Assessment {
    warnings,
    recommendations: recs,
    suggested_volume_adjustment_pct,
    decision,
  }
}

/// Any reduction wins over any increase; the deepest reduction is used.
/// Relevant injuries cap increases at zero.
fn volume_adjustment(recs: &[Recommendation], injured: bool) -> f64 {
  let changes: Vec<f64> = recs.iter().filter_map(|r| r.volume_change_pct).collect();

  if let Some(cut) = changes.iter().copied().filter(|c| *c < 0.0).reduce(f64::min) {
    return cut.max(MAX_VOLUME_REDUCTION_PCT);
  }

  let increase = changes.iter().copied().filter(|c| *c > 0.0).fold(0.0, f64::max);
  if injured {
    0.0
  } else {
    increase
  }
}

/// ---------------------------------------------------------------------------
/// Block Analysis
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAnalysis {
  pub block_id: i64,
  pub user_id: i64,
  pub phase: TrainingPhase,
  #[serde(flatten)]
  pub summary: BlockSummary,
  pub acwr: AcwrReport,
  pub warnings: Vec<Warning>,
  pub recommendations: Vec<Recommendation>,
  pub suggested_volume_adjustment_pct: f64,
  pub decision: PhaseDecision,
  pub suggested_phase: TrainingPhase,
}

/// Pure analysis over already-loaded block data
pub fn build_block_analysis(
  block: &TrainingBlock,
  sessions: &[PlannedSession],
  injuries: &[Injury],
  acwr: AcwrReport,
  config: &InsightsConfig,
) -> BlockAnalysis {
  let phase = match block.phase.parse::<TrainingPhase>() {
    Ok(phase) => phase,
    Err(e) => {
      tracing::warn!(block_id = block.id, error = %e, "unknown block phase, treating as base");
      TrainingPhase::default()
    }
  };

  let summary = summarize_feedback(sessions, &config.block);
  let assessment = assess(&summary, &acwr, injuries, &config.block, &config.load);

  BlockAnalysis {
    block_id: block.id,
    user_id: block.user_id,
    phase,
    summary,
    acwr,
    warnings: assessment.warnings,
    recommendations: assessment.recommendations,
    suggested_volume_adjustment_pct: assessment.suggested_volume_adjustment_pct,
    decision: assessment.decision,
    suggested_phase: suggest_phase(phase, assessment.decision),
  }
}

/// Analyse a stored block: feedback, injuries and load up to the block end
pub async fn analyze_block(pool: &SqlitePool, block_id: i64, config: &InsightsConfig) -> Result<BlockAnalysis> {
  let block = sqlx::query_as::<_, TrainingBlock>("SELECT * FROM training_blocks WHERE id = ?1")
    .bind(block_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| InsightsError::NotFound(format!("training block {}", block_id)))?;

  let sessions = sqlx::query_as::<_, PlannedSession>(
    r#"
    SELECT
      p.id AS planned_workout_id, p.scheduled_date, p.workout_type, p.planned_distance_km,
      f.id AS feedback_id, f.rpe, f.pain_location, f.pace_variance_pct, f.completed
    FROM planned_workouts p
    LEFT JOIN workout_feedback f ON f.planned_workout_id = p.id
    WHERE p.block_id = ?1
    ORDER BY p.scheduled_date, p.id
    "#,
  )
  .bind(block_id)
  .fetch_all(pool)
  .await?;

  let injuries = sqlx::query_as::<_, Injury>(
    "SELECT id, user_id, location, status, recurrence_count FROM injuries WHERE user_id = ?1",
  )
  .bind(block.user_id)
  .fetch_all(pool)
  .await?;

  let now = Utc::now();
  let block_end = block
    .end_date
    .and_hms_opt(23, 59, 59)
    .map(|end| end.and_utc())
    .unwrap_or(now);
  let acwr = calculate_acwr(pool, block.user_id, block_end.min(now), &config.load).await?;

  let analysis = build_block_analysis(&block, &sessions, &injuries, acwr, config);

  tracing::info!(
    block_id,
    sessions = analysis.summary.sessions_planned,
    with_feedback = analysis.summary.sessions_with_feedback,
    warnings = analysis.warnings.len(),
    volume_pct = analysis.suggested_volume_adjustment_pct,
    next_phase = %analysis.suggested_phase,
    "block analysed"
  );

  Ok(analysis)
}

/// Persist an analysis. Returns the new row id.
pub async fn save_block_analysis(pool: &SqlitePool, analysis: &BlockAnalysis) -> Result<i64> {
  let result = sqlx::query(
    r#"
    INSERT INTO block_analyses (block_id, analysis_json, suggested_phase, suggested_volume_adjustment_pct)
    VALUES (?1, ?2, ?3, ?4)
    "#,
  )
  .bind(analysis.block_id)
  .bind(serde_json::to_string(analysis)?)
  .bind(analysis.suggested_phase.to_string())
  .bind(analysis.suggested_volume_adjustment_pct)
  .execute(pool)
  .await?;

  Ok(result.last_insert_rowid())
}
