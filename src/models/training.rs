use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrainingBlock {
  pub id: i64,
  pub user_id: i64,
  pub phase: String,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub status: String,
  pub created_at: Option<DateTime<Utc>>,
}

/// A planned session joined with its feedback, if any was given
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlannedSession {
  pub planned_workout_id: i64,
  pub scheduled_date: NaiveDate,
  pub workout_type: String,
  pub planned_distance_km: Option<f64>,
  #[sqlx(flatten)]
  pub feedback: FeedbackFields,
}

/// Nullable feedback columns from the LEFT JOIN
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeedbackFields {
  pub feedback_id: Option<i64>,
  pub rpe: Option<i64>,
  pub pain_location: Option<String>,
  pub pace_variance_pct: Option<f64>,
  pub completed: Option<bool>,
}

impl PlannedSession {
  pub fn feedback(&self) -> Option<WorkoutFeedback> {
    self.feedback.feedback_id.map(|_| WorkoutFeedback {
      rpe: self.feedback.rpe,
      pain_location: self
        .feedback
        .pain_location
        .clone()
        .filter(|loc| !loc.trim().is_empty()),
      pace_variance_pct: self.feedback.pace_variance_pct,
      completed: self.feedback.completed.unwrap_or(false),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutFeedback {
  pub rpe: Option<i64>,
  pub pain_location: Option<String>,
  /// Signed: positive means slower than planned
  pub pace_variance_pct: Option<f64>,
  pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjuryStatus {
  Active,
  Monitoring,
  Resolved,
}

impl std::str::FromStr for InjuryStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "active" => Ok(Self::Active),
      "monitoring" => Ok(Self::Monitoring),
      "resolved" => Ok(Self::Resolved),
      _ => Err(format!("Unknown injury status: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Injury {
  pub id: i64,
  pub user_id: i64,
  pub location: String,
  pub status: String,
  pub recurrence_count: i64,
}

impl Injury {
  /// Recurring or still-open injuries shape the next block
  pub fn is_relevant(&self) -> bool {
    let open = matches!(
      self.status.parse::<InjuryStatus>(),
      Ok(InjuryStatus::Active) | Ok(InjuryStatus::Monitoring)
    );
    open || self.recurrence_count > 0
  }
}
