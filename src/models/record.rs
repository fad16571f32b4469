use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One row of the personal-record ledger. Rows are superseded, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonalRecord {
  pub id: i64,
  pub user_id: i64,
  pub distance_key: String,
  pub time_seconds: f64,
  pub date_achieved: NaiveDate,
  pub workout_id: Option<i64>,
  /// "range_bucket", "derived" or "reported"
  pub origin: String,
  pub is_current: bool,
  pub superseded_at: Option<DateTime<Utc>>,
  pub notes: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
}
