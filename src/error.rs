use serde::Serialize;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum InsightsError {
  /// Sample input that cannot be analysed (too few points, non-monotonic)
  #[error("Invalid sample series: {0}")]
  InvalidSeries(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Serialize for InsightsError {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

pub type Result<T> = std::result::Result<T, InsightsError>;

/// A single failed item inside a batch. Batches keep going past these.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
  pub workout_id: i64,
  pub error: String,
}

impl ItemFailure {
  pub fn new(workout_id: i64, error: &InsightsError) -> Self {
    Self {
      workout_id,
      error: error.to_string(),
    }
  }
}
