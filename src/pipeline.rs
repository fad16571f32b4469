//! One full insight pass for a user: merge duplicates, refresh best efforts,
//! then reconcile personal records against the merged workout set.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::best_effort::{refresh_best_efforts, standard_targets, BestEffortBatch};
use crate::config::InsightsConfig;
use crate::duplicates::{find_and_merge_duplicates, MergeReport};
use crate::error::Result;
use crate::records::{reconcile_user_records, ReconcileReport};

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
  pub user_id: i64,
  pub merge: MergeReport,
  pub best_efforts: BestEffortBatch,
  pub records: ReconcileReport,
}

/// Merge must run first so records never count the same run twice
pub async fn run_user_pass(pool: &SqlitePool, user_id: i64, config: &InsightsConfig) -> Result<PassReport> {
  tracing::info!(user_id, "starting insight pass");

  let merge = find_and_merge_duplicates(pool, user_id, &config.merge, false).await?;
  let best_efforts = refresh_best_efforts(pool, user_id, &standard_targets()).await?;
  let records = reconcile_user_records(pool, user_id, &config.records).await?;

  tracing::info!(
    user_id,
    merged = merge.merged,
    efforts_refreshed = best_efforts.refreshed,
    records_created = records.created.len(),
    "insight pass complete"
  );

  Ok(PassReport {
    user_id,
    merge,
    best_efforts,
    records,
  })
}
