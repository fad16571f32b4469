//! Workout insights core: best-effort extraction, personal-record ledger,
//! cross-source duplicate merging and training-load analysis over a SQLite
//! workout store.

pub mod best_effort;
pub mod config;
pub mod db;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod plan;
pub mod records;
pub mod series;
pub mod training_load;

#[cfg(test)]
pub(crate) mod test_utils;

pub use best_effort::{extract_best_efforts, refresh_best_efforts, standard_targets, BestEffort, DistanceTarget};
pub use config::InsightsConfig;
pub use db::{initialize_db, DbPool};
pub use duplicates::{find_and_merge_duplicates, plan_merges, DuplicateCandidatePair, MergeReport};
pub use error::{InsightsError, Result};
pub use logging::{init_logging, LoggingConfig};
pub use pipeline::{run_user_pass, PassReport};
pub use plan::{PhaseDecision, TrainingPhase};
pub use records::{
  load_current_records, load_record_history, reconcile_records, reconcile_user_records, CandidatePerformance,
  RecordObservation, ReconcileReport,
};
pub use series::{Sample, SampleSeries};
pub use training_load::{analyze_block, calculate_acwr, save_block_analysis, AcwrReport, BlockAnalysis, LoadBand};
