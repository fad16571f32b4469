//! Structured logging setup

use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Json,
  Pretty,
  Compact,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
  /// Filter directive, e.g. `info` or `trainer_insights=debug`
  pub level: String,
  pub format: LogFormat,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      format: LogFormat::Pretty,
    }
  }
}

impl LoggingConfig {
  /// Read `RUST_LOG` and `LOG_FORMAT` (json, pretty, compact)
  pub fn from_env() -> Self {
    let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let format = match env::var("LOG_FORMAT").as_deref() {
      Ok("json") => LogFormat::Json,
      Ok("compact") => LogFormat::Compact,
      _ => LogFormat::Pretty,
    };
    Self { level, format }
  }
}

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
  let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry().with(filter);

  let result = match config.format {
    LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
    LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
  };

  if result.is_ok() {
    tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
  }
}
