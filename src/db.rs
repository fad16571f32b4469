use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::Result;

pub type DbPool = SqlitePool;

/// Open the connection pool for `database_url` and run migrations
pub async fn initialize_db(database_url: &str) -> Result<DbPool> {
  tracing::info!(url = %database_url, "Initializing database");

  let options = SqliteConnectOptions::from_str(database_url)?
    .create_if_missing(true)
    .foreign_keys(true);

  // Every in-memory connection is its own database, so keep a single one
  let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

  let pool = SqlitePoolOptions::new()
    .max_connections(max_connections)
    .connect_with(options)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  tracing::info!("Database initialized successfully");

  Ok(pool)
}
