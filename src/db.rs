use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::store::StoreError;

pub type DbPool = SqlitePool;

/// Initialize the database connection pool and run migrations
///
/// An in-memory database lives per connection, so it gets a single one.
pub async fn initialize_db(database_url: &str) -> Result<DbPool, StoreError> {
  let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

  tracing::info!(target: "wellness::db", max_connections, "initializing database");

  let pool = SqlitePoolOptions::new()
    .max_connections(max_connections)
    .connect(database_url)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  tracing::info!(target: "wellness::db", "database ready");

  Ok(pool)
}
