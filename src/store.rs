//! Sample and result storage
//!
//! The pipeline talks to storage only through `SampleStore` and
//! `ResultStore`. `SqliteStore` implements both on one sqlx pool. Writes are
//! upserts so duplicate or concurrent writes for the same key are harmless.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::db::DbPool;
use crate::models::{
  format_clock, AnalysisResult, AnalysisStatus, LastAnalysis, LastAnalysisRow, Period, Sample,
  SampleRow,
};

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum StoreError {
  #[error("Database error: {0}")]
  Database(String),

  #[error("Serialization error: {0}")]
  Serialization(String),
}

impl From<sqlx::Error> for StoreError {
  fn from(e: sqlx::Error) -> Self {
    StoreError::Database(e.to_string())
  }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
  fn from(e: sqlx::migrate::MigrateError) -> Self {
    StoreError::Database(e.to_string())
  }
}

impl From<serde_json::Error> for StoreError {
  fn from(e: serde_json::Error) -> Self {
    StoreError::Serialization(e.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Store Traits
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait SampleStore: Send + Sync {
  /// Samples with `start <= recorded_at <= end`, oldest first
  async fn samples_in_range(
    &self,
    user_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<Vec<SampleRow>, StoreError>;

  /// Insert or replace the sample for its local calendar day; marks it pending
  async fn upsert_day_sample(&self, user_id: i64, sample: &Sample) -> Result<i64, StoreError>;

  async fn sample_for_day(&self, user_id: i64, day: NaiveDate) -> Result<Option<SampleRow>, StoreError>;

  async fn users_with_samples(&self) -> Result<Vec<i64>, StoreError>;

  async fn timezone(&self, user_id: i64) -> Result<Option<String>, StoreError>;

  async fn set_timezone(&self, user_id: i64, timezone: &str) -> Result<(), StoreError>;

  async fn set_day_status(
    &self,
    user_id: i64,
    day: NaiveDate,
    status: AnalysisStatus,
    error: Option<&str>,
  ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
  /// Unexpired cached result for a request hash
  async fn cached_result(&self, key: &str) -> Result<Option<AnalysisResult>, StoreError>;

  async fn cache_result(&self, key: &str, result: &AnalysisResult, ttl: Duration) -> Result<(), StoreError>;

  async fn append_history(&self, user_id: i64, period: Period, result: &AnalysisResult) -> Result<i64, StoreError>;

  async fn upsert_last(&self, user_id: i64, period: Period, result: &AnalysisResult) -> Result<(), StoreError>;

  async fn last_results(&self, user_id: i64) -> Result<Vec<LastAnalysis>, StoreError>;

  /// Delete expired cache rows, returning how many went
  async fn purge_expired(&self) -> Result<u64, StoreError>;
}

/// ---------------------------------------------------------------------------
/// SQLite Implementation
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: DbPool,
}

impl SqliteStore {
  pub fn new(pool: DbPool) -> Self {
    Self { pool }
  }

  pub fn pool(&self) -> &DbPool {
    &self.pool
  }
}

fn day_key(day: NaiveDate) -> String {
  day.format("%Y-%m-%d").to_string()
}

const SAMPLE_COLUMNS: &str = "id, user_id, recorded_at, sleep_hours, sleep_start, sleep_end, \
  mood, activity, productivity, stress, energy, concentration, sleep_quality, \
  caffeine, alcohol, exercise, note, analysis_status, analysis_error, analysis_updated_at";

#[async_trait]
impl SampleStore for SqliteStore {
  async fn samples_in_range(
    &self,
    user_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<Vec<SampleRow>, StoreError> {
    let query = format!(
      "SELECT {} FROM samples WHERE user_id = ?1 AND recorded_at >= ?2 AND recorded_at <= ?3 ORDER BY recorded_at ASC",
      SAMPLE_COLUMNS
    );
    let rows = sqlx::query_as::<_, SampleRow>(&query)
      .bind(user_id)
      .bind(start.trunc_subsecs(0))
      .bind(end.trunc_subsecs(0))
      .fetch_all(&self.pool)
      .await?;
    Ok(rows)
  }

  async fn upsert_day_sample(&self, user_id: i64, sample: &Sample) -> Result<i64, StoreError> {
    let recorded_at = sample.recorded_at.with_timezone(&Utc).trunc_subsecs(0);
    let local_day = day_key(sample.recorded_at.date_naive());

    let id: i64 = sqlx::query_scalar(
      r#"
      INSERT INTO samples (
        user_id, recorded_at, local_day, sleep_hours, sleep_start, sleep_end,
        mood, activity, productivity, stress, energy, concentration, sleep_quality,
        caffeine, alcohol, exercise, note,
        analysis_status, analysis_error, analysis_updated_at
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 'pending', NULL, ?18)
      ON CONFLICT(user_id, local_day) DO UPDATE SET
        recorded_at = excluded.recorded_at,
        sleep_hours = excluded.sleep_hours,
        sleep_start = excluded.sleep_start,
        sleep_end = excluded.sleep_end,
        mood = excluded.mood,
        activity = excluded.activity,
        productivity = excluded.productivity,
        stress = excluded.stress,
        energy = excluded.energy,
        concentration = excluded.concentration,
        sleep_quality = excluded.sleep_quality,
        caffeine = excluded.caffeine,
        alcohol = excluded.alcohol,
        exercise = excluded.exercise,
        note = excluded.note,
        analysis_status = 'pending',
        analysis_error = NULL,
        analysis_updated_at = excluded.analysis_updated_at
      RETURNING id
      "#,
    )
    .bind(user_id)
    .bind(recorded_at)
    .bind(local_day)
    .bind(sample.sleep_hours)
    .bind(sample.sleep_start.as_ref().map(format_clock))
    .bind(sample.sleep_end.as_ref().map(format_clock))
    .bind(sample.mood)
    .bind(sample.activity)
    .bind(sample.productivity)
    .bind(sample.stress)
    .bind(sample.energy)
    .bind(sample.concentration)
    .bind(sample.sleep_quality)
    .bind(sample.caffeine)
    .bind(sample.alcohol)
    .bind(sample.exercise)
    .bind(sample.note.as_deref())
    .bind(Utc::now().trunc_subsecs(0))
    .fetch_one(&self.pool)
    .await?;

    Ok(id)
  }

  async fn sample_for_day(&self, user_id: i64, day: NaiveDate) -> Result<Option<SampleRow>, StoreError> {
    let query = format!(
      "SELECT {} FROM samples WHERE user_id = ?1 AND local_day = ?2",
      SAMPLE_COLUMNS
    );
    let row = sqlx::query_as::<_, SampleRow>(&query)
      .bind(user_id)
      .bind(day_key(day))
      .fetch_optional(&self.pool)
      .await?;
    Ok(row)
  }

  async fn users_with_samples(&self) -> Result<Vec<i64>, StoreError> {
    let users: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT user_id FROM samples ORDER BY user_id")
      .fetch_all(&self.pool)
      .await?;
    Ok(users)
  }

  async fn timezone(&self, user_id: i64) -> Result<Option<String>, StoreError> {
    let tz: Option<String> = sqlx::query_scalar("SELECT timezone FROM user_settings WHERE user_id = ?1")
      .bind(user_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(tz)
  }

  async fn set_timezone(&self, user_id: i64, timezone: &str) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO user_settings (user_id, timezone, updated_at)
      VALUES (?1, ?2, ?3)
      ON CONFLICT(user_id) DO UPDATE SET
        timezone = excluded.timezone,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(user_id)
    .bind(timezone)
    .bind(Utc::now().trunc_subsecs(0))
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn set_day_status(
    &self,
    user_id: i64,
    day: NaiveDate,
    status: AnalysisStatus,
    error: Option<&str>,
  ) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      UPDATE samples
      SET analysis_status = ?1, analysis_error = ?2, analysis_updated_at = ?3
      WHERE user_id = ?4 AND local_day = ?5
      "#,
    )
    .bind(status.to_string())
    .bind(error)
    .bind(Utc::now().trunc_subsecs(0))
    .bind(user_id)
    .bind(day_key(day))
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}

#[async_trait]
impl ResultStore for SqliteStore {
  async fn cached_result(&self, key: &str) -> Result<Option<AnalysisResult>, StoreError> {
    let json: Option<String> =
      sqlx::query_scalar("SELECT result_json FROM response_cache WHERE cache_key = ?1 AND expires_at > ?2")
        .bind(key)
        .bind(Utc::now().trunc_subsecs(0))
        .fetch_optional(&self.pool)
        .await?;

    json
      .map(|j| serde_json::from_str(&j).map_err(StoreError::from))
      .transpose()
  }

  async fn cache_result(&self, key: &str, result: &AnalysisResult, ttl: Duration) -> Result<(), StoreError> {
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let expires_at = (Utc::now() + ttl).trunc_subsecs(0);
    let json = serde_json::to_string(result)?;

    sqlx::query(
      r#"
      INSERT INTO response_cache (cache_key, result_json, expires_at)
      VALUES (?1, ?2, ?3)
      ON CONFLICT(cache_key) DO UPDATE SET
        result_json = excluded.result_json,
        expires_at = excluded.expires_at
      "#,
    )
    .bind(key)
    .bind(json)
    .bind(expires_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn append_history(&self, user_id: i64, period: Period, result: &AnalysisResult) -> Result<i64, StoreError> {
    let json = serde_json::to_string(result)?;
    let id = sqlx::query(
      "INSERT INTO analysis_history (user_id, period, result_json, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(user_id)
    .bind(period.to_string())
    .bind(json)
    .bind(Utc::now().trunc_subsecs(0))
    .execute(&self.pool)
    .await?
    .last_insert_rowid();
    Ok(id)
  }

  async fn upsert_last(&self, user_id: i64, period: Period, result: &AnalysisResult) -> Result<(), StoreError> {
    let json = serde_json::to_string(result)?;
    sqlx::query(
      r#"
      INSERT INTO last_analyses (user_id, period, result_json, updated_at)
      VALUES (?1, ?2, ?3, ?4)
      ON CONFLICT(user_id, period) DO UPDATE SET
        result_json = excluded.result_json,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(user_id)
    .bind(period.to_string())
    .bind(json)
    .bind(Utc::now().trunc_subsecs(0))
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn last_results(&self, user_id: i64) -> Result<Vec<LastAnalysis>, StoreError> {
    let rows = sqlx::query_as::<_, LastAnalysisRow>(
      "SELECT user_id, period, result_json, updated_at FROM last_analyses WHERE user_id = ?1 ORDER BY period",
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;

    rows
      .into_iter()
      .map(|row| {
        let period = row
          .period
          .parse::<Period>()
          .map_err(StoreError::Serialization)?;
        Ok(LastAnalysis {
          user_id: row.user_id,
          period,
          result: serde_json::from_str(&row.result_json)?,
          updated_at: row.updated_at,
        })
      })
      .collect()
  }

  async fn purge_expired(&self) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM response_cache WHERE expires_at <= ?1")
      .bind(Utc::now().trunc_subsecs(0))
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected())
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
