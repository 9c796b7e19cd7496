//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Sample factories
//! - A scripted text generator
//! - Helper assertions

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::analysis::{ScoringConfig, WellnessMetrics};
use crate::llm::{FinishReason, Generation, LlmError, TextGenerator};
use crate::models::{AnalysisResult, NarrativeOutcome, Period, Sample, SleepDigest};
use crate::store::{SampleStore, SqliteStore};

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// Store samples for a user, returning their row IDs
pub async fn seed_samples(store: &SqliteStore, user_id: i64, samples: &[Sample]) -> Vec<i64> {
  let mut ids = Vec::new();
  for sample in samples {
    let id = store
      .upsert_day_sample(user_id, sample)
      .await
      .expect("Failed to seed sample");
    ids.push(id);
  }
  ids
}

/// ---------------------------------------------------------------------------
/// Sample Factories
/// ---------------------------------------------------------------------------

/// Fixed reference instant: Friday 2024-03-15 12:00 UTC
pub fn base_time() -> DateTime<FixedOffset> {
  Utc
    .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
    .unwrap()
    .fixed_offset()
}

/// Builder for samples with middling defaults
#[derive(Debug, Clone)]
pub struct SampleBuilder {
  sample: Sample,
}

impl SampleBuilder {
  pub fn at(recorded_at: DateTime<FixedOffset>) -> Self {
    Self {
      sample: Sample {
        recorded_at,
        sleep_hours: 7.5,
        sleep_start: None,
        sleep_end: None,
        mood: 6.0,
        activity: 6.0,
        productivity: 6.0,
        stress: 4.0,
        energy: 6.0,
        concentration: 6.0,
        sleep_quality: 6.0,
        caffeine: false,
        alcohol: false,
        exercise: false,
        note: None,
      },
    }
  }

  pub fn days_ago(days: i64) -> Self {
    Self::at(base_time() - Duration::days(days))
  }

  pub fn sleep(mut self, hours: f64) -> Self {
    self.sample.sleep_hours = hours;
    self
  }

  pub fn sleep_window(mut self, start: &str, end: &str) -> Self {
    self.sample.sleep_start = NaiveTime::parse_from_str(start, "%H:%M").ok();
    self.sample.sleep_end = NaiveTime::parse_from_str(end, "%H:%M").ok();
    self
  }

  pub fn mood(mut self, mood: f64) -> Self {
    self.sample.mood = mood;
    self
  }

  pub fn stress(mut self, stress: f64) -> Self {
    self.sample.stress = stress;
    self
  }

  /// Set every 0-10 rating except stress
  pub fn ratings(mut self, value: f64) -> Self {
    self.sample.mood = value;
    self.sample.activity = value;
    self.sample.productivity = value;
    self.sample.energy = value;
    self.sample.concentration = value;
    self.sample.sleep_quality = value;
    self
  }

  pub fn caffeine(mut self, on: bool) -> Self {
    self.sample.caffeine = on;
    self
  }

  pub fn alcohol(mut self, on: bool) -> Self {
    self.sample.alcohol = on;
    self
  }

  pub fn exercise(mut self, on: bool) -> Self {
    self.sample.exercise = on;
    self
  }

  pub fn note(mut self, note: &str) -> Self {
    self.sample.note = Some(note.to_string());
    self
  }

  pub fn build(self) -> Sample {
    self.sample
  }
}

fn healthy_at(recorded_at: DateTime<FixedOffset>) -> Sample {
  let mut sample = SampleBuilder::at(recorded_at)
    .sleep(7.75)
    .sleep_window("23:00", "06:45")
    .stress(3.0)
    .exercise(true)
    .build();
  sample.mood = 8.5;
  sample.activity = 7.0;
  sample.energy = 8.0;
  sample.concentration = 8.0;
  sample.sleep_quality = 8.5;
  sample.productivity = 8.0;
  sample
}

/// One strong day per calendar day, oldest first, ending at `base_time()`
pub fn healthy_samples(count: usize) -> Vec<Sample> {
  (0..count as i64)
    .rev()
    .map(|d| healthy_at(base_time() - Duration::days(d)))
    .collect()
}

/// Strong days on the given weekdays only, oldest first
pub fn healthy_samples_on_weekdays(count: usize, weekdays: &[Weekday]) -> Vec<Sample> {
  let mut samples = Vec::with_capacity(count);
  let mut day = 0;
  while samples.len() < count && !weekdays.is_empty() {
    let at = base_time() - Duration::days(day);
    if weekdays.contains(&at.weekday()) {
      samples.push(healthy_at(at));
    }
    day += 1;
  }
  samples.reverse();
  samples
}

/// Short sleep, low ratings and high stress every day, oldest first
pub fn struggling_samples(count: usize) -> Vec<Sample> {
  (0..count as i64)
    .rev()
    .map(|d| {
      let mut sample = SampleBuilder::days_ago(d)
        .sleep(4.5)
        .ratings(2.0)
        .stress(8.5)
        .alcohol(true)
        .exercise(false)
        .build();
      sample.sleep_quality = 3.0;
      sample
    })
    .collect()
}

/// A scored result over ten healthy days with no narrative
pub fn mock_analysis_result(period: Period) -> AnalysisResult {
  let samples = healthy_samples(10);
  let metrics = WellnessMetrics::compute(&samples, &ScoringConfig::default());
  AnalysisResult {
    period,
    timezone: "UTC".to_string(),
    points: samples.len(),
    unique_days: samples.len(),
    weekday_energy: metrics.weekday_energy,
    productivity: metrics.productivity,
    burnout: metrics.burnout,
    sleep: SleepDigest {
      avg_sleep_hours: 7.75,
      avg_sleep_start: Some("23:00".to_string()),
      avg_sleep_end: Some("06:45".to_string()),
      sleep_delta_7d: 0.0,
    },
    schedule: None,
    narrative: NarrativeOutcome::Disabled,
    generated_at: base_time().with_timezone(&Utc),
  }
}

/// ---------------------------------------------------------------------------
/// Scripted Text Generator
/// ---------------------------------------------------------------------------

/// One recorded `generate` call
#[derive(Debug, Clone)]
pub struct RecordedCall {
  pub system: String,
  pub user: String,
  pub max_tokens: u32,
}

/// Replays scripted responses in order and records every request
///
/// Running out of script yields an API error.
pub struct ScriptedGenerator {
  script: Mutex<VecDeque<Result<Generation, LlmError>>>,
  calls: Mutex<Vec<RecordedCall>>,
  delay: Option<std::time::Duration>,
}

impl ScriptedGenerator {
  pub fn new(script: Vec<Result<Generation, LlmError>>) -> Self {
    Self {
      script: Mutex::new(script.into()),
      calls: Mutex::new(Vec::new()),
      delay: None,
    }
  }

  /// Sleep before answering each call
  pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
  async fn generate(&self, system: &str, user: &str, max_tokens: u32) -> Result<Generation, LlmError> {
    self.calls.lock().unwrap().push(RecordedCall {
      system: system.to_string(),
      user: user.to_string(),
      max_tokens,
    });

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    let next = self.script.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Err(LlmError::Api("script exhausted".to_string())))
  }
}

/// A generation that finished normally
pub fn stop(text: &str) -> Generation {
  generation(text, FinishReason::Stop)
}

pub fn generation(text: &str, finish: FinishReason) -> Generation {
  Generation {
    text: text.to_string(),
    finish,
  }
}

/// ---------------------------------------------------------------------------
/// Assertion Helpers
/// ---------------------------------------------------------------------------

/// Assert that two floating point values are approximately equal
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_test_db() {
    let pool = setup_test_db().await;

    let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(result.0, 0);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_seed_samples() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());

    let ids = seed_samples(&store, 1, &healthy_samples(4)).await;
    assert_eq!(ids.len(), 4);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples WHERE user_id = 1")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(count.0, 4);

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_base_time_is_friday() {
    assert_eq!(base_time().weekday(), Weekday::Fri);
  }

  #[test]
  fn test_healthy_samples_are_time_ordered() {
    let samples = healthy_samples(5);
    assert_eq!(samples.len(), 5);
    assert!(samples.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
    assert_eq!(samples[4].recorded_at, base_time());
  }

  #[test]
  fn test_healthy_samples_on_weekdays() {
    let samples = healthy_samples_on_weekdays(6, &[Weekday::Mon, Weekday::Fri]);
    assert_eq!(samples.len(), 6);
    assert!(samples
      .iter()
      .all(|s| matches!(s.recorded_at.weekday(), Weekday::Mon | Weekday::Fri)));
    assert!(samples.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
  }

  #[tokio::test]
  async fn test_scripted_generator_replays_then_errors() {
    let generator = ScriptedGenerator::new(vec![Ok(stop("one"))]);

    let first = generator.generate("sys", "user", 10).await.unwrap();
    assert_eq!(first.text, "one");
    assert!(generator.generate("sys", "again", 20).await.is_err());

    let calls = generator.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].max_tokens, 20);
  }

  #[test]
  fn test_assert_approx_eq_macro() {
    assert_approx_eq!(1.0_f64, 1.0001_f64, 0.001);
    assert_approx_eq!(100.0_f64, 100.05_f64, 0.1);
  }
}
