//! Per-request analysis pipeline
//!
//! `Analyzer` wires storage, the scoring engine and the narrative
//! orchestrator together: cache lookup, sample loading, scoring, narrative,
//! then persistence. Every storage call and the narrative stage run under a
//! timeout. Narrative failures are folded into the result; only input and
//! read failures fail a request.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};

use crate::analysis::{ScoringConfig, WellnessMetrics};
use crate::insight::{GeneratedInsight, InsightError, InsightOrchestrator, InsightStatus};
use crate::models::{
  format_clock, now_in, parse_clock, AnalysisResult, AnalysisStatus, LastAnalysis,
  NarrativeOutcome, Period, ProposedSchedule, Sample, SleepDigest,
};
use crate::prompt::InsightPrompt;
use crate::stats::{circular_mean_time, round2, sleep_delta, trailing_mean_sleep, unique_days};
use crate::store::{ResultStore, SampleStore, StoreError};

const SLEEP_AVERAGE_DAYS: i64 = 14;
const SLEEP_DELTA_DAYS: i64 = 7;
const DEFAULT_WAKE_TIME: (u32, u32) = (7, 30);

const RECOVERY_TIPS: [&str; 3] = [
  "Plan demanding work for your highest-energy days and keep routine tasks for the rest.",
  "If energy drops after lunch, try a 10 to 15 minute walk.",
  "Two or three times a week, block 60 to 90 minutes of focus time without meetings.",
];

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum PipelineError {
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("No samples for user {user_id} in period {period}")]
  NoSamples { user_id: i64, period: Period },

  #[error(transparent)]
  Storage(#[from] StoreError),

  #[error("Timed out: {0}")]
  Timeout(String),
}

/// ---------------------------------------------------------------------------
/// Requests and Settings
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
  pub user_id: i64,
  pub period: Period,
  /// IANA zone name; falls back to the stored user setting, then UTC
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timezone: Option<String>,
}

impl AnalyzeRequest {
  pub fn new(user_id: i64, period: Period) -> Self {
    Self {
      user_id,
      period,
      timezone: None,
    }
  }

  pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
    self.timezone = Some(timezone.into());
    self
  }

  fn normalized(&self) -> Self {
    Self {
      user_id: self.user_id,
      period: self.period,
      timezone: self
        .timezone
        .as_deref()
        .map(str::trim)
        .filter(|tz| !tz.is_empty())
        .map(str::to_string),
    }
  }

  /// SHA-256 hex of the normalized request JSON
  pub fn cache_key(&self) -> Result<String, PipelineError> {
    let payload =
      serde_json::to_vec(&self.normalized()).map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;
    let digest = Sha256::digest(&payload);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
  }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
  pub cache_ttl: Duration,
  pub insight_timeout: Duration,
  pub storage_timeout: Duration,
  pub scoring: ScoringConfig,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      cache_ttl: Duration::from_secs(900),
      insight_timeout: Duration::from_secs(120),
      storage_timeout: Duration::from_secs(10),
      scoring: ScoringConfig::default(),
    }
  }
}

/// Where a tracked sample landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDay {
  pub sample_id: i64,
  pub day: NaiveDate,
  pub timezone: String,
}

/// Outcome of a batch re-analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
  pub succeeded: Vec<i64>,
  pub failed: Vec<(i64, String)>,
}

/// ---------------------------------------------------------------------------
/// Derived Sleep Figures
/// ---------------------------------------------------------------------------

pub fn sleep_digest(samples: &[Sample]) -> SleepDigest {
  SleepDigest {
    avg_sleep_hours: round2(trailing_mean_sleep(samples, SLEEP_AVERAGE_DAYS)),
    avg_sleep_start: circular_mean_time(samples.iter().filter_map(|s| s.sleep_start))
      .map(|t| format_clock(&t)),
    avg_sleep_end: circular_mean_time(samples.iter().filter_map(|s| s.sleep_end))
      .map(|t| format_clock(&t)),
    sleep_delta_7d: sleep_delta(samples, SLEEP_DELTA_DAYS),
  }
}

/// Bedtime-to-wake window ending at the usual wake time
///
/// Bedtime is the wake time minus the trailing average sleep. The wake time
/// is the mean reported one, or 07:30 when none was reported.
pub fn propose_schedule(digest: &SleepDigest) -> ProposedSchedule {
  let sleep_window = (digest.avg_sleep_hours > 0.0).then(|| {
    let wake = digest
      .avg_sleep_end
      .as_deref()
      .and_then(parse_clock)
      .or_else(|| NaiveTime::from_hms_opt(DEFAULT_WAKE_TIME.0, DEFAULT_WAKE_TIME.1, 0))
      .unwrap_or_default();
    let minutes = (digest.avg_sleep_hours * 60.0).round() as i64;
    let (bed, _) = wake.overflowing_sub_signed(ChronoDuration::minutes(minutes));
    format!("{}–{}", format_clock(&bed), format_clock(&wake))
  });

  ProposedSchedule {
    sleep_window,
    recovery_tips: RECOVERY_TIPS.iter().map(|t| t.to_string()).collect(),
  }
}

fn narrative_outcome(result: Result<GeneratedInsight, InsightError>) -> NarrativeOutcome {
  match result {
    Ok(insight) => match insight.status {
      InsightStatus::Accepted => NarrativeOutcome::Accepted {
        text: insight.text,
        calls: insight.calls,
      },
      InsightStatus::BestEffort { violations } => NarrativeOutcome::BestEffort {
        text: insight.text,
        violations: violations.iter().map(|v| v.to_string()).collect(),
        calls: insight.calls,
      },
    },
    Err(e) => NarrativeOutcome::Unavailable {
      reason: e.to_string(),
      partial: e.partial().map(str::to_string),
    },
  }
}

fn parse_timezone(name: &str) -> Option<Tz> {
  name.parse::<Tz>().ok()
}

/// ---------------------------------------------------------------------------
/// Analyzer
/// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Analyzer {
  samples: Arc<dyn SampleStore>,
  results: Arc<dyn ResultStore>,
  insight: Option<InsightOrchestrator>,
  settings: PipelineSettings,
}

impl Analyzer {
  pub fn new(samples: Arc<dyn SampleStore>, results: Arc<dyn ResultStore>, settings: PipelineSettings) -> Self {
    Self {
      samples,
      results,
      insight: None,
      settings,
    }
  }

  pub fn with_insight(mut self, orchestrator: InsightOrchestrator) -> Self {
    self.insight = Some(orchestrator);
    self
  }

  async fn storage<T, F>(&self, operation: &str, fut: F) -> Result<T, PipelineError>
  where
    F: Future<Output = Result<T, StoreError>>,
  {
    match tokio::time::timeout(self.settings.storage_timeout, fut).await {
      Ok(result) => result.map_err(PipelineError::from),
      Err(_) => Err(PipelineError::Timeout(format!("storage {}", operation))),
    }
  }

  /// Log and drop failures of writes that must not fail the request
  async fn best_effort<F>(&self, operation: &str, fut: F)
  where
    F: Future<Output = Result<(), StoreError>>,
  {
    if let Err(e) = self.storage(operation, fut).await {
      tracing::warn!(target: "wellness::pipeline", operation, error = %e, "storage write failed");
    }
  }

  /// Request zone, else the stored user setting, else UTC
  async fn resolve_timezone(&self, user_id: i64, requested: Option<&str>) -> Result<(String, Tz), PipelineError> {
    let requested = requested.map(str::trim).filter(|tz| !tz.is_empty());
    let name = match requested {
      Some(tz) => Some(tz.to_string()),
      None => self.storage("timezone", self.samples.timezone(user_id)).await?,
    };

    let Some(name) = name else {
      return Ok(("UTC".to_string(), Tz::UTC));
    };
    match parse_timezone(&name) {
      Some(tz) => Ok((name, tz)),
      None => {
        tracing::warn!(target: "wellness::pipeline", user_id, timezone = %name, "unknown timezone, using UTC");
        Ok(("UTC".to_string(), Tz::UTC))
      }
    }
  }

  /// Analyze one period, serving an unexpired cached result when present
  pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, PipelineError> {
    self.run(request, true).await
  }

  /// Analyze one period ignoring the cache; the fresh result is cached
  pub async fn refresh(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, PipelineError> {
    self.run(request, false).await
  }

  async fn run(&self, request: &AnalyzeRequest, use_cache: bool) -> Result<AnalysisResult, PipelineError> {
    if request.user_id <= 0 {
      return Err(PipelineError::InvalidRequest("user id is required".to_string()));
    }
    let key = request.cache_key()?;

    if use_cache {
      match self.storage("cache read", self.results.cached_result(&key)).await {
        Ok(Some(result)) => {
          tracing::debug!(target: "wellness::pipeline", user_id = request.user_id, period = %request.period, "cache hit");
          return Ok(result);
        }
        Ok(None) => {}
        Err(e) => {
          tracing::warn!(target: "wellness::pipeline", error = %e, "cache read failed");
        }
      }
    }

    let (tz_name, tz) = self
      .resolve_timezone(request.user_id, request.timezone.as_deref())
      .await?;
    let (start, end) = request.period.range(now_in(&tz));

    let rows = self
      .storage(
        "samples",
        self.samples.samples_in_range(request.user_id, start, end),
      )
      .await?;
    if rows.is_empty() {
      return Err(PipelineError::NoSamples {
        user_id: request.user_id,
        period: request.period,
      });
    }
    let samples: Vec<Sample> = rows.into_iter().map(|row| row.into_sample(&tz)).collect();

    tracing::info!(
      target: "wellness::pipeline",
      user_id = request.user_id,
      period = %request.period,
      timezone = %tz_name,
      points = samples.len(),
      "analyzing"
    );

    let metrics = WellnessMetrics::compute(&samples, &self.settings.scoring);
    let sleep = sleep_digest(&samples);
    let schedule = propose_schedule(&sleep);
    let narrative = self
      .narrate(request.period, &tz_name, &samples, &metrics, &schedule)
      .await;

    let result = AnalysisResult {
      period: request.period,
      timezone: tz_name,
      points: samples.len(),
      unique_days: unique_days(&samples),
      weekday_energy: metrics.weekday_energy,
      productivity: metrics.productivity,
      burnout: metrics.burnout,
      sleep,
      schedule: Some(schedule),
      narrative,
      generated_at: Utc::now(),
    };

    self.persist(request, &key, &result).await;
    Ok(result)
  }

  async fn narrate(
    &self,
    period: Period,
    timezone: &str,
    samples: &[Sample],
    metrics: &WellnessMetrics,
    schedule: &ProposedSchedule,
  ) -> NarrativeOutcome {
    let Some(orchestrator) = &self.insight else {
      return NarrativeOutcome::Disabled;
    };

    let prompt = InsightPrompt::build(period, timezone, samples, metrics, Some(schedule.clone()));
    match tokio::time::timeout(self.settings.insight_timeout, orchestrator.generate(&prompt)).await {
      Ok(result) => {
        if let Err(e) = &result {
          tracing::warn!(target: "wellness::pipeline", error = %e, "narrative stage failed");
        }
        narrative_outcome(result)
      }
      Err(_) => {
        tracing::warn!(
          target: "wellness::pipeline",
          timeout_secs = self.settings.insight_timeout.as_secs_f64(),
          "narrative stage timed out"
        );
        NarrativeOutcome::Unavailable {
          reason: "narrative stage timed out".to_string(),
          partial: None,
        }
      }
    }
  }

  async fn persist(&self, request: &AnalyzeRequest, key: &str, result: &AnalysisResult) {
    if result.narrative.is_cacheable() {
      self
        .best_effort(
          "cache write",
          self.results.cache_result(key, result, self.settings.cache_ttl),
        )
        .await;
    } else {
      tracing::debug!(target: "wellness::pipeline", user_id = request.user_id, "unsettled narrative, not cached");
    }

    let history = self.results.append_history(request.user_id, request.period, result);
    if let Err(e) = self.storage("history", history).await {
      tracing::warn!(target: "wellness::pipeline", error = %e, "history append failed");
    }

    self
      .best_effort(
        "last result",
        self.results.upsert_last(request.user_id, request.period, result),
      )
      .await;
  }

  /// Store a day's sample in the user's zone and mark the day pending
  ///
  /// A second sample for the same local day replaces the first.
  pub async fn track(&self, user_id: i64, sample: Sample, timezone: Option<&str>) -> Result<TrackedDay, PipelineError> {
    if user_id <= 0 {
      return Err(PipelineError::InvalidRequest("user id is required".to_string()));
    }

    let (tz_name, tz) = self.resolve_timezone(user_id, timezone).await?;
    let local = Sample {
      recorded_at: sample.recorded_at.with_timezone(&tz).fixed_offset(),
      ..sample
    };
    let day = local.recorded_at.date_naive();

    let sample_id = self
      .storage("upsert sample", self.samples.upsert_day_sample(user_id, &local))
      .await?;

    if timezone.map(str::trim).is_some_and(|tz| !tz.is_empty()) {
      self
        .best_effort("timezone", self.samples.set_timezone(user_id, &tz_name))
        .await;
    }
    self
      .best_effort(
        "day status",
        self
          .samples
          .set_day_status(user_id, day, AnalysisStatus::Pending, None),
      )
      .await;

    tracing::info!(target: "wellness::pipeline", user_id, sample_id, %day, "sample tracked");

    Ok(TrackedDay {
      sample_id,
      day,
      timezone: tz_name,
    })
  }

  /// Track a sample, then re-analyze every period in the background
  ///
  /// The returned handle resolves to the day's final status once the
  /// re-analysis has marked it `ready` or `failed`.
  pub async fn track_and_reanalyze(
    &self,
    user_id: i64,
    sample: Sample,
    timezone: Option<&str>,
  ) -> Result<(TrackedDay, JoinHandle<AnalysisStatus>), PipelineError> {
    let tracked = self.track(user_id, sample, timezone).await?;

    let analyzer = self.clone();
    let day = tracked.day;
    let tz = tracked.timezone.clone();
    let handle = tokio::spawn(async move {
      let (status, error) = match analyzer.analyze_all_periods(user_id, Some(&tz)).await {
        Ok(_) => (AnalysisStatus::Ready, None),
        Err(e) => (AnalysisStatus::Failed, Some(e.to_string())),
      };
      analyzer
        .best_effort(
          "day status",
          analyzer
            .samples
            .set_day_status(user_id, day, status, error.as_deref()),
        )
        .await;
      status
    });

    Ok((tracked, handle))
  }

  /// Fresh analysis of every period; all periods run, the first error wins
  pub async fn analyze_all_periods(
    &self,
    user_id: i64,
    timezone: Option<&str>,
  ) -> Result<Vec<AnalysisResult>, PipelineError> {
    let mut results = Vec::with_capacity(Period::ALL_PERIODS.len());
    let mut first_error = None;

    for period in Period::ALL_PERIODS {
      let mut request = AnalyzeRequest::new(user_id, period);
      request.timezone = timezone.map(str::to_string);

      match self.refresh(&request).await {
        Ok(result) => results.push(result),
        Err(e) => {
          tracing::debug!(target: "wellness::pipeline", user_id, %period, error = %e, "period analysis failed");
          first_error.get_or_insert(e);
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(results),
    }
  }

  /// Re-analyze every user with samples, one task per user
  pub async fn reanalyze_all_users(&self) -> Result<BatchSummary, PipelineError> {
    let users = self
      .storage("users", self.samples.users_with_samples())
      .await?;

    let mut tasks = JoinSet::new();
    for user_id in users {
      let analyzer = self.clone();
      tasks.spawn(async move { (user_id, analyzer.analyze_all_periods(user_id, None).await) });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((user_id, Ok(_))) => summary.succeeded.push(user_id),
        Ok((user_id, Err(e))) => {
          tracing::warn!(target: "wellness::pipeline", user_id, error = %e, "user re-analysis failed");
          summary.failed.push((user_id, e.to_string()));
        }
        Err(e) => {
          tracing::error!(target: "wellness::pipeline", error = %e, "re-analysis task aborted");
        }
      }
    }

    summary.succeeded.sort_unstable();
    summary.failed.sort_by_key(|(user_id, _)| *user_id);

    tracing::info!(
      target: "wellness::pipeline",
      succeeded = summary.succeeded.len(),
      failed = summary.failed.len(),
      "batch re-analysis finished"
    );

    Ok(summary)
  }

  /// Last stored result of each period
  pub async fn last_results(&self, user_id: i64) -> Result<Vec<LastAnalysis>, PipelineError> {
    if user_id <= 0 {
      return Err(PipelineError::InvalidRequest("user id is required".to_string()));
    }
    self
      .storage("last results", self.results.last_results(user_id))
      .await
  }

  /// Today's sample in the user's zone, if one was tracked
  pub async fn today_sample(&self, user_id: i64, timezone: Option<&str>) -> Result<Option<Sample>, PipelineError> {
    if user_id <= 0 {
      return Err(PipelineError::InvalidRequest("user id is required".to_string()));
    }
    let (_, tz) = self.resolve_timezone(user_id, timezone).await?;
    let today = now_in(&tz).date_naive();
    let row = self
      .storage("sample for day", self.samples.sample_for_day(user_id, today))
      .await?;
    Ok(row.map(|row| row.into_sample(&tz)))
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
