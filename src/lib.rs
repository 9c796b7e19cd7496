pub mod analysis;
pub mod config;
pub mod db;
pub mod insight;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod stats;
pub mod store;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;
use thiserror::Error;

use config::{AppConfig, ConfigError};
use insight::InsightOrchestrator;
use llm::ChatClient;
use pipeline::{Analyzer, BatchSummary, PipelineError};
use store::{ResultStore, SqliteStore, StoreError};

pub use analysis::{BurnoutRisk, ProductivityModel, RiskLevel, ScoringConfig, WeekdayEnergyMap, WellnessMetrics};
pub use models::{AnalysisResult, NarrativeOutcome, Period, Sample};
pub use pipeline::AnalyzeRequest;

#[derive(Error, Debug)]
pub enum AppError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

/// Build an analyzer from configuration
///
/// A client that cannot be built leaves the narrative stage disabled.
pub fn build_analyzer(config: &AppConfig, store: SqliteStore) -> Analyzer {
  let store = Arc::new(store);
  let analyzer = Analyzer::new(store.clone(), store, config.pipeline.clone());

  let Some(provider) = config.llm.clone() else {
    tracing::info!(target: "wellness::pipeline", "narrative stage disabled");
    return analyzer;
  };

  match ChatClient::new(provider) {
    Ok(client) => {
      tracing::info!(
        target: "wellness::llm",
        provider = %client.config().provider,
        model = %client.config().model,
        "narrative stage enabled"
      );
      analyzer.with_insight(InsightOrchestrator::new(Arc::new(client), config.insight_limits.clone()))
    }
    Err(e) => {
      tracing::warn!(target: "wellness::llm", error = %e, "text-generation client unavailable");
      analyzer
    }
  }
}

/// One-shot batch run: re-analyze every user with samples
pub async fn run() -> Result<BatchSummary, AppError> {
  logging::init_logging();

  let config = AppConfig::from_env()?;
  let pool = db::initialize_db(&config.database_url).await?;
  let store = SqliteStore::new(pool.clone());

  match store.purge_expired().await {
    Ok(purged) => tracing::debug!(target: "wellness::db", purged, "expired cache entries removed"),
    Err(e) => tracing::warn!(target: "wellness::db", error = %e, "cache purge failed"),
  }

  let analyzer = build_analyzer(&config, store);
  let summary = analyzer.reanalyze_all_users().await?;

  pool.close().await;
  Ok(summary)
}
