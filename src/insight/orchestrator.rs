//! Bounded first / continuation / repair call sequence
//!
//! At most three sequential model calls per request. Contract failures never
//! fail the request; they steer the next call and finally degrade to
//! best-effort text. Transport failures end the sequence immediately.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::contract::InsightContract;
use super::text::{collapse_blank_lines, is_truncated, sanitize, Normalizer};
use super::validate::{validate, ValidationContext, Violation};
use crate::llm::{LlmError, TextGenerator};
use crate::prompt::{InsightPrompt, PromptTemplates};

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightLimits {
  pub first_max_tokens: u32,
  pub continuation_max_tokens: u32,
  pub repair_max_tokens: u32,
  /// Make only the first call and return its cleaned text
  pub single_pass: bool,
}

impl Default for InsightLimits {
  fn default() -> Self {
    Self {
      first_max_tokens: 1200,
      continuation_max_tokens: 900,
      repair_max_tokens: 1200,
      single_pass: false,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Outcome Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStage {
  First,
  Continuation,
  Repair,
}

impl std::fmt::Display for InsightStage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::First => write!(f, "first"),
      Self::Continuation => write!(f, "continuation"),
      Self::Repair => write!(f, "repair"),
    }
  }
}

#[derive(Error, Debug, Serialize)]
pub enum InsightError {
  /// Transport failure; `partial` is the best cleaned text obtained before it
  #[error("{stage} call failed: {source}")]
  Generation {
    stage: InsightStage,
    source: LlmError,
    partial: Option<String>,
  },

  #[error("no usable text after {calls} call(s)")]
  EmptyOutput { calls: u8 },
}

impl InsightError {
  pub fn partial(&self) -> Option<&str> {
    match self {
      Self::Generation { partial, .. } => partial.as_deref(),
      Self::EmptyOutput { .. } => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsightStatus {
  Accepted,
  /// Text kept despite failing validation
  BestEffort { violations: Vec<Violation> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedInsight {
  pub text: String,
  pub status: InsightStatus,
  /// Model calls spent, 1 to 3
  pub calls: u8,
}

impl GeneratedInsight {
  pub fn is_accepted(&self) -> bool {
    matches!(self.status, InsightStatus::Accepted)
  }
}

/// ---------------------------------------------------------------------------
/// Orchestrator
/// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct InsightOrchestrator {
  generator: Arc<dyn TextGenerator>,
  templates: PromptTemplates,
  contract: InsightContract,
  normalizer: Normalizer,
  limits: InsightLimits,
}

fn non_empty(text: &str) -> Option<String> {
  (!text.trim().is_empty()).then(|| text.to_string())
}

impl InsightOrchestrator {
  pub fn new(generator: Arc<dyn TextGenerator>, limits: InsightLimits) -> Self {
    Self {
      generator,
      templates: PromptTemplates::default(),
      contract: InsightContract::default(),
      normalizer: Normalizer::new(),
      limits,
    }
  }

  pub fn with_contract(mut self, contract: InsightContract) -> Self {
    self.contract = contract;
    self
  }

  fn clean(&self, raw: &str, ctx: &ValidationContext) -> String {
    let normalized = self.normalizer.normalize(raw, &self.contract);
    sanitize(&normalized, &self.contract, ctx.sufficient)
  }

  /// Clean a continuation reply on its own and append it to the draft
  fn append(&self, draft: &str, raw: &str, ctx: &ValidationContext) -> String {
    let fragment = self.normalizer.normalize_fragment(raw, &self.contract);
    let tail = sanitize(&fragment, &self.contract, ctx.sufficient);
    if tail.is_empty() {
      return draft.to_string();
    }
    collapse_blank_lines(&format!("{}\n{}", draft, tail))
  }

  fn settle(&self, text: String, ctx: &ValidationContext, calls: u8) -> Result<GeneratedInsight, InsightError> {
    if text.trim().is_empty() {
      return Err(InsightError::EmptyOutput { calls });
    }
    let violations = validate(&text, &self.contract, ctx);
    let status = if violations.is_empty() {
      InsightStatus::Accepted
    } else {
      InsightStatus::BestEffort { violations }
    };
    Ok(GeneratedInsight { text, status, calls })
  }

  /// Run the call sequence for one request
  pub async fn generate(&self, prompt: &InsightPrompt) -> Result<GeneratedInsight, InsightError> {
    let system = self.templates.system(prompt.period, &self.contract);
    let ctx = prompt.validation_context(&self.contract);
    let mut calls = 0u8;

    // First call
    let first = self
      .generator
      .generate(&system, &prompt.render(), self.limits.first_max_tokens)
      .await
      .map_err(|source| InsightError::Generation {
        stage: InsightStage::First,
        source,
        partial: None,
      })?;
    calls += 1;
    let mut draft = self.clean(&first.text, &ctx);

    if self.limits.single_pass {
      return self.settle(draft, &ctx, calls);
    }

    // Continuation only after a truncated first answer
    if is_truncated(&first.finish, &draft) {
      tracing::debug!(target: "wellness::insight", finish = ?first.finish, "first answer truncated, continuing");
      let request = self.templates.continuation(&draft, &self.contract);
      let more = self
        .generator
        .generate(&system, &request, self.limits.continuation_max_tokens)
        .await
        .map_err(|source| InsightError::Generation {
          stage: InsightStage::Continuation,
          source,
          partial: non_empty(&draft),
        })?;
      calls += 1;

      draft = self.append(&draft, &more.text, &ctx);
    }

    let violations = validate(&draft, &self.contract, &ctx);
    if violations.is_empty() {
      return self.settle(draft, &ctx, calls);
    }
    tracing::debug!(
      target: "wellness::insight",
      violations = ?violations,
      "draft failed validation, requesting repair"
    );

    // Repair
    let request = self.templates.repair(prompt, &self.contract, &draft);
    let fixed = self
      .generator
      .generate(&system, &request, self.limits.repair_max_tokens)
      .await
      .map_err(|source| InsightError::Generation {
        stage: InsightStage::Repair,
        source,
        partial: non_empty(&draft),
      })?;
    calls += 1;
    let fixed = self.clean(&fixed.text, &ctx);
    let fixed_violations = validate(&fixed, &self.contract, &ctx);

    if fixed_violations.is_empty() {
      return self.settle(fixed, &ctx, calls);
    }

    // Best text so far: fewest violations, earlier draft wins ties
    let prefer_fixed = draft.trim().is_empty()
      || (!fixed.trim().is_empty() && fixed_violations.len() < violations.len());
    let best = if prefer_fixed { fixed } else { draft };
    tracing::warn!(
      target: "wellness::insight",
      calls,
      "repair did not validate, returning best effort"
    );
    self.settle(best, &ctx, calls)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::{ScoringConfig, WellnessMetrics};
  use crate::llm::FinishReason;
  use crate::models::{Period, Sample};
  use crate::test_utils::*;

  const VALID_LOW: &str = "Energy\nMonday is your strongest day.\n\nBurnout\nRisk is low with no clear triggers.\n\nWhat to do tomorrow\nGo to bed by 23:00.\nTake a walk after lunch.\nPlan two focus blocks.\n\nWhat to track next\nCaffeine and stress.";

  const VALID_UNKNOWN: &str = "Energy\nYou logged a few good days.\n\nBurnout\nBurnout risk is unknown for now because there is too little data.\n\nWhat to do tomorrow\nGo to bed by 23:00.\nTake a walk after lunch.\nPlan two focus blocks.\n\nWhat to track next\nCaffeine and stress.";

  const NO_ACTIONS: &str = "Energy\nMonday is your strongest day.\n\nBurnout\nRisk is low with no clear triggers.\n\nWhat to track next\nCaffeine and stress.";

  fn prompt_from(samples: &[Sample]) -> InsightPrompt {
    let metrics = WellnessMetrics::compute(samples, &ScoringConfig::default());
    InsightPrompt::build(Period::Week, "UTC", samples, &metrics, None)
  }

  fn orchestrator(generator: Arc<ScriptedGenerator>) -> InsightOrchestrator {
    InsightOrchestrator::new(generator, InsightLimits::default())
  }

  #[tokio::test]
  async fn test_valid_first_answer_accepted_in_one_call() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(stop(VALID_LOW))]));
    let result = orchestrator(generator.clone())
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.calls, 1);
    assert_eq!(result.text, VALID_LOW);
    assert_eq!(generator.calls().len(), 1);
    assert_eq!(generator.calls()[0].max_tokens, 1200);
  }

  #[tokio::test]
  async fn test_markdown_answer_is_cleaned_then_accepted() {
    let raw = format!("<think>plan the answer</think>\n**{}**", VALID_LOW.replace("Go to bed", "- Go to bed"));
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(stop(&raw))]));
    let result = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();
    assert!(result.is_accepted(), "{:?}", result.status);
    assert!(!result.text.contains("**"));
  }

  #[tokio::test]
  async fn test_insufficient_data_requires_disclaimer() {
    // Three samples: risk is insufficient-data, so the low-risk answer fails
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(stop(VALID_LOW)),
      Ok(stop(VALID_UNKNOWN)),
    ]));
    let prompt = prompt_from(&healthy_samples(3));
    let result = orchestrator(generator.clone()).generate(&prompt).await.unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.calls, 2);
    assert!(result.text.contains("Burnout risk is unknown for now because there is too little data."));
    assert!(!result.text.to_lowercase().contains("risk is low"));
    assert!(generator.calls()[1].user.contains("burnout_level=insufficient_data"));
  }

  #[tokio::test]
  async fn test_repair_replaces_answer_missing_actions() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(stop(NO_ACTIONS)),
      Ok(stop(VALID_LOW)),
    ]));
    let result = orchestrator(generator.clone())
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert!(result.is_accepted());
    assert_eq!(result.text, VALID_LOW);
    assert_eq!(result.calls, 2);

    let repair = &generator.calls()[1];
    assert!(repair.user.contains("num_points=10"));
    assert!(repair.user.contains("num_observed_days=10"));
    assert!(repair.user.contains("burnout_level=low"));
    assert!(repair.user.contains(NO_ACTIONS));
  }

  #[tokio::test]
  async fn test_failed_repair_returns_best_effort_draft() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(stop(NO_ACTIONS)),
      Ok(stop("Sorry, I cannot help with that.")),
    ]));
    let result = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert_eq!(result.text, NO_ACTIONS);
    assert_eq!(result.calls, 2);
    match result.status {
      InsightStatus::BestEffort { violations } => assert!(violations.contains(&Violation::MissingHeader {
        header: "What to do tomorrow".to_string()
      })),
      other => panic!("expected best effort, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_truncated_answer_is_continued_and_merged() {
    let (head, tail) = VALID_LOW.split_at(VALID_LOW.find("What to do tomorrow").unwrap());
    let head = format!("{}What to do tomorrow\nGo to bed by 23:00.\nTake a walk after lunch.\nNext:", head);
    let tail = tail.replacen("What to do tomorrow\nGo to bed by 23:00.\nTake a walk after lunch.\n", "", 1);

    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(stop(&head)),
      Ok(stop(&tail)),
      Ok(stop(VALID_LOW)),
    ]));
    let result = orchestrator(generator.clone())
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    let calls = generator.calls();
    assert_eq!(calls[1].max_tokens, 900);
    assert!(calls[1].user.contains("Next:"));
    // "Next:" makes a fourth action line, so the merged text is repaired
    assert_eq!(result.calls, 3);
    assert!(result.is_accepted());
  }

  #[tokio::test]
  async fn test_length_cutoff_triggers_continuation() {
    let (head, tail) = VALID_LOW.split_at(VALID_LOW.find("What to track next").unwrap());
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(generation(head, FinishReason::Length)),
      Ok(stop(tail)),
    ]));
    let result = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert!(result.is_accepted(), "{:?}", result.status);
    assert_eq!(result.calls, 2);
    assert!(result.text.ends_with("Caffeine and stress."));
  }

  #[tokio::test]
  async fn test_continuation_with_reasoning_block_keeps_draft() {
    let (head, _) = VALID_LOW.split_at(VALID_LOW.find("What to track next").unwrap());
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(generation(head, FinishReason::Length)),
      Ok(stop("<think>I should finish the last section.</think>\nWhat to track next\nCaffeine and stress.")),
    ]));
    let result = orchestrator(generator.clone())
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert!(result.is_accepted(), "{:?}", result.status);
    assert_eq!(result.calls, 2);
    assert_eq!(generator.calls().len(), 2);
    assert!(result.text.starts_with("Energy\nMonday is your strongest day."));
    assert!(result.text.contains("Plan two focus blocks.\nWhat to track next\nCaffeine and stress."));
    assert!(!result.text.contains("finish the last section"));
  }

  #[tokio::test]
  async fn test_first_call_failure_has_no_partial() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Err(LlmError::Timeout)]));
    let err = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      InsightError::Generation {
        stage: InsightStage::First,
        source: LlmError::Timeout,
        partial: None
      }
    ));
  }

  #[tokio::test]
  async fn test_continuation_failure_carries_first_draft() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(generation("Energy\nMonday is strong.", FinishReason::Length)),
      Err(LlmError::Request("connection reset".to_string())),
    ]));
    let err = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap_err();

    match &err {
      InsightError::Generation { stage, .. } => assert_eq!(*stage, InsightStage::Continuation),
      other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.partial(), Some("Energy\nMonday is strong."));
  }

  #[tokio::test]
  async fn test_repair_failure_carries_draft() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(stop(NO_ACTIONS)),
      Err(LlmError::Api("overloaded".to_string())),
    ]));
    let err = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap_err();
    assert_eq!(err.partial(), Some(NO_ACTIONS));
  }

  #[tokio::test]
  async fn test_empty_output_is_an_error() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
      Ok(stop("```\n```")),
      Ok(stop("   ")),
    ]));
    let err = orchestrator(generator)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap_err();
    assert!(matches!(err, InsightError::EmptyOutput { calls: 2 }));
  }

  #[tokio::test]
  async fn test_single_pass_makes_one_call() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(generation(NO_ACTIONS, FinishReason::Length))]));
    let limits = InsightLimits {
      single_pass: true,
      ..Default::default()
    };
    let result = InsightOrchestrator::new(generator.clone(), limits)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert_eq!(result.calls, 1);
    assert!(!result.is_accepted());
    assert_eq!(generator.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_alternate_contract_is_honored() {
    let mut contract = InsightContract::english();
    contract.headers.actions = "Tomorrow".to_string();
    let text = VALID_LOW.replace("What to do tomorrow", "Tomorrow");

    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(stop(&text))]));
    let result = orchestrator(generator.clone())
      .with_contract(contract)
      .generate(&prompt_from(&healthy_samples(10)))
      .await
      .unwrap();

    assert!(result.is_accepted());
    assert!(generator.calls()[0].system.contains("Tomorrow"));
  }
}
