//! Prompt assembly for the narrative model
//!
//! `InsightPrompt` freezes every aggregate the narrative may talk about.
//! `PromptTemplates` renders the system, continuation and repair prompts
//! from the embedded templates in `src/prompts/`.

use serde::{Deserialize, Serialize};

use crate::analysis::{BurnoutRisk, ProductivityModel, WeekdayEnergyMap, WellnessMetrics};
use crate::insight::{InsightContract, ValidationContext};
use crate::models::{format_clock, Period, ProposedSchedule, Sample};
use crate::stats::{circular_mean_time, mean_by, min_max_by, note_digest, round2, unique_days};

pub const NOTES_MAX_LEN: usize = 1200;

/// ---------------------------------------------------------------------------
/// Prompt Value Object
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
  pub name: String,
  pub avg: f64,
  pub min: f64,
  pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightPrompt {
  pub period: Period,
  pub timezone: String,
  pub num_points: usize,
  pub num_observed_weekdays: usize,
  pub num_observed_days: usize,
  pub observed_weekdays: String,
  pub weekday_energy: WeekdayEnergyMap,
  pub metrics: Vec<MetricSummary>,
  pub avg_sleep_start: Option<String>,
  pub avg_sleep_end: Option<String>,
  pub schedule: Option<ProposedSchedule>,
  pub notes: String,
  pub burnout: BurnoutRisk,
  pub productivity: ProductivityModel,
}

impl InsightPrompt {
  pub fn build(
    period: Period,
    timezone: &str,
    samples: &[Sample],
    metrics: &WellnessMetrics,
    schedule: Option<ProposedSchedule>,
  ) -> Self {
    let fields: [(&str, fn(&Sample) -> f64); 8] = [
      ("sleep_hours", |s| s.sleep_hours),
      ("mood", |s| s.mood),
      ("activity", |s| s.activity),
      ("productivity", |s| s.productivity),
      ("stress", |s| s.stress),
      ("energy", |s| s.energy),
      ("concentration", |s| s.concentration),
      ("sleep_quality", |s| s.sleep_quality),
    ];

    let summaries = fields
      .iter()
      .filter_map(|(name, field)| {
        let (min, max) = min_max_by(samples, field)?;
        Some(MetricSummary {
          name: name.to_string(),
          avg: round2(mean_by(samples, field)),
          min,
          max,
        })
      })
      .collect();

    Self {
      period,
      timezone: timezone.to_string(),
      num_points: samples.len(),
      num_observed_weekdays: metrics.weekday_energy.len(),
      num_observed_days: unique_days(samples),
      observed_weekdays: metrics.weekday_energy.observed_list(),
      weekday_energy: metrics.weekday_energy.clone(),
      metrics: summaries,
      avg_sleep_start: circular_mean_time(samples.iter().filter_map(|s| s.sleep_start))
        .map(|t| format_clock(&t)),
      avg_sleep_end: circular_mean_time(samples.iter().filter_map(|s| s.sleep_end))
        .map(|t| format_clock(&t)),
      schedule,
      notes: note_digest(samples, NOTES_MAX_LEN),
      burnout: metrics.burnout.clone(),
      productivity: metrics.productivity.clone(),
    }
  }

  pub fn has_notes(&self) -> bool {
    !self.notes.trim().is_empty()
  }

  pub fn validation_context(&self, contract: &InsightContract) -> ValidationContext {
    ValidationContext {
      risk_level: self.burnout.level,
      sufficient: contract.is_sufficient(self.num_points, self.num_observed_days),
      has_notes: self.has_notes(),
    }
  }

  /// User message carrying the aggregates as key=value lines
  pub fn render(&self) -> String {
    let weekday_energy = self
      .weekday_energy
      .days
      .iter()
      .map(|d| format!("{}={:.2}", d.weekday, d.energy))
      .collect::<Vec<_>>()
      .join(", ");
    let ranked = |highest: bool| {
      self
        .weekday_energy
        .ranked(2, highest)
        .iter()
        .map(|d| format!("{} ({:.1})", d.weekday, d.energy))
        .collect::<Vec<_>>()
        .join(", ")
    };
    let metrics = self
      .metrics
      .iter()
      .map(|m| format!("{}: avg={:.2} min={:.2} max={:.2}", m.name, m.avg, m.min, m.max))
      .collect::<Vec<_>>()
      .join("\n");

    let mut out = String::new();
    out.push_str("Aggregated user metrics. Missing data does NOT mean low energy.\n\n");
    out.push_str(&format!("period={}\ntimezone={}\n", self.period, self.timezone));
    out.push_str(&format!("num_points={}\n", self.num_points));
    out.push_str(&format!("num_observed_days={}\n", self.num_observed_days));
    out.push_str(&format!("num_observed_weekdays={}\n", self.num_observed_weekdays));
    out.push_str(&format!("observed_weekdays={}\n", self.observed_weekdays));
    out.push_str(&format!("energy_by_weekday={}\n", weekday_energy));
    out.push_str(&format!("top_weekdays={}\n", ranked(true)));
    out.push_str(&format!("bottom_weekdays={}\n\n", ranked(false)));

    out.push_str(&metrics);
    out.push_str("\n\n");
    if let Some(start) = &self.avg_sleep_start {
      out.push_str(&format!("avg_sleep_start={}\n", start));
    }
    if let Some(end) = &self.avg_sleep_end {
      out.push_str(&format!("avg_sleep_end={}\n", end));
    }

    out.push_str(&format!("productivity_score={:.2}\n", self.productivity.score));
    out.push_str(&format!("burnout_score={:.2}\n", self.burnout.score));
    out.push_str(&format!("burnout_level={}\n", self.burnout.level));
    out.push_str(&format!("burnout_reasons={}\n", self.burnout.reasons.join("; ")));
    out.push_str(&format!(
      "prediction_horizon_days={}\n",
      self.burnout.prediction_horizon_days
    ));

    if let Some(schedule) = &self.schedule {
      out.push('\n');
      if let Some(window) = &schedule.sleep_window {
        out.push_str(&format!("suggested_sleep_window={}\n", window));
      }
      out.push_str(&format!("recovery_tips={}\n", schedule.recovery_tips.join(" | ")));
    }

    if self.has_notes() {
      out.push_str(&format!("\nuser_notes=\n{}\n", self.notes));
    }

    out.push_str("\nWrite the answer strictly following the system prompt rules and section format.");
    out
  }
}

/// ---------------------------------------------------------------------------
/// Templates
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
  pub system: String,
  pub system_period: String,
  pub continuation: String,
  pub repair: String,
}

impl Default for PromptTemplates {
  fn default() -> Self {
    Self {
      system: include_str!("prompts/insight_system.txt").to_string(),
      system_period: include_str!("prompts/insight_system_period.txt").to_string(),
      continuation: include_str!("prompts/continuation.txt").to_string(),
      repair: include_str!("prompts/repair.txt").to_string(),
    }
  }
}

/// Replace `{name}` placeholders in order; later values are not rescanned
/// for earlier names
fn fill(template: &str, vars: &[(&str, String)]) -> String {
  let mut out = template.to_string();
  for (name, value) in vars {
    out = out.replace(&format!("{{{}}}", name), value);
  }
  out
}

fn contract_vars(contract: &InsightContract) -> Vec<(&'static str, String)> {
  let headers = contract.headers.ordered();
  vec![
    ("section_count", headers.len().to_string()),
    ("section_list", headers.join("\n")),
    ("section_inline", headers.join(" / ")),
    ("header_energy", contract.headers.energy.clone()),
    ("header_burnout", contract.headers.burnout.clone()),
    ("header_actions", contract.headers.actions.clone()),
    ("header_tracking", contract.headers.tracking.clone()),
    ("disclaimer", contract.disclaimer.clone()),
    ("notes_marker", contract.notes_marker.clone()),
    ("min_points", contract.min_points.to_string()),
    ("min_days", contract.min_days.to_string()),
  ]
}

impl PromptTemplates {
  /// Long periods get weekday-level wording
  pub fn system(&self, period: Period, contract: &InsightContract) -> String {
    let template = if period.is_long() {
      &self.system_period
    } else {
      &self.system
    };
    fill(template, &contract_vars(contract))
  }

  pub fn continuation(&self, draft: &str, contract: &InsightContract) -> String {
    let mut vars = contract_vars(contract);
    vars.push(("draft", draft.to_string()));
    fill(&self.continuation, &vars)
  }

  /// Corrective prompt embedding the computed aggregates and the draft
  pub fn repair(&self, prompt: &InsightPrompt, contract: &InsightContract, draft: &str) -> String {
    let mut vars = contract_vars(contract);
    vars.extend([
      ("num_points", prompt.num_points.to_string()),
      ("num_observed_days", prompt.num_observed_days.to_string()),
      ("num_observed_weekdays", prompt.num_observed_weekdays.to_string()),
      ("observed_weekdays", prompt.observed_weekdays.clone()),
      ("burnout_level", prompt.burnout.level.to_string()),
      ("notes_present", prompt.has_notes().to_string()),
      ("draft", draft.to_string()),
    ]);
    fill(&self.repair, &vars)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
