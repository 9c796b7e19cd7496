//! Structural and content contract the narrative must satisfy
//!
//! Every literal the normalizer, sanitizer and validator look for lives here
//! so a different language or format is a different `InsightContract` value.

use serde::{Deserialize, Serialize};

/// Section headers, in the order they must appear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeaders {
  pub energy: String,
  pub burnout: String,
  /// The section holding the recommended actions
  pub actions: String,
  pub tracking: String,
}

impl SectionHeaders {
  pub fn ordered(&self) -> [&str; 4] {
    [&self.energy, &self.burnout, &self.actions, &self.tracking]
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightContract {
  pub headers: SectionHeaders,
  /// Required verbatim when burnout risk cannot be determined
  pub disclaimer: String,
  /// Phrases naming a concrete risk level
  pub risk_phrases: Vec<String>,
  /// Phrases claiming the data is too thin
  pub scarcity_phrases: Vec<String>,
  /// Pseudo-medical vocabulary; matched as lowercase substrings
  pub banned_terms: Vec<String>,
  pub leak_tokens: Vec<String>,
  pub notes_marker: String,
  pub reasoning_open: String,
  pub reasoning_close: String,
  pub action_count: usize,
  /// Minimum points for the data to count as sufficient
  pub min_points: usize,
  /// Minimum unique observed days for the data to count as sufficient
  pub min_days: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl InsightContract {
  pub fn english() -> Self {
    Self {
      headers: SectionHeaders {
        energy: "Energy".to_string(),
        burnout: "Burnout".to_string(),
        actions: "What to do tomorrow".to_string(),
        tracking: "What to track next".to_string(),
      },
      disclaimer: "Burnout risk is unknown for now because there is too little data.".to_string(),
      risk_phrases: strings(&[
        "low risk",
        "medium risk",
        "moderate risk",
        "high risk",
        "risk is low",
        "risk is medium",
        "risk is moderate",
        "risk is high",
      ]),
      scarcity_phrases: strings(&[
        "insufficient data",
        "not enough data",
        "data is limited",
        "preliminary conclusion",
      ]),
      banned_terms: strings(&["glucose", "hormon", "biorhythm", "biolog", "physiolog", "in the blood"]),
      leak_tokens: strings(&["<think>", "</think>", "reasoning:", "thoughts:"]),
      notes_marker: "Notes:".to_string(),
      reasoning_open: "<think>".to_string(),
      reasoning_close: "</think>".to_string(),
      action_count: 3,
      min_points: 5,
      min_days: 5,
    }
  }

  /// Counts are rich enough that scarcity claims contradict the input
  pub fn is_sufficient(&self, points: usize, observed_days: usize) -> bool {
    points >= self.min_points && observed_days >= self.min_days
  }

  /// Header this line names, tolerating case, a trailing colon and spacing
  pub fn header_for(&self, line: &str) -> Option<&str> {
    let candidate = line.trim().trim_end_matches(':').trim();
    self
      .headers
      .ordered()
      .into_iter()
      .find(|h| h.eq_ignore_ascii_case(candidate))
  }
}

impl Default for InsightContract {
  fn default() -> Self {
    Self::english()
  }
}

/// Case-insensitive substring test against a phrase list
pub fn contains_any(text: &str, phrases: &[String]) -> bool {
  let lower = text.to_lowercase();
  phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
}
