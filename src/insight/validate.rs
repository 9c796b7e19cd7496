use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::contract::{contains_any, InsightContract};
use super::text::{extract_section, split_actions};
use crate::analysis::RiskLevel;

/// What the validator needs to know about the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
  pub risk_level: RiskLevel,
  /// Counts are at or above the contract's sufficiency thresholds
  pub sufficient: bool,
  pub has_notes: bool,
}

/// One broken contract rule
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
  #[error("empty response")]
  Empty,

  #[error("missing section header: {header}")]
  MissingHeader { header: String },

  #[error("section headers out of order")]
  HeadersOutOfOrder,

  #[error("disclaimer sentence missing")]
  MissingDisclaimer,

  #[error("disclaimer present although risk is known")]
  UnexpectedDisclaimer,

  #[error("risk level named although risk is unknown")]
  RiskLevelNamed,

  #[error("claims the data is insufficient")]
  ScarcityClaim,

  #[error("expected {expected} actions, found {found}")]
  ActionCount { expected: usize, found: usize },

  #[error("notes were supplied but not referenced")]
  MissingNotesMarker,

  #[error("reasoning leak token present")]
  LeakToken,
}

/// Check every rule and report all violations; empty means valid
pub fn validate(text: &str, contract: &InsightContract, ctx: &ValidationContext) -> Vec<Violation> {
  let text = text.trim();
  if text.is_empty() {
    return vec![Violation::Empty];
  }

  let mut violations = Vec::new();

  // Headers: each on its own line, in order
  let mut positions = Vec::new();
  for header in contract.headers.ordered() {
    match text.lines().position(|l| l.trim() == header) {
      Some(pos) => positions.push(pos),
      None => violations.push(Violation::MissingHeader {
        header: header.to_string(),
      }),
    }
  }
  if positions.windows(2).any(|w| w[0] >= w[1]) {
    violations.push(Violation::HeadersOutOfOrder);
  }

  // Disclaimer matches the risk state
  let has_disclaimer = text.contains(&contract.disclaimer);
  if ctx.risk_level.is_determinate() {
    if has_disclaimer {
      violations.push(Violation::UnexpectedDisclaimer);
    }
  } else {
    if !has_disclaimer {
      violations.push(Violation::MissingDisclaimer);
    }
    if contains_any(text, &contract.risk_phrases) {
      violations.push(Violation::RiskLevelNamed);
    }
  }

  if ctx.sufficient && contains_any(text, &contract.scarcity_phrases) {
    violations.push(Violation::ScarcityClaim);
  }

  if let Some(body) = extract_section(text, &contract.headers.actions, contract) {
    let found = split_actions(&body).len();
    if found != contract.action_count {
      violations.push(Violation::ActionCount {
        expected: contract.action_count,
        found,
      });
    }
  }

  if ctx.has_notes && !text.contains(&contract.notes_marker) {
    violations.push(Violation::MissingNotesMarker);
  }

  if contains_any(text, &contract.leak_tokens) {
    violations.push(Violation::LeakToken);
  }

  violations
}

#[cfg(test)]
mod tests {
  use super::*;

  const VALID: &str = "Energy\nMonday is your strongest day at 78.4.\n\nBurnout\nRisk is low with no clear triggers.\n\nWhat to do tomorrow\nGo to bed by 23:00.\nTake a 20 minute walk after lunch.\nPlan two focus blocks before noon.\n\nWhat to track next\nCaffeine and stress.";

  fn known_risk() -> ValidationContext {
    ValidationContext {
      risk_level: RiskLevel::Low,
      sufficient: true,
      has_notes: false,
    }
  }

  #[test]
  fn test_valid_response_passes() {
    let violations = validate(VALID, &InsightContract::english(), &known_risk());
    assert!(violations.is_empty(), "{:?}", violations);
  }

  #[test]
  fn test_each_missing_header_fails() {
    let contract = InsightContract::english();
    for header in contract.headers.ordered() {
      let text: String = VALID
        .lines()
        .filter(|l| *l != header)
        .collect::<Vec<_>>()
        .join("\n");
      let violations = validate(&text, &contract, &known_risk());
      assert!(
        violations.contains(&Violation::MissingHeader {
          header: header.to_string()
        }),
        "{} not reported: {:?}",
        header,
        violations
      );
    }
  }

  #[test]
  fn test_header_inside_sentence_does_not_count() {
    let text = VALID.replace("Energy\n", "Energy is fine.\n");
    let violations = validate(&text, &InsightContract::english(), &known_risk());
    assert!(violations.contains(&Violation::MissingHeader {
      header: "Energy".to_string()
    }));
  }

  #[test]
  fn test_out_of_order_headers_fail() {
    let text = "Burnout\nFine.\nEnergy\nGood.\nWhat to do tomorrow\nA.\nB.\nC.\nWhat to track next\nSleep.";
    let violations = validate(text, &InsightContract::english(), &known_risk());
    assert_eq!(violations, vec![Violation::HeadersOutOfOrder]);
  }

  #[test]
  fn test_action_count_enforced() {
    let text = VALID.replace("Plan two focus blocks before noon.\n", "");
    let violations = validate(&text, &InsightContract::english(), &known_risk());
    assert_eq!(
      violations,
      vec![Violation::ActionCount {
        expected: 3,
        found: 2
      }]
    );
  }

  #[test]
  fn test_single_paragraph_actions_are_sentence_split() {
    let text = VALID.replace(
      "Go to bed by 23:00.\nTake a 20 minute walk after lunch.\nPlan two focus blocks before noon.",
      "Go to bed early. Take a walk after lunch. Plan two focus blocks.",
    );
    assert!(validate(&text, &InsightContract::english(), &known_risk()).is_empty());
  }

  #[test]
  fn test_disclaimer_rules_for_unknown_risk() {
    let contract = InsightContract::english();
    let ctx = ValidationContext {
      risk_level: RiskLevel::InsufficientData,
      sufficient: false,
      has_notes: false,
    };

    // Known-risk wording fails twice: no disclaimer and a named level
    let violations = validate(VALID, &contract, &ctx);
    assert!(violations.contains(&Violation::MissingDisclaimer));
    assert!(violations.contains(&Violation::RiskLevelNamed));

    let with_disclaimer = VALID.replace("Risk is low with no clear triggers.", &contract.disclaimer);
    assert!(validate(&with_disclaimer, &contract, &ctx).is_empty());

    // The same text is wrong once risk is determinate
    assert_eq!(
      validate(&with_disclaimer, &contract, &known_risk()),
      vec![Violation::UnexpectedDisclaimer]
    );
  }

  #[test]
  fn test_scarcity_claim_only_when_sufficient() {
    let contract = InsightContract::english();
    let text = VALID.replace("Caffeine and stress.", "Caffeine and stress, since data is limited.");
    assert_eq!(validate(&text, &contract, &known_risk()), vec![Violation::ScarcityClaim]);

    let thin = ValidationContext {
      sufficient: false,
      ..known_risk()
    };
    assert!(validate(&text, &contract, &thin).is_empty());
  }

  #[test]
  fn test_notes_marker_required_with_notes() {
    let contract = InsightContract::english();
    let ctx = ValidationContext {
      has_notes: true,
      ..known_risk()
    };
    assert_eq!(validate(VALID, &contract, &ctx), vec![Violation::MissingNotesMarker]);

    let text = VALID.replace("at 78.4.", "at 78.4. Notes: you mentioned a late meeting.");
    assert!(validate(&text, &contract, &ctx).is_empty());
  }

  #[test]
  fn test_leak_token_and_empty() {
    let contract = InsightContract::english();
    let text = format!("{}\n</think>", VALID);
    assert_eq!(validate(&text, &contract, &known_risk()), vec![Violation::LeakToken]);
    assert_eq!(validate("  ", &contract, &known_risk()), vec![Violation::Empty]);
  }
}
