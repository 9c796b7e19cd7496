//! Text cleanup for raw model output
//!
//! `Normalizer` turns whatever the model produced into plain text laid out as
//! header lines and sentences. `sanitize` then drops whole lines that break
//! the content rules.

use regex::Regex;

use super::contract::{contains_any, InsightContract};
use crate::llm::FinishReason;

/// ---------------------------------------------------------------------------
/// Normalization
/// ---------------------------------------------------------------------------

/// Markdown and layout cleanup; regexes compiled once per value
#[derive(Debug, Clone)]
pub struct Normalizer {
  code_fence: Regex,
  heading: Regex,
  bold: Regex,
  underscore_emphasis: Regex,
  inline_code: Regex,
  numbered_item: Regex,
  bullet_item: Regex,
  multi_space: Regex,
}

impl Normalizer {
  pub fn new() -> Self {
    let re = |pattern: &str| Regex::new(pattern).expect("static regex pattern");
    Self {
      code_fence: re(r"(?m)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*$"),
      heading: re(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+"),
      bold: re(r"\*\*(.*?)\*\*"),
      underscore_emphasis: re(r"(^|[^\w])_{1,2}([^_\n]+?)_{1,2}([^\w]|$)"),
      inline_code: re(r"`([^`]*)`"),
      numbered_item: re(r"(?m)^[ \t]*\d{1,2}[.)][ \t]+"),
      bullet_item: re(r"(?m)^[ \t]*[-•*+][ \t]+"),
      multi_space: re(r"[ \t]{2,}"),
    }
  }

  pub fn normalize(&self, raw: &str, contract: &InsightContract) -> String {
    let text = self.plain(raw, contract);
    collapse_blank_lines(&drop_preamble(&text, contract))
  }

  /// Normalize a reply that continues earlier text; leading lines before the
  /// first header belong to the previous section and are kept
  pub fn normalize_fragment(&self, raw: &str, contract: &InsightContract) -> String {
    collapse_blank_lines(&self.plain(raw, contract))
  }

  fn plain(&self, raw: &str, contract: &InsightContract) -> String {
    let text = raw.replace("\r\n", "\n");
    let text = strip_reasoning(&text, contract);
    let text = self.code_fence.replace_all(&text, "");

    let text = self.heading.replace_all(&text, "");
    let text = self.numbered_item.replace_all(&text, "");
    let text = self.bullet_item.replace_all(&text, "");
    let text = self.bold.replace_all(&text, "$1");
    let text = self.inline_code.replace_all(&text, "$1");
    let text = self.underscore_emphasis.replace_all(&text, "$1$2$3");
    let text = text.replace("**", "").replace("__", "").replace('*', "");
    let text = self.multi_space.replace_all(&text, " ");

    canonicalize_headers(&text, contract)
  }
}

impl Default for Normalizer {
  fn default() -> Self {
    Self::new()
  }
}

/// Keep text after the last closing reasoning marker if any remains there,
/// otherwise just delete the markers
fn strip_reasoning(text: &str, contract: &InsightContract) -> String {
  let lower = text.to_lowercase();
  let close = contract.reasoning_close.to_lowercase();
  let open = contract.reasoning_open.to_lowercase();

  if !close.is_empty() {
    if let Some(idx) = lower.rfind(&close) {
      let after = idx + close.len();
      // Lowercasing ASCII markers keeps byte offsets aligned
      if text.is_char_boundary(after) {
        let tail = text[after..].trim();
        if !tail.is_empty() {
          return tail.to_string();
        }
      }
    }
  }

  remove_ignore_case(&remove_ignore_case(text, &open), &close)
}

fn remove_ignore_case(text: &str, needle: &str) -> String {
  if needle.is_empty() {
    return text.to_string();
  }
  let lower = text.to_lowercase();
  if lower.len() != text.len() {
    return text.replace(needle, "");
  }
  let mut out = String::with_capacity(text.len());
  let mut last = 0;
  for (idx, _) in lower.match_indices(needle) {
    out.push_str(&text[last..idx]);
    last = idx + needle.len();
  }
  out.push_str(&text[last..]);
  out
}

/// Rewrite header-like lines ("energy:", "ENERGY") to the exact header
fn canonicalize_headers(text: &str, contract: &InsightContract) -> String {
  text
    .lines()
    .map(|line| match contract.header_for(line) {
      Some(header) => header.to_string(),
      None => line.to_string(),
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// Everything before the first header line is preamble
fn drop_preamble(text: &str, contract: &InsightContract) -> String {
  let lines: Vec<&str> = text.lines().collect();
  match lines.iter().position(|l| contract.header_for(l).is_some()) {
    Some(start) => lines[start..].join("\n"),
    None => text.to_string(),
  }
}

/// Trim every line and keep at most one blank line in a row
pub fn collapse_blank_lines(text: &str) -> String {
  let mut out: Vec<&str> = Vec::new();
  let mut blank_run = 0;
  for line in text.lines().map(str::trim) {
    if line.is_empty() {
      blank_run += 1;
      if blank_run > 1 {
        continue;
      }
    } else {
      blank_run = 0;
    }
    out.push(line);
  }
  out.join("\n").trim().to_string()
}

/// ---------------------------------------------------------------------------
/// Sanitization
/// ---------------------------------------------------------------------------

/// Drop lines with banned terms or leak tokens, and scarcity claims when the
/// counts are sufficient
pub fn sanitize(text: &str, contract: &InsightContract, sufficient: bool) -> String {
  let kept = text
    .lines()
    .filter(|line| !contains_any(line, &contract.banned_terms))
    .filter(|line| !contains_any(line, &contract.leak_tokens))
    .filter(|line| !(sufficient && contains_any(line, &contract.scarcity_phrases)))
    .collect::<Vec<_>>()
    .join("\n");
  collapse_blank_lines(&kept)
}

/// ---------------------------------------------------------------------------
/// Truncation and Sections
/// ---------------------------------------------------------------------------

/// Length cutoff, or text ending in an unterminated clause
pub fn is_truncated(finish: &FinishReason, text: &str) -> bool {
  if finish.is_length() {
    return true;
  }
  let trimmed = text.trim_end();
  [':', '-', '–', '—'].iter().any(|c| trimmed.ends_with(*c))
}

/// Body of a section: lines after its header up to the next header
pub fn extract_section<'a>(text: &'a str, header: &str, contract: &InsightContract) -> Option<Vec<&'a str>> {
  let mut lines = text.lines();
  lines.by_ref().find(|l| l.trim() == header)?;
  Some(
    lines
      .take_while(|l| contract.header_for(l).is_none())
      .collect(),
  )
}

/// Action statements of a section body
///
/// Non-empty lines count as one action each. A body written as a single
/// paragraph is split on sentence punctuation instead. This is a heuristic:
/// abbreviations or decimals inside a sentence will over-count.
pub fn split_actions(body: &[&str]) -> Vec<String> {
  let lines: Vec<&str> = body.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
  if lines.len() == 1 {
    return split_sentences(lines[0]);
  }
  lines.into_iter().map(str::to_string).collect()
}

pub fn split_sentences(text: &str) -> Vec<String> {
  let mut sentences = Vec::new();
  let mut current = String::new();
  for ch in text.chars() {
    current.push(ch);
    if matches!(ch, '.' | '!' | '?') {
      let part = current.trim();
      if !part.is_empty() && part.chars().any(char::is_alphanumeric) {
        sentences.push(part.to_string());
      }
      current.clear();
    }
  }
  let rest = current.trim();
  if !rest.is_empty() {
    sentences.push(rest.to_string());
  }
  sentences
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
