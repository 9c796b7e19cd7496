//! Aggregate statistics over sample sets
//!
//! Pure helpers shared by the scoring engine and the prompt assembler.
//! Every function is total: empty inputs and windows that are too short
//! produce neutral values (0 or None) instead of dividing by zero.

use chrono::{Duration, NaiveTime, Timelike};
use std::collections::HashSet;
use std::f64::consts::PI;

use crate::models::Sample;

const MINUTES_PER_DAY: f64 = 1440.0;

/// ---------------------------------------------------------------------------
/// Scalar Helpers
/// ---------------------------------------------------------------------------

pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
  value.max(lo).min(hi)
}

pub fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

/// Arithmetic mean, 0 for an empty input
pub fn mean<I>(values: I) -> f64
where
  I: IntoIterator<Item = f64>,
{
  let (sum, count) = values
    .into_iter()
    .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
  if count == 0 {
    0.0
  } else {
    sum / count as f64
  }
}

/// Population standard deviation, 0 for an empty input
pub fn population_std(values: &[f64]) -> f64 {
  if values.is_empty() {
    return 0.0;
  }
  let avg = mean(values.iter().copied());
  let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
  variance.sqrt()
}

/// ---------------------------------------------------------------------------
/// Sample Field Aggregates
/// ---------------------------------------------------------------------------

pub fn mean_by<F>(samples: &[Sample], field: F) -> f64
where
  F: Fn(&Sample) -> f64,
{
  mean(samples.iter().map(field))
}

/// Smallest and largest value of a field, None for an empty set
pub fn min_max_by<F>(samples: &[Sample], field: F) -> Option<(f64, f64)>
where
  F: Fn(&Sample) -> f64,
{
  samples.iter().map(field).fold(None, |acc, v| match acc {
    None => Some((v, v)),
    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
  })
}

/// Percentage (0-100) of samples matching a predicate, 0 for an empty set
pub fn percent_where<P>(samples: &[Sample], predicate: P) -> f64
where
  P: Fn(&Sample) -> bool,
{
  if samples.is_empty() {
    return 0.0;
  }
  let hits = samples.iter().filter(|s| predicate(s)).count();
  100.0 * hits as f64 / samples.len() as f64
}

pub fn percent_in_range<F>(samples: &[Sample], field: F, lo: f64, hi: f64) -> f64
where
  F: Fn(&Sample) -> f64,
{
  percent_where(samples, |s| {
    let v = field(s);
    v >= lo && v <= hi
  })
}

pub fn percent_at_least<F>(samples: &[Sample], field: F, threshold: f64) -> f64
where
  F: Fn(&Sample) -> f64,
{
  percent_where(samples, |s| field(s) >= threshold)
}

pub fn percent_at_most<F>(samples: &[Sample], field: F, threshold: f64) -> f64
where
  F: Fn(&Sample) -> f64,
{
  percent_where(samples, |s| field(s) <= threshold)
}

/// ---------------------------------------------------------------------------
/// Trailing Windows
/// ---------------------------------------------------------------------------

/// Samples strictly after (latest timestamp - `days`)
///
/// Input must be time-ordered; the window is a suffix of the slice.
pub fn trailing_window(samples: &[Sample], days: i64) -> &[Sample] {
  let Some(latest) = samples.last() else {
    return samples;
  };
  let cutoff = latest.recorded_at - Duration::days(days);
  let start = samples.partition_point(|s| s.recorded_at <= cutoff);
  &samples[start..]
}

/// Mood drift over the trailing window
///
/// (mean of second half - mean of first half) / window length in days.
/// Returns 0 when the window holds fewer than `min_samples` samples.
pub fn mood_trend(samples: &[Sample], days: i64, min_samples: usize) -> f64 {
  let window = trailing_window(samples, days);
  if window.len() < min_samples || window.len() < 2 || days <= 0 {
    return 0.0;
  }
  let (first, last) = window.split_at(window.len() / 2);
  (mean_by(last, |s| s.mood) - mean_by(first, |s| s.mood)) / days as f64
}

/// Population std of a per-sample score over the trailing window
///
/// Returns 0 when the window holds fewer than `min_samples` samples.
pub fn trailing_volatility<F>(samples: &[Sample], days: i64, min_samples: usize, score: F) -> f64
where
  F: Fn(&Sample) -> f64,
{
  let window = trailing_window(samples, days);
  if window.is_empty() || window.len() < min_samples {
    return 0.0;
  }
  let values: Vec<f64> = window.iter().map(score).collect();
  population_std(&values)
}

/// Mean sleep over the trailing window
pub fn trailing_mean_sleep(samples: &[Sample], days: i64) -> f64 {
  mean_by(trailing_window(samples, days), |s| s.sleep_hours)
}

/// Mean sleep of the last `days` days minus the `days` days before that
pub fn sleep_delta(samples: &[Sample], days: i64) -> f64 {
  let Some(latest) = samples.last() else {
    return 0.0;
  };
  let recent_cut = latest.recorded_at - Duration::days(days);
  let prior_cut = recent_cut - Duration::days(days);

  let recent: Vec<f64> = samples
    .iter()
    .filter(|s| s.recorded_at > recent_cut)
    .map(|s| s.sleep_hours)
    .collect();
  let prior: Vec<f64> = samples
    .iter()
    .filter(|s| s.recorded_at > prior_cut && s.recorded_at <= recent_cut)
    .map(|s| s.sleep_hours)
    .collect();

  if recent.is_empty() || prior.is_empty() {
    return 0.0;
  }
  round2(mean(recent) - mean(prior))
}

/// ---------------------------------------------------------------------------
/// Clock Times and Calendar
/// ---------------------------------------------------------------------------

/// Circular (angular) mean of clock times
///
/// 23:30 and 00:30 average to 00:00, not 12:00. None when no times are given
/// or the times cancel out exactly.
pub fn circular_mean_time<I>(times: I) -> Option<NaiveTime>
where
  I: IntoIterator<Item = NaiveTime>,
{
  let mut sum_sin = 0.0;
  let mut sum_cos = 0.0;
  let mut count = 0usize;

  for t in times {
    let minutes = (t.hour() * 60 + t.minute()) as f64;
    let angle = 2.0 * PI * minutes / MINUTES_PER_DAY;
    sum_sin += angle.sin();
    sum_cos += angle.cos();
    count += 1;
  }

  if count == 0 {
    return None;
  }
  let (avg_sin, avg_cos) = (sum_sin / count as f64, sum_cos / count as f64);
  if avg_sin.abs() < 1e-9 && avg_cos.abs() < 1e-9 {
    return None;
  }

  let mut angle = avg_sin.atan2(avg_cos);
  if angle < 0.0 {
    angle += 2.0 * PI;
  }
  let total = (angle * MINUTES_PER_DAY / (2.0 * PI)).round() as u32 % 1440;
  NaiveTime::from_hms_opt(total / 60, total % 60, 0)
}

/// Number of distinct local calendar days with at least one sample
pub fn unique_days(samples: &[Sample]) -> usize {
  samples
    .iter()
    .map(|s| s.recorded_at.date_naive())
    .collect::<HashSet<_>>()
    .len()
}

/// Dated digest of free-text notes, capped at `max_len` bytes
///
/// One `YYYY-MM-DD HH:MM — note` line per sample with a non-blank note.
/// The cap is applied on a character boundary.
pub fn note_digest(samples: &[Sample], max_len: usize) -> String {
  let mut digest = String::new();
  if max_len == 0 {
    return digest;
  }

  for sample in samples {
    let Some(note) = sample.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
      continue;
    };
    let mut line = format!("{} — {}", sample.recorded_at.format("%Y-%m-%d %H:%M"), note);
    if !digest.is_empty() {
      line.insert(0, '\n');
    }

    if digest.len() + line.len() > max_len {
      let remain = max_len - digest.len();
      let mut cut = remain;
      while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
      }
      digest.push_str(&line[..cut]);
      break;
    }
    digest.push_str(&line);
  }

  digest
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
