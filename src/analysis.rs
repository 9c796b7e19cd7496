//! Deterministic scoring layer for wellness metrics
//!
//! This module computes energy, productivity and burnout metrics from raw
//! samples. The language model interprets these pre-computed numbers rather
//! than doing math itself. Everything here is pure and safe to call from
//! concurrent requests.

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::models::Sample;
use crate::stats::{
  clamp, mean_by, mood_trend, percent_at_least, percent_at_most, percent_in_range,
  percent_where, population_std, round2, trailing_mean_sleep, trailing_volatility,
};

/// ---------------------------------------------------------------------------
/// Scoring Configuration
/// ---------------------------------------------------------------------------

/// Weights and adjustments for the per-sample energy score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyWeights {
  pub sleep_duration: f64,
  pub sleep_quality: f64,
  pub mood: f64,
  pub activity: f64,
  pub subjective_energy: f64,
  pub concentration: f64,
  /// Centre of the sleep-duration Gaussian, in hours
  pub optimal_sleep_hours: f64,
  /// Width of the sleep-duration Gaussian, in hours
  pub sleep_width_hours: f64,
  pub stimulant_bonus: f64,
  pub alcohol_penalty: f64,
  pub exercise_bonus: f64,
}

impl Default for EnergyWeights {
  fn default() -> Self {
    Self {
      sleep_duration: 0.32,
      sleep_quality: 0.13,
      mood: 0.20,
      activity: 0.12,
      subjective_energy: 0.18,
      concentration: 0.05,
      optimal_sleep_hours: 7.75,
      sleep_width_hours: 2.0,
      stimulant_bonus: 2.5,
      alcohol_penalty: 4.0,
      exercise_bonus: 1.5,
    }
  }
}

impl EnergyWeights {
  pub fn total(&self) -> f64 {
    self.sleep_duration
      + self.sleep_quality
      + self.mood
      + self.activity
      + self.subjective_energy
      + self.concentration
  }
}

/// Static weight table of the productivity model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityWeights {
  pub energy_mean: f64,
  pub energy_stability: f64,
  pub sleep_ok: f64,
  pub mood_ok: f64,
  pub sleep_quality_ok: f64,
  pub focus_ok: f64,
  pub stress_ok: f64,
  pub self_energy_ok: f64,
}

impl Default for ProductivityWeights {
  fn default() -> Self {
    Self {
      energy_mean: 0.40,
      energy_stability: 0.15,
      sleep_ok: 0.10,
      mood_ok: 0.10,
      sleep_quality_ok: 0.08,
      focus_ok: 0.07,
      stress_ok: 0.05,
      self_energy_ok: 0.05,
    }
  }
}

impl ProductivityWeights {
  /// Named weights in their fixed order
  pub fn entries(&self) -> [(&'static str, f64); 8] {
    [
      ("energy_mean", self.energy_mean),
      ("energy_stability", self.energy_stability),
      ("sleep_ok", self.sleep_ok),
      ("mood_ok", self.mood_ok),
      ("sleep_quality_ok", self.sleep_quality_ok),
      ("focus_ok", self.focus_ok),
      ("stress_ok", self.stress_ok),
      ("self_energy_ok", self.self_energy_ok),
    ]
  }

  pub fn total(&self) -> f64 {
    self.entries().iter().map(|(_, w)| w).sum()
  }
}

/// Thresholds and point values of the burnout rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnoutConfig {
  /// Below this many samples the risk is insufficient-data
  pub min_samples: usize,
  pub window_days: i64,
  pub prediction_horizon_days: u32,
  pub mood_trend_min_samples: usize,
  pub volatility_min_samples: usize,

  pub sleep_debt_hours: f64,
  pub mood_decline_per_day: f64,
  pub energy_volatility: f64,
  pub low_productivity: f64,
  pub high_stress: f64,
  pub low_self_energy: f64,
  pub poor_sleep_quality: f64,
  pub alcohol_share_pct: f64,
  pub exercise_share_pct: f64,

  pub points: BurnoutPoints,
}

/// Points contributed by each triggered burnout rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnoutPoints {
  pub sleep_debt: f64,
  pub mood_decline: f64,
  pub energy_volatile: f64,
  pub low_productivity: f64,
  pub high_stress: f64,
  pub low_self_energy: f64,
  pub poor_sleep_quality: f64,
  pub frequent_alcohol: f64,
  pub rare_exercise: f64,
}

impl Default for BurnoutPoints {
  fn default() -> Self {
    Self {
      sleep_debt: 30.0,
      mood_decline: 25.0,
      energy_volatile: 20.0,
      low_productivity: 20.0,
      high_stress: 15.0,
      low_self_energy: 10.0,
      poor_sleep_quality: 10.0,
      frequent_alcohol: 10.0,
      rare_exercise: 5.0,
    }
  }
}

impl Default for BurnoutConfig {
  fn default() -> Self {
    Self {
      min_samples: 5,
      window_days: 14,
      prediction_horizon_days: 14,
      mood_trend_min_samples: 8,
      volatility_min_samples: 5,
      sleep_debt_hours: 6.6,
      mood_decline_per_day: -0.15,
      energy_volatility: 18.0,
      low_productivity: 45.0,
      high_stress: 6.5,
      low_self_energy: 4.5,
      poor_sleep_quality: 6.0,
      alcohol_share_pct: 30.0,
      exercise_share_pct: 20.0,
      points: BurnoutPoints::default(),
    }
  }
}

/// Everything the scoring engine needs, injected by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
  pub energy: EnergyWeights,
  pub productivity: ProductivityWeights,
  pub burnout: BurnoutConfig,
}

/// ---------------------------------------------------------------------------
/// Tier 1: Per-Sample Energy Score
/// ---------------------------------------------------------------------------

/// Scale a 0-10 rating to 0-100, clamped
fn rating_pct(value: f64) -> f64 {
  clamp(value / 10.0, 0.0, 1.0) * 100.0
}

/// Sleep-duration term: Gaussian around the optimal duration, 0-100
pub fn sleep_duration_term(hours: f64, weights: &EnergyWeights) -> f64 {
  let z = (hours - weights.optimal_sleep_hours) / weights.sleep_width_hours;
  100.0 * (-z * z).exp()
}

/// Composite energy score of one sample, in [0, 100]
pub fn energy_score(sample: &Sample, weights: &EnergyWeights) -> f64 {
  let mut score = weights.sleep_duration * sleep_duration_term(sample.sleep_hours, weights)
    + weights.sleep_quality * rating_pct(sample.sleep_quality)
    + weights.mood * rating_pct(sample.mood)
    + weights.activity * rating_pct(sample.activity)
    + weights.subjective_energy * rating_pct(sample.energy)
    + weights.concentration * rating_pct(sample.concentration);

  if sample.caffeine {
    score += weights.stimulant_bonus;
  }
  if sample.alcohol {
    score -= weights.alcohol_penalty;
  }
  if sample.exercise {
    score += weights.exercise_bonus;
  }

  clamp(score, 0.0, 100.0)
}

/// ---------------------------------------------------------------------------
/// Tier 2: Weekday Energy
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayEnergy {
  pub weekday: Weekday,
  pub energy: f64,
  pub samples: usize,
}

/// Mean energy per observed weekday, Monday first
///
/// Weekdays without observations have no entry; absence is not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekdayEnergyMap {
  pub days: Vec<WeekdayEnergy>,
}

impl WeekdayEnergyMap {
  pub fn compute(samples: &[Sample], weights: &EnergyWeights) -> Self {
    let mut sums = [0.0f64; 7];
    let mut counts = [0usize; 7];

    for sample in samples {
      let idx = sample.recorded_at.weekday().num_days_from_monday() as usize;
      sums[idx] += energy_score(sample, weights);
      counts[idx] += 1;
    }

    let days = (0..7u8)
      .filter(|&i| counts[i as usize] > 0)
      .filter_map(|i| {
        let weekday = Weekday::try_from(i).ok()?;
        let idx = i as usize;
        Some(WeekdayEnergy {
          weekday,
          energy: round2(sums[idx] / counts[idx] as f64),
          samples: counts[idx],
        })
      })
      .collect();

    Self { days }
  }

  pub fn get(&self, weekday: Weekday) -> Option<f64> {
    self.days.iter().find(|d| d.weekday == weekday).map(|d| d.energy)
  }

  pub fn len(&self) -> usize {
    self.days.len()
  }

  pub fn is_empty(&self) -> bool {
    self.days.is_empty()
  }

  /// Observed weekday labels, Monday first (e.g. "Mon, Wed")
  pub fn observed_list(&self) -> String {
    self
      .days
      .iter()
      .map(|d| d.weekday.to_string())
      .collect::<Vec<_>>()
      .join(", ")
  }

  /// Up to `k` weekdays sorted by energy, highest first when `highest`
  pub fn ranked(&self, k: usize, highest: bool) -> Vec<&WeekdayEnergy> {
    let mut ranked: Vec<&WeekdayEnergy> = self.days.iter().collect();
    ranked.sort_by(|a, b| {
      let ord = a.energy.total_cmp(&b.energy);
      if highest {
        ord.reverse()
      } else {
        ord
      }
    });
    ranked.truncate(k);
    ranked
  }
}

/// ---------------------------------------------------------------------------
/// Tier 3: Productivity Model
/// ---------------------------------------------------------------------------

/// Component values (each 0-100) blended into the productivity score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductivityComponents {
  pub energy_mean: f64,
  pub energy_stability: f64,
  pub sleep_ok_pct: f64,
  pub mood_ok_pct: f64,
  pub sleep_quality_ok_pct: f64,
  pub focus_ok_pct: f64,
  pub stress_ok_pct: f64,
  pub self_energy_ok_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityModel {
  pub weights: ProductivityWeights,
  pub components: ProductivityComponents,
  pub score: f64,
}

impl ProductivityModel {
  pub fn compute(samples: &[Sample], config: &ScoringConfig) -> Self {
    let energies: Vec<f64> = samples.iter().map(|s| energy_score(s, &config.energy)).collect();
    let energy_mean = crate::stats::mean(energies.iter().copied());

    let components = ProductivityComponents {
      energy_mean,
      energy_stability: 100.0 - population_std(&energies),
      sleep_ok_pct: percent_in_range(samples, |s| s.sleep_hours, 7.0, 9.0),
      mood_ok_pct: percent_at_least(samples, |s| s.mood, 6.5),
      sleep_quality_ok_pct: percent_at_least(samples, |s| s.sleep_quality, 6.5),
      focus_ok_pct: percent_at_least(samples, |s| s.concentration, 6.0),
      stress_ok_pct: percent_at_most(samples, |s| s.stress, 5.5),
      self_energy_ok_pct: percent_at_least(samples, |s| s.energy, 6.0),
    };

    let w = &config.productivity;
    let score = w.energy_mean * components.energy_mean
      + w.energy_stability * components.energy_stability
      + w.sleep_ok * components.sleep_ok_pct
      + w.mood_ok * components.mood_ok_pct
      + w.sleep_quality_ok * components.sleep_quality_ok_pct
      + w.focus_ok * components.focus_ok_pct
      + w.stress_ok * components.stress_ok_pct
      + w.self_energy_ok * components.self_energy_ok_pct;

    Self {
      weights: w.clone(),
      components,
      score: round2(clamp(score, 0.0, 100.0)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tier 4: Burnout Triggers (Boolean Alerts)
/// ---------------------------------------------------------------------------

pub const NO_TRIGGER_REASON: &str = "No clear burnout triggers found in the current data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
  Low,
  Medium,
  High,
  InsufficientData,
}

impl RiskLevel {
  pub fn from_score(score: f64) -> Self {
    match score {
      s if s >= 70.0 => RiskLevel::High,
      s if s >= 40.0 => RiskLevel::Medium,
      _ => RiskLevel::Low,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RiskLevel::Low => "low",
      RiskLevel::Medium => "medium",
      RiskLevel::High => "high",
      RiskLevel::InsufficientData => "insufficient_data",
    }
  }

  pub fn is_determinate(&self) -> bool {
    !matches!(self, RiskLevel::InsufficientData)
  }
}

impl std::fmt::Display for RiskLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Independent burnout predicates over the full set and the trailing window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnoutTriggers {
  /// Trailing mean sleep below threshold
  pub sleep_debt: bool,
  /// Trailing mood trend below threshold
  pub mood_decline: bool,
  /// Trailing energy std above threshold
  pub energy_volatile: bool,
  pub low_productivity: bool,
  pub high_stress: bool,
  pub low_self_energy: bool,
  pub poor_sleep_quality: bool,
  pub frequent_alcohol: bool,
  pub rare_exercise: bool,
}

impl BurnoutTriggers {
  pub fn compute(samples: &[Sample], model: &ProductivityModel, config: &ScoringConfig) -> Self {
    let b = &config.burnout;
    let energy = |s: &Sample| energy_score(s, &config.energy);

    Self {
      sleep_debt: trailing_mean_sleep(samples, b.window_days) < b.sleep_debt_hours,
      mood_decline: mood_trend(samples, b.window_days, b.mood_trend_min_samples)
        < b.mood_decline_per_day,
      energy_volatile: trailing_volatility(samples, b.window_days, b.volatility_min_samples, energy)
        > b.energy_volatility,
      low_productivity: model.score < b.low_productivity,
      high_stress: mean_by(samples, |s| s.stress) > b.high_stress,
      low_self_energy: mean_by(samples, |s| s.energy) < b.low_self_energy,
      poor_sleep_quality: mean_by(samples, |s| s.sleep_quality) < b.poor_sleep_quality,
      frequent_alcohol: percent_where(samples, |s| s.alcohol) > b.alcohol_share_pct,
      rare_exercise: percent_where(samples, |s| s.exercise) < b.exercise_share_pct,
    }
  }

  /// Triggered rules as (points, reason), in fixed rule order
  pub fn to_scored_list(&self, points: &BurnoutPoints) -> Vec<(f64, &'static str)> {
    let rules = [
      (
        self.sleep_debt,
        points.sleep_debt,
        "Sleep debt accumulated over the last ~2 weeks",
      ),
      (
        self.mood_decline,
        points.mood_decline,
        "Mood has been trending down over the last ~2 weeks",
      ),
      (
        self.energy_volatile,
        points.energy_volatile,
        "Energy is highly volatile (sharp swings)",
      ),
      (
        self.low_productivity,
        points.low_productivity,
        "Low overall productivity score",
      ),
      (
        self.high_stress,
        points.high_stress,
        "Average stress is high",
      ),
      (
        self.low_self_energy,
        points.low_self_energy,
        "Self-reported energy is low on average",
      ),
      (
        self.poor_sleep_quality,
        points.poor_sleep_quality,
        "Sleep quality is below a comfortable level",
      ),
      (
        self.frequent_alcohol,
        points.frequent_alcohol,
        "Alcohol appears in a large share of days",
      ),
      (
        self.rare_exercise,
        points.rare_exercise,
        "Exercise appears in few days",
      ),
    ];

    rules
      .into_iter()
      .filter(|(fired, ..)| *fired)
      .map(|(_, pts, reason)| (pts, reason))
      .collect()
  }
}

/// ---------------------------------------------------------------------------
/// Tier 5: Burnout Risk
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnoutRisk {
  pub score: f64,
  pub level: RiskLevel,
  pub reasons: Vec<String>,
  pub prediction_horizon_days: u32,
}

impl BurnoutRisk {
  pub fn compute(samples: &[Sample], model: &ProductivityModel, config: &ScoringConfig) -> Self {
    let b = &config.burnout;
    if samples.len() < b.min_samples {
      return Self::insufficient(b);
    }

    let triggers = BurnoutTriggers::compute(samples, model, config);
    Self::from_triggers(&triggers, b)
  }

  /// Sum the points of fired rules; no rule fired yields one fixed reason
  pub fn from_triggers(triggers: &BurnoutTriggers, config: &BurnoutConfig) -> Self {
    let scored = triggers.to_scored_list(&config.points);
    let score = clamp(scored.iter().map(|(pts, _)| pts).sum(), 0.0, 100.0);

    let mut reasons: Vec<String> = scored.into_iter().map(|(_, r)| r.to_string()).collect();
    if reasons.is_empty() {
      reasons.push(NO_TRIGGER_REASON.to_string());
    }

    Self {
      score: round2(score),
      level: RiskLevel::from_score(score),
      reasons,
      prediction_horizon_days: config.prediction_horizon_days,
    }
  }

  pub fn insufficient(config: &BurnoutConfig) -> Self {
    Self {
      score: 0.0,
      level: RiskLevel::InsufficientData,
      reasons: vec![format!(
        "Not enough data to forecast burnout (at least {} samples needed).",
        config.min_samples
      )],
      prediction_horizon_days: config.prediction_horizon_days,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Scoring Engine Output
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessMetrics {
  pub weekday_energy: WeekdayEnergyMap,
  pub productivity: ProductivityModel,
  pub burnout: BurnoutRisk,
}

impl WellnessMetrics {
  /// Run the whole scoring engine over time-ordered samples
  pub fn compute(samples: &[Sample], config: &ScoringConfig) -> Self {
    let weekday_energy = WeekdayEnergyMap::compute(samples, &config.energy);
    let productivity = ProductivityModel::compute(samples, config);
    let burnout = BurnoutRisk::compute(samples, &productivity, config);
    Self {
      weekday_energy,
      productivity,
      burnout,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
