use chrono::{DateTime, Months, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::analysis::{BurnoutRisk, ProductivityModel, WeekdayEnergyMap};

/// ---------------------------------------------------------------------------
/// Analysis Period
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
  Day,
  Week,
  Month,
  All,
}

impl Period {
  pub const ALL_PERIODS: [Period; 4] = [Period::Day, Period::Week, Period::Month, Period::All];

  /// Range ending at `now` in the user's zone, returned in UTC
  pub fn range(&self, now: DateTime<Tz>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = match self {
      Period::Day => now - chrono::Duration::days(1),
      Period::Week => now - chrono::Duration::days(7),
      Period::Month => now
        .checked_sub_months(Months::new(1))
        .unwrap_or(now - chrono::Duration::days(30)),
      Period::All => return (DateTime::<Utc>::UNIX_EPOCH, now.with_timezone(&Utc)),
    };
    (start.with_timezone(&Utc), now.with_timezone(&Utc))
  }

  /// Month and all-time windows use weekday-level narrative wording
  pub fn is_long(&self) -> bool {
    matches!(self, Period::Month | Period::All)
  }
}

impl std::fmt::Display for Period {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Day => write!(f, "day"),
      Self::Week => write!(f, "week"),
      Self::Month => write!(f, "month"),
      Self::All => write!(f, "all"),
    }
  }
}

impl std::str::FromStr for Period {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "day" => Ok(Self::Day),
      "week" => Ok(Self::Week),
      "month" => Ok(Self::Month),
      "all" => Ok(Self::All),
      _ => Err(format!("Unknown period: {}", s)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Per-Day Analysis Status
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
  Pending,
  Ready,
  Failed,
}

impl std::fmt::Display for AnalysisStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Pending => write!(f, "pending"),
      Self::Ready => write!(f, "ready"),
      Self::Failed => write!(f, "failed"),
    }
  }
}

impl std::str::FromStr for AnalysisStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "ready" => Ok(Self::Ready),
      "failed" => Ok(Self::Failed),
      _ => Err(format!("Unknown analysis status: {}", s)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Analysis Result Record
/// ---------------------------------------------------------------------------

/// Sleep summary shown next to the scores
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepDigest {
  /// Mean sleep over the trailing window, hours
  pub avg_sleep_hours: f64,
  /// Circular mean bedtime, HH:MM
  pub avg_sleep_start: Option<String>,
  /// Circular mean wake time, HH:MM
  pub avg_sleep_end: Option<String>,
  /// Last 7 days mean sleep minus the 7 days before
  pub sleep_delta_7d: f64,
}

/// Suggested sleep window and recovery tips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedSchedule {
  pub sleep_window: Option<String>,
  pub recovery_tips: Vec<String>,
}

/// Narrative stage outcome; a failed narrative never fails the analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrativeOutcome {
  Accepted {
    text: String,
    calls: u8,
  },
  BestEffort {
    text: String,
    violations: Vec<String>,
    calls: u8,
  },
  Unavailable {
    reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partial: Option<String>,
  },
  Disabled,
}

impl NarrativeOutcome {
  pub fn text(&self) -> Option<&str> {
    match self {
      Self::Accepted { text, .. } | Self::BestEffort { text, .. } => Some(text),
      Self::Unavailable { partial, .. } => partial.as_deref(),
      Self::Disabled => None,
    }
  }

  pub fn is_accepted(&self) -> bool {
    matches!(self, Self::Accepted { .. })
  }

  /// Only settled outcomes may be served from the response cache
  pub fn is_cacheable(&self) -> bool {
    matches!(self, Self::Accepted { .. } | Self::Disabled)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
  pub period: Period,
  pub timezone: String,
  pub points: usize,
  pub unique_days: usize,
  pub weekday_energy: WeekdayEnergyMap,
  pub productivity: ProductivityModel,
  pub burnout: BurnoutRisk,
  pub sleep: SleepDigest,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schedule: Option<ProposedSchedule>,
  pub narrative: NarrativeOutcome,
  pub generated_at: DateTime<Utc>,
}

/// Stored "last result per period" row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LastAnalysisRow {
  pub user_id: i64,
  pub period: String,
  pub result_json: String,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastAnalysis {
  pub user_id: i64,
  pub period: Period,
  pub result: AnalysisResult,
  pub updated_at: DateTime<Utc>,
}

/// Timestamp helper for callers that hold a zone name only
pub fn now_in(tz: &Tz) -> DateTime<Tz> {
  tz.from_utc_datetime(&Utc::now().naive_utc())
}
