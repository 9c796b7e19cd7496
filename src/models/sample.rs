use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One timestamped self-report
///
/// `recorded_at` carries the offset of the user's timezone so weekday and
/// calendar-day grouping happen in local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
  pub recorded_at: DateTime<FixedOffset>,
  pub sleep_hours: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sleep_start: Option<NaiveTime>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sleep_end: Option<NaiveTime>,
  pub mood: f64,
  pub activity: f64,
  pub productivity: f64,
  pub stress: f64,
  pub energy: f64,
  pub concentration: f64,
  pub sleep_quality: f64,
  #[serde(default)]
  pub caffeine: bool,
  #[serde(default)]
  pub alcohol: bool,
  #[serde(default)]
  pub exercise: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

/// Stored sample row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SampleRow {
  pub id: i64,
  pub user_id: i64,
  pub recorded_at: DateTime<Utc>,
  pub sleep_hours: f64,
  pub sleep_start: Option<String>, // HH:MM
  pub sleep_end: Option<String>,   // HH:MM
  pub mood: f64,
  pub activity: f64,
  pub productivity: f64,
  pub stress: f64,
  pub energy: f64,
  pub concentration: f64,
  pub sleep_quality: f64,
  pub caffeine: bool,
  pub alcohol: bool,
  pub exercise: bool,
  pub note: Option<String>,
  pub analysis_status: String,
  pub analysis_error: Option<String>,
  pub analysis_updated_at: Option<DateTime<Utc>>,
}

impl SampleRow {
  /// Convert to a domain sample localized to the user's timezone
  ///
  /// Unparseable clock times are dropped rather than failing the row.
  pub fn into_sample(self, tz: &Tz) -> Sample {
    Sample {
      recorded_at: self.recorded_at.with_timezone(tz).fixed_offset(),
      sleep_hours: self.sleep_hours,
      sleep_start: self.sleep_start.as_deref().and_then(parse_clock),
      sleep_end: self.sleep_end.as_deref().and_then(parse_clock),
      mood: self.mood,
      activity: self.activity,
      productivity: self.productivity,
      stress: self.stress,
      energy: self.energy,
      concentration: self.concentration,
      sleep_quality: self.sleep_quality,
      caffeine: self.caffeine,
      alcohol: self.alcohol,
      exercise: self.exercise,
      note: self.note,
    }
  }
}

/// Parse an `HH:MM` (or `HH:MM:SS`) clock time
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  NaiveTime::parse_from_str(raw, "%H:%M")
    .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    .ok()
}

pub fn format_clock(time: &NaiveTime) -> String {
  time.format("%H:%M").to_string()
}
