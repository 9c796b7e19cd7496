pub mod analysis;
pub mod sample;

pub use analysis::{
  now_in, AnalysisResult, AnalysisStatus, LastAnalysis, LastAnalysisRow, NarrativeOutcome,
  Period, ProposedSchedule, SleepDigest,
};
pub use sample::{format_clock, parse_clock, Sample, SampleRow};
