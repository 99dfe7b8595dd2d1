//! Fixed-duration audio chunks and the writer that produces them.

pub mod writer;

pub use writer::ChunkWriter;

use chrono::{DateTime, Local, NaiveDate};

/// Metadata of one flushed chunk file. Immutable once flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 1-based sequence index within this recorder run.
    pub seq_index: u64,
    /// Wall-clock time of the first sample.
    pub started_at: DateTime<Local>,
    /// Duration in seconds (the final chunk of a run may be shorter than
    /// the target).
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mean RMS over all samples in the chunk.
    pub rms_level: f32,
    /// Path relative to the data directory, e.g. `2026-08-07/14-03-21_0042.wav`.
    pub relative_path: String,
    /// Day partition this chunk was written into (local date at chunk start).
    pub partition: NaiveDate,
}

impl Chunk {
    /// Wall-clock time just past the last sample.
    pub fn end_time(&self) -> DateTime<Local> {
        self.started_at + chrono::Duration::microseconds((self.duration_secs * 1e6) as i64)
    }

    /// Whether this chunk counts as silent for the given threshold.
    pub fn is_silent(&self, silence_threshold: f32) -> bool {
        self.rms_level < silence_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn chunk(rms: f32, duration_secs: f64) -> Chunk {
        let started_at = Local.with_ymd_and_hms(2026, 8, 7, 14, 0, 0).unwrap();
        Chunk {
            seq_index: 1,
            started_at,
            duration_secs,
            sample_rate: 16_000,
            channels: 1,
            rms_level: rms,
            relative_path: "2026-08-07/14-00-00_0001.wav".to_string(),
            partition: started_at.date_naive(),
        }
    }

    #[test]
    fn test_end_time_adds_duration() {
        let c = chunk(0.1, 30.0);
        let expected = Local.with_ymd_and_hms(2026, 8, 7, 14, 0, 30).unwrap();
        assert_eq!(c.end_time(), expected);
    }

    #[test]
    fn test_is_silent_strictly_below_threshold() {
        assert!(chunk(0.0005, 30.0).is_silent(0.001));
        assert!(!chunk(0.001, 30.0).is_silent(0.001));
        assert!(!chunk(0.05, 30.0).is_silent(0.001));
    }
}
