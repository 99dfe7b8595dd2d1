//! soundlog - continuous system-audio recording with session segmentation.
//!
//! Captures system audio around the clock, slices it into fixed-duration
//! WAV chunks grouped into day partitions, and groups contiguous chunks
//! into sessions by detecting silence gaps in near-real time.

// Enforce error handling discipline in non-test code
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod chunk;
pub mod config;
pub mod defaults;
pub mod device;
pub mod error;
pub mod events;
pub mod recorder;
pub mod retention;
pub mod segment;
pub mod store;
pub mod telemetry;

// Core traits (source → chunks → sessions)
pub use audio::engine::{CaptureEngine, CaptureHandle, CaptureStatus};
pub use audio::source::AudioSource;
#[cfg(feature = "cpal-audio")]
pub use audio::capture::{CpalAudioSource, suppress_audio_warnings};

// Pipeline
pub use chunk::{Chunk, ChunkWriter};
pub use recorder::{Recorder, RecorderHandle};
pub use segment::{SegmentationEngine, SessionOutcome};

// Device selection
pub use device::{DeviceProber, ProbeOutcome};

// Persistence and retention
pub use retention::{RetentionSweeper, SweepReport};
pub use store::{Session, SessionFilter, SessionStatus, SessionStore, TranscriptionStatus};

// Error handling
pub use error::{Result, SoundlogError};

// Config and events
pub use config::{DeviceSelection, RecorderConfig};
pub use events::{CollectorSink, EventSink, LifecycleEvent, LogSink};

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.1+abc1234"` when git hash is available, `"0.3.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
