//! Default configuration constants for soundlog.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is plenty for speech-dominated system audio and keeps a full day of
/// chunks to a manageable size. Transcription collaborators expect it too.
pub const SAMPLE_RATE: u32 = 16_000;

/// Default channel count (mono).
pub const CHANNELS: u16 = 1;

/// Default chunk duration in seconds.
///
/// Every 30 seconds the accumulated audio is flushed to its own WAV file.
/// Chunk boundaries are purely time-based; segmentation happens downstream
/// on chunk metadata.
pub const CHUNK_DURATION_SECS: u32 = 30;

/// Default RMS threshold below which a chunk counts as silent.
///
/// This is deliberately low (roughly -60 dBFS): system audio that is playing
/// anything at all sits well above it, while an idle loopback device reads
/// essentially zero.
pub const SILENCE_THRESHOLD: f32 = 0.001;

/// Default silence gap in seconds that closes an open session.
///
/// 60 seconds of consecutive silent chunks ends the current session.
/// Shorter pauses (speaker thinking, video buffering) stay inside it.
pub const SILENCE_GAP_SECS: u32 = 60;

/// Default minimum session duration in seconds.
///
/// Sessions shorter than this are discarded as noise (a notification sound,
/// a stray volume beep) rather than recorded as real sessions.
pub const MIN_SESSION_SECS: u32 = 30;

/// Default retention horizon in days for the sweeper.
pub const RETENTION_DAYS: u32 = 30;

/// Default probe duration in milliseconds.
///
/// Probing opens a device only this long to measure its level. Keeping it
/// sub-second bounds the window in which a probe could disturb anything.
pub const PROBE_DURATION_MS: u64 = 500;

/// Default RMS floor for a probe to count as "has signal".
pub const PROBE_SIGNAL_FLOOR: f32 = 0.0005;

/// Capacity of the frame queue between the capture thread and the consumer.
///
/// At the 16ms poll cadence this holds roughly four seconds of audio.
/// When the queue is full the oldest frame is dropped and the overrun
/// counter increments; the capture thread never blocks.
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// Polling interval of the capture thread in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 16;

/// Interval between automatic retention sweeps, in seconds (once per day).
pub const SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Device-name substrings that are never probed for system-audio selection.
///
/// Microphone and camera endpoints would record the room, not the machine;
/// probing them is both useless and a privacy hazard.
pub const DEVICE_BLACKLIST: &[&str] = &["microphone", "webcam", "headset", "communications"];
