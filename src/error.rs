//! Error types for soundlog.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoundlogError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Device errors — fatal to the current capture attempt, the caller
    // may restart the pipeline with another device
    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("No active audio device found above the signal floor")]
    NoActiveDevice,

    #[error("Device probe failed for {device}: {message}")]
    DeviceProbe { device: String, message: String },

    #[error("Probe rejected for {device}: {reason}")]
    ProbeRejected { device: String, reason: String },

    #[error("Audio capture failed: {message}")]
    Capture { message: String },

    #[error("Audio device lost: {device}")]
    DeviceLost { device: String },

    // State errors — caller bugs, surfaced rather than swallowed
    #[error("Session is not open: {session_id}")]
    SessionNotOpen { session_id: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    // I/O errors local to one chunk — the chunk is dropped, capture continues
    #[error("Chunk write failed for {path}: {message}")]
    ChunkWrite { path: String, message: String },

    // Session store errors
    #[error("Session store error: {0}")]
    Store(#[from] rusqlite::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SoundlogError>;
