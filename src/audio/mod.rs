//! Audio capture: sources, the cpal backend, and the capture engine.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod engine;
pub mod level;
pub mod source;

pub use engine::{AudioFrame, CaptureEngine, CaptureHandle, CaptureStatus};
pub use source::AudioSource;
