//! Audio source abstraction.

use crate::error::{Result, SoundlogError};
use std::collections::VecDeque;

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples have accumulated since the last read.
    ///
    /// Samples are interleaved 16-bit PCM. An empty vector means no new
    /// audio is available yet.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Returns true if the source runs out of audio (file replay, scripted
    /// test sources). Live devices return false.
    fn is_finite(&self) -> bool {
        false
    }

    /// Returns true if the underlying device disappeared mid-stream.
    fn is_lost(&self) -> bool {
        false
    }

    /// Name of the open device, used for probe self-exclusion.
    fn device_name(&self) -> Option<&str> {
        None
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_read: bool,
    lost: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            should_fail_start: false,
            should_fail_read: false,
            lost: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the mock to report its device as lost
    pub fn with_device_lost(mut self) -> Self {
        self.lost = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(SoundlogError::Capture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            Err(SoundlogError::Capture {
                message: self.error_message.clone(),
            })
        } else {
            Ok(self.samples.clone())
        }
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn device_name(&self) -> Option<&str> {
        Some("mock")
    }
}

/// Audio source that replays a fixed timeline of reads, then ends.
///
/// Each queued buffer is returned by one `read_samples` call, which makes
/// pipeline tests deterministic: the test scripts exactly what the capture
/// thread sees, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAudioSource {
    reads: VecDeque<Vec<i16>>,
    is_started: bool,
}

impl ScriptedAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one read's worth of samples to the script.
    pub fn push_read(&mut self, samples: Vec<i16>) {
        self.reads.push_back(samples);
    }

    /// Builder form of [`push_read`](Self::push_read).
    pub fn with_read(mut self, samples: Vec<i16>) -> Self {
        self.push_read(samples);
        self
    }

    /// Number of scripted reads remaining.
    pub fn remaining(&self) -> usize {
        self.reads.len()
    }
}

impl AudioSource for ScriptedAudioSource {
    fn start(&mut self) -> Result<()> {
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        Ok(self.reads.pop_front().unwrap_or_default())
    }

    fn is_finite(&self) -> bool {
        true
    }
}
