//! Chunk writer: accumulates frames into fixed-duration WAV files.
//!
//! Chunk boundaries are time-based, not silence-based — a chunk may span
//! silence and non-silence. This decouples storage granularity from the
//! segmentation logic downstream.
//!
//! A chunk file only appears under its final name once fully written: the
//! WAV is written to a `.tmp` name in the same directory and renamed into
//! place, so a reader can never observe a partially written chunk.

use crate::audio::engine::AudioFrame;
use crate::audio::level::rms_i16;
use crate::chunk::Chunk;
use crate::config::CaptureConfig;
use crate::error::{Result, SoundlogError};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Accumulates audio frames and flushes fixed-duration chunks to the
/// current day partition.
pub struct ChunkWriter {
    data_dir: PathBuf,
    sample_rate: u32,
    channels: u16,
    /// Interleaved samples per full chunk.
    target_samples: usize,
    buffer: Vec<i16>,
    /// Wall-clock time of the first buffered sample.
    buffer_started_at: Option<DateTime<Local>>,
    next_seq: u64,
}

impl ChunkWriter {
    pub fn new(data_dir: impl Into<PathBuf>, capture: &CaptureConfig) -> Self {
        let target_samples = capture.chunk_duration_secs as usize
            * capture.sample_rate as usize
            * capture.channels as usize;
        Self {
            data_dir: data_dir.into(),
            sample_rate: capture.sample_rate,
            channels: capture.channels,
            target_samples,
            buffer: Vec::with_capacity(target_samples),
            buffer_started_at: None,
            next_seq: 1,
        }
    }

    /// Seconds of audio currently buffered.
    pub fn buffered_secs(&self) -> f64 {
        self.buffer.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    /// Consumes one frame; returns any chunks whose boundary was reached.
    ///
    /// Crossing local midnight forces a partial flush first, so every chunk
    /// lands in the day partition of its own start date.
    ///
    /// # Errors
    /// A write failure drops the buffered audio (accumulation restarts with
    /// a fresh buffer) and surfaces [`SoundlogError::ChunkWrite`]; the
    /// caller keeps the pipeline running.
    pub fn on_frame(&mut self, frame: &AudioFrame) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();

        if let Some(started_at) = self.buffer_started_at
            && started_at.date_naive() != frame.captured_at.date_naive()
            && let Some(chunk) = self.flush_partial()?
        {
            debug!(partition = %chunk.partition, "day partition rollover");
            chunks.push(chunk);
        }

        if self.buffer.is_empty() {
            self.buffer_started_at = Some(frame.captured_at);
        }
        self.buffer.extend_from_slice(&frame.samples);

        while self.buffer.len() >= self.target_samples {
            let samples: Vec<i16> = self.buffer.drain(..self.target_samples).collect();
            chunks.push(self.flush(&samples)?);
        }

        Ok(chunks)
    }

    /// Flushes whatever is buffered as a final short chunk.
    ///
    /// Called on explicit stop and on partition rollover. Returns `None`
    /// when nothing is buffered.
    pub fn flush_partial(&mut self) -> Result<Option<Chunk>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let samples = std::mem::take(&mut self.buffer);
        Ok(Some(self.flush(&samples)?))
    }

    /// Writes one chunk file and advances the buffer clock.
    fn flush(&mut self, samples: &[i16]) -> Result<Chunk> {
        let started_at = self.buffer_started_at.unwrap_or_else(Local::now);
        let duration_secs =
            samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64);

        let result = self.write_wav(samples, started_at);
        match result {
            Ok(relative_path) => {
                let chunk = Chunk {
                    seq_index: self.next_seq,
                    started_at,
                    duration_secs,
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    rms_level: rms_i16(samples),
                    relative_path,
                    partition: started_at.date_naive(),
                };
                self.next_seq += 1;
                self.advance_clock(started_at, duration_secs);
                debug!(
                    path = %chunk.relative_path,
                    rms = chunk.rms_level,
                    duration = chunk.duration_secs,
                    "chunk flushed"
                );
                Ok(chunk)
            }
            Err(e) => {
                // The failed chunk is dropped; start over with a fresh buffer
                self.buffer.clear();
                self.buffer_started_at = None;
                Err(e)
            }
        }
    }

    fn advance_clock(&mut self, started_at: DateTime<Local>, duration_secs: f64) {
        self.buffer_started_at = if self.buffer.is_empty() {
            None
        } else {
            Some(started_at + chrono::Duration::microseconds((duration_secs * 1e6) as i64))
        };
    }

    /// Writes the WAV to a temp name and renames it into place.
    fn write_wav(&self, samples: &[i16], started_at: DateTime<Local>) -> Result<String> {
        let date = started_at.date_naive();
        let partition_dir = self.data_dir.join(date.format("%Y-%m-%d").to_string());
        let filename = format!(
            "{}_{:04}.wav",
            started_at.format("%H-%M-%S"),
            self.next_seq
        );
        let relative_path = format!("{}/{}", date.format("%Y-%m-%d"), filename);

        let write_err = |message: String| SoundlogError::ChunkWrite {
            path: relative_path.clone(),
            message,
        };

        fs::create_dir_all(&partition_dir).map_err(|e| write_err(e.to_string()))?;

        let final_path = partition_dir.join(&filename);
        let tmp_path = partition_dir.join(format!("{}.tmp", filename));

        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let write_result = (|| -> std::result::Result<(), String> {
            let mut writer =
                hound::WavWriter::create(&tmp_path, spec).map_err(|e| e.to_string())?;
            for &sample in samples {
                writer.write_sample(sample).map_err(|e| e.to_string())?;
            }
            writer.finalize().map_err(|e| e.to_string())
        })();

        if let Err(message) = write_result {
            remove_tmp(&tmp_path);
            return Err(write_err(message));
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            remove_tmp(&tmp_path);
            return Err(write_err(e.to_string()));
        }

        Ok(relative_path)
    }
}

fn remove_tmp(path: &Path) {
    let _ = fs::remove_file(path);
}
