//! Capture engine: one audio source, one bounded frame queue.
//!
//! A dedicated capture thread polls the source and pushes timestamped frames
//! into a bounded channel. The thread never blocks on the consumer: when the
//! queue is full the oldest frame is dropped and the overrun counter
//! increments, so audio loss is always observable but never stalls capture.

use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::Result;
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// A frame of raw audio samples with timing information.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Wall-clock time when this frame was read from the source.
    pub captured_at: DateTime<Local>,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, captured_at: DateTime<Local>, sequence: u64) -> Self {
        Self {
            samples,
            captured_at,
            sequence,
        }
    }

    /// Duration of this frame in seconds for the given format.
    pub fn duration_secs(&self, sample_rate: u32, channels: u16) -> f64 {
        self.samples.len() as f64 / (sample_rate as f64 * channels as f64)
    }
}

/// Terminal state of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Running,
    /// Stopped normally (explicit stop, or a finite source ran dry).
    Stopped,
    /// The device disappeared mid-stream. The engine does not reconnect;
    /// that is the supervisor's job.
    DeviceLost,
}

const STATUS_RUNNING: u8 = 0;
const STATUS_STOPPED: u8 = 1;
const STATUS_DEVICE_LOST: u8 = 2;

/// Capture engine: spawns the capture thread for an audio source.
pub struct CaptureEngine;

impl CaptureEngine {
    /// Starts capture, returning the frame receiver and a control handle.
    ///
    /// The capture format (sample rate, channel count) is fixed by the
    /// source itself; frames carry interleaved samples in that format.
    /// The capture thread owns the source for its lifetime. Dropping the
    /// receiver or calling [`CaptureHandle::stop`] ends capture; either way
    /// the source is stopped before the thread exits and the sender is
    /// dropped, so the consumer sees a clean end-of-stream.
    pub fn start<S: AudioSource + 'static>(
        mut source: S,
    ) -> Result<(Receiver<AudioFrame>, CaptureHandle)> {
        let (tx, rx) = bounded(defaults::FRAME_QUEUE_CAPACITY);
        // The capture thread holds its own receiver so it can drop the
        // oldest frame when the queue is full (crossbeam channels are MPMC).
        let stealer = rx.clone();

        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(AtomicU8::new(STATUS_RUNNING));
        let overruns = Arc::new(AtomicU64::new(0));
        let device_name = source.device_name().unwrap_or("unknown").to_string();

        source.start()?;

        let poll_interval = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        let thread_running = running.clone();
        let thread_status = status.clone();
        let thread_overruns = overruns.clone();

        let handle = thread::spawn(move || {
            let mut sequence: u64 = 0;

            while thread_running.load(Ordering::SeqCst) {
                if source.is_lost() {
                    thread_status.store(STATUS_DEVICE_LOST, Ordering::SeqCst);
                    break;
                }

                let samples = match source.read_samples() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to read from audio source");
                        if source.is_lost() {
                            thread_status.store(STATUS_DEVICE_LOST, Ordering::SeqCst);
                            break;
                        }
                        thread::sleep(poll_interval);
                        continue;
                    }
                };

                if samples.is_empty() {
                    if source.is_finite() {
                        // Finite source exhausted: clean end of stream
                        break;
                    }
                    thread::sleep(poll_interval);
                    continue;
                }

                let frame = AudioFrame::new(samples, Local::now(), sequence);
                sequence += 1;

                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        // Consumer is behind: drop the oldest frame, count it,
                        // and enqueue the new one. Never block the producer.
                        let _ = stealer.try_recv();
                        thread_overruns.fetch_add(1, Ordering::Relaxed);
                        if tx.try_send(frame).is_err() {
                            debug!("frame dropped after overrun eviction");
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }

                thread::sleep(poll_interval);
            }

            if let Err(e) = source.stop() {
                warn!(error = %e, "failed to stop audio source");
            }
            // Stopped is the terminal state unless device loss already won
            let _ = thread_status.compare_exchange(
                STATUS_RUNNING,
                STATUS_STOPPED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        });

        let capture_handle = CaptureHandle {
            running,
            status,
            overruns,
            device_name,
            thread: std::sync::Mutex::new(Some(handle)),
        };

        Ok((rx, capture_handle))
    }
}

/// Handle to control a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    status: Arc<AtomicU8>,
    overruns: Arc<AtomicU64>,
    device_name: String,
    thread: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CaptureHandle {
    /// Stops capture and waits for the capture thread to finish.
    ///
    /// Idempotent: later calls are no-ops. On return the underlying source
    /// has been stopped and the frame sender dropped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.thread.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }

    /// Current status of the capture run.
    pub fn status(&self) -> CaptureStatus {
        match self.status.load(Ordering::SeqCst) {
            STATUS_DEVICE_LOST => CaptureStatus::DeviceLost,
            STATUS_STOPPED => CaptureStatus::Stopped,
            _ => {
                if self.running.load(Ordering::SeqCst) {
                    CaptureStatus::Running
                } else {
                    CaptureStatus::Stopped
                }
            }
        }
    }

    /// Number of frames dropped because the queue was full.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Name of the device this capture run holds open.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}
