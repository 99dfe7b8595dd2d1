//! Composition root: capture → chunking → segmentation → store.
//!
//! The recorder is an explicitly constructed context object with a clear
//! lifecycle (`new`, `start`/`run`, `stop`); there are no process-wide
//! singletons. One capture thread feeds the bounded frame queue; one
//! consumer thread owns the chunk writer, the segmentation engine, and all
//! store mutations, so session events apply in strict arrival order.

use crate::audio::engine::{CaptureEngine, CaptureHandle, CaptureStatus};
use crate::audio::source::AudioSource;
use crate::chunk::{Chunk, ChunkWriter};
use crate::config::RecorderConfig;
use crate::defaults;
use crate::error::{Result, SoundlogError};
use crate::events::{EventSink, LifecycleEvent, LogSink};
use crate::retention::RetentionSweeper;
use crate::segment::{SegmentAction, SegmentationEngine, SessionOutcome};
use crate::store::{ChunkRef, SessionStore};
use chrono::Local;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Continuous recorder: owns the store and wires the pipeline together.
pub struct Recorder {
    config: RecorderConfig,
    store: Arc<SessionStore>,
    events: Arc<dyn EventSink>,
}

impl Recorder {
    /// Validates the configuration and opens the session store.
    pub fn new(config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SessionStore::open(&config.storage.data_dir)?);
        Ok(Self {
            config,
            store,
            events: Arc::new(LogSink),
        })
    }

    /// Replaces the lifecycle event sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Shared handle to the session store, for CLI-facing queries.
    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    /// Starts the pipeline on the given audio source.
    ///
    /// Crash recovery runs first: sessions left open by a prior run are
    /// force-closed (with lifecycle events) before any new session can be
    /// created.
    pub fn start<S: AudioSource + 'static>(&self, source: S) -> Result<RecorderHandle> {
        self.recover_interrupted()?;

        let (frames, capture) = CaptureEngine::start(source)?;
        let capture = Arc::new(capture);

        let consumer = ConsumerLoop {
            writer: ChunkWriter::new(&self.config.storage.data_dir, &self.config.capture),
            engine: SegmentationEngine::new(self.config.session.clone()),
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            capture: Arc::clone(&capture),
            current_session: None,
        };
        let thread = thread::spawn(move || consumer.run(frames));

        info!(device = capture.device_name(), "recording started");
        Ok(RecorderHandle {
            capture,
            consumer: Some(thread),
        })
    }

    /// Runs the pipeline until interrupted (SIGINT) or capture ends.
    ///
    /// Retention sweeps run on their own schedule while recording, when
    /// auto-cleanup is enabled. Device loss surfaces as an error so a
    /// supervising restart loop can act on it.
    pub async fn run<S: AudioSource + 'static>(&self, source: S) -> Result<()> {
        let handle = self.start(source)?;

        let sweeper_task = if self.config.storage.auto_cleanup {
            let sweeper = RetentionSweeper::new(self.store());
            let policy = self.config.storage.clone();
            Some(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(defaults::SWEEP_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    if let Err(e) = sweeper.sweep(Local::now(), &policy) {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
            }))
        } else {
            None
        };

        let capture = Arc::clone(&handle.capture);
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| SoundlogError::Other(format!("signal handler: {}", e)))?;
                info!("interrupt received, shutting down");
            }
            _ = async {
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if capture.status() != CaptureStatus::Running {
                        break;
                    }
                }
            } => {}
        }

        if let Some(task) = sweeper_task {
            task.abort();
        }

        let status = handle.stop();
        match status {
            CaptureStatus::DeviceLost => Err(SoundlogError::DeviceLost {
                device: capture.device_name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Force-closes sessions left open by a prior run and reports them.
    fn recover_interrupted(&self) -> Result<()> {
        let recovered = self.store.recover(self.config.session.min_session_secs)?;
        for (session_id, outcome) in recovered {
            let session = self.store.get_session(&session_id)?;
            let event = match outcome {
                SessionOutcome::Closed => LifecycleEvent::SessionClosed {
                    session_id,
                    end_time: session.end_time.unwrap_or(session.start_time),
                    duration_secs: session.duration_secs,
                },
                SessionOutcome::Discarded => LifecycleEvent::SessionDiscarded {
                    session_id,
                    duration_secs: session.duration_secs,
                },
            };
            self.events.emit(&event);
        }
        Ok(())
    }
}

/// Handle to a running recorder pipeline.
pub struct RecorderHandle {
    capture: Arc<CaptureHandle>,
    consumer: Option<JoinHandle<()>>,
}

impl RecorderHandle {
    /// Stops capture, drains the queue, flushes the final partial chunk,
    /// force-closes any open session, and joins both threads.
    ///
    /// Returns the terminal capture status.
    pub fn stop(mut self) -> CaptureStatus {
        self.capture.stop();
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
        self.capture.status()
    }

    /// Current capture status.
    pub fn status(&self) -> CaptureStatus {
        self.capture.status()
    }

    /// Frames dropped so far because the queue was full.
    pub fn overruns(&self) -> u64 {
        self.capture.overruns()
    }
}

/// The consumer thread: chunk writing, segmentation, and store mutations.
struct ConsumerLoop {
    writer: ChunkWriter,
    engine: SegmentationEngine,
    store: Arc<SessionStore>,
    events: Arc<dyn EventSink>,
    capture: Arc<CaptureHandle>,
    current_session: Option<String>,
}

impl ConsumerLoop {
    fn run(mut self, frames: Receiver<crate::audio::engine::AudioFrame>) {
        while let Ok(frame) = frames.recv() {
            match self.writer.on_frame(&frame) {
                Ok(chunks) => {
                    for chunk in chunks {
                        self.handle_chunk(chunk);
                    }
                }
                Err(e) => self.report_write_failure(e),
            }
        }

        // Capture ended: flush trailing audio so the state machine sees a
        // deterministic final chunk, then force-close.
        match self.writer.flush_partial() {
            Ok(Some(chunk)) => self.handle_chunk(chunk),
            Ok(None) => {}
            Err(e) => self.report_write_failure(e),
        }
        if let Some(action) = self.engine.finish() {
            self.apply(action);
        }

        if self.capture.status() == CaptureStatus::DeviceLost {
            self.events.emit(&LifecycleEvent::DeviceLost {
                device: self.capture.device_name().to_string(),
            });
        }
    }

    fn handle_chunk(&mut self, chunk: Chunk) {
        if let Err(e) = self.store.record_chunk(&chunk) {
            // The file exists; only its record is missing. Keep going.
            warn!(path = %chunk.relative_path, error = %e, "failed to record chunk");
        }
        for action in self.engine.process(chunk) {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: SegmentAction) {
        let result = match action {
            SegmentAction::Open(chunk) => self.open_session(&chunk),
            SegmentAction::Append(chunk) => self.append_to_session(&chunk),
            SegmentAction::Close {
                end_time,
                outcome,
                duration_secs,
            } => self.close_session(end_time, outcome, duration_secs),
        };
        if let Err(e) = result {
            // A store failure here is a consistency problem, not a reason
            // to stop consuming audio.
            error!(error = %e, "failed to apply session event");
        }
    }

    fn open_session(&mut self, chunk: &Chunk) -> Result<()> {
        let session_id = self.store.begin_session(chunk.started_at)?;
        self.store
            .append_chunk(&session_id, &ChunkRef::from(chunk))?;
        self.events.emit(&LifecycleEvent::SessionOpened {
            session_id: session_id.clone(),
            start_time: chunk.started_at,
        });
        self.current_session = Some(session_id);
        Ok(())
    }

    fn append_to_session(&mut self, chunk: &Chunk) -> Result<()> {
        let Some(session_id) = &self.current_session else {
            return Err(SoundlogError::Other(
                "append without an open session".to_string(),
            ));
        };
        self.store.append_chunk(session_id, &ChunkRef::from(chunk))
    }

    fn close_session(
        &mut self,
        end_time: chrono::DateTime<Local>,
        outcome: SessionOutcome,
        duration_secs: f64,
    ) -> Result<()> {
        let Some(session_id) = self.current_session.take() else {
            return Err(SoundlogError::Other(
                "close without an open session".to_string(),
            ));
        };
        self.store.close_session(&session_id, end_time, outcome)?;
        let event = match outcome {
            SessionOutcome::Closed => LifecycleEvent::SessionClosed {
                session_id,
                end_time,
                duration_secs,
            },
            SessionOutcome::Discarded => LifecycleEvent::SessionDiscarded {
                session_id,
                duration_secs,
            },
        };
        self.events.emit(&event);
        Ok(())
    }

    fn report_write_failure(&self, e: SoundlogError) {
        let (path, message) = match &e {
            SoundlogError::ChunkWrite { path, message } => (path.clone(), message.clone()),
            other => (String::new(), other.to_string()),
        };
        self.events
            .emit(&LifecycleEvent::ChunkWriteFailed { path, message });
    }
}
