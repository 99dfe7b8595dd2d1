//! Outward lifecycle events.
//!
//! The recorder reports session lifecycle and capture health as structured
//! records, not free text, so a status or dashboard collaborator can consume
//! them without parsing log lines.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

/// A structured lifecycle event emitted by the pipeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SessionOpened {
        session_id: String,
        start_time: DateTime<Local>,
    },
    SessionClosed {
        session_id: String,
        end_time: DateTime<Local>,
        duration_secs: f64,
    },
    SessionDiscarded {
        session_id: String,
        duration_secs: f64,
    },
    ChunkWriteFailed {
        path: String,
        message: String,
    },
    DeviceLost {
        device: String,
    },
}

/// Trait for consuming lifecycle events.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Implementations must not block the caller for long;
    /// the consumer thread emits events inline between chunks.
    fn emit(&self, event: &LifecycleEvent);
}

/// Default sink that forwards events to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::SessionOpened {
                session_id,
                start_time,
            } => info!(%session_id, %start_time, "session opened"),
            LifecycleEvent::SessionClosed {
                session_id,
                end_time,
                duration_secs,
            } => info!(%session_id, %end_time, duration_secs, "session closed"),
            LifecycleEvent::SessionDiscarded {
                session_id,
                duration_secs,
            } => info!(%session_id, duration_secs, "session discarded (too short)"),
            LifecycleEvent::ChunkWriteFailed { path, message } => {
                warn!(%path, %message, "chunk write failed, dropping chunk")
            }
            LifecycleEvent::DeviceLost { device } => warn!(%device, "capture device lost"),
        }
    }
}

/// Sink that collects events in memory, for tests and embedders that poll.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all events collected so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Removes and returns all collected events.
    pub fn take(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: &LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
