//! Durable session records and their chunk membership.

pub mod sqlite;

pub use sqlite::SessionStore;

use crate::chunk::Chunk;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
    Discarded,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
            SessionStatus::Discarded => "discarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SessionStatus::Open),
            "closed" => Some(SessionStatus::Closed),
            "discarded" => Some(SessionStatus::Discarded),
            _ => None,
        }
    }
}

/// Transcription progress, written back by the transcription collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    None,
    Pending,
    Done,
    Failed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::None => "none",
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::Done => "done",
            TranscriptionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(TranscriptionStatus::None),
            "pending" => Some(TranscriptionStatus::Pending),
            "done" => Some(TranscriptionStatus::Done),
            "failed" => Some(TranscriptionStatus::Failed),
            _ => None,
        }
    }
}

/// Non-owning reference to a chunk, as held by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub seq_index: u64,
    pub relative_path: String,
    pub started_at: DateTime<Local>,
    pub duration_secs: f64,
    pub rms_level: f32,
}

impl ChunkRef {
    pub fn end_time(&self) -> DateTime<Local> {
        self.started_at + chrono::Duration::microseconds((self.duration_secs * 1e6) as i64)
    }
}

impl From<&Chunk> for ChunkRef {
    fn from(chunk: &Chunk) -> Self {
        Self {
            seq_index: chunk.seq_index,
            relative_path: chunk.relative_path.clone(),
            started_at: chunk.started_at,
            duration_secs: chunk.duration_secs,
            rms_level: chunk.rms_level,
        }
    }
}

/// A session record with its ordered chunk references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    /// Sum of all appended chunks' durations, silence included.
    pub duration_secs: f64,
    /// Arithmetic mean RMS over all appended chunks.
    pub avg_rms: f32,
    pub status: SessionStatus,
    pub tags: Vec<String>,
    pub notes: String,
    pub transcription_status: TranscriptionStatus,
    pub transcription_path: Option<String>,
    /// Set when a referenced chunk file was found missing on disk.
    pub stale_chunks: bool,
    pub chunks: Vec<ChunkRef>,
}

impl Session {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Filter for [`SessionStore::list_sessions`](sqlite::SessionStore::list_sessions).
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions started on this local date.
    pub date: Option<NaiveDate>,
    pub status: Option<SessionStatus>,
    pub tag: Option<String>,
    /// Maximum number of sessions returned; 0 means the default of 100.
    pub limit: usize,
}

/// Aggregate metadata of one day partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionStats {
    pub date: NaiveDate,
    pub chunk_count: u64,
    pub total_duration_secs: f64,
}

/// Store-wide statistics for quick disk-usage queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub total_sessions: u64,
    pub open_sessions: u64,
    pub transcribed_sessions: u64,
    pub disk_usage_bytes: u64,
}

/// Derives a globally unique session id from the start timestamp.
///
/// The subsecond component keeps ids unique even if two sessions start
/// within the same second (stop/start races at chunk boundaries).
pub fn session_id_for(start_time: DateTime<Local>) -> String {
    format!(
        "sess_{}_{:06x}",
        start_time.format("%Y%m%d_%H%M%S"),
        start_time.timestamp_subsec_nanos() & 0xff_ffff
    )
}
