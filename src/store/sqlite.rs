//! SQLite-backed session store.
//!
//! Single-writer discipline: the connection lives behind a mutex that is
//! held for at most one transaction per call, so CLI-facing readers never
//! block the consumer thread for longer than that. Every mutating call is
//! one transaction; partial application is never observable.

use crate::chunk::Chunk;
use crate::error::{Result, SoundlogError};
use crate::segment::SessionOutcome;
use crate::store::{
    ChunkRef, PartitionStats, Session, SessionFilter, SessionStatus, StorageStats,
    TranscriptionStatus, session_id_for,
};
use chrono::{DateTime, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const DEFAULT_LIST_LIMIT: usize = 100;

const SESSION_COLUMNS: &str = "session_id, start_time, end_time, duration_secs, rms_sum, \
     chunk_count, status, tags, notes, transcription_status, transcription_path, stale_chunks";

/// Durable record of sessions, chunks, and day-partition aggregates.
pub struct SessionStore {
    conn: Mutex<Connection>,
    data_dir: PathBuf,
}

impl SessionStore {
    /// Opens (or creates) the store at `<data_dir>/sessions.db`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let conn = Connection::open(data_dir.join("sessions.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                 session_id TEXT PRIMARY KEY,
                 start_time TEXT NOT NULL,
                 end_time TEXT,
                 duration_secs REAL NOT NULL DEFAULT 0,
                 rms_sum REAL NOT NULL DEFAULT 0,
                 chunk_count INTEGER NOT NULL DEFAULT 0,
                 status TEXT NOT NULL DEFAULT 'open',
                 tags TEXT NOT NULL DEFAULT '[]',
                 notes TEXT NOT NULL DEFAULT '',
                 transcription_status TEXT NOT NULL DEFAULT 'none',
                 transcription_path TEXT,
                 stale_chunks INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);
             CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

             CREATE TABLE IF NOT EXISTS session_chunks (
                 session_id TEXT NOT NULL,
                 position INTEGER NOT NULL,
                 chunk_path TEXT NOT NULL,
                 seq_index INTEGER NOT NULL,
                 started_at TEXT NOT NULL,
                 duration_secs REAL NOT NULL,
                 rms_level REAL NOT NULL,
                 PRIMARY KEY (session_id, position)
             );

             CREATE TABLE IF NOT EXISTS chunks (
                 path TEXT PRIMARY KEY,
                 partition_date TEXT NOT NULL,
                 seq_index INTEGER NOT NULL,
                 started_at TEXT NOT NULL,
                 duration_secs REAL NOT NULL,
                 sample_rate INTEGER NOT NULL,
                 channels INTEGER NOT NULL,
                 rms_level REAL NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_partition ON chunks(partition_date);

             CREATE TABLE IF NOT EXISTS partitions (
                 partition_date TEXT PRIMARY KEY,
                 chunk_count INTEGER NOT NULL DEFAULT 0,
                 total_duration_secs REAL NOT NULL DEFAULT 0
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            data_dir,
        })
    }

    /// Root directory the chunk paths are relative to.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SoundlogError::Other("session store mutex poisoned".to_string()))
    }

    /// Records a flushed chunk and updates its day-partition aggregate.
    pub fn record_chunk(&self, chunk: &Chunk) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO chunks
             (path, partition_date, seq_index, started_at, duration_secs,
              sample_rate, channels, rms_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chunk.relative_path,
                chunk.partition.format("%Y-%m-%d").to_string(),
                chunk.seq_index as i64,
                chunk.started_at.to_rfc3339(),
                chunk.duration_secs,
                chunk.sample_rate,
                chunk.channels,
                chunk.rms_level as f64,
            ],
        )?;
        tx.execute(
            "INSERT INTO partitions (partition_date, chunk_count, total_duration_secs)
             VALUES (?1, 1, ?2)
             ON CONFLICT(partition_date) DO UPDATE SET
                 chunk_count = chunk_count + 1,
                 total_duration_secs = total_duration_secs + ?2",
            params![chunk.partition.format("%Y-%m-%d").to_string(), chunk.duration_secs],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Creates a new open session and returns its id.
    pub fn begin_session(&self, start_time: DateTime<Local>) -> Result<String> {
        let session_id = session_id_for(start_time);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (session_id, start_time, status) VALUES (?1, ?2, 'open')",
            params![session_id, start_time.to_rfc3339()],
        )?;
        debug!(%session_id, "session record created");
        Ok(session_id)
    }

    /// Appends a chunk reference, recomputing duration and the running
    /// average RMS incrementally.
    ///
    /// # Errors
    /// `SessionNotOpen` if the session is closed or discarded.
    pub fn append_chunk(&self, session_id: &str, chunk: &ChunkRef) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let row: Option<(String, i64)> = tx
            .query_row(
                "SELECT status, chunk_count FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (status, chunk_count) = row.ok_or_else(|| SoundlogError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;
        if status != SessionStatus::Open.as_str() {
            return Err(SoundlogError::SessionNotOpen {
                session_id: session_id.to_string(),
            });
        }

        tx.execute(
            "INSERT INTO session_chunks
             (session_id, position, chunk_path, seq_index, started_at, duration_secs, rms_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                chunk_count,
                chunk.relative_path,
                chunk.seq_index as i64,
                chunk.started_at.to_rfc3339(),
                chunk.duration_secs,
                chunk.rms_level as f64,
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET
                 duration_secs = duration_secs + ?2,
                 rms_sum = rms_sum + ?3,
                 chunk_count = chunk_count + 1,
                 end_time = ?4
             WHERE session_id = ?1",
            params![
                session_id,
                chunk.duration_secs,
                chunk.rms_level as f64,
                chunk.end_time().to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Closes an open session with the given outcome.
    pub fn close_session(
        &self,
        session_id: &str,
        end_time: DateTime<Local>,
        outcome: SessionOutcome,
    ) -> Result<()> {
        let status = match outcome {
            SessionOutcome::Closed => SessionStatus::Closed,
            SessionOutcome::Discarded => SessionStatus::Discarded,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match current.as_deref() {
            None => {
                return Err(SoundlogError::SessionNotFound {
                    session_id: session_id.to_string(),
                });
            }
            Some("open") => {}
            Some(_) => {
                return Err(SoundlogError::SessionNotOpen {
                    session_id: session_id.to_string(),
                });
            }
        }

        tx.execute(
            "UPDATE sessions SET status = ?2, end_time = ?3 WHERE session_id = ?1",
            params![session_id, status.as_str(), end_time.to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Loads one session with its ordered chunk references.
    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        let conn = self.lock()?;
        let raw: Option<RawSession> = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE session_id = ?1", SESSION_COLUMNS),
                params![session_id],
                RawSession::from_row,
            )
            .optional()?;

        let raw = raw.ok_or_else(|| SoundlogError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;
        let chunks = load_chunks(&conn, session_id)?;
        raw.into_session(chunks)
    }

    /// Lists sessions matching the filter, newest first.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let mut query = format!("SELECT {} FROM sessions WHERE 1=1", SESSION_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if let Some(date) = filter.date {
            query.push_str(&format!(" AND start_time LIKE ?{}", args.len() + 1));
            args.push(format!("{}%", date.format("%Y-%m-%d")));
        }
        if let Some(status) = filter.status {
            query.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        if let Some(tag) = &filter.tag {
            // Tags are stored as a JSON array of strings
            query.push_str(&format!(" AND tags LIKE ?{}", args.len() + 1));
            args.push(format!("%\"{}\"%", tag));
        }
        let limit = if filter.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            filter.limit
        };
        query.push_str(&format!(" ORDER BY start_time DESC LIMIT {}", limit));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), RawSession::from_row)?;

        let mut sessions = Vec::new();
        for raw in rows {
            let raw = raw?;
            let chunks = load_chunks(&conn, &raw.id)?;
            sessions.push(raw.into_session(chunks)?);
        }
        Ok(sessions)
    }

    /// Deletes a session record and its chunk membership.
    ///
    /// Chunk rows and files are owned by day partitions and stay behind;
    /// the retention sweeper reclaims them.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM session_chunks WHERE session_id = ?1",
            params![session_id],
        )?;
        let rows = tx.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        if rows == 0 {
            return Err(SoundlogError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }

        tx.commit()?;
        info!(%session_id, "session deleted");
        Ok(())
    }

    /// Adds a tag to a session (no-op when already present).
    pub fn tag_session(&self, session_id: &str, tag: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let tags_json: Option<String> = tx
            .query_row(
                "SELECT tags FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        let tags_json = tags_json.ok_or_else(|| SoundlogError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

        let mut tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
            tx.execute(
                "UPDATE sessions SET tags = ?2 WHERE session_id = ?1",
                params![
                    session_id,
                    serde_json::to_string(&tags)
                        .map_err(|e| SoundlogError::Other(e.to_string()))?
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Replaces a session's notes.
    pub fn set_notes(&self, session_id: &str, notes: &str) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE sessions SET notes = ?2 WHERE session_id = ?1",
            params![session_id, notes],
        )?;
        if rows == 0 {
            return Err(SoundlogError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Updates the transcription fields. Transcription collaborators write
    /// these and nothing else; chunk and timing fields stay untouched.
    pub fn set_transcription(
        &self,
        session_id: &str,
        status: TranscriptionStatus,
        path: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE sessions SET transcription_status = ?2, transcription_path = ?3
             WHERE session_id = ?1",
            params![session_id, status.as_str(), path],
        )?;
        if rows == 0 {
            return Err(SoundlogError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Force-closes sessions left `open` by a prior run.
    ///
    /// Applies the same minimum-duration rule as a live silence-triggered
    /// closure: the end time is the last appended chunk's end (or the start
    /// time for an empty session, which is always discarded).
    ///
    /// Returns the affected session ids with their outcome.
    pub fn recover(&self, min_session_secs: u32) -> Result<Vec<(String, SessionOutcome)>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let open: Vec<(String, String, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT session_id, start_time, duration_secs
                 FROM sessions WHERE status = 'open' ORDER BY start_time",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut recovered = Vec::new();
        for (session_id, start_time, duration_secs) in open {
            let last_chunk: Option<(String, f64)> = tx
                .query_row(
                    "SELECT started_at, duration_secs FROM session_chunks
                     WHERE session_id = ?1 ORDER BY position DESC LIMIT 1",
                    params![session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let end_time = match last_chunk {
                Some((started_at, chunk_secs)) => {
                    parse_ts(&started_at, "session_chunks.started_at")?
                        + chrono::Duration::microseconds((chunk_secs * 1e6) as i64)
                }
                None => parse_ts(&start_time, "sessions.start_time")?,
            };
            let outcome = if duration_secs >= min_session_secs as f64 {
                SessionOutcome::Closed
            } else {
                SessionOutcome::Discarded
            };
            let status = match outcome {
                SessionOutcome::Closed => SessionStatus::Closed,
                SessionOutcome::Discarded => SessionStatus::Discarded,
            };

            tx.execute(
                "UPDATE sessions SET status = ?2, end_time = ?3 WHERE session_id = ?1",
                params![session_id, status.as_str(), end_time.to_rfc3339()],
            )?;
            info!(%session_id, outcome = status.as_str(), "recovered interrupted session");
            recovered.push((session_id, outcome));
        }

        tx.commit()?;
        Ok(recovered)
    }

    /// Verifies that every chunk file a session references exists on disk.
    ///
    /// A missing file marks the session with the stale-chunks flag rather
    /// than failing; returns true when the session is consistent.
    pub fn verify_chunks(&self, session_id: &str) -> Result<bool> {
        let session = self.get_session(session_id)?;

        let missing: Vec<&ChunkRef> = session
            .chunks
            .iter()
            .filter(|c| !self.data_dir.join(&c.relative_path).exists())
            .collect();

        if missing.is_empty() {
            return Ok(true);
        }

        for chunk in &missing {
            warn!(
                %session_id,
                path = %chunk.relative_path,
                "session references missing chunk file"
            );
        }
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET stale_chunks = 1 WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(false)
    }

    /// Sessions whose end time is before the cutoff. Open sessions are
    /// never returned.
    pub fn sessions_older_than(&self, cutoff: DateTime<Local>) -> Result<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions
             WHERE status != 'open' AND end_time IS NOT NULL
               AND datetime(end_time) < datetime(?1)
             ORDER BY start_time",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], RawSession::from_row)?;

        let mut sessions = Vec::new();
        for raw in rows {
            let raw = raw?;
            let chunks = load_chunks(&conn, &raw.id)?;
            sessions.push(raw.into_session(chunks)?);
        }
        Ok(sessions)
    }

    /// Removes chunk records and decrements their partition aggregates.
    /// Called by the retention sweeper after the files are gone.
    pub fn purge_chunks(&self, paths: &[String]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for path in paths {
            let row: Option<(String, f64)> = tx
                .query_row(
                    "SELECT partition_date, duration_secs FROM chunks WHERE path = ?1",
                    params![path],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((partition_date, duration_secs)) = row {
                tx.execute("DELETE FROM chunks WHERE path = ?1", params![path])?;
                tx.execute(
                    "UPDATE partitions SET
                         chunk_count = MAX(chunk_count - 1, 0),
                         total_duration_secs = MAX(total_duration_secs - ?2, 0)
                     WHERE partition_date = ?1",
                    params![partition_date, duration_secs],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Aggregate metadata for one day partition, if it has any chunks.
    pub fn partition_stats(&self, date: NaiveDate) -> Result<Option<PartitionStats>> {
        let conn = self.lock()?;
        let row: Option<(i64, f64)> = conn
            .query_row(
                "SELECT chunk_count, total_duration_secs FROM partitions
                 WHERE partition_date = ?1",
                params![date.format("%Y-%m-%d").to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(chunk_count, total_duration_secs)| PartitionStats {
            date,
            chunk_count: chunk_count.max(0) as u64,
            total_duration_secs,
        }))
    }

    /// Store-wide statistics including disk usage of chunk files.
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let (total, open, transcribed) = {
            let conn = self.lock()?;
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            let open: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE status = 'open'",
                [],
                |row| row.get(0),
            )?;
            let transcribed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE transcription_status = 'done'",
                [],
                |row| row.get(0),
            )?;
            (total, open, transcribed)
        };

        Ok(StorageStats {
            total_sessions: total.max(0) as u64,
            open_sessions: open.max(0) as u64,
            transcribed_sessions: transcribed.max(0) as u64,
            disk_usage_bytes: wav_disk_usage(&self.data_dir),
        })
    }

    /// Merges a session's non-silent chunks into a single WAV under
    /// `<data_dir>/exports/<session_id>.wav` and tags the session.
    ///
    /// Missing chunk files are skipped (and the session marked stale).
    pub fn export_session(&self, session_id: &str, silence_threshold: f32) -> Result<PathBuf> {
        let session = self.get_session(session_id)?;

        let exports_dir = self.data_dir.join("exports");
        fs::create_dir_all(&exports_dir)?;
        let output_path = exports_dir.join(format!("{}.wav", session_id));
        let tmp_path = exports_dir.join(format!("{}.wav.tmp", session_id));

        let mut spec: Option<hound::WavSpec> = None;
        let mut samples: Vec<i16> = Vec::new();
        let mut any_missing = false;

        for chunk in &session.chunks {
            if chunk.rms_level < silence_threshold {
                continue;
            }
            let chunk_path = self.data_dir.join(&chunk.relative_path);
            if !chunk_path.exists() {
                warn!(%session_id, path = %chunk.relative_path, "chunk file missing, skipping");
                any_missing = true;
                continue;
            }
            let mut reader = hound::WavReader::open(&chunk_path)
                .map_err(|e| SoundlogError::Other(format!("failed to read chunk: {}", e)))?;
            if spec.is_none() {
                spec = Some(reader.spec());
            }
            for sample in reader.samples::<i16>() {
                samples
                    .push(sample.map_err(|e| {
                        SoundlogError::Other(format!("failed to read chunk: {}", e))
                    })?);
            }
        }

        if any_missing {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE sessions SET stale_chunks = 1 WHERE session_id = ?1",
                params![session_id],
            )?;
        }

        let spec = spec.ok_or_else(|| {
            SoundlogError::Other(format!("session {} has no audio to export", session_id))
        })?;

        let mut writer = hound::WavWriter::create(&tmp_path, spec)
            .map_err(|e| SoundlogError::Other(format!("failed to write export: {}", e)))?;
        for sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| SoundlogError::Other(format!("failed to write export: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| SoundlogError::Other(format!("failed to write export: {}", e)))?;
        fs::rename(&tmp_path, &output_path)?;

        self.tag_session(session_id, "exported")?;
        info!(%session_id, path = %output_path.display(), "session exported");
        Ok(output_path)
    }
}

/// Raw session row before timestamp/tag parsing.
struct RawSession {
    id: String,
    start_time: String,
    end_time: Option<String>,
    duration_secs: f64,
    rms_sum: f64,
    chunk_count: i64,
    status: String,
    tags: String,
    notes: String,
    transcription_status: String,
    transcription_path: Option<String>,
    stale_chunks: i64,
}

impl RawSession {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            duration_secs: row.get(3)?,
            rms_sum: row.get(4)?,
            chunk_count: row.get(5)?,
            status: row.get(6)?,
            tags: row.get(7)?,
            notes: row.get(8)?,
            transcription_status: row.get(9)?,
            transcription_path: row.get(10)?,
            stale_chunks: row.get(11)?,
        })
    }

    fn into_session(self, chunks: Vec<ChunkRef>) -> Result<Session> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| SoundlogError::Other(format!("unknown status '{}'", self.status)))?;
        let transcription_status = TranscriptionStatus::parse(&self.transcription_status)
            .ok_or_else(|| {
                SoundlogError::Other(format!(
                    "unknown transcription status '{}'",
                    self.transcription_status
                ))
            })?;
        let end_time = self
            .end_time
            .map(|ts| parse_ts(&ts, "sessions.end_time"))
            .transpose()?;
        let avg_rms = if self.chunk_count > 0 {
            (self.rms_sum / self.chunk_count as f64) as f32
        } else {
            0.0
        };

        Ok(Session {
            id: self.id,
            start_time: parse_ts(&self.start_time, "sessions.start_time")?,
            end_time,
            duration_secs: self.duration_secs,
            avg_rms,
            status,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            notes: self.notes,
            transcription_status,
            transcription_path: self.transcription_path,
            stale_chunks: self.stale_chunks != 0,
            chunks,
        })
    }
}

fn load_chunks(conn: &Connection, session_id: &str) -> Result<Vec<ChunkRef>> {
    let mut stmt = conn.prepare(
        "SELECT seq_index, chunk_path, started_at, duration_secs, rms_level
         FROM session_chunks WHERE session_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, f64>(4)?,
        ))
    })?;

    let mut chunks = Vec::new();
    for row in rows {
        let (seq_index, relative_path, started_at, duration_secs, rms_level) = row?;
        chunks.push(ChunkRef {
            seq_index: seq_index.max(0) as u64,
            relative_path,
            started_at: parse_ts(&started_at, "session_chunks.started_at")?,
            duration_secs,
            rms_level: rms_level as f32,
        });
    }
    Ok(chunks)
}

fn parse_ts(value: &str, field: &str) -> Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| SoundlogError::Other(format!("invalid {} '{}': {}", field, value, e)))
}

/// Total size of all chunk files under the data directory.
fn wav_disk_usage(data_dir: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = fs::read_dir(data_dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Ok(files) = fs::read_dir(&path) {
                for file in files.flatten() {
                    let file_path = file.path();
                    if file_path.extension().is_some_and(|ext| ext == "wav")
                        && let Ok(meta) = file.metadata()
                    {
                        total += meta.len();
                    }
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 7, h, m, s).unwrap()
    }

    fn chunk_ref(index: u64, rms: f32) -> ChunkRef {
        ChunkRef {
            seq_index: index,
            relative_path: format!("2026-08-07/10-00-00_{:04}.wav", index),
            started_at: at(10, 0, 0) + chrono::Duration::seconds((index as i64 - 1) * 30),
            duration_secs: 30.0,
            rms_level: rms,
        }
    }

    fn chunk(index: u64, rms: f32) -> Chunk {
        let r = chunk_ref(index, rms);
        Chunk {
            seq_index: r.seq_index,
            started_at: r.started_at,
            duration_secs: r.duration_secs,
            sample_rate: 16_000,
            channels: 1,
            rms_level: r.rms_level,
            relative_path: r.relative_path,
            partition: r.started_at.date_naive(),
        }
    }

    #[test]
    fn test_begin_append_close_lifecycle() {
        let (_dir, store) = store();

        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();
        store.append_chunk(&id, &chunk_ref(2, 0.03)).unwrap();
        store
            .close_session(&id, at(10, 1, 0), SessionOutcome::Closed)
            .unwrap();

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.chunk_count(), 2);
        assert_eq!(session.end_time, Some(at(10, 1, 0)));
        assert_eq!(session.chunks[0].seq_index, 1);
        assert_eq!(session.chunks[1].seq_index, 2);
    }

    #[test]
    fn test_duration_equals_sum_of_chunk_durations_after_every_append() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();

        for i in 1..=4 {
            store.append_chunk(&id, &chunk_ref(i, 0.02)).unwrap();
            let session = store.get_session(&id).unwrap();
            let expected: f64 = session.chunks.iter().map(|c| c.duration_secs).sum();
            assert_eq!(session.duration_secs, expected);
            assert_eq!(session.duration_secs, i as f64 * 30.0);
        }
    }

    #[test]
    fn test_avg_rms_is_incremental_mean() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();

        store.append_chunk(&id, &chunk_ref(1, 0.02)).unwrap();
        store.append_chunk(&id, &chunk_ref(2, 0.04)).unwrap();

        let session = store.get_session(&id).unwrap();
        assert!((session.avg_rms - 0.03).abs() < 1e-6);
    }

    #[test]
    fn test_append_to_closed_session_fails_with_state_error() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();
        store
            .close_session(&id, at(10, 0, 30), SessionOutcome::Closed)
            .unwrap();

        match store.append_chunk(&id, &chunk_ref(2, 0.05)) {
            Err(SoundlogError::SessionNotOpen { session_id }) => assert_eq!(session_id, id),
            other => panic!("expected SessionNotOpen, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_append_to_unknown_session_fails() {
        let (_dir, store) = store();
        assert!(matches!(
            store.append_chunk("sess_nope", &chunk_ref(1, 0.05)),
            Err(SoundlogError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_discarded_outcome_is_persisted() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store
            .close_session(&id, at(10, 0, 10), SessionOutcome::Discarded)
            .unwrap();

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Discarded);
    }

    #[test]
    fn test_double_close_fails() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store
            .close_session(&id, at(10, 0, 30), SessionOutcome::Closed)
            .unwrap();
        assert!(matches!(
            store.close_session(&id, at(10, 0, 40), SessionOutcome::Closed),
            Err(SoundlogError::SessionNotOpen { .. })
        ));
    }

    #[test]
    fn test_record_chunk_updates_partition_aggregates() {
        let (_dir, store) = store();

        store.record_chunk(&chunk(1, 0.05)).unwrap();
        store.record_chunk(&chunk(2, 0.01)).unwrap();

        let date = at(10, 0, 0).date_naive();
        let stats = store.partition_stats(date).unwrap().unwrap();
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.total_duration_secs, 60.0);

        let missing = store
            .partition_stats(date.succ_opt().unwrap())
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_list_sessions_filters() {
        let (_dir, store) = store();

        let open_id = store.begin_session(at(9, 0, 0)).unwrap();
        let closed_id = store.begin_session(at(10, 0, 0)).unwrap();
        store
            .close_session(&closed_id, at(10, 5, 0), SessionOutcome::Closed)
            .unwrap();
        store.tag_session(&closed_id, "meeting").unwrap();

        let all = store.list_sessions(&SessionFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].id, closed_id);

        let closed_only = store
            .list_sessions(&SessionFilter {
                status: Some(SessionStatus::Closed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(closed_only.len(), 1);
        assert_eq!(closed_only[0].id, closed_id);

        let tagged = store
            .list_sessions(&SessionFilter {
                tag: Some("meeting".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);

        let dated = store
            .list_sessions(&SessionFilter {
                date: Some(at(9, 0, 0).date_naive()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(dated.len(), 2);

        let limited = store
            .list_sessions(&SessionFilter {
                limit: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);

        let _ = open_id;
    }

    #[test]
    fn test_tag_session_is_idempotent() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();

        store.tag_session(&id, "call").unwrap();
        store.tag_session(&id, "call").unwrap();
        store.tag_session(&id, "important").unwrap();

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.tags, vec!["call", "important"]);
    }

    #[test]
    fn test_set_transcription_only_touches_transcription_fields() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();

        store
            .set_transcription(&id, TranscriptionStatus::Done, Some("transcripts/x.txt"))
            .unwrap();

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.transcription_status, TranscriptionStatus::Done);
        assert_eq!(
            session.transcription_path.as_deref(),
            Some("transcripts/x.txt")
        );
        // Timing fields untouched
        assert_eq!(session.duration_secs, 30.0);
        assert_eq!(session.chunk_count(), 1);
    }

    #[test]
    fn test_recover_closes_long_open_session() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();
        store.append_chunk(&id, &chunk_ref(2, 0.05)).unwrap();

        // Simulated restart: one open session, no further chunks arriving
        let recovered = store.recover(30).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0], (id.clone(), SessionOutcome::Closed));

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        // End time is the last chunk's end
        assert_eq!(session.end_time, Some(chunk_ref(2, 0.05).end_time()));
    }

    #[test]
    fn test_recover_discards_short_open_session() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();

        let recovered = store.recover(60).unwrap();
        assert_eq!(recovered[0].1, SessionOutcome::Discarded);

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Discarded);
    }

    #[test]
    fn test_recover_with_nothing_open_is_a_noop() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store
            .close_session(&id, at(10, 0, 30), SessionOutcome::Closed)
            .unwrap();

        assert!(store.recover(30).unwrap().is_empty());
    }

    #[test]
    fn test_verify_chunks_marks_stale_on_missing_file() {
        let (dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();

        // File does not exist yet
        assert!(!store.verify_chunks(&id).unwrap());
        assert!(store.get_session(&id).unwrap().stale_chunks);

        // Create the file; a fresh session referencing it verifies clean
        let id2 = store.begin_session(at(11, 0, 0)).unwrap();
        let mut c = chunk_ref(1, 0.05);
        c.relative_path = "2026-08-07/present.wav".to_string();
        let partition = dir.path().join("2026-08-07");
        fs::create_dir_all(&partition).unwrap();
        fs::write(partition.join("present.wav"), b"RIFF").unwrap();
        store.append_chunk(&id2, &c).unwrap();

        assert!(store.verify_chunks(&id2).unwrap());
        assert!(!store.get_session(&id2).unwrap().stale_chunks);
    }

    #[test]
    fn test_delete_session_removes_membership() {
        let (_dir, store) = store();
        let id = store.begin_session(at(10, 0, 0)).unwrap();
        store.append_chunk(&id, &chunk_ref(1, 0.05)).unwrap();

        store.delete_session(&id).unwrap();
        assert!(matches!(
            store.get_session(&id),
            Err(SoundlogError::SessionNotFound { .. })
        ));
        assert!(matches!(
            store.delete_session(&id),
            Err(SoundlogError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_sessions_older_than_respects_cutoff_and_skips_open() {
        let (_dir, store) = store();

        let old_id = store.begin_session(at(8, 0, 0)).unwrap();
        store
            .close_session(&old_id, at(8, 10, 0), SessionOutcome::Closed)
            .unwrap();
        let _open_id = store.begin_session(at(9, 0, 0)).unwrap();
        let recent_id = store.begin_session(at(12, 0, 0)).unwrap();
        store
            .close_session(&recent_id, at(12, 10, 0), SessionOutcome::Closed)
            .unwrap();

        let eligible = store.sessions_older_than(at(10, 0, 0)).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, old_id);
    }

    #[test]
    fn test_purge_chunks_decrements_partition_aggregates() {
        let (_dir, store) = store();
        store.record_chunk(&chunk(1, 0.05)).unwrap();
        store.record_chunk(&chunk(2, 0.05)).unwrap();

        store
            .purge_chunks(&[chunk(1, 0.05).relative_path])
            .unwrap();

        let stats = store
            .partition_stats(at(10, 0, 0).date_naive())
            .unwrap()
            .unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.total_duration_secs, 30.0);

        // Unknown paths are ignored
        store.purge_chunks(&["nope.wav".to_string()]).unwrap();
    }

    #[test]
    fn test_storage_stats_counts() {
        let (_dir, store) = store();
        let a = store.begin_session(at(10, 0, 0)).unwrap();
        store
            .close_session(&a, at(10, 5, 0), SessionOutcome::Closed)
            .unwrap();
        store
            .set_transcription(&a, TranscriptionStatus::Done, None)
            .unwrap();
        let _b = store.begin_session(at(11, 0, 0)).unwrap();

        let stats = store.storage_stats().unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.open_sessions, 1);
        assert_eq!(stats.transcribed_sessions, 1);
    }

    #[test]
    fn test_export_merges_non_silent_chunks() {
        let (dir, store) = store();
        let partition = dir.path().join("2026-08-07");
        fs::create_dir_all(&partition).unwrap();

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        for (name, value) in [("a.wav", 100i16), ("b.wav", 200i16)] {
            let mut writer = hound::WavWriter::create(partition.join(name), spec).unwrap();
            for _ in 0..50 {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }

        let id = store.begin_session(at(10, 0, 0)).unwrap();
        let mut loud_a = chunk_ref(1, 0.05);
        loud_a.relative_path = "2026-08-07/a.wav".to_string();
        let mut silent = chunk_ref(2, 0.0001);
        silent.relative_path = "2026-08-07/silent.wav".to_string();
        let mut loud_b = chunk_ref(3, 0.05);
        loud_b.relative_path = "2026-08-07/b.wav".to_string();
        store.append_chunk(&id, &loud_a).unwrap();
        store.append_chunk(&id, &silent).unwrap();
        store.append_chunk(&id, &loud_b).unwrap();

        let path = store.export_session(&id, 0.001).unwrap();
        assert!(path.exists());

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        // 50 samples from each of the two loud chunks; the silent chunk is
        // skipped without touching disk (it doesn't even exist)
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[0], 100);
        assert_eq!(samples[99], 200);

        let session = store.get_session(&id).unwrap();
        assert!(session.tags.iter().any(|t| t == "exported"));
    }
}
