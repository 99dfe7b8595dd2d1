//! Retention sweeper: reclaims chunks and sessions past the horizon.
//!
//! Deletion order matters: chunk files go first, the session record last.
//! If a file refuses to die the record stays behind as a retryable orphan —
//! never the other way around, which would leave dangling references.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::store::SessionStore;
use chrono::{DateTime, Local};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub deleted_sessions: usize,
    pub freed_bytes: u64,
}

/// Periodic cleaner of expired sessions and their chunk files.
pub struct RetentionSweeper {
    store: Arc<SessionStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Deletes sessions whose end time is older than the retention horizon.
    ///
    /// Idempotent: with nothing eligible this returns zero counts and
    /// performs no filesystem mutation. Open sessions are never touched.
    pub fn sweep(&self, now: DateTime<Local>, policy: &StorageConfig) -> Result<SweepReport> {
        let cutoff = now - chrono::Duration::days(policy.retention_days as i64);
        let eligible = self.store.sessions_older_than(cutoff)?;

        if eligible.is_empty() {
            debug!("retention sweep: nothing eligible");
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport::default();
        for session in eligible {
            let mut freed = 0u64;
            let mut deleted_paths = Vec::new();
            let mut blocked = false;

            for chunk in &session.chunks {
                let path = self.store.data_dir().join(&chunk.relative_path);
                match fs::metadata(&path) {
                    Ok(meta) => match fs::remove_file(&path) {
                        Ok(()) => {
                            freed += meta.len();
                            deleted_paths.push(chunk.relative_path.clone());
                        }
                        Err(e) => {
                            warn!(
                                session_id = %session.id,
                                path = %chunk.relative_path,
                                error = %e,
                                "failed to delete chunk file, keeping session record for retry"
                            );
                            blocked = true;
                        }
                    },
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        // Already gone (earlier partial sweep); just forget it
                        deleted_paths.push(chunk.relative_path.clone());
                    }
                    Err(e) => {
                        warn!(
                            session_id = %session.id,
                            path = %chunk.relative_path,
                            error = %e,
                            "failed to stat chunk file, keeping session record for retry"
                        );
                        blocked = true;
                    }
                }
            }

            self.store.purge_chunks(&deleted_paths)?;
            report.freed_bytes += freed;

            if blocked {
                continue;
            }

            self.store.delete_session(&session.id)?;
            report.deleted_sessions += 1;
        }

        info!(
            deleted_sessions = report.deleted_sessions,
            freed_bytes = report.freed_bytes,
            "retention sweep finished"
        );
        Ok(report)
    }
}
