//! Segmentation state machine.
//!
//! Consumes chunk metadata in strict capture order and decides where
//! sessions begin and end. Classifying chunk-level RMS rather than raw
//! samples bounds segmentation latency to one chunk duration and avoids
//! rescanning audio; the `Active`/`TrailingSilence` split keeps brief pauses
//! inside a session without a separate timer.
//!
//! A silence gap is complete once the run of consecutive silent chunks has
//! reached `silence_gap_secs`. The chunk that arrives after the completed
//! gap settles the boundary: a silent arrival is still attributed to the
//! closing session (trailing silence belongs to the session that produced
//! it), while a non-silent arrival starts the next session.

use crate::chunk::Chunk;
use crate::config::SessionConfig;
use chrono::{DateTime, Local};

/// Current state of the segmentation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// No open session.
    Idle,
    /// Session open, silence run is zero.
    Active,
    /// Session open, inside a silence run shorter than the gap.
    TrailingSilence,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The session met the minimum duration and is kept.
    Closed,
    /// Too short to be a real session; treated as noise.
    Discarded,
}

/// An instruction for the session store, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentAction {
    /// Open a new session starting at this chunk, and append it.
    Open(Chunk),
    /// Append this chunk to the current session.
    Append(Chunk),
    /// Close the current session.
    Close {
        end_time: DateTime<Local>,
        outcome: SessionOutcome,
        /// Total duration of the closing session, for event reporting.
        duration_secs: f64,
    },
}

/// The silence-gap state machine.
pub struct SegmentationEngine {
    config: SessionConfig,
    state: SegmentState,
    /// Seconds of consecutive silence accumulated by prior chunks.
    silence_run_secs: f64,
    /// Total duration of the open session (all appended chunks, silence
    /// included).
    session_duration_secs: f64,
    /// End time of the last appended chunk.
    last_chunk_end: Option<DateTime<Local>>,
}

impl SegmentationEngine {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SegmentState::Idle,
            silence_run_secs: 0.0,
            session_duration_secs: 0.0,
            last_chunk_end: None,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Duration of the currently open session, zero when idle.
    pub fn open_session_secs(&self) -> f64 {
        self.session_duration_secs
    }

    /// Processes one chunk, returning store instructions in order.
    pub fn process(&mut self, chunk: Chunk) -> Vec<SegmentAction> {
        let silent = chunk.is_silent(self.config.silence_threshold);

        match self.state {
            SegmentState::Idle => {
                if silent {
                    // Silent chunks outside a session belong to no session;
                    // the file stays on disk under retention like any other.
                    Vec::new()
                } else {
                    self.open_with(chunk)
                }
            }
            SegmentState::Active => {
                if silent {
                    self.silence_run_secs = chunk.duration_secs;
                    self.state = SegmentState::TrailingSilence;
                } else {
                    self.silence_run_secs = 0.0;
                }
                vec![self.append(chunk)]
            }
            SegmentState::TrailingSilence => {
                if self.gap_complete() {
                    if silent {
                        // The arrival that observes a completed gap is still
                        // trailing silence of the closing session.
                        let append = self.append(chunk);
                        let close = self.close();
                        vec![append, close]
                    } else {
                        let close = self.close();
                        let mut actions = vec![close];
                        actions.extend(self.open_with(chunk));
                        actions
                    }
                } else if silent {
                    self.silence_run_secs += chunk.duration_secs;
                    vec![self.append(chunk)]
                } else {
                    self.silence_run_secs = 0.0;
                    self.state = SegmentState::Active;
                    vec![self.append(chunk)]
                }
            }
        }
    }

    /// Force-closes the open session, if any.
    ///
    /// Used on engine stop; crash recovery replays the same rule from the
    /// store's side on the next startup.
    pub fn finish(&mut self) -> Option<SegmentAction> {
        match self.state {
            SegmentState::Idle => None,
            SegmentState::Active | SegmentState::TrailingSilence => Some(self.close()),
        }
    }

    fn gap_complete(&self) -> bool {
        self.silence_run_secs >= self.config.silence_gap_secs as f64
    }

    fn open_with(&mut self, chunk: Chunk) -> Vec<SegmentAction> {
        self.state = SegmentState::Active;
        self.silence_run_secs = 0.0;
        self.session_duration_secs = chunk.duration_secs;
        self.last_chunk_end = Some(chunk.end_time());
        vec![SegmentAction::Open(chunk)]
    }

    fn append(&mut self, chunk: Chunk) -> SegmentAction {
        self.session_duration_secs += chunk.duration_secs;
        self.last_chunk_end = Some(chunk.end_time());
        SegmentAction::Append(chunk)
    }

    fn close(&mut self) -> SegmentAction {
        let outcome = if self.session_duration_secs >= self.config.min_session_secs as f64 {
            SessionOutcome::Closed
        } else {
            SessionOutcome::Discarded
        };
        let end_time = self.last_chunk_end.unwrap_or_else(Local::now);
        let duration_secs = self.session_duration_secs;

        self.state = SegmentState::Idle;
        self.silence_run_secs = 0.0;
        self.session_duration_secs = 0.0;
        self.last_chunk_end = None;

        SegmentAction::Close {
            end_time,
            outcome,
            duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> SessionConfig {
        SessionConfig {
            silence_threshold: 0.001,
            silence_gap_secs: 60,
            min_session_secs: 30,
        }
    }

    /// Builds a 30s chunk with the given RMS, n chunks after 12:00:00.
    fn chunk(index: u64, rms: f32) -> Chunk {
        let base = Local.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        let started_at = base + chrono::Duration::seconds((index as i64 - 1) * 30);
        Chunk {
            seq_index: index,
            started_at,
            duration_secs: 30.0,
            sample_rate: 16_000,
            channels: 1,
            rms_level: rms,
            relative_path: format!("2026-08-07/12-00-00_{:04}.wav", index),
            partition: started_at.date_naive(),
        }
    }

    fn run(engine: &mut SegmentationEngine, rms_values: &[f32]) -> Vec<SegmentAction> {
        let mut actions = Vec::new();
        for (i, &rms) in rms_values.iter().enumerate() {
            actions.extend(engine.process(chunk(i as u64 + 1, rms)));
        }
        actions
    }

    #[test]
    fn test_starts_idle() {
        let engine = SegmentationEngine::new(config());
        assert_eq!(engine.state(), SegmentState::Idle);
    }

    #[test]
    fn test_idle_silent_chunk_belongs_to_no_session() {
        let mut engine = SegmentationEngine::new(config());
        let actions = engine.process(chunk(1, 0.0001));
        assert!(actions.is_empty());
        assert_eq!(engine.state(), SegmentState::Idle);
    }

    #[test]
    fn test_non_silent_chunk_opens_session() {
        let mut engine = SegmentationEngine::new(config());
        let actions = engine.process(chunk(1, 0.05));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SegmentAction::Open(_)));
        assert_eq!(engine.state(), SegmentState::Active);
    }

    #[test]
    fn test_silence_inside_session_is_retained() {
        let mut engine = SegmentationEngine::new(config());
        let actions = run(&mut engine, &[0.05, 0.0001, 0.05]);

        // Open, then two appends: the pause stays inside the session
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[1], SegmentAction::Append(_)));
        assert!(matches!(actions[2], SegmentAction::Append(_)));
        assert_eq!(engine.state(), SegmentState::Active);
        assert_eq!(engine.open_session_secs(), 90.0);
    }

    #[test]
    fn test_isolated_silent_chunks_never_split_session() {
        // Silence runs shorter than the gap (here: single silent chunks)
        // must never close a session, regardless of how many occur.
        let mut engine = SegmentationEngine::new(config());
        let actions = run(
            &mut engine,
            &[0.05, 0.0001, 0.05, 0.0001, 0.05, 0.0001, 0.05],
        );
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, SegmentAction::Close { .. }))
        );
        assert_eq!(engine.state(), SegmentState::Active);
    }

    #[test]
    fn test_spec_scenario_two_sessions() {
        // RMS [0.05, 0.05, 0.0005, 0.0005, 0.0005, 0.05] with a 60s gap
        // (2 chunks): the first session spans chunks 1-5 (150s) and closes
        // at chunk 5's end; chunk 6 opens a new session.
        let mut engine = SegmentationEngine::new(config());

        let mut actions = Vec::new();
        for (i, &rms) in [0.05, 0.05, 0.0005, 0.0005, 0.0005, 0.05].iter().enumerate() {
            actions.extend(engine.process(chunk(i as u64 + 1, rms)));
        }

        let expected_end = chunk(5, 0.0).end_time();
        let opens: Vec<&SegmentAction> = actions
            .iter()
            .filter(|a| matches!(a, SegmentAction::Open(_)))
            .collect();
        let closes: Vec<&SegmentAction> = actions
            .iter()
            .filter(|a| matches!(a, SegmentAction::Close { .. }))
            .collect();

        assert_eq!(opens.len(), 2);
        assert_eq!(closes.len(), 1);

        match opens[0] {
            SegmentAction::Open(c) => assert_eq!(c.seq_index, 1),
            _ => unreachable!(),
        }
        match closes[0] {
            SegmentAction::Close { end_time, outcome, .. } => {
                assert_eq!(*end_time, expected_end);
                assert_eq!(*outcome, SessionOutcome::Closed);
            }
            _ => unreachable!(),
        }
        match opens[1] {
            SegmentAction::Open(c) => assert_eq!(c.seq_index, 6),
            _ => unreachable!(),
        }

        // First session received chunks 1-5: one Open + four Appends
        let appended: usize = actions
            .iter()
            .take_while(|a| !matches!(a, SegmentAction::Close { .. }))
            .count();
        assert_eq!(appended, 5);
    }

    #[test]
    fn test_gap_completed_by_silence_closes_before_new_session() {
        // [loud, silent, silent, loud]: the gap completes during silence,
        // so the loud chunk must open a NEW session, not extend the old one.
        let mut engine = SegmentationEngine::new(config());
        let actions = run(&mut engine, &[0.05, 0.0001, 0.0001, 0.05]);

        let close_pos = actions
            .iter()
            .position(|a| matches!(a, SegmentAction::Close { .. }))
            .expect("session must close across a full gap");
        match &actions[close_pos + 1] {
            SegmentAction::Open(c) => assert_eq!(c.seq_index, 4),
            other => panic!("expected Open after Close, got {:?}", other),
        }
        // The closed session kept only chunks 1-3
        match &actions[close_pos] {
            SegmentAction::Close { end_time, .. } => {
                assert_eq!(*end_time, chunk(3, 0.0).end_time());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_short_session_is_discarded_on_gap_closure() {
        // 120s of session (silence included) against a 200s minimum
        let mut engine = SegmentationEngine::new(SessionConfig {
            silence_threshold: 0.001,
            silence_gap_secs: 60,
            min_session_secs: 200,
        });
        let actions = run(&mut engine, &[0.05, 0.0001, 0.0001, 0.0001]);

        let close = actions
            .iter()
            .find(|a| matches!(a, SegmentAction::Close { .. }))
            .unwrap();
        match close {
            SegmentAction::Close { outcome, .. } => {
                assert_eq!(*outcome, SessionOutcome::Discarded);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_duration_exactly_at_minimum_closes() {
        // Single 30s chunk, min 30s: force-close must yield Closed.
        let mut engine = SegmentationEngine::new(config());
        engine.process(chunk(1, 0.05));

        match engine.finish().unwrap() {
            SegmentAction::Close { outcome, .. } => {
                assert_eq!(outcome, SessionOutcome::Closed)
            }
            _ => unreachable!(),
        }
        assert_eq!(engine.state(), SegmentState::Idle);
    }

    #[test]
    fn test_force_close_below_minimum_discards() {
        let mut engine = SegmentationEngine::new(SessionConfig {
            silence_threshold: 0.001,
            silence_gap_secs: 60,
            min_session_secs: 45,
        });
        engine.process(chunk(1, 0.05));

        match engine.finish().unwrap() {
            SegmentAction::Close { outcome, .. } => {
                assert_eq!(outcome, SessionOutcome::Discarded)
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_finish_while_idle_is_none() {
        let mut engine = SegmentationEngine::new(config());
        assert!(engine.finish().is_none());

        engine.process(chunk(1, 0.0001)); // silent, still idle
        assert!(engine.finish().is_none());
    }

    #[test]
    fn test_session_duration_includes_trailing_silence() {
        let mut engine = SegmentationEngine::new(config());
        run(&mut engine, &[0.05, 0.0001]);
        // 30s loud + 30s silent, both attributed to the open session
        assert_eq!(engine.open_session_secs(), 60.0);
        assert_eq!(engine.state(), SegmentState::TrailingSilence);
    }

    #[test]
    fn test_boundaries_depend_only_on_run_length() {
        // Same chunk set, different arrangements: only the arrangement with
        // a full consecutive run closes the session.
        let gapped = [0.05, 0.0001, 0.05, 0.0001, 0.05];
        let mut engine = SegmentationEngine::new(config());
        let actions = run(&mut engine, &gapped);
        assert!(
            !actions
                .iter()
                .any(|a| matches!(a, SegmentAction::Close { .. }))
        );

        let consecutive = [0.05, 0.0001, 0.0001, 0.0001, 0.05];
        let mut engine = SegmentationEngine::new(config());
        let actions = run(&mut engine, &consecutive);
        assert!(
            actions
                .iter()
                .any(|a| matches!(a, SegmentAction::Close { .. }))
        );
    }
}
