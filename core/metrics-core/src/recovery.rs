//! Crash recovery: turns a leftover checkpoint into closed records.
//!
//! Runs once at startup, before any new tracking begins for the project.
//!
//! - AI sessions end at the recovery time.
//! - The human session ends at `last_activity + idle_timeout`, as if the idle
//!   timer had fired.
//! - After each record is appended the checkpoint is rewritten without it, so
//!   an I/O failure part way through never double-counts on the next attempt.
//! - A checkpoint that cannot be parsed is moved aside and reported as
//!   nothing recovered.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::error::{MetricsError, Result};
use crate::log_store::MetricLogStore;
use crate::schema::{AiMetricRecord, HumanMetricRecord, MetricRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub ai_sessions_recovered: usize,
    pub human_sessions_recovered: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.ai_sessions_recovered + self.human_sessions_recovered
    }
}

pub fn recover_incomplete_sessions(
    project_path: &Path,
    log: &MetricLogStore,
    checkpoints: &CheckpointStore,
    clock: &dyn Clock,
    idle_timeout: Duration,
) -> Result<RecoveryReport> {
    let mut remaining = match checkpoints.load(project_path) {
        Ok(Some(data)) => data,
        Ok(None) => return Ok(RecoveryReport::default()),
        Err(MetricsError::Json { source, .. }) => {
            warn!(
                project = %project_path.display(),
                error = %source,
                "Session checkpoint is corrupt; moving it aside"
            );
            if let Err(err) = checkpoints.quarantine(project_path) {
                warn!(error = %err, "Failed to quarantine corrupt checkpoint");
            }
            return Ok(RecoveryReport::default());
        }
        Err(err) => return Err(err),
    };

    let now = clock.now();
    let mut report = RecoveryReport::default();

    while !remaining.active_ai_sessions.is_empty() {
        let session = remaining.active_ai_sessions.remove(0);
        let record = AiMetricRecord::new(
            &session.spec_id,
            session.phase,
            session.start,
            now.max(session.start),
        );
        if append_recovered(project_path, log, record.into())? {
            report.ai_sessions_recovered += 1;
        }
        checkpoints.sync(project_path, &remaining)?;
    }

    if let Some(session) = remaining.active_human_session.take() {
        let end = session.last_activity.max(session.start) + idle_timeout;
        let record = HumanMetricRecord::new(&session.spec_id, session.start, end);
        if append_recovered(project_path, log, record.into())? {
            report.human_sessions_recovered += 1;
        }
    }

    checkpoints.delete(project_path)?;

    if report.total() > 0 {
        info!(
            project = %project_path.display(),
            ai = report.ai_sessions_recovered,
            human = report.human_sessions_recovered,
            "Recovered incomplete sessions"
        );
    }
    Ok(report)
}

/// Appends one recovered record. An entry the schema rejects is dropped.
fn append_recovered(project_path: &Path, log: &MetricLogStore, record: MetricRecord) -> Result<bool> {
    match log.append(project_path, &record) {
        Ok(()) => Ok(true),
        Err(MetricsError::InvalidRecord { reason }) => {
            warn!(
                spec = %record.spec(),
                error = %reason,
                "Dropping unrecoverable checkpoint entry"
            );
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointAiSession, SessionTempData};
    use crate::clock::ManualClock;
    use crate::human::ActiveHumanSession;
    use crate::schema::{parse_timestamp, Phase};
    use crate::storage::MetricsPaths;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn ts(value: &str) -> DateTime<Utc> {
        parse_timestamp(value).unwrap()
    }

    fn idle() -> Duration {
        Duration::milliseconds(45_000)
    }

    struct Fixture {
        temp: TempDir,
        log: MetricLogStore,
        checkpoints: CheckpointStore,
        clock: ManualClock,
    }

    impl Fixture {
        fn new(now: &str) -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                log: MetricLogStore::default(),
                checkpoints: CheckpointStore::default(),
                clock: ManualClock::new(ts(now)),
            }
        }

        fn recover(&self) -> RecoveryReport {
            recover_incomplete_sessions(
                self.temp.path(),
                &self.log,
                &self.checkpoints,
                &self.clock,
                idle(),
            )
            .unwrap()
        }
    }

    #[test]
    fn ai_session_ends_at_recovery_time() {
        let fx = Fixture::new("2025-01-15T10:30:00Z");
        fx.checkpoints
            .save(
                fx.temp.path(),
                &SessionTempData {
                    active_ai_sessions: vec![CheckpointAiSession {
                        spec_id: "auth".to_string(),
                        phase: Phase::Design,
                        start: ts("2025-01-15T10:00:00Z"),
                    }],
                    active_human_session: None,
                },
            )
            .unwrap();

        let report = fx.recover();

        assert_eq!(report.ai_sessions_recovered, 1);
        assert_eq!(report.human_sessions_recovered, 0);
        let records = fx.log.read_all(fx.temp.path()).unwrap();
        assert_eq!(
            records,
            vec![AiMetricRecord::new(
                "auth",
                Phase::Design,
                ts("2025-01-15T10:00:00Z"),
                ts("2025-01-15T10:30:00Z"),
            )
            .into()]
        );
        match &records[0] {
            MetricRecord::Ai(ai) => assert_eq!(ai.ms, 30 * 60_000),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn human_session_ends_one_idle_window_after_last_activity() {
        let fx = Fixture::new("2025-01-15T12:00:00Z");
        fx.checkpoints
            .save(
                fx.temp.path(),
                &SessionTempData {
                    active_ai_sessions: Vec::new(),
                    active_human_session: Some(ActiveHumanSession {
                        spec_id: "auth".to_string(),
                        start: ts("2025-01-15T10:00:00Z"),
                        last_activity: ts("2025-01-15T10:02:00Z"),
                    }),
                },
            )
            .unwrap();

        let report = fx.recover();

        assert_eq!(report.human_sessions_recovered, 1);
        let records = fx.log.read_all(fx.temp.path()).unwrap();
        assert_eq!(
            records,
            vec![HumanMetricRecord::new(
                "auth",
                ts("2025-01-15T10:00:00Z"),
                ts("2025-01-15T10:02:45Z"),
            )
            .into()]
        );
    }

    #[test]
    fn mixed_checkpoint_recovers_everything_and_deletes_file() {
        let fx = Fixture::new("2025-01-15T11:00:00Z");
        fx.checkpoints
            .save(
                fx.temp.path(),
                &SessionTempData {
                    active_ai_sessions: vec![
                        CheckpointAiSession {
                            spec_id: "auth".to_string(),
                            phase: Phase::Design,
                            start: ts("2025-01-15T10:00:00Z"),
                        },
                        CheckpointAiSession {
                            spec_id: "billing".to_string(),
                            phase: Phase::Impl,
                            start: ts("2025-01-15T10:30:00Z"),
                        },
                    ],
                    active_human_session: Some(ActiveHumanSession {
                        spec_id: "auth".to_string(),
                        start: ts("2025-01-15T10:50:00Z"),
                        last_activity: ts("2025-01-15T10:51:00Z"),
                    }),
                },
            )
            .unwrap();

        let report = fx.recover();

        assert_eq!(
            report,
            RecoveryReport {
                ai_sessions_recovered: 2,
                human_sessions_recovered: 1
            }
        );
        assert_eq!(fx.log.read_all(fx.temp.path()).unwrap().len(), 3);
        assert!(!MetricsPaths::default().checkpoint_file(fx.temp.path()).exists());

        // A second pass finds nothing.
        assert_eq!(fx.recover(), RecoveryReport::default());
        assert_eq!(fx.log.read_all(fx.temp.path()).unwrap().len(), 3);
    }

    #[test]
    fn absent_checkpoint_recovers_nothing() {
        let fx = Fixture::new("2025-01-15T11:00:00Z");
        assert_eq!(fx.recover(), RecoveryReport::default());
        assert!(fx.log.read_all(fx.temp.path()).unwrap().is_empty());
    }

    #[test]
    fn corrupt_checkpoint_recovers_nothing_and_is_moved_aside() {
        let fx = Fixture::new("2025-01-15T11:00:00Z");
        let paths = MetricsPaths::default();
        paths.ensure_metadata_dir(fx.temp.path()).unwrap();
        std::fs::write(paths.checkpoint_file(fx.temp.path()), "{\"activeAiSessions\":[{").unwrap();

        assert_eq!(fx.recover(), RecoveryReport::default());
        assert!(!paths.checkpoint_file(fx.temp.path()).exists());
        assert!(paths.corrupt_checkpoint_file(fx.temp.path()).exists());
        assert!(fx.log.read_all(fx.temp.path()).unwrap().is_empty());

        // Next start does not trip over it again.
        assert_eq!(fx.recover(), RecoveryReport::default());
    }

    #[test]
    fn blank_spec_entry_is_dropped_not_fatal() {
        let fx = Fixture::new("2025-01-15T11:00:00Z");
        fx.checkpoints
            .save(
                fx.temp.path(),
                &SessionTempData {
                    active_ai_sessions: vec![
                        CheckpointAiSession {
                            spec_id: " ".to_string(),
                            phase: Phase::Tasks,
                            start: ts("2025-01-15T10:00:00Z"),
                        },
                        CheckpointAiSession {
                            spec_id: "auth".to_string(),
                            phase: Phase::Tasks,
                            start: ts("2025-01-15T10:00:00Z"),
                        },
                    ],
                    active_human_session: None,
                },
            )
            .unwrap();

        let report = fx.recover();
        assert_eq!(report.ai_sessions_recovered, 1);
        assert_eq!(fx.log.read_all(fx.temp.path()).unwrap().len(), 1);
    }

    #[test]
    fn start_in_the_future_yields_zero_duration() {
        let fx = Fixture::new("2025-01-15T10:00:00Z");
        fx.checkpoints
            .save(
                fx.temp.path(),
                &SessionTempData {
                    active_ai_sessions: vec![CheckpointAiSession {
                        spec_id: "auth".to_string(),
                        phase: Phase::Impl,
                        start: ts("2025-01-15T10:05:00Z"),
                    }],
                    active_human_session: None,
                },
            )
            .unwrap();

        fx.recover();
        match &fx.log.read_all(fx.temp.path()).unwrap()[0] {
            MetricRecord::Ai(ai) => {
                assert_eq!(ai.ms, 0);
                assert_eq!(ai.end, ai.start);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn report_serializes_camel_case() {
        let value = serde_json::to_value(RecoveryReport {
            ai_sessions_recovered: 2,
            human_sessions_recovered: 1,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"aiSessionsRecovered": 2, "humanSessionsRecovered": 1})
        );
    }
}
