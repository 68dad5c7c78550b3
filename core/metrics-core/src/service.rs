//! The metrics service for one project.
//!
//! Owns the in-memory maps of open AI sessions and started lifecycles, writes
//! closed records through the [`MetricLogStore`], and keeps the session
//! checkpoint in step with what is open.
//!
//! Construct it once per process and pass it by reference; it holds no global
//! state. Time comes from the injected [`Clock`].
//!
//! ## Checkpoint policy
//!
//! - AI start/end write the checkpoint through immediately (or delete it when
//!   nothing is left open).
//! - The human portion is whatever the host last reported with
//!   [`MetricsService::report_human_activity`]; it reaches disk on the next
//!   [`flush_checkpoint`](MetricsService::flush_checkpoint) or
//!   [`shutdown`](MetricsService::shutdown).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::aggregate::{self, ProjectMetrics, SpecMetrics};
use crate::checkpoint::{CheckpointAiSession, CheckpointStore, SessionTempData};
use crate::clock::Clock;
use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};
use crate::human::{ActiveHumanSession, HumanSessionSink};
use crate::log_store::MetricLogStore;
use crate::recovery::{self, RecoveryReport};
use crate::schema::{
    AiMetricRecord, HumanMetricRecord, LifecycleMetricRecord, MetricRecord, Phase,
    ValidationError,
};

/// Notified after every record the service appends.
pub trait MetricsObserver: Send + Sync {
    fn metrics_updated(&self, spec_id: &str);
}

/// Identifies one AI session. Ordered so checkpoints are written stably.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AiSessionKey {
    pub spec_id: String,
    pub phase: Phase,
}

impl AiSessionKey {
    pub fn new(spec_id: &str, phase: Phase) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            phase,
        }
    }
}

pub struct MetricsService {
    project_path: PathBuf,
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    log: MetricLogStore,
    checkpoints: CheckpointStore,
    ai_sessions: BTreeMap<AiSessionKey, DateTime<Utc>>,
    lifecycles: HashMap<String, DateTime<Utc>>,
    human_activity: Option<ActiveHumanSession>,
    observer: Option<Box<dyn MetricsObserver>>,
}

impl MetricsService {
    pub fn new(project_path: impl Into<PathBuf>, config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        let paths = config.paths();
        Self {
            project_path: project_path.into(),
            config,
            clock,
            log: MetricLogStore::new(paths.clone()),
            checkpoints: CheckpointStore::new(paths),
            ai_sessions: BTreeMap::new(),
            lifecycles: HashMap::new(),
            human_activity: None,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn MetricsObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn log_store(&self) -> &MetricLogStore {
        &self.log
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Materialises a leftover checkpoint. Call before tracking anything.
    pub fn recover(&self) -> Result<RecoveryReport> {
        recovery::recover_incomplete_sessions(
            &self.project_path,
            &self.log,
            &self.checkpoints,
            self.clock.as_ref(),
            self.config.idle_timeout(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // AI sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Opens an AI session. Restarting an open key resets its start time.
    pub fn start_ai_session(&mut self, spec_id: &str, phase: Phase) -> Result<()> {
        if spec_id.trim().is_empty() {
            return Err(MetricsError::InvalidRecord {
                reason: ValidationError::MissingField("spec"),
            });
        }
        let now = self.clock.now();
        if let Some(previous) = self.ai_sessions.insert(AiSessionKey::new(spec_id, phase), now) {
            debug!(
                spec = spec_id,
                phase = %phase,
                previous = %previous,
                "AI session restarted; discarding earlier start"
            );
        }
        self.flush_checkpoint()
    }

    /// Closes an AI session. A key that was never started is a no-op.
    pub fn end_ai_session(&mut self, spec_id: &str, phase: Phase) -> Result<Option<AiMetricRecord>> {
        let key = AiSessionKey::new(spec_id, phase);
        let Some(start) = self.ai_sessions.get(&key).copied() else {
            debug!(spec = spec_id, phase = %phase, "No open AI session to end");
            return Ok(None);
        };

        let record = AiMetricRecord::new(spec_id, phase, start, self.clock.now());
        self.append(record.clone().into())?;
        self.ai_sessions.remove(&key);
        self.flush_checkpoint()?;
        Ok(Some(record))
    }

    pub fn open_ai_sessions(&self) -> impl Iterator<Item = &AiSessionKey> {
        self.ai_sessions.keys()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_spec_lifecycle(&mut self, spec_id: &str) -> Result<LifecycleMetricRecord> {
        let now = self.clock.now();
        let record = LifecycleMetricRecord::started(spec_id, now);
        self.append(record.clone().into())?;
        self.lifecycles.insert(spec_id.to_string(), now);
        Ok(record)
    }

    /// Completes a started lifecycle. An unknown spec is a no-op.
    pub fn complete_spec_lifecycle(&mut self, spec_id: &str) -> Result<Option<LifecycleMetricRecord>> {
        let Some(started_at) = self.lifecycles.get(spec_id).copied() else {
            debug!(spec = spec_id, "No started lifecycle to complete");
            return Ok(None);
        };

        let record = LifecycleMetricRecord::completed(spec_id, started_at, self.clock.now());
        self.append(record.clone().into())?;
        self.lifecycles.remove(spec_id);
        Ok(Some(record))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Human sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Appends a closed human session. Clears the reported in-flight session
    /// when it is the one being recorded.
    pub fn record_human_session(&mut self, record: HumanMetricRecord) -> Result<()> {
        self.append(record.clone().into())?;

        let closes_reported = self
            .human_activity
            .as_ref()
            .is_some_and(|open| open.spec_id == record.spec && open.start == record.start);
        if closes_reported {
            self.human_activity = None;
        }
        Ok(())
    }

    /// Remembers the host's open human session for the next checkpoint.
    pub fn report_human_activity(
        &mut self,
        spec_id: &str,
        start: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) {
        self.human_activity = Some(ActiveHumanSession {
            spec_id: spec_id.to_string(),
            start,
            last_activity: last_activity.max(start),
        });
    }

    pub fn clear_human_activity(&mut self) {
        self.human_activity = None;
    }

    pub fn human_activity(&self) -> Option<&ActiveHumanSession> {
        self.human_activity.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Checkpoint
    // ─────────────────────────────────────────────────────────────────────

    pub fn checkpoint_data(&self) -> SessionTempData {
        SessionTempData {
            active_ai_sessions: self
                .ai_sessions
                .iter()
                .map(|(key, start)| CheckpointAiSession {
                    spec_id: key.spec_id.clone(),
                    phase: key.phase,
                    start: *start,
                })
                .collect(),
            active_human_session: self.human_activity.clone(),
        }
    }

    /// Writes open sessions to the checkpoint, or removes it if none are open.
    pub fn flush_checkpoint(&self) -> Result<()> {
        self.checkpoints
            .sync(&self.project_path, &self.checkpoint_data())
    }

    /// Persists everything still open so the next start can recover it.
    pub fn shutdown(&self) -> Result<()> {
        let data = self.checkpoint_data();
        self.checkpoints.sync(&self.project_path, &data)?;
        info!(
            project = %self.project_path.display(),
            ai_sessions = data.active_ai_sessions.len(),
            human_session = data.active_human_session.is_some(),
            "Metrics service shut down"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn get_spec_metrics(&self, spec_id: &str) -> Result<SpecMetrics> {
        let records = self.log.read_for_spec(&self.project_path, spec_id)?;
        Ok(aggregate::spec_metrics(spec_id, &records))
    }

    pub fn get_project_metrics(&self) -> Result<ProjectMetrics> {
        let records = self.log.read_all(&self.project_path)?;
        Ok(aggregate::project_metrics(&records))
    }

    pub fn read_log(&self, spec_id: Option<&str>) -> Result<Vec<MetricRecord>> {
        match spec_id {
            Some(spec_id) => self.log.read_for_spec(&self.project_path, spec_id),
            None => self.log.read_all(&self.project_path),
        }
    }

    fn append(&self, record: MetricRecord) -> Result<()> {
        self.log.append(&self.project_path, &record)?;
        if let Some(observer) = &self.observer {
            observer.metrics_updated(record.spec());
        }
        Ok(())
    }
}

impl HumanSessionSink for MetricsService {
    fn human_session_closed(&mut self, record: HumanMetricRecord) {
        let spec = record.spec.clone();
        if let Err(err) = self.record_human_session(record) {
            warn!(spec = %spec, error = %err, "Failed to record human session");
        }
    }
}
