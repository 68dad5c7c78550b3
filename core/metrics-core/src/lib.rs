//! # spec-metrics-core
//!
//! Measures how long an AI agent and a human spend on each phase of a spec,
//! and keeps that time across restarts and crashes.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Hosts drive timers from their own loop.
//! - **Append-only**: Closed sessions go to one JSON-lines log per project and are never edited.
//! - **Graceful degradation**: Missing files are empty state; corrupt lines are skipped with a warning.
//! - **Injected time**: Every timestamp comes from a [`Clock`], so tests never sleep.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spec_metrics_core::{MetricsConfig, MetricsService, Phase, SystemClock};
//!
//! let mut service = MetricsService::new(project, MetricsConfig::default(), Arc::new(SystemClock));
//! service.recover()?;
//! service.start_ai_session("user-auth", Phase::Design)?;
//! // ...
//! service.end_ai_session("user-auth", Phase::Design)?;
//! let metrics = service.get_spec_metrics("user-auth")?;
//! ```

pub mod aggregate;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod error;
pub mod human;
pub mod log_store;
pub mod recovery;
pub mod schema;
pub mod service;
pub mod storage;

pub use aggregate::{
    project_metrics, spec_ids, spec_metrics, PhaseMetrics, PhaseStatus, ProjectMetrics,
    SpecMetrics, SpecStatus,
};
pub use checkpoint::{CheckpointAiSession, CheckpointStore, SessionTempData};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, MetricsConfig};
pub use error::{MetricsError, Result};
pub use human::{
    ActiveHumanSession, HumanActivityTracker, HumanSessionSink, HumanState, IdlePolicy,
};
pub use log_store::MetricLogStore;
pub use recovery::{recover_incomplete_sessions, RecoveryReport};
pub use schema::{
    format_timestamp, parse_timestamp, AiMetricRecord, HumanMetricRecord, LifecycleEvent,
    LifecycleMetricRecord, MetricRecord, Phase, ValidationError,
};
pub use service::{AiSessionKey, MetricsObserver, MetricsService};
pub use storage::MetricsPaths;
