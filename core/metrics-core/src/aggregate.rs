//! Replays the metric log into per-spec and per-project summaries.
//!
//! Everything here is a pure function of the records passed in. Missing data
//! produces zeroed summaries, never errors.
//!
//! Human sessions carry no phase. Each one is attributed to the phase of the
//! latest AI session that started at or before it (or `requirements` when
//! none did), so per-phase human time always adds up to the per-spec total.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::schema::{LifecycleEvent, MetricRecord, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseMetrics {
    pub ai_time_ms: u64,
    pub human_time_ms: u64,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecMetrics {
    pub spec_id: String,
    pub total_ai_time_ms: u64,
    pub total_human_time_ms: u64,
    /// `totalMs` of the latest completion, or `None` while never completed.
    pub total_elapsed_ms: Option<u64>,
    /// Keyed in workflow order; always contains every phase.
    pub phase_metrics: BTreeMap<Phase, PhaseMetrics>,
    pub status: SpecStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetrics {
    pub total_ai_time_ms: u64,
    pub total_human_time_ms: u64,
    pub completed_spec_count: usize,
    pub in_progress_spec_count: usize,
}

/// Every spec id that appears in `records`, in first-seen order.
pub fn spec_ids(records: &[MetricRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(MetricRecord::spec)
        .filter(|spec| seen.insert(*spec))
        .map(str::to_string)
        .collect()
}

/// Summarises one spec. Records for other specs are ignored.
pub fn spec_metrics(spec_id: &str, records: &[MetricRecord]) -> SpecMetrics {
    let records: Vec<&MetricRecord> = records.iter().filter(|r| r.spec() == spec_id).collect();

    let mut ai_by_phase: BTreeMap<Phase, u64> = BTreeMap::new();
    let mut human_by_phase: BTreeMap<Phase, u64> = BTreeMap::new();
    let mut total_elapsed_ms = None;
    let mut last_event = None;

    let mut ai_starts: Vec<_> = records
        .iter()
        .filter_map(|record| match record {
            MetricRecord::Ai(ai) => Some((ai.start, ai.phase)),
            _ => None,
        })
        .collect();
    // Stable: equal starts keep log order, so the later write wins below.
    ai_starts.sort_by_key(|(start, _)| *start);

    for record in &records {
        match record {
            MetricRecord::Ai(ai) => {
                let total = ai_by_phase.entry(ai.phase).or_default();
                *total = total.saturating_add(ai.ms);
            }
            MetricRecord::Human(human) => {
                let phase = ai_starts
                    .iter()
                    .rev()
                    .find(|(start, _)| *start <= human.start)
                    .map(|(_, phase)| *phase)
                    .unwrap_or(Phase::Requirements);
                let total = human_by_phase.entry(phase).or_default();
                *total = total.saturating_add(human.ms);
            }
            MetricRecord::Lifecycle(lifecycle) => {
                if lifecycle.event == LifecycleEvent::Complete {
                    total_elapsed_ms = lifecycle.total_ms;
                }
                last_event = Some(lifecycle.event);
            }
        }
    }

    let status = match last_event {
        Some(LifecycleEvent::Complete) => SpecStatus::Completed,
        _ => SpecStatus::InProgress,
    };

    let phase_metrics = Phase::ALL
        .iter()
        .enumerate()
        .map(|(index, phase)| {
            let started = ai_by_phase.contains_key(phase);
            let later_started = Phase::ALL[index + 1..]
                .iter()
                .any(|later| ai_by_phase.contains_key(later));
            let phase_status = if !started {
                PhaseStatus::NotStarted
            } else if status == SpecStatus::Completed || later_started {
                PhaseStatus::Completed
            } else {
                PhaseStatus::InProgress
            };
            (
                *phase,
                PhaseMetrics {
                    ai_time_ms: ai_by_phase.get(phase).copied().unwrap_or(0),
                    human_time_ms: human_by_phase.get(phase).copied().unwrap_or(0),
                    status: phase_status,
                },
            )
        })
        .collect();

    SpecMetrics {
        spec_id: spec_id.to_string(),
        total_ai_time_ms: saturating_total(ai_by_phase.values()),
        total_human_time_ms: saturating_total(human_by_phase.values()),
        total_elapsed_ms,
        phase_metrics,
        status,
    }
}

/// Summarises every spec in the log.
pub fn project_metrics(records: &[MetricRecord]) -> ProjectMetrics {
    let mut project = ProjectMetrics::default();

    for spec_id in spec_ids(records) {
        let spec = spec_metrics(&spec_id, records);
        project.total_ai_time_ms = project.total_ai_time_ms.saturating_add(spec.total_ai_time_ms);
        project.total_human_time_ms = project
            .total_human_time_ms
            .saturating_add(spec.total_human_time_ms);
        match spec.status {
            SpecStatus::Completed => project.completed_spec_count += 1,
            SpecStatus::InProgress => project.in_progress_spec_count += 1,
        }
    }

    project
}

// Durations come from disk unchecked against their interval.
fn saturating_total<'a>(values: impl Iterator<Item = &'a u64>) -> u64 {
    values.fold(0, |total, ms| total.saturating_add(*ms))
}
