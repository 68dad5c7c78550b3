//! Human activity tracking.
//!
//! Turns a stream of activity pulses into bounded human sessions. Declaring
//! *which* spec is visible (`start`) is separate from *measuring* activity
//! (`record_activity`), so idle time never counts.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──start──▶ Tracking ──activity──▶ Active ──idle timeout──▶ Tracking
//!                   ▲  │                   │
//!                   │  focus lost          focus lost (emit)
//!     focus regained│  ▼                   ▼
//!                  Paused ◀────────────────┘
//!
//! stop (any state) → Idle, emitting an open session first
//! start(other spec) while Active → emit, then Tracking(other)
//! ```
//!
//! [`transition`] is pure: it returns the next state plus the effects to
//! perform (emit a record, arm or cancel the idle timer). The
//! [`HumanActivityTracker`] driver applies the effects, owns the single idle
//! deadline, and reads time from an injected [`Clock`].
//!
//! A session closed by the idle timer ends at `last_activity + idle_timeout`,
//! whenever the timer actually fires. Explicit closes (stop, focus loss, spec
//! change) end at the current time, capped at the same bound.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::MetricsConfig;
use crate::schema::{timestamp, HumanMetricRecord};

/// The open human session, as also written to the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHumanSession {
    pub spec_id: String,
    #[serde(with = "timestamp")]
    pub start: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_activity: DateTime<Utc>,
}

impl ActiveHumanSession {
    /// Closes the session at `at`, never before the last pulse and never
    /// past the idle deadline.
    fn close(&self, at: DateTime<Utc>, idle_timeout: Duration) -> HumanMetricRecord {
        let end = at
            .max(self.last_activity)
            .min(self.last_activity + idle_timeout);
        HumanMetricRecord::new(&self.spec_id, self.start, end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanState {
    /// No spec is being tracked.
    Idle,
    /// A spec is current but no activity has been seen since the last close.
    Tracking { spec_id: String },
    /// A session is open. `armed_at` is the pulse that last armed the timer.
    Active {
        session: ActiveHumanSession,
        armed_at: DateTime<Utc>,
    },
    /// Focus lost; the tracked spec stays current but pulses are ignored.
    Paused { spec_id: String },
}

impl HumanState {
    pub fn spec_id(&self) -> Option<&str> {
        match self {
            HumanState::Idle => None,
            HumanState::Tracking { spec_id } | HumanState::Paused { spec_id } => Some(spec_id),
            HumanState::Active { session, .. } => Some(&session.spec_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanEvent {
    Start { spec_id: String, at: DateTime<Utc> },
    Activity { at: DateTime<Utc> },
    Stop { at: DateTime<Utc> },
    FocusLost { at: DateTime<Utc> },
    FocusRegained,
    TimerFired { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Emit(HumanMetricRecord),
    /// Replace any armed timer with one firing at the given instant.
    ArmTimer(DateTime<Utc>),
    CancelTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    pub idle_timeout: Duration,
    pub debounce: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self::from_config(&MetricsConfig::default())
    }
}

impl IdlePolicy {
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            debounce: config.debounce(),
        }
    }
}

pub fn transition(
    state: HumanState,
    event: HumanEvent,
    policy: &IdlePolicy,
) -> (HumanState, Vec<Effect>) {
    use HumanState::*;

    match (state, event) {
        (state, HumanEvent::Start { spec_id, .. }) if state.spec_id() == Some(spec_id.as_str()) => {
            (state, Vec::new())
        }
        (Active { session, .. }, HumanEvent::Start { spec_id, at }) => (
            Tracking { spec_id },
            vec![
                Effect::Emit(session.close(at, policy.idle_timeout)),
                Effect::CancelTimer,
            ],
        ),
        (Paused { .. }, HumanEvent::Start { spec_id, .. }) => (Paused { spec_id }, Vec::new()),
        (_, HumanEvent::Start { spec_id, .. }) => (Tracking { spec_id }, Vec::new()),

        (Tracking { spec_id }, HumanEvent::Activity { at }) => open_session(spec_id, at, policy),
        (Active { mut session, armed_at }, HumanEvent::Activity { at }) => {
            let deadline = session.last_activity + policy.idle_timeout;
            if at >= deadline {
                // The timer is late; close at the deadline before reopening.
                let closed = session.close(deadline, policy.idle_timeout);
                let (state, mut effects) = open_session(session.spec_id, at, policy);
                effects.insert(0, Effect::Emit(closed));
                return (state, effects);
            }
            session.last_activity = session.last_activity.max(at);
            if at - armed_at >= policy.debounce {
                let effects = vec![Effect::ArmTimer(at + policy.idle_timeout)];
                (Active { session, armed_at: at }, effects)
            } else {
                (Active { session, armed_at }, Vec::new())
            }
        }
        (state, HumanEvent::Activity { .. }) => (state, Vec::new()),

        (Active { session, armed_at }, HumanEvent::TimerFired { at }) => {
            let deadline = session.last_activity + policy.idle_timeout;
            if at < deadline {
                // Pulses landed inside the debounce window after arming.
                return (
                    Active { session, armed_at },
                    vec![Effect::ArmTimer(deadline)],
                );
            }
            let record = session.close(deadline, policy.idle_timeout);
            (
                Tracking {
                    spec_id: session.spec_id,
                },
                vec![Effect::Emit(record)],
            )
        }
        (state, HumanEvent::TimerFired { .. }) => (state, Vec::new()),

        (Active { session, .. }, HumanEvent::Stop { at }) => (
            Idle,
            vec![
                Effect::Emit(session.close(at, policy.idle_timeout)),
                Effect::CancelTimer,
            ],
        ),
        (_, HumanEvent::Stop { .. }) => (Idle, vec![Effect::CancelTimer]),

        (Active { session, .. }, HumanEvent::FocusLost { at }) => {
            let record = session.close(at, policy.idle_timeout);
            (
                Paused {
                    spec_id: session.spec_id,
                },
                vec![Effect::Emit(record), Effect::CancelTimer],
            )
        }
        (Tracking { spec_id }, HumanEvent::FocusLost { .. }) => (Paused { spec_id }, Vec::new()),
        (state, HumanEvent::FocusLost { .. }) => (state, Vec::new()),

        (Paused { spec_id }, HumanEvent::FocusRegained) => (Tracking { spec_id }, Vec::new()),
        (state, HumanEvent::FocusRegained) => (state, Vec::new()),
    }
}

fn open_session(
    spec_id: String,
    at: DateTime<Utc>,
    policy: &IdlePolicy,
) -> (HumanState, Vec<Effect>) {
    let session = ActiveHumanSession {
        spec_id,
        start: at,
        last_activity: at,
    };
    (
        HumanState::Active {
            session,
            armed_at: at,
        },
        vec![Effect::ArmTimer(at + policy.idle_timeout)],
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives closed human sessions.
pub trait HumanSessionSink {
    fn human_session_closed(&mut self, record: HumanMetricRecord);
}

impl HumanSessionSink for Vec<HumanMetricRecord> {
    fn human_session_closed(&mut self, record: HumanMetricRecord) {
        self.push(record);
    }
}

/// Owns the state machine and its one idle deadline.
///
/// The host loop asks [`next_deadline`](Self::next_deadline) how long it may
/// sleep and calls [`fire_due_timer`](Self::fire_due_timer) when it wakes.
pub struct HumanActivityTracker {
    state: HumanState,
    deadline: Option<DateTime<Utc>>,
    policy: IdlePolicy,
    clock: Arc<dyn Clock>,
}

impl HumanActivityTracker {
    pub fn new(clock: Arc<dyn Clock>, policy: IdlePolicy) -> Self {
        Self {
            state: HumanState::Idle,
            deadline: None,
            policy,
            clock,
        }
    }

    pub fn state(&self) -> &HumanState {
        &self.state
    }

    pub fn current_spec(&self) -> Option<&str> {
        self.state.spec_id()
    }

    pub fn active_session(&self) -> Option<&ActiveHumanSession> {
        match &self.state {
            HumanState::Active { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn start(&mut self, spec_id: &str, sink: &mut dyn HumanSessionSink) {
        let at = self.clock.now();
        self.dispatch(
            HumanEvent::Start {
                spec_id: spec_id.to_string(),
                at,
            },
            sink,
        );
    }

    /// Records one activity pulse. `event_type` is informational only.
    pub fn record_activity(&mut self, event_type: &str, sink: &mut dyn HumanSessionSink) {
        let at = self.clock.now();
        debug!(event_type, spec = ?self.current_spec(), "Human activity pulse");
        self.dispatch(HumanEvent::Activity { at }, sink);
    }

    pub fn stop(&mut self, sink: &mut dyn HumanSessionSink) {
        let at = self.clock.now();
        self.dispatch(HumanEvent::Stop { at }, sink);
    }

    pub fn handle_focus_loss(&mut self, sink: &mut dyn HumanSessionSink) {
        let at = self.clock.now();
        self.dispatch(HumanEvent::FocusLost { at }, sink);
    }

    pub fn handle_focus_regain(&mut self, sink: &mut dyn HumanSessionSink) {
        self.dispatch(HumanEvent::FocusRegained, sink);
    }

    /// Fires the idle timer if its deadline has passed. Returns whether it did.
    pub fn fire_due_timer(&mut self, sink: &mut dyn HumanSessionSink) -> bool {
        let at = self.clock.now();
        match self.deadline {
            Some(deadline) if deadline <= at => {
                self.deadline = None;
                self.dispatch(HumanEvent::TimerFired { at }, sink);
                true
            }
            _ => false,
        }
    }

    fn dispatch(&mut self, event: HumanEvent, sink: &mut dyn HumanSessionSink) {
        let state = std::mem::replace(&mut self.state, HumanState::Idle);
        let (next, effects) = transition(state, event, &self.policy);
        self.state = next;

        for effect in effects {
            match effect {
                Effect::Emit(record) => {
                    info!(
                        spec = %record.spec,
                        ms = record.ms,
                        "Human session closed"
                    );
                    sink.human_session_closed(record);
                }
                Effect::ArmTimer(deadline) => self.deadline = Some(deadline),
                Effect::CancelTimer => self.deadline = None,
            }
        }
    }
}
