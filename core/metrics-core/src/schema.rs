//! Metric record schema and validation.
//!
//! Three record kinds share one line-delimited log, discriminated by `"type"`:
//!
//! ```json
//! {"type":"ai","spec":"auth","phase":"design","start":"2025-01-15T10:00:00.000Z","end":"2025-01-15T10:05:30.000Z","ms":330000}
//! {"type":"human","spec":"auth","start":"…","end":"…","ms":45000}
//! {"type":"lifecycle","spec":"auth","event":"complete","timestamp":"…","totalMs":7200000}
//! ```
//!
//! [`validate`] is the single gate for both directions: the log store rejects
//! invalid records on write and skips them on read.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MetricsError;

/// One stage of a spec's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Requirements,
    Design,
    Tasks,
    Impl,
}

impl Phase {
    /// Workflow order.
    pub const ALL: [Phase; 4] = [Phase::Requirements, Phase::Design, Phase::Tasks, Phase::Impl];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Requirements => "requirements",
            Phase::Design => "design",
            Phase::Tasks => "tasks",
            Phase::Impl => "impl",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = MetricsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == value)
            .ok_or_else(|| MetricsError::InvalidPhase(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Start,
    Complete,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::Complete => "complete",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Timestamps
// ═══════════════════════════════════════════════════════════════════════════════

/// Formats a timestamp the way every persisted file stores it:
/// RFC 3339, UTC, millisecond precision (`2025-01-15T10:05:30.000Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses any RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole milliseconds from `start` to `end`, clamped at zero.
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from(end.signed_duration_since(start).num_milliseconds()).unwrap_or(0)
}

/// Serde adapter for [`format_timestamp`] / [`parse_timestamp`].
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid RFC 3339 timestamp: {}", raw)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A closed interval of agent execution on one phase of a spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiMetricRecord {
    pub spec: String,
    pub phase: Phase,
    #[serde(with = "timestamp")]
    pub start: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub end: DateTime<Utc>,
    pub ms: u64,
}

impl AiMetricRecord {
    pub fn new(spec: &str, phase: Phase, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            spec: spec.to_string(),
            phase,
            start,
            end,
            ms: duration_ms(start, end),
        }
    }
}

/// A closed interval of detected human activity on a spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanMetricRecord {
    pub spec: String,
    #[serde(with = "timestamp")]
    pub start: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub end: DateTime<Utc>,
    pub ms: u64,
}

impl HumanMetricRecord {
    pub fn new(spec: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            spec: spec.to_string(),
            start,
            end,
            ms: duration_ms(start, end),
        }
    }
}

/// Start or completion of a whole spec workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleMetricRecord {
    pub spec: String,
    pub event: LifecycleEvent,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<u64>,
}

impl LifecycleMetricRecord {
    pub fn started(spec: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            spec: spec.to_string(),
            event: LifecycleEvent::Start,
            timestamp,
            total_ms: None,
        }
    }

    pub fn completed(spec: &str, started_at: DateTime<Utc>, timestamp: DateTime<Utc>) -> Self {
        Self {
            spec: spec.to_string(),
            event: LifecycleEvent::Complete,
            timestamp,
            total_ms: Some(duration_ms(started_at, timestamp)),
        }
    }
}

/// Any persisted metric record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricRecord {
    Ai(AiMetricRecord),
    Human(HumanMetricRecord),
    Lifecycle(LifecycleMetricRecord),
}

impl MetricRecord {
    pub fn spec(&self) -> &str {
        match self {
            MetricRecord::Ai(record) => &record.spec,
            MetricRecord::Human(record) => &record.spec,
            MetricRecord::Lifecycle(record) => &record.spec,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MetricRecord::Ai(_) => "ai",
            MetricRecord::Human(_) => "human",
            MetricRecord::Lifecycle(_) => "lifecycle",
        }
    }

    /// Strict check used before a record is written.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let value = serde_json::to_value(self).map_err(|_| ValidationError::NotAnObject)?;
        validate(&value).map(|_| ())
    }
}

impl From<AiMetricRecord> for MetricRecord {
    fn from(record: AiMetricRecord) -> Self {
        MetricRecord::Ai(record)
    }
}

impl From<HumanMetricRecord> for MetricRecord {
    fn from(record: HumanMetricRecord) -> Self {
        MetricRecord::Human(record)
    }
}

impl From<LifecycleMetricRecord> for MetricRecord {
    fn from(record: LifecycleMetricRecord) -> Self {
        MetricRecord::Lifecycle(record)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown record type `{0}`")]
    UnknownType(String),

    #[error("unknown phase `{0}`")]
    InvalidPhase(String),

    #[error("unknown lifecycle event `{0}`")]
    InvalidEvent(String),

    #[error("`{field}` is not an ISO-8601 timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("`{field}` must be a non-negative integer: {value}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("`totalMs` is only allowed on complete events")]
    UnexpectedTotal,
}

/// Validates a parsed JSON value against the record schema.
///
/// Unknown extra fields are ignored.
pub fn validate(candidate: &Value) -> Result<MetricRecord, ValidationError> {
    let object = candidate.as_object().ok_or(ValidationError::NotAnObject)?;

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => return Err(ValidationError::UnknownType(other.to_string())),
        None => return Err(ValidationError::MissingField("type")),
    };

    match kind {
        "ai" => {
            let phase_raw = require_str(object, "phase")?;
            let phase = Phase::from_str(phase_raw)
                .map_err(|_| ValidationError::InvalidPhase(phase_raw.to_string()))?;
            Ok(MetricRecord::Ai(AiMetricRecord {
                spec: require_spec(object)?,
                phase,
                start: require_timestamp(object, "start")?,
                end: require_timestamp(object, "end")?,
                ms: require_duration(object, "ms")?,
            }))
        }
        "human" => Ok(MetricRecord::Human(HumanMetricRecord {
            spec: require_spec(object)?,
            start: require_timestamp(object, "start")?,
            end: require_timestamp(object, "end")?,
            ms: require_duration(object, "ms")?,
        })),
        "lifecycle" => {
            let spec = require_spec(object)?;
            let event = match require_str(object, "event")? {
                "start" => LifecycleEvent::Start,
                "complete" => LifecycleEvent::Complete,
                other => return Err(ValidationError::InvalidEvent(other.to_string())),
            };
            let timestamp = require_timestamp(object, "timestamp")?;
            let total_ms = match object.get("totalMs") {
                None | Some(Value::Null) => None,
                Some(value) => Some(duration_value("totalMs", value)?),
            };
            if event == LifecycleEvent::Start && total_ms.is_some() {
                return Err(ValidationError::UnexpectedTotal);
            }
            Ok(MetricRecord::Lifecycle(LifecycleMetricRecord {
                spec,
                event,
                timestamp,
                total_ms,
            }))
        }
        other => Err(ValidationError::UnknownType(other.to_string())),
    }
}

fn require_str<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match object.get(field) {
        Some(Value::String(value)) => Ok(value.as_str()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn require_spec(object: &Map<String, Value>) -> Result<String, ValidationError> {
    let spec = require_str(object, "spec")?;
    if spec.trim().is_empty() {
        return Err(ValidationError::MissingField("spec"));
    }
    Ok(spec.to_string())
}

fn require_timestamp(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<DateTime<Utc>, ValidationError> {
    match object.get(field) {
        None => Err(ValidationError::MissingField(field)),
        Some(Value::String(raw)) => {
            parse_timestamp(raw).ok_or_else(|| ValidationError::InvalidTimestamp {
                field,
                value: raw.clone(),
            })
        }
        Some(other) => Err(ValidationError::InvalidTimestamp {
            field,
            value: other.to_string(),
        }),
    }
}

fn require_duration(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<u64, ValidationError> {
    match object.get(field) {
        None => Err(ValidationError::MissingField(field)),
        Some(value) => duration_value(field, value),
    }
}

// as_u64 is None for negatives and for any float, including 5.0
fn duration_value(field: &'static str, value: &Value) -> Result<u64, ValidationError> {
    value.as_u64().ok_or_else(|| ValidationError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}
