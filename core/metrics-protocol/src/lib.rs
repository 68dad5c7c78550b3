//! Line-delimited request/response protocol for `spec-metrics serve`.
//!
//! One JSON request per stdin line, one JSON response per stdout line.
//! Notifications are interleaved on stdout and carry no `ok` field, so
//! clients can tell them apart from responses.
//!
//! The serve loop is the authority on validation; clients can reuse these
//! types to construct valid requests.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_SPEC_ID_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    StartAiSession,
    EndAiSession,
    StartSpecLifecycle,
    CompleteSpecLifecycle,
    RecordHumanSession,
    ReportHumanActivity,
    ClearHumanActivity,
    HumanStart,
    HumanActivity,
    HumanStop,
    FocusLost,
    FocusRegained,
    GetSpecMetrics,
    GetProjectMetrics,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(id, ErrorInfo::new(code, message))
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    MetricsUpdated,
}

/// Unsolicited message pushed after a record is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub notification: NotificationKind,
    pub spec_id: String,
}

impl Notification {
    pub fn metrics_updated(spec_id: &str) -> Self {
        Self {
            notification: NotificationKind::MetricsUpdated,
            spec_id: spec_id.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters that can check themselves after deserialisation.
pub trait Validate {
    fn validate(&self) -> Result<(), ErrorInfo>;
}

/// `start_spec_lifecycle`, `complete_spec_lifecycle`, `human_start`,
/// `get_spec_metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecParams {
    pub spec_id: String,
}

impl Validate for SpecParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_spec_id(&self.spec_id)
    }
}

/// `start_ai_session`, `end_ai_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiSessionParams {
    pub spec_id: String,
    pub phase: String,
}

impl Validate for AiSessionParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_spec_id(&self.spec_id)?;
        require_string(&self.phase, "phase")
    }
}

/// `record_human_session`: a session the client closed itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HumanSessionParams {
    pub spec_id: String,
    pub start: String,
    pub end: String,
}

impl HumanSessionParams {
    pub fn interval(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ErrorInfo> {
        let start = require_timestamp(&self.start, "start")?;
        let end = require_timestamp(&self.end, "end")?;
        if end < start {
            return Err(ErrorInfo::new("invalid_interval", "end must not precede start"));
        }
        Ok((start, end))
    }
}

impl Validate for HumanSessionParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_spec_id(&self.spec_id)?;
        self.interval().map(|_| ())
    }
}

/// `report_human_activity`: the client's still-open session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HumanActivityReport {
    pub spec_id: String,
    pub start: String,
    pub last_activity: String,
}

impl HumanActivityReport {
    pub fn times(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ErrorInfo> {
        let start = require_timestamp(&self.start, "start")?;
        let last_activity = require_timestamp(&self.last_activity, "last_activity")?;
        if last_activity < start {
            return Err(ErrorInfo::new(
                "invalid_interval",
                "last_activity must not precede start",
            ));
        }
        Ok((start, last_activity))
    }
}

impl Validate for HumanActivityReport {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_spec_id(&self.spec_id)?;
        self.times().map(|_| ())
    }
}

/// `human_activity`: one pulse from the UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityParams {
    #[serde(default)]
    pub event_type: Option<String>,
}

impl Validate for ActivityParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        Ok(())
    }
}

/// Deserialises and validates a request's `params`.
pub fn parse_params<T>(params: Option<Value>) -> Result<T, ErrorInfo>
where
    T: DeserializeOwned + Validate,
{
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    let parsed: T = serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))?;
    parsed.validate()?;
    Ok(parsed)
}

fn require_spec_id(spec_id: &str) -> Result<(), ErrorInfo> {
    require_string(spec_id, "spec_id")?;
    if spec_id.len() > MAX_SPEC_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_spec_id",
            format!("spec_id must be {} bytes or fewer", MAX_SPEC_ID_LEN),
        ));
    }
    Ok(())
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>, ErrorInfo> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ErrorInfo::new("invalid_timestamp", format!("{} must be RFC3339", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_method_name() {
        let request: Request = serde_json::from_value(json!({
            "protocol_version": 1,
            "method": "start_ai_session",
            "id": "7",
            "params": {"spec_id": "auth", "phase": "design"}
        }))
        .unwrap();
        assert_eq!(request.method, Method::StartAiSession);
        assert_eq!(request.id.as_deref(), Some("7"));
    }

    #[test]
    fn rejects_unknown_method() {
        let result: Result<Request, _> = serde_json::from_value(json!({
            "protocol_version": 1,
            "method": "delete_everything"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn ai_params_require_phase() {
        let err = parse_params::<AiSessionParams>(Some(json!({"spec_id": "auth", "phase": " "})))
            .unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn missing_params_are_rejected() {
        let err = parse_params::<SpecParams>(None).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn unknown_param_fields_are_rejected() {
        let err = parse_params::<SpecParams>(Some(json!({"spec_id": "auth", "extra": 1})))
            .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_blank_or_oversized_spec_id() {
        assert!(parse_params::<SpecParams>(Some(json!({"spec_id": ""}))).is_err());
        let err = parse_params::<SpecParams>(Some(json!({"spec_id": "a".repeat(300)})))
            .unwrap_err();
        assert_eq!(err.code, "invalid_spec_id");
    }

    #[test]
    fn human_session_interval_must_be_ordered() {
        let params = HumanSessionParams {
            spec_id: "auth".to_string(),
            start: "2025-01-15T10:00:45Z".to_string(),
            end: "2025-01-15T10:00:00Z".to_string(),
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_interval");
    }

    #[test]
    fn human_session_rejects_bad_timestamp() {
        let params = HumanSessionParams {
            spec_id: "auth".to_string(),
            start: "ten o'clock".to_string(),
            end: "2025-01-15T10:00:00Z".to_string(),
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_timestamp");
    }

    #[test]
    fn activity_report_accepts_offsets() {
        let report: HumanActivityReport = parse_params(Some(json!({
            "spec_id": "auth",
            "start": "2025-01-15T12:00:00+02:00",
            "last_activity": "2025-01-15T10:00:30Z"
        })))
        .unwrap();
        let (start, last) = report.times().unwrap();
        assert_eq!((last - start).num_milliseconds(), 30_000);
    }

    #[test]
    fn activity_params_default_to_no_event_type() {
        let params: ActivityParams = parse_params(Some(json!({}))).unwrap();
        assert!(params.event_type.is_none());
    }

    #[test]
    fn notification_shape() {
        let value = serde_json::to_value(Notification::metrics_updated("auth")).unwrap();
        assert_eq!(value, json!({"notification": "metrics_updated", "spec_id": "auth"}));
    }

    #[test]
    fn error_response_omits_data() {
        let value = serde_json::to_value(Response::error(None, "boom", "bad")).unwrap();
        assert_eq!(value, json!({"ok": false, "error": {"code": "boom", "message": "bad"}}));
    }
}
