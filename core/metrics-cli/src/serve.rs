//! `spec-metrics serve`: line-delimited JSON over stdin/stdout.
//!
//! One reader thread feeds stdin lines into a channel. The loop thread owns
//! the service and the human tracker and wakes on whichever comes first: a
//! request, the idle deadline, or the checkpoint cadence. EOF on stdin is a
//! clean shutdown: the human tracker is stopped, then open AI sessions are
//! checkpointed for the next start.

use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use spec_metrics_core::{
    Clock, HumanActivityTracker, HumanMetricRecord, HumanState, IdlePolicy, MetricsConfig,
    MetricsError, MetricsObserver, MetricsService, Phase,
};
use spec_metrics_protocol::{
    parse_params, ActivityParams, AiSessionParams, ErrorInfo, HumanActivityReport,
    HumanSessionParams, Method, Notification, Request, Response, SpecParams, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

enum Input {
    Line(String),
    TooLarge,
    Eof,
}

/// Forwards spec ids of appended records to the loop thread.
struct ChannelObserver(Sender<String>);

impl MetricsObserver for ChannelObserver {
    fn metrics_updated(&self, spec_id: &str) {
        let _ = self.0.send(spec_id.to_string());
    }
}

pub struct Server<W: Write> {
    service: MetricsService,
    tracker: HumanActivityTracker,
    clock: Arc<dyn Clock>,
    updates: Receiver<String>,
    out: W,
    checkpoint_interval: Duration,
    next_checkpoint: Instant,
}

impl<W: Write> Server<W> {
    /// Builds the service for `project` and recovers any leftover checkpoint.
    pub fn open(
        project: PathBuf,
        config: MetricsConfig,
        clock: Arc<dyn Clock>,
        out: W,
    ) -> Result<Self, MetricsError> {
        let (tx, updates) = mpsc::channel();
        let policy = IdlePolicy::from_config(&config);
        let checkpoint_interval = config.checkpoint_interval();
        let service = MetricsService::new(project, config, clock.clone())
            .with_observer(Box::new(ChannelObserver(tx)));

        let report = service.recover()?;
        info!(
            project = %service.project_path().display(),
            ai = report.ai_sessions_recovered,
            human = report.human_sessions_recovered,
            "Metrics server ready"
        );

        Ok(Self {
            service,
            tracker: HumanActivityTracker::new(clock.clone(), policy),
            clock,
            updates,
            out,
            checkpoint_interval,
            next_checkpoint: Instant::now() + checkpoint_interval,
        })
    }

    /// Serves requests from `input` until EOF.
    pub fn run<R>(mut self, input: R) -> std::io::Result<()>
    where
        R: BufRead + Send + 'static,
    {
        let lines = spawn_reader(input);

        loop {
            match lines.recv_timeout(self.next_wake()) {
                Ok(Input::Line(line)) => {
                    let response = self.handle_line(&line);
                    self.write_message(&response)?;
                }
                Ok(Input::TooLarge) => {
                    let response = Response::error(
                        None,
                        "request_too_large",
                        "request exceeded maximum size",
                    );
                    self.write_message(&response)?;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Ok(Input::Eof) | Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick();
            self.flush_notifications()?;
        }

        self.shutdown();
        self.flush_notifications()
    }

    /// Fires a due idle timer and flushes the checkpoint on cadence.
    pub fn tick(&mut self) {
        if self.tracker.fire_due_timer(&mut self.service) {
            self.sync_human_activity();
        }
        if Instant::now() >= self.next_checkpoint {
            self.next_checkpoint = Instant::now() + self.checkpoint_interval;
            if let Err(err) = self.service.flush_checkpoint() {
                warn!(error = %err, "Periodic checkpoint failed");
            }
        }
    }

    pub fn shutdown(&mut self) {
        // A session the log refused stays reported and lands in the checkpoint.
        self.tracker.stop(&mut self.service);
        if let Err(err) = self.service.shutdown() {
            warn!(error = %err, "Failed to checkpoint on shutdown");
        }
    }

    fn next_wake(&self) -> Duration {
        let until_checkpoint = self.next_checkpoint.saturating_duration_since(Instant::now());
        match self.tracker.next_deadline() {
            Some(deadline) => {
                let until_idle = (deadline - self.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                until_idle.min(until_checkpoint)
            }
            None => until_checkpoint,
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Response {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Rejected malformed request");
                return Response::error(
                    None,
                    "invalid_json",
                    format!("request was not valid JSON: {}", err),
                );
            }
        };
        debug!(method = ?request.method, id = ?request.id, "Request received");
        self.handle_request(request)
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        if request.protocol_version != PROTOCOL_VERSION {
            return Response::error(
                request.id,
                "protocol_mismatch",
                "unsupported protocol version",
            );
        }

        let id = request.id;
        match self.dispatch(request.method, request.params) {
            Ok(data) => Response::ok(id, data),
            Err(err) => Response::error_with_info(id, err),
        }
    }

    fn dispatch(&mut self, method: Method, params: Option<Value>) -> Result<Value, ErrorInfo> {
        match method {
            Method::GetHealth => Ok(json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "project": self.service.project_path().display().to_string(),
                "open_ai_sessions": self.service.open_ai_sessions().count(),
                "human_state": human_state_name(self.tracker.state()),
                "tracked_spec": self.tracker.current_spec(),
            })),
            Method::StartAiSession => {
                let params: AiSessionParams = parse_params(params)?;
                let phase = parse_phase(&params.phase)?;
                self.service
                    .start_ai_session(&params.spec_id, phase)
                    .map_err(error_info)?;
                Ok(json!({ "started": true }))
            }
            Method::EndAiSession => {
                let params: AiSessionParams = parse_params(params)?;
                let phase = parse_phase(&params.phase)?;
                let record = self
                    .service
                    .end_ai_session(&params.spec_id, phase)
                    .map_err(error_info)?;
                record_response(&record)
            }
            Method::StartSpecLifecycle => {
                let params: SpecParams = parse_params(params)?;
                let record = self
                    .service
                    .start_spec_lifecycle(&params.spec_id)
                    .map_err(error_info)?;
                record_response(&record)
            }
            Method::CompleteSpecLifecycle => {
                let params: SpecParams = parse_params(params)?;
                let record = self
                    .service
                    .complete_spec_lifecycle(&params.spec_id)
                    .map_err(error_info)?;
                record_response(&record)
            }
            Method::RecordHumanSession => {
                let params: HumanSessionParams = parse_params(params)?;
                let (start, end) = params.interval()?;
                let record = HumanMetricRecord::new(&params.spec_id, start, end);
                self.service
                    .record_human_session(record.clone())
                    .map_err(error_info)?;
                record_response(&record)
            }
            Method::ReportHumanActivity => {
                let params: HumanActivityReport = parse_params(params)?;
                let (start, last_activity) = params.times()?;
                self.service
                    .report_human_activity(&params.spec_id, start, last_activity);
                Ok(json!({ "reported": true }))
            }
            Method::ClearHumanActivity => {
                self.service.clear_human_activity();
                Ok(json!({ "cleared": true }))
            }
            Method::HumanStart => {
                let params: SpecParams = parse_params(params)?;
                self.tracker.start(&params.spec_id, &mut self.service);
                Ok(self.human_status())
            }
            Method::HumanActivity => {
                let params = match params {
                    Some(params) => parse_params::<ActivityParams>(Some(params))?,
                    None => ActivityParams::default(),
                };
                let event_type = params.event_type.as_deref().unwrap_or("activity");
                self.tracker.record_activity(event_type, &mut self.service);
                self.sync_human_activity();
                Ok(self.human_status())
            }
            Method::HumanStop => {
                self.tracker.stop(&mut self.service);
                Ok(self.human_status())
            }
            Method::FocusLost => {
                self.tracker.handle_focus_loss(&mut self.service);
                Ok(self.human_status())
            }
            Method::FocusRegained => {
                self.tracker.handle_focus_regain(&mut self.service);
                Ok(self.human_status())
            }
            Method::GetSpecMetrics => {
                let params: SpecParams = parse_params(params)?;
                let metrics = self
                    .service
                    .get_spec_metrics(&params.spec_id)
                    .map_err(error_info)?;
                to_value(&metrics)
            }
            Method::GetProjectMetrics => {
                let metrics = self.service.get_project_metrics().map_err(error_info)?;
                to_value(&metrics)
            }
        }
    }

    fn human_status(&self) -> Value {
        json!({
            "state": human_state_name(self.tracker.state()),
            "spec_id": self.tracker.current_spec(),
            "session_open": self.tracker.active_session().is_some(),
        })
    }

    /// Mirrors the tracker's open session into the service's checkpoint data.
    fn sync_human_activity(&mut self) {
        if let Some(session) = self.tracker.active_session() {
            self.service
                .report_human_activity(&session.spec_id, session.start, session.last_activity);
        }
    }

    fn flush_notifications(&mut self) -> std::io::Result<()> {
        while let Ok(spec_id) = self.updates.try_recv() {
            let notification = Notification::metrics_updated(&spec_id);
            self.write_message(&notification)?;
        }
        Ok(())
    }

    fn write_message<T: Serialize>(&mut self, message: &T) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

fn spawn_reader<R>(mut input: R) -> Receiver<Input>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || loop {
        let input_event = match read_request(&mut input) {
            Ok(Input::Line(line)) if line.trim().is_empty() => continue,
            Ok(input_event) => input_event,
            Err(err) => {
                warn!(error = %err, "Failed to read request line");
                Input::Eof
            }
        };
        let done = matches!(input_event, Input::Eof);
        if tx.send(input_event).is_err() || done {
            break;
        }
    });
    rx
}

/// Reads one request line, buffering at most `MAX_REQUEST_BYTES + 1` bytes.
fn read_request<R: BufRead>(input: &mut R) -> std::io::Result<Input> {
    let limit = MAX_REQUEST_BYTES as u64 + 1;
    let mut buf = Vec::new();
    if input.by_ref().take(limit).read_until(b'\n', &mut buf)? == 0 {
        return Ok(Input::Eof);
    }
    if buf.len() <= MAX_REQUEST_BYTES {
        return Ok(Input::Line(String::from_utf8_lossy(&buf).into_owned()));
    }

    // Discard the rest of the oversized line in bounded chunks.
    while !buf.ends_with(b"\n") {
        buf.clear();
        if input.by_ref().take(limit).read_until(b'\n', &mut buf)? == 0 {
            break;
        }
    }
    Ok(Input::TooLarge)
}

fn parse_phase(value: &str) -> Result<Phase, ErrorInfo> {
    Phase::from_str(value).map_err(|err| ErrorInfo::new("invalid_phase", err.to_string()))
}

fn error_info(err: MetricsError) -> ErrorInfo {
    let code = match &err {
        MetricsError::InvalidRecord { .. } => "invalid_record",
        MetricsError::InvalidPhase(_) => "invalid_phase",
        MetricsError::Io { .. } => "io_error",
        MetricsError::Json { .. } => "serialization_error",
        MetricsError::ConfigMalformed { .. } => "config_error",
    };
    warn!(code, error = %err, "Request failed");
    ErrorInfo::new(code, err.to_string())
}

fn record_response<T: Serialize>(record: &T) -> Result<Value, ErrorInfo> {
    let record = to_value(record)?;
    Ok(json!({ "record": record }))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        )
    })
}

fn human_state_name(state: &HumanState) -> &'static str {
    match state {
        HumanState::Idle => "idle",
        HumanState::Tracking { .. } => "tracking",
        HumanState::Active { .. } => "active",
        HumanState::Paused { .. } => "paused",
    }
}
