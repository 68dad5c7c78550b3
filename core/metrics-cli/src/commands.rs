//! One-shot subcommands. Each prints JSON to stdout and exits.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use spec_metrics_core::{
    parse_timestamp, HumanMetricRecord, MetricsConfig, MetricsService, SystemClock,
};

fn service(project: PathBuf, config: MetricsConfig) -> MetricsService {
    MetricsService::new(project, config, Arc::new(SystemClock))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| format!("Failed to serialize output: {}", err))?;
    println!("{}", text);
    Ok(())
}

pub fn recover(project: PathBuf, config: MetricsConfig) -> Result<(), String> {
    let report = service(project, config).recover()?;
    print_json(&report)
}

pub fn spec(project: PathBuf, config: MetricsConfig, spec_id: &str) -> Result<(), String> {
    let metrics = service(project, config).get_spec_metrics(spec_id)?;
    print_json(&metrics)
}

pub fn project(project: PathBuf, config: MetricsConfig) -> Result<(), String> {
    let metrics = service(project, config).get_project_metrics()?;
    print_json(&metrics)
}

/// Prints valid records as JSON lines, in log order.
pub fn log(project: PathBuf, config: MetricsConfig, spec_id: Option<&str>) -> Result<(), String> {
    let records = service(project, config).read_log(spec_id)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for record in records {
        let line = serde_json::to_string(&record)
            .map_err(|err| format!("Failed to serialize record: {}", err))?;
        writeln!(out, "{}", line).map_err(|err| format!("Failed to write output: {}", err))?;
    }
    Ok(())
}

pub fn record_human(
    project: PathBuf,
    config: MetricsConfig,
    spec_id: &str,
    start: &str,
    end: &str,
) -> Result<(), String> {
    let start = parse_timestamp(start).ok_or_else(|| format!("Invalid start timestamp: {}", start))?;
    let end = parse_timestamp(end).ok_or_else(|| format!("Invalid end timestamp: {}", end))?;
    if end < start {
        return Err("end must not precede start".to_string());
    }

    let record = HumanMetricRecord::new(spec_id, start, end);
    service(project, config).record_human_session(record.clone())?;
    print_json(&record)
}
