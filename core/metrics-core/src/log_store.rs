//! Append-only metric log, one JSON record per line.
//!
//! ## Failure semantics
//!
//! - **Write**: records are validated first; an invalid record is a caller
//!   bug and is rejected with [`MetricsError::InvalidRecord`] before touching
//!   the file.
//! - **Read**: a missing file is an empty log. A line that is not JSON, or is
//!   JSON but fails the schema, is skipped with a warning. One bad line never
//!   hides the rest of the log.
//! - Any other I/O error propagates; nothing is retried here.
//!
//! The store assumes one writer process per project. Each append is a single
//! `write_all` of the full line on a file opened in append mode.

use std::io::Write;
use std::path::Path;

use fs_err as fs;
use tracing::{debug, warn};

use crate::error::{MetricsError, Result};
use crate::schema::{validate, MetricRecord};
use crate::storage::MetricsPaths;

#[derive(Debug, Clone, Default)]
pub struct MetricLogStore {
    paths: MetricsPaths,
}

impl MetricLogStore {
    pub fn new(paths: MetricsPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &MetricsPaths {
        &self.paths
    }

    /// Validates and appends one record to the project's log.
    pub fn append(&self, project_path: &Path, record: &MetricRecord) -> Result<()> {
        record
            .validate()
            .map_err(|reason| MetricsError::InvalidRecord { reason })?;

        let mut line = serde_json::to_string(record)
            .map_err(|e| MetricsError::json("Failed to serialize metric record", e))?;
        line.push('\n');

        self.paths
            .ensure_metadata_dir(project_path)
            .map_err(|e| MetricsError::io("Failed to create metadata directory", e))?;

        let log_path = self.paths.log_file(project_path);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| MetricsError::io("Failed to open metric log", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MetricsError::io("Failed to append metric record", e))?;
        file.sync_data()
            .map_err(|e| MetricsError::io("Failed to sync metric log", e))?;

        debug!(
            spec = %record.spec(),
            kind = record.kind(),
            "Metric record appended"
        );
        Ok(())
    }

    /// Reads every valid record in write order.
    pub fn read_all(&self, project_path: &Path) -> Result<Vec<MetricRecord>> {
        let log_path = self.paths.log_file(project_path);
        let bytes = match fs::read(&log_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(MetricsError::io("Failed to read metric log", err)),
        };

        // Lossy decoding keeps a single garbled byte from failing the whole read.
        let content = String::from_utf8_lossy(&bytes);
        Ok(parse_log(&content, &log_path))
    }

    /// Reads every valid record belonging to `spec_id`, in write order.
    pub fn read_for_spec(&self, project_path: &Path, spec_id: &str) -> Result<Vec<MetricRecord>> {
        let mut records = self.read_all(project_path)?;
        records.retain(|record| record.spec() == spec_id);
        Ok(records)
    }
}

/// Parses log content, skipping blank, unparsable and schema-invalid lines.
pub fn parse_log(content: &str, source: &Path) -> Vec<MetricRecord> {
    let mut records = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    path = %source.display(),
                    line = index + 1,
                    error = %err,
                    "Skipping unparsable metric line"
                );
                continue;
            }
        };

        match validate(&value) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(
                    path = %source.display(),
                    line = index + 1,
                    error = %err,
                    "Skipping invalid metric record"
                );
            }
        }
    }

    records
}
