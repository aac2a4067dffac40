//! Line parser for the plaintext exposition format served by node exporters.
//!
//! Only a fixed set of metric families is kept (see [`ALLOWED_PREFIXES`]) and
//! only the `device` label is extracted from each line.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ExporterId, Sample};

/// Metric families that are kept; everything else in a payload is dropped
/// before parsing.
pub static ALLOWED_PREFIXES: &[&str] = &["node_network_", "node_netstat_", "node_sockstat_"];

/// Device label used when a line carries no `device` label.
pub static UNKNOWN_DEVICE: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line does not have two parts when split by space ({0} parts)")]
    MalformedLine(usize),
    #[error("cannot parse value: {0}")]
    InvalidValue(String),
    #[error("empty or broken label block: {0}")]
    MalformedLabels(String),
}

/// The successfully parsed samples of one payload plus the number of lines
/// that had to be skipped.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub samples: Vec<Sample>,
    pub skipped: usize,
}

pub fn is_allowed(line: &str) -> bool {
    ALLOWED_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// Drops empty lines, `#` comment/metadata lines and every line outside the
/// allow-list.
pub fn filter_lines(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| is_allowed(line))
}

/// Parses one `name[{labels}] value` line.
pub fn parse_line(
    line: &str,
    timestamp: DateTime<Utc>,
    exporter_id: ExporterId,
) -> Result<Sample, ParseError> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() != 2 {
        return Err(ParseError::MalformedLine(parts.len()));
    }

    let (name_and_labels, raw_value) = (parts[0], parts[1]);

    let value: f64 = raw_value
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidValue(raw_value.to_string()))?;

    let (metric, device) = match name_and_labels.find('{') {
        Some(start) if start > 0 => {
            let labels = label_block(name_and_labels, start)?;
            (&name_and_labels[..start], device_label(labels))
        }
        Some(start) => (&name_and_labels[..start], None),
        None => (name_and_labels, None),
    };

    Ok(Sample {
        timestamp,
        metric: metric.to_string(),
        device: device.unwrap_or(UNKNOWN_DEVICE).to_string(),
        value,
        exporter_id,
    })
}

// inner content of `name{...}`, the closing brace must end the token
fn label_block(token: &str, start: usize) -> Result<&str, ParseError> {
    let inner_len = token.len() as isize - start as isize - 2;
    if inner_len <= 0 || !token.ends_with('}') {
        return Err(ParseError::MalformedLabels(token.to_string()));
    }

    Ok(&token[start + 1..token.len() - 1])
}

fn device_label(labels: &str) -> Option<&str> {
    labels
        .split(',')
        .find(|entry| {
            entry
                .split('=')
                .next()
                .map(|key| key.trim() == "device")
                .unwrap_or(false)
        })
        .and_then(|entry| entry.split('"').nth(1))
}

/// Filters a full payload and parses every remaining line. A line that fails
/// to parse is logged and skipped; it never aborts the batch.
pub fn parse_batch(payload: &str, timestamp: DateTime<Utc>, exporter_id: ExporterId) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let lines: Vec<&str> = filter_lines(payload).collect();

    tracing::debug!(count = lines.len(), exporter_id, "processing raw metric lines");

    for (index, line) in lines.into_iter().enumerate() {
        match parse_line(line, timestamp, exporter_id) {
            Ok(sample) => batch.samples.push(sample),
            Err(e) => {
                tracing::warn!(line = index + 1, exporter_id, error = %e, "cannot parse metric line");
                batch.skipped += 1;
            }
        }
    }

    batch
}
