//! Named marks and the durations measured between them.
//!
//! The coordinator brackets each stage of each file with a start and end
//! mark and keeps the elapsed time under the stage key:
//!
//! | Key | Span |
//! |-----|------|
//! | `<file>:file-read` | chunked ingestion |
//! | `<file>:file-processing` | decode, compose, assemble |
//! | `merge-<n>:merge` | the n-th merge of the session |
//!
//! Timing is diagnostic only. A missing start mark is logged and otherwise
//! ignored; it never changes a job's outcome.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Key for the ingestion span of `file`.
pub fn read_key(file: &str) -> String {
    format!("{file}:file-read")
}

/// Key for the conversion span of `file`.
pub fn processing_key(file: &str) -> String {
    format!("{file}:file-processing")
}

/// Key for the span of merge number `n`.
pub fn merge_key(n: u64) -> String {
    format!("merge-{n}:merge")
}

/// Elapsed time between two marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct Timings {
    marks: HashMap<String, Instant>,
    measurements: Vec<Measurement>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mark called `name` at the current instant.
    pub fn mark(&mut self, name: impl Into<String>) {
        self.marks.insert(name.into(), Instant::now());
    }

    pub fn mark_exists(&self, name: &str) -> bool {
        self.marks.contains_key(name)
    }

    /// Record `<key>-start`.
    pub fn mark_start(&mut self, key: &str) {
        self.mark(format!("{key}-start"));
    }

    /// Record `<key>-end` and measure it against `<key>-start`.
    pub fn mark_end(&mut self, key: &str) -> Option<Duration> {
        let start = format!("{key}-start");
        let end = format!("{key}-end");
        self.mark(end.clone());
        self.take_measurement(key, &start, &end)
    }

    /// Measure from `start_mark` to `end_mark` and keep the result as
    /// `name`, replacing any earlier measurement with that name.
    pub fn take_measurement(&mut self, name: &str, start_mark: &str, end_mark: &str) -> Option<Duration> {
        let (Some(start), Some(end)) = (self.marks.get(start_mark), self.marks.get(end_mark)) else {
            debug!(
                "Cannot measure '{}': missing mark '{}' or '{}'",
                name, start_mark, end_mark
            );
            return None;
        };

        let duration = end.saturating_duration_since(*start);
        let measurement = Measurement {
            name: name.to_string(),
            duration,
        };
        match self.measurements.iter_mut().find(|m| m.name == name) {
            Some(existing) => *existing = measurement,
            None => self.measurements.push(measurement),
        }
        Some(duration)
    }

    /// Drop the marks belonging to `key` (`<key>-start`, `<key>-end` or
    /// `key` itself), or every mark when `key` is `None`.
    pub fn clear_marks(&mut self, key: Option<&str>) {
        match key {
            Some(key) => {
                let start = format!("{key}-start");
                let end = format!("{key}-end");
                self.marks.retain(|name, _| name != key && *name != start && *name != end);
            }
            None => self.marks.clear(),
        }
    }

    /// Measurements in the order they were first taken.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Log every measurement, then clear all marks and measurements.
    pub fn report(&mut self) -> Vec<Measurement> {
        for m in &self.measurements {
            info!("{} took {:.3}s", m.name, m.duration.as_secs_f64());
        }
        self.marks.clear();
        std::mem::take(&mut self.measurements)
    }
}
