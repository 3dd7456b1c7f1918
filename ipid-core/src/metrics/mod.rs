//! Metrics records and the sinks that persist them.
//!
//! One [`MetricsRecord`] is produced per scoring event (or per closed
//! bucket in bucketed timing). Sinks are append-only; a failed append is
//! reported to the caller and never retried.

pub mod csv;
pub mod jsonl;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::detect::matrix::ConfusionMatrix;
use crate::error::IpidError;

pub use self::csv::CsvSink;
pub use self::jsonl::JsonlSink;

/// File name written inside each run directory.
pub const METRICS_FILE_STEM: &str = "detection_metrics";

// ── MetricsRecord ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Wall-clock seconds since the Unix epoch when the record was scored.
    pub window_end: f64,
    #[serde(rename = "TP")]
    pub tp: u64,
    #[serde(rename = "FP")]
    pub fp: u64,
    #[serde(rename = "TN")]
    pub tn: u64,
    #[serde(rename = "FN")]
    pub fn_: u64,
    #[serde(rename = "Precision")]
    pub precision: f64,
    #[serde(rename = "Recall")]
    pub recall: f64,
    #[serde(rename = "F1")]
    pub f1: f64,
}

impl MetricsRecord {
    pub fn from_matrix(window_end: f64, matrix: &ConfusionMatrix) -> Self {
        Self {
            window_end,
            tp: matrix.tp(),
            fp: matrix.fp(),
            tn: matrix.tn(),
            fn_: matrix.fn_(),
            precision: matrix.precision(),
            recall: matrix.recall(),
            f1: matrix.f1(),
        }
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// Copy with the rates rounded to three decimals for output.
    pub fn rounded(&self) -> Self {
        Self {
            precision: round3(self.precision),
            recall: round3(self.recall),
            f1: round3(self.f1),
            ..*self
        }
    }
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

// ── MetricsSink ──────────────────────────────────────────────────

pub trait MetricsSink: Send {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), IpidError>;

    fn flush(&mut self) -> Result<(), IpidError> {
        Ok(())
    }

    /// Where records end up, if on disk.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Keeps records in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MetricsRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for MemorySink {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), IpidError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*record);
        Ok(())
    }
}

/// Output format selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    #[default]
    Csv,
    Jsonl,
}

/// `<results_dir>/<YYYYmmdd-HHMMSS>`, one directory per run.
pub fn run_directory(results_dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    results_dir.join(stamp)
}

/// Create a fresh run directory and open a sink of the requested format in it.
pub fn open_run_sink(
    results_dir: &Path,
    format: SinkFormat,
) -> Result<Box<dyn MetricsSink>, IpidError> {
    let dir = run_directory(results_dir);
    std::fs::create_dir_all(&dir)?;
    Ok(match format {
        SinkFormat::Csv => Box::new(CsvSink::create(dir.join(format!("{METRICS_FILE_STEM}.csv")))?),
        SinkFormat::Jsonl => {
            Box::new(JsonlSink::create(dir.join(format!("{METRICS_FILE_STEM}.jsonl")))?)
        }
    })
}
