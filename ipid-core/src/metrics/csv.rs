use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::IpidError;
use crate::metrics::{MetricsRecord, MetricsSink};

pub const CSV_HEADER: &str = "window_end,TP,FP,TN,FN,Precision,Recall,F1";

/// Append-only CSV file, header written once at creation.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvSink {
    /// Create (truncating) the file and write the header row.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, IpidError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;
        Ok(Self { path, writer })
    }

    pub fn format_row(record: &MetricsRecord) -> String {
        format!(
            "{:.6},{},{},{},{},{:.3},{:.3},{:.3}",
            record.window_end,
            record.tp,
            record.fp,
            record.tn,
            record.fn_,
            record.precision,
            record.recall,
            record.f1,
        )
    }
}

impl MetricsSink for CsvSink {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), IpidError> {
        writeln!(self.writer, "{}", Self::format_row(record))
            .and_then(|_| self.writer.flush())
            .map_err(|e| IpidError::Sink(format!("{}: {e}", self.path.display())))
    }

    fn flush(&mut self) -> Result<(), IpidError> {
        self.writer.flush()?;
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
