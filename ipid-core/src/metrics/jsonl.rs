use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::IpidError;
use crate::metrics::{MetricsRecord, MetricsSink};

/// One JSON object per line, rates rounded like the CSV output.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, IpidError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonlSink {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), IpidError> {
        let line = serde_json::to_string(&record.rounded())?;
        writeln!(self.writer, "{line}")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::matrix::ConfusionMatrix;

    #[test]
    fn writes_one_object_per_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("m.jsonl");
        let mut sink = JsonlSink::create(&path).unwrap();
        let mut m = ConfusionMatrix::new();
        m.record(true, true);
        sink.append(&MetricsRecord::from_matrix(2.0, &m)).unwrap();
        sink.append(&MetricsRecord::from_matrix(3.0, &m)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<MetricsRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tp, 1);
        assert_eq!(rows[1].window_end, 3.0);
        assert!(text.contains("\"FN\":0"));
    }
}
