//! Optimization log and sinks.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// One entry of the optimization log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub generation: usize,
    pub best_fitness: f64,
    /// Full-dimension best vector at the time of the record.
    pub best_vector: Vec<f64>,
}

/// Receives log records as they are appended.
pub trait LogSink: Send {
    fn push(&mut self, record: &LogRecord);
}

/// Retains every record; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the records received so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn push(&mut self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Writes `generation,best` rows to any writer.
///
/// The header is written before the first row. I/O errors are reported
/// once through `log::warn!` and further rows are dropped.
pub struct CsvSink<W: Write + Send> {
    writer: W,
    header_written: bool,
    failed: bool,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
            failed: false,
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_row(&mut self, record: &LogRecord) -> std::io::Result<()> {
        if !self.header_written {
            writeln!(self.writer, "generation,best")?;
            self.header_written = true;
        }
        writeln!(self.writer, "{},{}", record.generation, record.best_fitness)?;
        self.writer.flush()
    }
}

impl<W: Write + Send> LogSink for CsvSink<W> {
    fn push(&mut self, record: &LogRecord) {
        if self.failed {
            return;
        }
        if let Err(e) = self.write_row(record) {
            log::warn!("csv log sink disabled: {e}");
            self.failed = true;
        }
    }
}

/// Append-only record of the best solution over time.
#[derive(Default)]
pub struct OptimizationLog {
    records: Vec<LogRecord>,
    sinks: Vec<Box<dyn LogSink>>,
}

impl std::fmt::Debug for OptimizationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationLog")
            .field("records", &self.records.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl OptimizationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }

    /// Appends a record and forwards it to every sink.
    pub fn push(&mut self, record: LogRecord) {
        for sink in &mut self.sinks {
            sink.push(&record);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&LogRecord> {
        self.records.last()
    }

    pub fn take_records(&mut self) -> Vec<LogRecord> {
        std::mem::take(&mut self.records)
    }
}
