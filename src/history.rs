use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::parse::Value;

const FLUSH_EVERY: usize = 25;

/// CSV transcript of every observed data row, using the raw (unconverted)
/// values. The file is created lazily on the first row of a run and flushed
/// in batches to bound I/O cost.
pub struct HistoryWriter {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    unflushed: usize,
}

impl HistoryWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            unflushed: 0,
        }
    }

    pub fn record(&mut self, schema: &[String], row: &[Value]) -> Result<()> {
        if self.writer.is_none() {
            let file = File::create(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(schema)?;
            self.writer = Some(writer);
            debug!(path = %self.path.display(), "history file opened");
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_record(row.iter().map(Value::to_string))?;
            self.unflushed += 1;
            if self.unflushed >= FLUSH_EVERY {
                writer.flush()?;
                self.unflushed = 0;
            }
        }
        Ok(())
    }

    /// Flush and close the current run's file; the next recorded row starts
    /// a fresh one.
    pub fn finish_run(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            self.unflushed = 0;
            writer
                .flush()
                .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        }
        Ok(())
    }
}
