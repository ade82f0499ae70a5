use std::io::{BufWriter, Write};

use crate::error::{OutputError, Result};
use crate::event::TraceEvent;

use super::OutputSink;

/// JSONL output sink, one JSON object per line.
pub struct JsonlSink {
    writer: BufWriter<std::fs::File>,
}

impl JsonlSink {
    pub fn new(file: std::fs::File) -> Self {
        Self {
            writer: BufWriter::new(file),
        }
    }
}

impl OutputSink for JsonlSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event).map_err(OutputError::Serialize)?;
        self.writer.write_all(b"\n").map_err(OutputError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(OutputError::Io)?;
        Ok(())
    }
}
