use crate::error::Result;
use crate::event::TraceEvent;
use std::path::Path;

pub mod jsonl;
pub mod terminal;

pub trait OutputSink: Send {
    fn emit(&mut self, event: &TraceEvent) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Fans trace events out to the configured sinks. The tracee owns
/// stdout, so human-readable output goes to stderr and machine-readable
/// JSONL only to a file the user asked for.
pub struct OutputManager {
    sinks: Vec<Box<dyn OutputSink>>,
    detail: bool,
}

impl OutputManager {
    pub fn new(jsonl_path: Option<&Path>, verbose: bool, no_color: bool) -> Result<Self> {
        let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();
        let has_jsonl = jsonl_path.is_some();

        if let Some(path) = jsonl_path {
            let file = std::fs::File::create(path)?;
            sinks.push(Box::new(jsonl::JsonlSink::new(file)));
        }

        sinks.push(Box::new(terminal::TerminalSink::new(verbose, no_color)));

        Ok(Self {
            sinks,
            detail: has_jsonl,
        })
    }

    /// Whether a machine-readable sink consumes the full event stream
    /// regardless of the session's verbose flag.
    pub fn wants_detail(&self) -> bool {
        self.detail
    }

    pub fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        for sink in &mut self.sinks {
            sink.emit(event)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}
