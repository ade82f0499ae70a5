use std::io::{self, Write};

use colored::Colorize;

use crate::error::Result;
use crate::event::*;

use super::OutputSink;

/// Colored human-readable sink. Writes to stderr: the traced program
/// owns stdout.
pub struct TerminalSink {
    verbose: bool,
}

impl TerminalSink {
    pub fn new(verbose: bool, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { verbose }
    }

    fn format_syscall(&self, event: &SyscallEvent) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let pid = format!("[{}]", event.pid).dimmed().to_string();
        let syscall = event.syscall.cyan().to_string();
        let paths: Vec<String> = event
            .paths
            .iter()
            .map(|p| format!("{} ({})", p.path, p.action))
            .collect();
        format!("{ts} {pid} {syscall} {}", paths.join(", "))
    }

    fn format_path(&self, event: &PathEvent) -> String {
        match event {
            PathEvent::Mirrored { timestamp, source, dest } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                format!("{ts} {} {source} -> {dest}", "MIRROR".green().bold())
            }
            PathEvent::MirrorSkipped { timestamp, source, reason } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                format!("{ts} {} {source}: {reason}", "SKIP".yellow())
            }
            PathEvent::Redirected { timestamp, pid, original, redirected, staged } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                let pid = format!("[{pid}]").dimmed().to_string();
                let mark = if *staged { " (staged)" } else { "" };
                format!(
                    "{ts} {} {pid} {original} -> {redirected}{mark}",
                    "REDIR".cyan().bold()
                )
            }
        }
    }

    fn format_process(&self, event: &ProcessEvent) -> String {
        match event {
            ProcessEvent::Attached { timestamp, pid } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                format!("{ts} {} pid {pid}", "ATTACH".green())
            }
            ProcessEvent::Spawned { timestamp, parent_pid, child_pid } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                let parent = parent_pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "?".to_string());
                format!("{ts} {} {parent} -> {child_pid}", "SPAWN".green())
            }
            ProcessEvent::Exec { timestamp, pid, path } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                let pid = format!("[{pid}]").dimmed().to_string();
                format!("{ts} {} {pid} {path}", "EXEC".blue())
            }
            ProcessEvent::Exited { timestamp, pid, exit_code } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                let code = if *exit_code == 0 {
                    exit_code.to_string().green().to_string()
                } else {
                    exit_code.to_string().red().to_string()
                };
                format!("{ts} {} pid {pid} = {code}", "EXIT".blue())
            }
            ProcessEvent::Signaled { timestamp, pid, signal } => {
                let ts = timestamp.format("%H:%M:%S%.3f");
                format!("{ts} {} pid {pid} by {signal}", "KILLED".red().bold())
            }
        }
    }

    fn format_remote(&self, event: &RemoteEvent) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let pid = format!("[{}]", event.pid).dimmed().to_string();
        format!(
            "{ts} {} {pid} handing capture to remote side: {}",
            "DELEGATE".magenta().bold(),
            event.command.join(" ")
        )
    }

    fn format_summary(&self, s: &SessionSummary) -> String {
        let mut line = format!(
            "{} mode={} processes={} syscalls={} mirrored={} redirected={} duration={}ms exit={}",
            "SUMMARY".bold(),
            s.mode,
            s.processes,
            s.syscalls_classified,
            s.paths_mirrored,
            s.paths_redirected,
            s.duration_ms,
            s.exit_code
        );
        if s.incomplete {
            line.push_str(&format!(" {}", "INCOMPLETE".red().bold()));
        }
        line
    }
}

impl OutputSink for TerminalSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        let line = match event {
            TraceEvent::Syscall(e) if self.verbose => Some(self.format_syscall(e)),
            TraceEvent::Syscall(_) => None,
            TraceEvent::Path(e) if self.verbose => Some(self.format_path(e)),
            TraceEvent::Path(_) => None,
            TraceEvent::Process(e) if self.verbose => Some(self.format_process(e)),
            TraceEvent::Process(_) => None,
            TraceEvent::Remote(e) => Some(self.format_remote(e)),
            TraceEvent::Summary(s) => Some(self.format_summary(s)),
        };

        if let Some(line) = line {
            writeln!(io::stderr(), "{line}").map_err(crate::error::OutputError::Io)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        io::stderr().flush().map_err(crate::error::OutputError::Io)?;
        Ok(())
    }
}
