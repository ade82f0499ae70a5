use crate::classify::{self, Action};
use crate::error::{MirrorError, Result, TracerError};
use crate::event::{
    ClassifiedPath, PathEvent, ProcessEvent, RemoteEvent, SessionSummary, SyscallEvent,
    TraceEvent,
};
use crate::mirror::Mirror;
use crate::output::OutputManager;
use crate::session::{Mode, Session};
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub mod arch;
pub mod decoder;
pub mod memory;
pub mod state;
pub mod syscalls;

use arch::{Architecture, RawRegisters};
use decoder::{CallKind, PathArg, SyscallDescriptor, PATH_MAX};
use state::{ProcessState, RewriteRecord, SyscallPhase};

/// Bytes left untouched below the tracee's stack pointer before the
/// scratch area used for staged path rewrites.
const STAGING_REDZONE: u64 = 128;

/// Boundary to a cooperating remote tracer. The core signals the
/// handoff; it never implements any network protocol itself.
pub trait RemoteDelegate: Send {
    fn delegate(&mut self, pid: Pid, command: &[String]);
}

/// Default delegate: records the handoff, starts nothing.
pub struct LoggingDelegate;

impl RemoteDelegate for LoggingDelegate {
    fn delegate(&mut self, pid: Pid, command: &[String]) {
        log::info!(
            "pid {pid}: remote login detected, delegating capture to remote side: {}",
            command.join(" ")
        );
    }
}

pub struct Tracer {
    session: Session,
    command: Vec<String>,
    output: OutputManager,
    mirror: Mirror,
    processes: HashMap<Pid, ProcessState>,
    architecture: Box<dyn Architecture>,
    root: Option<Pid>,
    start_time: Instant,
    stats: SessionStats,
    shutdown: Arc<AtomicBool>,
    interrupted: bool,
    delegate: Box<dyn RemoteDelegate>,
}

#[derive(Debug, Default)]
struct SessionStats {
    syscalls_classified: u64,
    paths_mirrored: u64,
    paths_redirected: u64,
    process_count: u64,
}

impl Tracer {
    pub fn new(
        session: Session,
        command: Vec<String>,
        output: OutputManager,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let architecture = arch::detect_architecture()?;
        let mirror = Mirror::new(session.layout.clone());

        Ok(Self {
            session,
            command,
            output,
            mirror,
            processes: HashMap::new(),
            architecture,
            root: None,
            start_time: Instant::now(),
            stats: SessionStats::default(),
            shutdown,
            interrupted: false,
            delegate: Box::new(LoggingDelegate),
        })
    }

    #[allow(dead_code)]
    pub fn with_delegate(mut self, delegate: Box<dyn RemoteDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn run(&mut self) -> Result<i32> {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => self.run_child(),
            Ok(ForkResult::Parent { child }) => self.run_tracer(child),
            Err(e) => Err(TracerError::Attach(e).into()),
        }
    }

    fn run_child(&self) -> ! {
        if let Err(e) = ptrace::traceme() {
            eprintln!("packtrace: ptrace traceme failed: {e}");
            std::process::exit(127);
        }
        // Hand control to the tracer before the program image is replaced.
        if let Err(e) = signal::raise(Signal::SIGSTOP) {
            eprintln!("packtrace: could not stop for tracer: {e}");
            std::process::exit(127);
        }

        let cmd = &self.command[0];
        let args: Vec<&str> = self.command[1..].iter().map(|s| s.as_str()).collect();

        let err = Command::new(cmd).args(&args).exec();
        eprintln!("packtrace: failed to execute {cmd}: {err}");
        std::process::exit(127);
    }

    fn run_tracer(&mut self, child: Pid) -> Result<i32> {
        match waitpid(child, None).map_err(TracerError::Attach)? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                log::debug!("root {child} stopped, setting ptrace options");
            }
            _ => {
                return Err(TracerError::Attach(Errno::EINVAL).into());
            }
        }

        let options = ptrace::Options::PTRACE_O_TRACESYSGOOD
            | ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_TRACEVFORK
            | ptrace::Options::PTRACE_O_TRACECLONE
            | ptrace::Options::PTRACE_O_TRACEEXEC;
        ptrace::setoptions(child, options).map_err(TracerError::Attach)?;

        self.processes.insert(child, ProcessState::root(child));
        self.root = Some(child);
        self.stats.process_count = 1;
        self.output.emit(&TraceEvent::Process(ProcessEvent::Attached {
            timestamp: Utc::now(),
            pid: child.as_raw(),
        }))?;

        ptrace::syscall(child, None).map_err(TracerError::Attach)?;

        let result = self.trace_loop();

        let exit_code = *result.as_ref().unwrap_or(&-1);
        self.emit_summary(exit_code);

        result
    }

    fn trace_loop(&mut self) -> Result<i32> {
        let mut exit_code = 0;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                self.cancel_session();
                return Ok(128 + Signal::SIGINT as i32);
            }

            let status = match waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)) {
                Ok(s) => s,
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(TracerError::Wait(e).into()),
            };

            match status {
                WaitStatus::PtraceSyscall(pid) => {
                    self.handle_syscall_stop(pid)?;
                }
                WaitStatus::PtraceEvent(pid, _, event) => {
                    self.handle_ptrace_event(pid, event)?;
                }
                WaitStatus::Stopped(pid, sig) => {
                    self.handle_signal_stop(pid, sig)?;
                }
                WaitStatus::Exited(pid, code) => {
                    self.handle_exit(pid, code)?;
                    if self.root == Some(pid) {
                        exit_code = code;
                    }
                    if self.processes.is_empty() {
                        break;
                    }
                }
                WaitStatus::Signaled(pid, sig, _) => {
                    self.handle_signaled(pid, sig)?;
                    if self.root == Some(pid) {
                        exit_code = 128 + sig as i32;
                    }
                    if self.processes.is_empty() {
                        break;
                    }
                }
                _ => {}
            }
        }

        Ok(exit_code)
    }

    fn handle_syscall_stop(&mut self, pid: Pid) -> Result<()> {
        if !self.processes.contains_key(&pid) {
            self.register_stray(pid)?;
        }

        let phase = self
            .processes
            .get(&pid)
            .map(|s| s.phase)
            .ok_or(TracerError::ProcessNotFound(pid.as_raw()))?;

        match phase {
            SyscallPhase::Enter => self.on_syscall_entry(pid)?,
            SyscallPhase::Exit => self.on_syscall_exit(pid)?,
        }

        self.resume(pid, None)
    }

    /// Entry handling completes, including any path rewrite, before the
    /// syscall is allowed to execute.
    fn on_syscall_entry(&mut self, pid: Pid) -> Result<()> {
        let regs = match arch::read_registers(pid) {
            Ok(regs) => regs,
            Err(err) => {
                // The syscall proceeds untranslated.
                log::warn!("pid {pid}: cannot read registers at entry: {err}");
                self.set_phase(pid, SyscallPhase::Exit)?;
                return Ok(());
            }
        };

        let desc = decoder::decode(self.architecture.as_ref(), pid, &regs);

        match desc.kind {
            CallKind::Exec => self.handle_exec_entry(pid, &regs, &desc)?,
            CallKind::Path => self.handle_path_syscall(pid, &regs, &desc)?,
            CallKind::Spawn | CallKind::Exit | CallKind::Plain => {}
        }

        let state = self
            .processes
            .get_mut(&pid)
            .ok_or(TracerError::ProcessNotFound(pid.as_raw()))?;
        state.current_syscall = Some(desc);
        state.phase = SyscallPhase::Exit;
        Ok(())
    }

    /// Exit handling undoes entry rewrites before the process resumes,
    /// so the program never observes a translated argument.
    fn on_syscall_exit(&mut self, pid: Pid) -> Result<()> {
        let state = self
            .processes
            .get_mut(&pid)
            .ok_or(TracerError::ProcessNotFound(pid.as_raw()))?;
        let rewrites = std::mem::take(&mut state.rewrites);
        state.current_syscall = None;
        state.phase = SyscallPhase::Enter;

        if rewrites.is_empty() {
            return Ok(());
        }

        let mut regs = match arch::read_registers(pid) {
            Ok(regs) => regs,
            Err(err) => {
                log::warn!("pid {pid}: cannot restore arguments after syscall: {err}");
                return Ok(());
            }
        };

        let mut regs_dirty = false;
        for record in rewrites {
            match record {
                RewriteRecord::InPlace { addr, original } => {
                    if let Err(err) = memory::write_memory(pid, addr, &original) {
                        log::warn!("pid {pid}: could not restore path bytes at {addr:#x}: {err}");
                    }
                }
                RewriteRecord::Staged { slot, original_arg } => {
                    // On architectures where arg0 doubles as the return
                    // register the restore would clobber the result.
                    if slot == 0 && self.architecture.return_value_is_arg0() {
                        continue;
                    }
                    self.architecture.set_syscall_arg(&mut regs, slot, original_arg);
                    regs_dirty = true;
                }
            }
        }
        if regs_dirty {
            if let Err(err) = arch::write_registers(pid, &regs) {
                log::warn!("pid {pid}: could not restore argument registers: {err}");
            }
        }
        Ok(())
    }

    fn handle_exec_entry(
        &mut self,
        pid: Pid,
        regs: &RawRegisters,
        desc: &SyscallDescriptor,
    ) -> Result<()> {
        if self.session.follow_ssh {
            if let Some(program) = desc.paths.first() {
                if is_remote_login(&program.path) {
                    let argv = decoder::read_argv(pid, desc.args[program.slot + 1]);
                    self.delegate.delegate(pid, &argv);
                    self.output.emit(&TraceEvent::Remote(RemoteEvent {
                        timestamp: Utc::now(),
                        pid: pid.as_raw(),
                        command: argv,
                    }))?;
                }
            }
        }

        // The program image is a dependency like any other path argument.
        self.handle_path_syscall(pid, regs, desc)
    }

    fn handle_path_syscall(
        &mut self,
        pid: Pid,
        regs: &RawRegisters,
        desc: &SyscallDescriptor,
    ) -> Result<()> {
        let mut classified = Vec::with_capacity(desc.paths.len());
        let mut new_regs = regs.clone();
        let mut rewrites = Vec::new();
        let mut staged_events = Vec::new();
        let mut regs_dirty = false;

        for parg in &desc.paths {
            let action = classify::classify(&self.session, &parg.path);
            classified.push(ClassifiedPath {
                path: parg.path.display().to_string(),
                action: action.kind(),
            });

            match action {
                Action::Mirror => self.mirror_dependency(&parg.path)?,
                Action::Redirect(new_path) => {
                    match self.rewrite_path_arg(pid, &mut new_regs, parg, &new_path) {
                        Ok(Some(record)) => {
                            let staged = matches!(record, RewriteRecord::Staged { .. });
                            regs_dirty |= staged;
                            let event = PathEvent::Redirected {
                                timestamp: Utc::now(),
                                pid: pid.as_raw(),
                                original: parg.path.display().to_string(),
                                redirected: new_path.display().to_string(),
                                staged,
                            };
                            if staged {
                                staged_events.push(event);
                            } else {
                                self.stats.paths_redirected += 1;
                                if self.wants_detail() {
                                    self.output.emit(&TraceEvent::Path(event))?;
                                }
                            }
                            rewrites.push(record);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            // Single-syscall fault: proceed untranslated.
                            log::warn!(
                                "pid {pid}: could not redirect {}: {err}",
                                parg.path.display()
                            );
                        }
                    }
                }
                Action::Ignore | Action::PassThrough => {}
            }
        }

        if regs_dirty {
            match arch::write_registers(pid, &new_regs) {
                Ok(()) => {
                    for event in staged_events {
                        self.stats.paths_redirected += 1;
                        if self.wants_detail() {
                            self.output.emit(&TraceEvent::Path(event))?;
                        }
                    }
                }
                Err(err) => {
                    log::warn!(
                        "pid {pid}: register write failed, syscall proceeds untranslated: {err}"
                    );
                    // In-place string rewrites already landed and still
                    // need their undo records; staged ones never took.
                    rewrites.retain(|r| matches!(r, RewriteRecord::InPlace { .. }));
                }
            }
        }

        if !desc.paths.is_empty() {
            self.stats.syscalls_classified += 1;
            if self.wants_detail() {
                self.output.emit(&TraceEvent::Syscall(SyscallEvent {
                    timestamp: Utc::now(),
                    pid: pid.as_raw(),
                    syscall: desc.name.unwrap_or("unknown").to_string(),
                    syscall_nr: desc.number,
                    paths: classified,
                }))?;
            }
        }

        if !rewrites.is_empty() {
            let state = self
                .processes
                .get_mut(&pid)
                .ok_or(TracerError::ProcessNotFound(pid.as_raw()))?;
            state.rewrites = rewrites;
        }
        Ok(())
    }

    fn rewrite_path_arg(
        &self,
        pid: Pid,
        regs: &mut RawRegisters,
        parg: &PathArg,
        new_path: &Path,
    ) -> Result<Option<RewriteRecord>> {
        let Some(new_str) = new_path.to_str() else {
            return Ok(None);
        };

        if new_str.len() <= parg.raw.len() {
            // Fits over the original string, NUL included.
            memory::write_string(pid, parg.addr, new_str)?;
            let mut original = parg.raw.clone().into_bytes();
            original.push(0);
            Ok(Some(RewriteRecord::InPlace {
                addr: parg.addr,
                original,
            }))
        } else {
            // The redirected form is longer, which is the common case:
            // the package-root prefix is prepended. Never overwrite in
            // place; stage below the stack and repoint the register.
            let sp = self.architecture.stack_pointer(regs);
            let scratch = sp
                .wrapping_sub(STAGING_REDZONE)
                .wrapping_sub((parg.slot as u64 + 1) * PATH_MAX as u64);
            memory::write_string(pid, scratch, new_str)?;
            let original_arg = parg.addr;
            self.architecture.set_syscall_arg(regs, parg.slot, scratch);
            Ok(Some(RewriteRecord::Staged {
                slot: parg.slot,
                original_arg,
            }))
        }
    }

    fn mirror_dependency(&mut self, path: &Path) -> Result<()> {
        match self.mirror.mirror(path) {
            Ok(copied) => {
                for entry in &copied {
                    self.stats.paths_mirrored += 1;
                    if self.wants_detail() {
                        self.output.emit(&TraceEvent::Path(PathEvent::Mirrored {
                            timestamp: Utc::now(),
                            source: entry.source.display().to_string(),
                            dest: entry.dest.display().to_string(),
                        }))?;
                    }
                }
            }
            Err(err @ MirrorError::SourceUnreadable { .. }) => {
                // Best-effort capture: the audited syscall proceeds
                // normally even when the dependency cannot be copied.
                log::debug!("mirror skipped: {err}");
                if self.wants_detail() {
                    self.output.emit(&TraceEvent::Path(PathEvent::MirrorSkipped {
                        timestamp: Utc::now(),
                        source: path.display().to_string(),
                        reason: err.to_string(),
                    }))?;
                }
            }
            Err(err) => {
                log::warn!("mirror failed: {err}");
            }
        }
        Ok(())
    }

    fn handle_ptrace_event(&mut self, pid: Pid, event: i32) -> Result<()> {
        match event {
            libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK | libc::PTRACE_EVENT_CLONE => {
                let child_raw = ptrace::getevent(pid).map_err(TracerError::Ptrace)?;
                let child = Pid::from_raw(child_raw as i32);

                // Registration happens before the child's first observed
                // stop; a stray stop that beat this event is also handled.
                if !self.processes.contains_key(&child) {
                    self.processes.insert(child, ProcessState::child(child, Some(pid)));
                    self.stats.process_count += 1;
                    self.output.emit(&TraceEvent::Process(ProcessEvent::Spawned {
                        timestamp: Utc::now(),
                        parent_pid: Some(pid.as_raw()),
                        child_pid: child.as_raw(),
                    }))?;
                }
            }
            libc::PTRACE_EVENT_EXEC => {
                // The old image is gone; pending undo records point into
                // an address space that no longer exists.
                if let Some(state) = self.processes.get_mut(&pid) {
                    state.rewrites.clear();
                }
                let path = std::fs::read_link(format!("/proc/{}/exe", pid.as_raw()))
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "?".to_string());
                self.output.emit(&TraceEvent::Process(ProcessEvent::Exec {
                    timestamp: Utc::now(),
                    pid: pid.as_raw(),
                    path,
                }))?;
            }
            _ => {}
        }

        self.resume(pid, None)
    }

    fn handle_signal_stop(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        if !self.processes.contains_key(&pid) {
            self.register_stray(pid)?;
        }

        let state = self
            .processes
            .get_mut(&pid)
            .ok_or(TracerError::ProcessNotFound(pid.as_raw()))?;

        // The trap that made a new child visible is not a real signal.
        let suppress =
            state.initial_stop_pending && matches!(signal, Signal::SIGSTOP | Signal::SIGTRAP);
        state.initial_stop_pending = false;

        let inject = if suppress { None } else { Some(signal) };
        self.resume(pid, inject)
    }

    fn register_stray(&mut self, pid: Pid) -> Result<()> {
        log::debug!("pid {pid}: stopped before its creation event, registering");
        self.processes.insert(pid, ProcessState::child(pid, None));
        self.stats.process_count += 1;
        self.output.emit(&TraceEvent::Process(ProcessEvent::Spawned {
            timestamp: Utc::now(),
            parent_pid: None,
            child_pid: pid.as_raw(),
        }))
    }

    /// The status is recorded once, folded into the session exit code
    /// by the caller, and the entry dropped: tracking ends here.
    fn handle_exit(&mut self, pid: Pid, code: i32) -> Result<()> {
        if let Some(mut state) = self.processes.remove(&pid) {
            state.exit_status = Some(code);
            if let Some(parent) = state.parent {
                log::debug!("pid {pid} (child of {parent}) exited with status {code}");
            }
        }

        self.output.emit(&TraceEvent::Process(ProcessEvent::Exited {
            timestamp: Utc::now(),
            pid: pid.as_raw(),
            exit_code: code,
        }))
    }

    fn handle_signaled(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        self.processes.remove(&pid);

        self.output.emit(&TraceEvent::Process(ProcessEvent::Signaled {
            timestamp: Utc::now(),
            pid: pid.as_raw(),
            signal: format!("{signal:?}"),
        }))
    }

    /// Per-syscall and per-path events exist for the verbose flag and
    /// for a machine-readable sink; nobody else pays for building them.
    fn wants_detail(&self) -> bool {
        self.session.verbose || self.output.wants_detail()
    }

    fn resume(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        match ptrace::syscall(pid, signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                // Died between stop and resume; waitpid reports it next.
                log::debug!("pid {pid}: vanished before resume");
                Ok(())
            }
            Err(e) => Err(TracerError::Ptrace(e).into()),
        }
    }

    fn set_phase(&mut self, pid: Pid, phase: SyscallPhase) -> Result<()> {
        let state = self
            .processes
            .get_mut(&pid)
            .ok_or(TracerError::ProcessNotFound(pid.as_raw()))?;
        state.phase = phase;
        Ok(())
    }

    /// Interrupted session: detach from every remaining tracee without
    /// further classification, leaving a partial capture behind.
    fn cancel_session(&mut self) {
        self.interrupted = true;
        for pid in self.processes.keys() {
            let _ = ptrace::detach(*pid, None);
        }
        self.processes.clear();

        if self.session.mode == Mode::Audit {
            if let Err(err) = self.session.layout.mark_incomplete() {
                log::warn!("could not mark package incomplete: {err}");
            }
        }
    }

    fn emit_summary(&mut self, exit_code: i32) {
        let summary = SessionSummary {
            timestamp: Utc::now(),
            mode: self.session.mode.as_str().to_string(),
            processes: self.stats.process_count,
            syscalls_classified: self.stats.syscalls_classified,
            paths_mirrored: self.stats.paths_mirrored,
            paths_redirected: self.stats.paths_redirected,
            duration_ms: self.start_time.elapsed().as_millis() as u64,
            exit_code,
            incomplete: self.interrupted,
        };

        let _ = self.output.emit(&TraceEvent::Summary(summary));
        let _ = self.output.flush();
    }
}

/// Outbound remote-login clients that trigger follow-ssh delegation.
fn is_remote_login(program: &Path) -> bool {
    matches!(
        program.file_name().and_then(|n| n.to_str()),
        Some("ssh" | "scp" | "sftp" | "rsh" | "slogin")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_login_detection_is_basename_based() {
        assert!(is_remote_login(Path::new("/usr/bin/ssh")));
        assert!(is_remote_login(Path::new("/usr/local/bin/scp")));
        assert!(!is_remote_login(Path::new("/usr/bin/sshd")));
        assert!(!is_remote_login(Path::new("/usr/bin/cat")));
    }
}
