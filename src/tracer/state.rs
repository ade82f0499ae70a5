use nix::unistd::Pid;

use super::decoder::SyscallDescriptor;

/// One live process under supervision.
///
/// Lifecycle: Attached -> Running -> StoppedAtSyscallEntry ->
/// StoppedAtSyscallExit -> Running -> ... -> Exited. The entry/exit
/// alternation is tracked by `phase`; `exit_status` is set once and the
/// entry is dropped as soon as the status has been consumed.
#[derive(Debug)]
pub struct ProcessState {
    pub pid: Pid,
    /// Tree navigation only; the parent does not own the child entry.
    pub parent: Option<Pid>,
    pub phase: SyscallPhase,
    pub current_syscall: Option<SyscallDescriptor>,
    /// Undo records for argument rewrites applied at syscall-entry.
    pub rewrites: Vec<RewriteRecord>,
    /// The first stop of a freshly registered child is the trap that
    /// made it visible; it must not be re-injected as a real signal.
    pub initial_stop_pending: bool,
    pub exit_status: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallPhase {
    Enter,
    Exit,
}

/// How one path argument was rewritten, and what restores it at
/// syscall-exit so the program never observes the translation.
#[derive(Debug, Clone)]
pub enum RewriteRecord {
    /// The redirected path fit over the original string.
    InPlace { addr: u64, original: Vec<u8> },
    /// The redirected path was staged in scratch space and the argument
    /// register repointed.
    Staged { slot: usize, original_arg: u64 },
}

impl ProcessState {
    pub fn root(pid: Pid) -> Self {
        Self {
            pid,
            parent: None,
            phase: SyscallPhase::Enter,
            current_syscall: None,
            rewrites: Vec::new(),
            initial_stop_pending: false,
            exit_status: None,
        }
    }

    pub fn child(pid: Pid, parent: Option<Pid>) -> Self {
        Self {
            pid,
            parent,
            phase: SyscallPhase::Enter,
            current_syscall: None,
            rewrites: Vec::new(),
            initial_stop_pending: true,
            exit_status: None,
        }
    }
}
