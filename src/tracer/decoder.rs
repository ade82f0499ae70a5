//! Decodes a stopped tracee's registers into a typed syscall view.
//!
//! The decoder never fails: a syscall it cannot interpret, or a path
//! argument it cannot read, simply produces fewer decoded paths, and
//! the call goes through untranslated.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use super::arch::{Architecture, RawRegisters};
use super::memory::read_string;
use super::syscalls::{PathSlot, Shape};
use crate::classify::normalize_lexical;

pub const PATH_MAX: usize = 4096;

/// Longest argv the follow-ssh detector will read out of a tracee.
const ARGV_MAX: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Path,
    Spawn,
    Exec,
    Exit,
    Plain,
}

/// One decoded path argument.
#[derive(Debug, Clone)]
pub struct PathArg {
    /// Argument register index holding the path pointer.
    pub slot: usize,
    /// Pointer value in the tracee's address space.
    pub addr: u64,
    /// The string exactly as the tracee passed it.
    pub raw: String,
    /// Absolute, lexically normalized form.
    pub path: PathBuf,
}

/// Typed view of one syscall invocation. Created at syscall-entry,
/// discarded at syscall-exit.
#[derive(Debug, Clone)]
pub struct SyscallDescriptor {
    pub number: u64,
    pub name: Option<&'static str>,
    pub args: [u64; 6],
    pub kind: CallKind,
    pub paths: Vec<PathArg>,
}

pub fn decode(arch: &dyn Architecture, pid: Pid, regs: &RawRegisters) -> SyscallDescriptor {
    let number = arch.syscall_number(regs);
    let args = arch.syscall_args(regs);

    let Some(spec) = arch.syscall_spec(number) else {
        // Unknown syscall: zero path arguments, never blocks the call.
        return SyscallDescriptor {
            number,
            name: None,
            args,
            kind: CallKind::Plain,
            paths: Vec::new(),
        };
    };

    let (kind, slots): (CallKind, &[PathSlot]) = match spec.shape {
        Shape::Path(slots) => (CallKind::Path, slots),
        Shape::Exec(slots) => (CallKind::Exec, slots),
        Shape::Spawn => (CallKind::Spawn, &[]),
        Shape::Exit => (CallKind::Exit, &[]),
        Shape::Plain => (CallKind::Plain, &[]),
    };

    SyscallDescriptor {
        number,
        name: Some(spec.name),
        args,
        kind,
        paths: decode_paths(pid, &args, slots),
    }
}

fn decode_paths(pid: Pid, args: &[u64; 6], slots: &[PathSlot]) -> Vec<PathArg> {
    let mut paths = Vec::with_capacity(slots.len());
    for slot in slots {
        let addr = args[slot.arg];
        if addr == 0 {
            continue;
        }
        let raw = match read_string(pid, addr, PATH_MAX) {
            Ok(s) => s,
            Err(err) => {
                log::debug!("pid {pid}: path argument unreadable: {err}");
                continue;
            }
        };
        if raw.is_empty() {
            continue;
        }
        let dirfd = slot.dirfd.map(|idx| args[idx] as i64);
        let path = resolve(pid, dirfd, &raw);
        paths.push(PathArg {
            slot: slot.arg,
            addr,
            raw,
            path,
        });
    }
    paths
}

/// Resolve one path argument to an absolute path.
///
/// Relative paths resolve against the tracee's cwd, or against the
/// directory behind `dirfd` for the `*at` family. If the base cannot be
/// recovered from /proc the path stays relative and the classifier
/// leaves it alone.
fn resolve(pid: Pid, dirfd: Option<i64>, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        return normalize_lexical(path);
    }

    let base = match dirfd {
        Some(fd) if fd != libc::AT_FDCWD as i64 => {
            std::fs::read_link(format!("/proc/{}/fd/{}", pid.as_raw(), fd)).ok()
        }
        _ => tracee_cwd(pid),
    };

    match base {
        Some(base) => normalize_lexical(&base.join(path)),
        None => path.to_path_buf(),
    }
}

pub fn tracee_cwd(pid: Pid) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{}/cwd", pid.as_raw())).ok()
}

/// Read a NULL-terminated pointer array of strings (execve argv).
pub fn read_argv(pid: Pid, addr: u64) -> Vec<String> {
    let mut argv = Vec::new();
    if addr == 0 {
        return argv;
    }
    for i in 0..ARGV_MAX as u64 {
        let slot = addr + i * std::mem::size_of::<u64>() as u64;
        let ptr = match nix::sys::ptrace::read(pid, slot as *mut libc::c_void) {
            Ok(p) => p as u64,
            Err(_) => break,
        };
        if ptr == 0 {
            break;
        }
        match read_string(pid, ptr, PATH_MAX) {
            Ok(s) => argv.push(s),
            Err(_) => break,
        }
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_normalized_without_proc() {
        // pid is irrelevant for absolute paths; no /proc access happens.
        let got = resolve(Pid::from_raw(1), None, "/usr/./lib/../bin/env");
        assert_eq!(got, PathBuf::from("/usr/bin/env"));
    }

    #[test]
    fn own_cwd_resolves_relative_paths() {
        let pid = nix::unistd::getpid();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(tracee_cwd(pid), Some(cwd.clone()));
        assert_eq!(resolve(pid, None, "data/input.txt"), cwd.join("data/input.txt"));
        assert_eq!(
            resolve(pid, Some(libc::AT_FDCWD as i64), "x.txt"),
            cwd.join("x.txt")
        );
    }
}
