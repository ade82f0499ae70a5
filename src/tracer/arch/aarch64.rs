use super::Architecture;
use crate::error::{Result, TracerError};
use crate::tracer::syscalls::{spec, Shape, SyscallSpec, AT1, AT1_AT3, LINK_AT2, P0};
use nix::unistd::Pid;

#[derive(Debug, Clone, Default)]
pub struct UserRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl UserRegs {
    pub fn x(&self, n: usize) -> u64 {
        if n < 31 {
            self.regs[n]
        } else {
            0
        }
    }

    pub fn set_x(&mut self, n: usize, val: u64) {
        if n < 31 {
            self.regs[n] = val;
        }
    }
}

pub struct Aarch64Arch;

impl Aarch64Arch {
    pub fn new() -> Self {
        Self
    }
}

impl Architecture for Aarch64Arch {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn syscall_number(&self, regs: &super::RawRegisters) -> u64 {
        match regs {
            super::RawRegisters::Aarch64(r) => r.x(8),
        }
    }

    fn syscall_args(&self, regs: &super::RawRegisters) -> [u64; 6] {
        match regs {
            super::RawRegisters::Aarch64(r) => [r.x(0), r.x(1), r.x(2), r.x(3), r.x(4), r.x(5)],
        }
    }

    fn return_value(&self, regs: &super::RawRegisters) -> i64 {
        match regs {
            super::RawRegisters::Aarch64(r) => r.x(0) as i64,
        }
    }

    fn stack_pointer(&self, regs: &super::RawRegisters) -> u64 {
        match regs {
            super::RawRegisters::Aarch64(r) => r.sp,
        }
    }

    fn set_syscall_arg(&self, regs: &mut super::RawRegisters, index: usize, value: u64) {
        let super::RawRegisters::Aarch64(r) = regs;
        if index < 6 {
            r.set_x(index, value);
        }
    }

    fn syscall_spec(&self, nr: u64) -> Option<&'static SyscallSpec> {
        SYSCALL_TABLE.get(&nr)
    }

    fn return_value_is_arg0(&self) -> bool {
        true
    }
}

pub fn read_registers(pid: Pid) -> Result<UserRegs> {
    use std::mem;

    let mut regs: libc::user_pt_regs = unsafe { mem::zeroed() };

    let iov = libc::iovec {
        iov_base: &mut regs as *mut _ as *mut libc::c_void,
        iov_len: mem::size_of::<libc::user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid.as_raw(),
            libc::NT_PRSTATUS as *mut libc::c_void,
            &iov as *const _,
        )
    };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    let mut user_regs = UserRegs {
        regs: [0; 31],
        sp: regs.sp,
        pc: regs.pc,
        pstate: regs.pstate,
    };
    user_regs.regs.copy_from_slice(&regs.regs[..31]);

    Ok(user_regs)
}

pub fn write_registers(pid: Pid, regs: &UserRegs) -> Result<()> {
    let libc_regs = libc::user_pt_regs {
        regs: regs.regs,
        sp: regs.sp,
        pc: regs.pc,
        pstate: regs.pstate,
    };

    let iov = libc::iovec {
        iov_base: &libc_regs as *const _ as *mut libc::c_void,
        iov_len: std::mem::size_of::<libc::user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGSET,
            pid.as_raw(),
            libc::NT_PRSTATUS as *mut libc::c_void,
            &iov as *const _,
        )
    };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    Ok(())
}

use std::collections::HashMap;
use std::sync::LazyLock;

static SYSCALL_TABLE: LazyLock<HashMap<u64, SyscallSpec>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // aarch64 has no legacy non-at filesystem calls.
    m.insert(33, spec("mknodat", Shape::Path(AT1)));
    m.insert(34, spec("mkdirat", Shape::Path(AT1)));
    m.insert(35, spec("unlinkat", Shape::Path(AT1)));
    m.insert(36, spec("symlinkat", Shape::Path(LINK_AT2)));
    m.insert(37, spec("linkat", Shape::Path(AT1_AT3)));
    m.insert(38, spec("renameat", Shape::Path(AT1_AT3)));
    m.insert(43, spec("statfs", Shape::Path(P0)));
    m.insert(45, spec("truncate", Shape::Path(P0)));
    m.insert(48, spec("faccessat", Shape::Path(AT1)));
    m.insert(49, spec("chdir", Shape::Path(P0)));
    m.insert(51, spec("chroot", Shape::Path(P0)));
    m.insert(53, spec("fchmodat", Shape::Path(AT1)));
    m.insert(54, spec("fchownat", Shape::Path(AT1)));
    m.insert(56, spec("openat", Shape::Path(AT1)));
    m.insert(78, spec("readlinkat", Shape::Path(AT1)));
    m.insert(79, spec("newfstatat", Shape::Path(AT1)));
    m.insert(88, spec("utimensat", Shape::Path(AT1)));
    m.insert(264, spec("name_to_handle_at", Shape::Path(AT1)));
    m.insert(276, spec("renameat2", Shape::Path(AT1_AT3)));
    m.insert(291, spec("statx", Shape::Path(AT1)));
    m.insert(437, spec("openat2", Shape::Path(AT1)));
    m.insert(439, spec("faccessat2", Shape::Path(AT1)));

    // Process lifecycle.
    m.insert(220, spec("clone", Shape::Spawn));
    m.insert(435, spec("clone3", Shape::Spawn));
    m.insert(221, spec("execve", Shape::Exec(P0)));
    m.insert(281, spec("execveat", Shape::Exec(AT1)));
    m.insert(93, spec("exit", Shape::Exit));
    m.insert(94, spec("exit_group", Shape::Exit));

    // Common calls kept for readable trace output.
    m.insert(17, spec("getcwd", Shape::Plain));
    m.insert(23, spec("dup", Shape::Plain));
    m.insert(24, spec("dup3", Shape::Plain));
    m.insert(25, spec("fcntl", Shape::Plain));
    m.insert(29, spec("ioctl", Shape::Plain));
    m.insert(50, spec("fchdir", Shape::Plain));
    m.insert(52, spec("fchmod", Shape::Plain));
    m.insert(55, spec("fchown", Shape::Plain));
    m.insert(57, spec("close", Shape::Plain));
    m.insert(59, spec("pipe2", Shape::Plain));
    m.insert(61, spec("getdents64", Shape::Plain));
    m.insert(62, spec("lseek", Shape::Plain));
    m.insert(63, spec("read", Shape::Plain));
    m.insert(64, spec("write", Shape::Plain));
    m.insert(66, spec("writev", Shape::Plain));
    m.insert(80, spec("fstat", Shape::Plain));
    m.insert(96, spec("set_tid_address", Shape::Plain));
    m.insert(98, spec("futex", Shape::Plain));
    m.insert(99, spec("set_robust_list", Shape::Plain));
    m.insert(113, spec("clock_gettime", Shape::Plain));
    m.insert(115, spec("clock_nanosleep", Shape::Plain));
    m.insert(124, spec("sched_yield", Shape::Plain));
    m.insert(129, spec("kill", Shape::Plain));
    m.insert(134, spec("rt_sigaction", Shape::Plain));
    m.insert(135, spec("rt_sigprocmask", Shape::Plain));
    m.insert(160, spec("uname", Shape::Plain));
    m.insert(166, spec("umask", Shape::Plain));
    m.insert(172, spec("getpid", Shape::Plain));
    m.insert(173, spec("getppid", Shape::Plain));
    m.insert(174, spec("getuid", Shape::Plain));
    m.insert(175, spec("geteuid", Shape::Plain));
    m.insert(176, spec("getgid", Shape::Plain));
    m.insert(177, spec("getegid", Shape::Plain));
    m.insert(178, spec("gettid", Shape::Plain));
    m.insert(198, spec("socket", Shape::Plain));
    m.insert(203, spec("connect", Shape::Plain));
    m.insert(214, spec("brk", Shape::Plain));
    m.insert(215, spec("munmap", Shape::Plain));
    m.insert(222, spec("mmap", Shape::Plain));
    m.insert(226, spec("mprotect", Shape::Plain));
    m.insert(233, spec("madvise", Shape::Plain));
    m.insert(260, spec("wait4", Shape::Plain));
    m.insert(261, spec("prlimit64", Shape::Plain));
    m.insert(278, spec("getrandom", Shape::Plain));
    m.insert(279, spec("memfd_create", Shape::Plain));
    m.insert(293, spec("rseq", Shape::Plain));
    m
});
