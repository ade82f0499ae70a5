use super::Architecture;
use crate::error::{Result, TracerError};
use crate::tracer::syscalls::{spec, Shape, SyscallSpec, AT1, AT1_AT3, LINK1, LINK_AT2, P0, P0_P1};
use nix::unistd::Pid;

#[derive(Debug, Clone, Default)]
pub struct UserRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

pub struct X86_64Arch;

impl X86_64Arch {
    pub fn new() -> Self {
        Self
    }
}

impl Architecture for X86_64Arch {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn syscall_number(&self, regs: &super::RawRegisters) -> u64 {
        match regs {
            super::RawRegisters::X86_64(r) => r.orig_rax,
        }
    }

    fn syscall_args(&self, regs: &super::RawRegisters) -> [u64; 6] {
        match regs {
            super::RawRegisters::X86_64(r) => [r.rdi, r.rsi, r.rdx, r.r10, r.r8, r.r9],
        }
    }

    fn return_value(&self, regs: &super::RawRegisters) -> i64 {
        match regs {
            super::RawRegisters::X86_64(r) => r.rax as i64,
        }
    }

    fn stack_pointer(&self, regs: &super::RawRegisters) -> u64 {
        match regs {
            super::RawRegisters::X86_64(r) => r.rsp,
        }
    }

    fn set_syscall_arg(&self, regs: &mut super::RawRegisters, index: usize, value: u64) {
        let super::RawRegisters::X86_64(r) = regs;
        match index {
            0 => r.rdi = value,
            1 => r.rsi = value,
            2 => r.rdx = value,
            3 => r.r10 = value,
            4 => r.r8 = value,
            5 => r.r9 = value,
            _ => {}
        }
    }

    fn syscall_spec(&self, nr: u64) -> Option<&'static SyscallSpec> {
        SYSCALL_TABLE.get(&nr)
    }
}

pub fn read_registers(pid: Pid) -> Result<UserRegs> {
    use std::mem;

    let mut regs: libc::user_regs_struct = unsafe { mem::zeroed() };

    let res = unsafe { libc::ptrace(libc::PTRACE_GETREGS, pid.as_raw(), 0, &mut regs as *mut _) };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    Ok(UserRegs {
        r15: regs.r15,
        r14: regs.r14,
        r13: regs.r13,
        r12: regs.r12,
        rbp: regs.rbp,
        rbx: regs.rbx,
        r11: regs.r11,
        r10: regs.r10,
        r9: regs.r9,
        r8: regs.r8,
        rax: regs.rax,
        rcx: regs.rcx,
        rdx: regs.rdx,
        rsi: regs.rsi,
        rdi: regs.rdi,
        orig_rax: regs.orig_rax,
        rip: regs.rip,
        cs: regs.cs,
        eflags: regs.eflags,
        rsp: regs.rsp,
        ss: regs.ss,
        fs_base: regs.fs_base,
        gs_base: regs.gs_base,
        ds: regs.ds,
        es: regs.es,
        fs: regs.fs,
        gs: regs.gs,
    })
}

pub fn write_registers(pid: Pid, regs: &UserRegs) -> Result<()> {
    let libc_regs = libc::user_regs_struct {
        r15: regs.r15,
        r14: regs.r14,
        r13: regs.r13,
        r12: regs.r12,
        rbp: regs.rbp,
        rbx: regs.rbx,
        r11: regs.r11,
        r10: regs.r10,
        r9: regs.r9,
        r8: regs.r8,
        rax: regs.rax,
        rcx: regs.rcx,
        rdx: regs.rdx,
        rsi: regs.rsi,
        rdi: regs.rdi,
        orig_rax: regs.orig_rax,
        rip: regs.rip,
        cs: regs.cs,
        eflags: regs.eflags,
        rsp: regs.rsp,
        ss: regs.ss,
        fs_base: regs.fs_base,
        gs_base: regs.gs_base,
        ds: regs.ds,
        es: regs.es,
        fs: regs.fs,
        gs: regs.gs,
    };

    let res =
        unsafe { libc::ptrace(libc::PTRACE_SETREGS, pid.as_raw(), 0, &libc_regs as *const _) };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    Ok(())
}

use std::collections::HashMap;
use std::sync::LazyLock;

static SYSCALL_TABLE: LazyLock<HashMap<u64, SyscallSpec>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // Path-bearing filesystem calls.
    m.insert(2, spec("open", Shape::Path(P0)));
    m.insert(4, spec("stat", Shape::Path(P0)));
    m.insert(6, spec("lstat", Shape::Path(P0)));
    m.insert(21, spec("access", Shape::Path(P0)));
    m.insert(76, spec("truncate", Shape::Path(P0)));
    m.insert(80, spec("chdir", Shape::Path(P0)));
    m.insert(82, spec("rename", Shape::Path(P0_P1)));
    m.insert(83, spec("mkdir", Shape::Path(P0)));
    m.insert(84, spec("rmdir", Shape::Path(P0)));
    m.insert(85, spec("creat", Shape::Path(P0)));
    m.insert(86, spec("link", Shape::Path(P0_P1)));
    m.insert(87, spec("unlink", Shape::Path(P0)));
    m.insert(88, spec("symlink", Shape::Path(LINK1)));
    m.insert(89, spec("readlink", Shape::Path(P0)));
    m.insert(90, spec("chmod", Shape::Path(P0)));
    m.insert(92, spec("chown", Shape::Path(P0)));
    m.insert(94, spec("lchown", Shape::Path(P0)));
    m.insert(132, spec("utime", Shape::Path(P0)));
    m.insert(133, spec("mknod", Shape::Path(P0)));
    m.insert(137, spec("statfs", Shape::Path(P0)));
    m.insert(161, spec("chroot", Shape::Path(P0)));
    m.insert(235, spec("utimes", Shape::Path(P0)));
    m.insert(257, spec("openat", Shape::Path(AT1)));
    m.insert(258, spec("mkdirat", Shape::Path(AT1)));
    m.insert(259, spec("mknodat", Shape::Path(AT1)));
    m.insert(260, spec("fchownat", Shape::Path(AT1)));
    m.insert(261, spec("futimesat", Shape::Path(AT1)));
    m.insert(262, spec("newfstatat", Shape::Path(AT1)));
    m.insert(263, spec("unlinkat", Shape::Path(AT1)));
    m.insert(264, spec("renameat", Shape::Path(AT1_AT3)));
    m.insert(265, spec("linkat", Shape::Path(AT1_AT3)));
    m.insert(266, spec("symlinkat", Shape::Path(LINK_AT2)));
    m.insert(267, spec("readlinkat", Shape::Path(AT1)));
    m.insert(268, spec("fchmodat", Shape::Path(AT1)));
    m.insert(269, spec("faccessat", Shape::Path(AT1)));
    m.insert(280, spec("utimensat", Shape::Path(AT1)));
    m.insert(303, spec("name_to_handle_at", Shape::Path(AT1)));
    m.insert(316, spec("renameat2", Shape::Path(AT1_AT3)));
    m.insert(332, spec("statx", Shape::Path(AT1)));
    m.insert(437, spec("openat2", Shape::Path(AT1)));
    m.insert(439, spec("faccessat2", Shape::Path(AT1)));

    // Process lifecycle.
    m.insert(56, spec("clone", Shape::Spawn));
    m.insert(57, spec("fork", Shape::Spawn));
    m.insert(58, spec("vfork", Shape::Spawn));
    m.insert(435, spec("clone3", Shape::Spawn));
    m.insert(59, spec("execve", Shape::Exec(P0)));
    m.insert(322, spec("execveat", Shape::Exec(AT1)));
    m.insert(60, spec("exit", Shape::Exit));
    m.insert(231, spec("exit_group", Shape::Exit));

    // Common calls kept for readable trace output.
    m.insert(0, spec("read", Shape::Plain));
    m.insert(1, spec("write", Shape::Plain));
    m.insert(3, spec("close", Shape::Plain));
    m.insert(5, spec("fstat", Shape::Plain));
    m.insert(8, spec("lseek", Shape::Plain));
    m.insert(9, spec("mmap", Shape::Plain));
    m.insert(10, spec("mprotect", Shape::Plain));
    m.insert(11, spec("munmap", Shape::Plain));
    m.insert(12, spec("brk", Shape::Plain));
    m.insert(13, spec("rt_sigaction", Shape::Plain));
    m.insert(14, spec("rt_sigprocmask", Shape::Plain));
    m.insert(16, spec("ioctl", Shape::Plain));
    m.insert(17, spec("pread64", Shape::Plain));
    m.insert(18, spec("pwrite64", Shape::Plain));
    m.insert(19, spec("readv", Shape::Plain));
    m.insert(20, spec("writev", Shape::Plain));
    m.insert(22, spec("pipe", Shape::Plain));
    m.insert(23, spec("select", Shape::Plain));
    m.insert(24, spec("sched_yield", Shape::Plain));
    m.insert(28, spec("madvise", Shape::Plain));
    m.insert(32, spec("dup", Shape::Plain));
    m.insert(33, spec("dup2", Shape::Plain));
    m.insert(39, spec("getpid", Shape::Plain));
    m.insert(41, spec("socket", Shape::Plain));
    m.insert(42, spec("connect", Shape::Plain));
    m.insert(61, spec("wait4", Shape::Plain));
    m.insert(62, spec("kill", Shape::Plain));
    m.insert(63, spec("uname", Shape::Plain));
    m.insert(72, spec("fcntl", Shape::Plain));
    m.insert(78, spec("getdents", Shape::Plain));
    m.insert(79, spec("getcwd", Shape::Plain));
    m.insert(81, spec("fchdir", Shape::Plain));
    m.insert(91, spec("fchmod", Shape::Plain));
    m.insert(93, spec("fchown", Shape::Plain));
    m.insert(95, spec("umask", Shape::Plain));
    m.insert(96, spec("gettimeofday", Shape::Plain));
    m.insert(102, spec("getuid", Shape::Plain));
    m.insert(104, spec("getgid", Shape::Plain));
    m.insert(107, spec("geteuid", Shape::Plain));
    m.insert(108, spec("getegid", Shape::Plain));
    m.insert(110, spec("getppid", Shape::Plain));
    m.insert(158, spec("arch_prctl", Shape::Plain));
    m.insert(186, spec("gettid", Shape::Plain));
    m.insert(202, spec("futex", Shape::Plain));
    m.insert(217, spec("getdents64", Shape::Plain));
    m.insert(218, spec("set_tid_address", Shape::Plain));
    m.insert(228, spec("clock_gettime", Shape::Plain));
    m.insert(230, spec("clock_nanosleep", Shape::Plain));
    m.insert(273, spec("set_robust_list", Shape::Plain));
    m.insert(281, spec("epoll_pwait", Shape::Plain));
    m.insert(290, spec("eventfd2", Shape::Plain));
    m.insert(291, spec("epoll_create1", Shape::Plain));
    m.insert(292, spec("dup3", Shape::Plain));
    m.insert(293, spec("pipe2", Shape::Plain));
    m.insert(302, spec("prlimit64", Shape::Plain));
    m.insert(318, spec("getrandom", Shape::Plain));
    m.insert(334, spec("rseq", Shape::Plain));
    m
});
