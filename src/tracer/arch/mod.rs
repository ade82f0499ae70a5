use crate::error::{Result, TracerError};
use crate::tracer::syscalls::SyscallSpec;
use nix::unistd::Pid;

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

/// Register-level view of one architecture's syscall convention.
pub trait Architecture: Send + Sync {
    fn name(&self) -> &'static str;
    fn syscall_number(&self, regs: &RawRegisters) -> u64;
    fn syscall_args(&self, regs: &RawRegisters) -> [u64; 6];
    fn return_value(&self, regs: &RawRegisters) -> i64;
    fn stack_pointer(&self, regs: &RawRegisters) -> u64;
    fn set_syscall_arg(&self, regs: &mut RawRegisters, index: usize, value: u64);
    fn syscall_spec(&self, nr: u64) -> Option<&'static SyscallSpec>;

    /// True where the first argument register doubles as the return
    /// register, so restoring arg 0 at syscall-exit would clobber the
    /// result.
    fn return_value_is_arg0(&self) -> bool {
        false
    }

    fn syscall_name(&self, nr: u64) -> Option<&'static str> {
        self.syscall_spec(nr).map(|s| s.name)
    }
}

#[derive(Debug, Clone)]
pub enum RawRegisters {
    #[cfg(target_arch = "x86_64")]
    X86_64(x86_64::UserRegs),

    #[cfg(target_arch = "aarch64")]
    Aarch64(aarch64::UserRegs),
}

pub fn detect_architecture() -> Result<Box<dyn Architecture>> {
    #[cfg(target_arch = "x86_64")]
    {
        Ok(Box::new(x86_64::X86_64Arch::new()))
    }

    #[cfg(target_arch = "aarch64")]
    {
        Ok(Box::new(aarch64::Aarch64Arch::new()))
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        Err(TracerError::UnsupportedArch(std::env::consts::ARCH.to_string()).into())
    }
}

pub fn read_registers(pid: Pid) -> Result<RawRegisters> {
    #[cfg(target_arch = "x86_64")]
    {
        x86_64::read_registers(pid).map(RawRegisters::X86_64)
    }

    #[cfg(target_arch = "aarch64")]
    {
        aarch64::read_registers(pid).map(RawRegisters::Aarch64)
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = pid;
        Err(TracerError::UnsupportedArch(std::env::consts::ARCH.to_string()).into())
    }
}

pub fn write_registers(pid: Pid, regs: &RawRegisters) -> Result<()> {
    match regs {
        #[cfg(target_arch = "x86_64")]
        RawRegisters::X86_64(r) => x86_64::write_registers(pid, r),

        #[cfg(target_arch = "aarch64")]
        RawRegisters::Aarch64(r) => aarch64::write_registers(pid, r),
    }
}
