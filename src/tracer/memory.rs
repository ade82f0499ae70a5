//! Address-space accessor for traced processes.
//!
//! The only place that touches another process's raw memory. Everything
//! above works on decoded values. All calls require the target to be
//! ptrace-stopped; a failure surfaces as [`TracerError::AccessFault`].

use crate::error::{Result, TracerError};
use nix::unistd::Pid;

const WORD: usize = std::mem::size_of::<u64>();

/// Read data from tracee memory.
/// Primary: process_vm_readv (fast)
/// Fallback: ptrace::read (slower, word by word)
pub fn read_memory(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    match read_memory_process_vm(pid, addr, len) {
        Ok(data) => return Ok(data),
        Err(e) => {
            log::debug!("process_vm_readv failed, falling back to ptrace: {}", e);
        }
    }

    read_memory_ptrace(pid, addr, len)
}

fn read_memory_process_vm(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];

    let local_iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: len,
    };
    let remote_iov = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: len,
    };

    let res = unsafe { libc::process_vm_readv(pid.as_raw(), &local_iov, 1, &remote_iov, 1, 0) };

    if res < 0 {
        return Err(access_fault(addr, std::io::Error::last_os_error()));
    }

    buf.truncate(res as usize);
    Ok(buf)
}

fn read_memory_ptrace(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    let mut current_addr = addr;

    while buf.len() < len {
        match nix::sys::ptrace::read(pid, current_addr as *mut libc::c_void) {
            Ok(word) => {
                let bytes = word.to_le_bytes();
                let remaining = len - buf.len();
                let to_copy = std::cmp::min(remaining, WORD);
                buf.extend_from_slice(&bytes[..to_copy]);
                current_addr += WORD as u64;
            }
            Err(e) => {
                // Partial read is okay if we got some data
                if buf.is_empty() {
                    return Err(access_fault(addr, std::io::Error::from(e)));
                }
                break;
            }
        }
    }

    Ok(buf)
}

/// Read a NUL-terminated string from tracee memory.
pub fn read_string(pid: Pid, addr: u64, max_len: usize) -> Result<String> {
    let mut result = Vec::new();
    let mut current_addr = addr;

    while result.len() < max_len {
        match nix::sys::ptrace::read(pid, current_addr as *mut libc::c_void) {
            Ok(word) => {
                let bytes = word.to_le_bytes();
                for byte in &bytes {
                    if *byte == 0 {
                        return String::from_utf8(result).map_err(|e| access_fault(addr, e));
                    }
                    result.push(*byte);
                }
                current_addr += WORD as u64;
            }
            Err(e) => {
                return Err(access_fault(addr, std::io::Error::from(e)));
            }
        }
    }

    // Truncated string
    String::from_utf8(result).map_err(|e| access_fault(addr, e))
}

/// Write data into tracee memory, word by word.
///
/// A trailing partial word is read back first and spliced, so bytes
/// beyond `data.len()` keep their previous values. Callers replacing a
/// string in place rely on this: the write never touches memory past
/// the bytes it was asked to write, padded to at most one word.
pub fn write_memory(pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
    let mut offset = 0usize;

    while offset < data.len() {
        let current_addr = addr + offset as u64;
        let remaining = data.len() - offset;

        let word = if remaining >= WORD {
            let mut bytes = [0u8; WORD];
            bytes.copy_from_slice(&data[offset..offset + WORD]);
            u64::from_le_bytes(bytes)
        } else {
            // Splice the partial tail into the existing word.
            let existing = nix::sys::ptrace::read(pid, current_addr as *mut libc::c_void)
                .map_err(|e| access_fault(current_addr, std::io::Error::from(e)))?;
            let mut bytes = existing.to_le_bytes();
            bytes[..remaining].copy_from_slice(&data[offset..]);
            u64::from_le_bytes(bytes)
        };

        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_POKEDATA,
                pid.as_raw(),
                current_addr as *mut libc::c_void,
                word as *mut libc::c_void,
            )
        };
        if res < 0 {
            return Err(access_fault(current_addr, std::io::Error::last_os_error()));
        }

        offset += WORD.min(remaining);
    }

    Ok(())
}

/// Write a string plus its NUL terminator into tracee memory.
pub fn write_string(pid: Pid, addr: u64, s: &str) -> Result<()> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    write_memory(pid, addr, &bytes)
}

fn access_fault(
    addr: u64,
    source: impl std::error::Error + Send + Sync + 'static,
) -> crate::error::PacktraceError {
    TracerError::AccessFault {
        addr,
        source: Box::new(source),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::getpid;

    // process_vm_readv works on the calling process without a ptrace
    // attachment, which makes the fast path testable in-process.
    #[test]
    fn reads_own_memory_via_process_vm() {
        let data: [u8; 12] = *b"hello tracee";
        let got = read_memory_process_vm(getpid(), data.as_ptr() as u64, data.len()).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn unmapped_address_is_access_fault() {
        let err = read_memory_process_vm(getpid(), 0x10, 8).unwrap_err();
        assert!(matches!(
            err,
            crate::error::PacktraceError::Tracer(TracerError::AccessFault { .. })
        ));
    }
}
