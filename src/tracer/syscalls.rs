//! Argument-shape vocabulary for the per-architecture syscall tables.
//!
//! Every syscall the tracer understands maps to one [`SyscallSpec`].
//! Numbers missing from a table decode to zero path arguments, so an
//! unrecognized syscall can never be misclassified as filesystem-relevant.

/// Where a syscall keeps its path arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSlot {
    /// Index into the six argument registers.
    pub arg: usize,
    /// Index of the directory-fd argument the path is relative to, for
    /// the `*at` family.
    pub dirfd: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Filesystem call carrying the listed path arguments.
    Path(&'static [PathSlot]),
    /// Creates a process: drives tracee lifecycle, not mirroring.
    Spawn,
    /// Replaces the program image; the program path is a dependency too.
    Exec(&'static [PathSlot]),
    /// Terminates the calling process.
    Exit,
    /// Known syscall with no filesystem relevance.
    Plain,
}

#[derive(Debug, Clone, Copy)]
pub struct SyscallSpec {
    pub name: &'static str,
    pub shape: Shape,
}

pub const fn spec(name: &'static str, shape: Shape) -> SyscallSpec {
    SyscallSpec { name, shape }
}

/// Single path in arg 0 (open, stat, unlink, ...).
pub const P0: &[PathSlot] = &[PathSlot { arg: 0, dirfd: None }];

/// dirfd in arg 0, path in arg 1 (openat, mkdirat, ...).
pub const AT1: &[PathSlot] = &[PathSlot { arg: 1, dirfd: Some(0) }];

/// Two independent paths (rename, link).
pub const P0_P1: &[PathSlot] = &[
    PathSlot { arg: 0, dirfd: None },
    PathSlot { arg: 1, dirfd: None },
];

/// Two dirfd-relative paths (renameat, renameat2, linkat).
pub const AT1_AT3: &[PathSlot] = &[
    PathSlot { arg: 1, dirfd: Some(0) },
    PathSlot { arg: 3, dirfd: Some(2) },
];

/// symlink(target, linkpath): only the link path names a filesystem
/// object; the target is a stored string and must not be rewritten.
pub const LINK1: &[PathSlot] = &[PathSlot { arg: 1, dirfd: None }];

/// symlinkat(target, dirfd, linkpath).
pub const LINK_AT2: &[PathSlot] = &[PathSlot { arg: 2, dirfd: Some(1) }];
