use std::path::{Component, Path, PathBuf};

use crate::event::ActionKind;
use crate::session::{Mode, Session};

/// What to do with one path argument of one syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Outside any region of interest (pseudo-filesystems, volatile trees,
    /// unresolvable relative paths).
    Ignore,
    /// Audit mode: copy this path into the package.
    Mirror,
    /// Exec mode: rewrite the argument to the packaged location.
    Redirect(PathBuf),
    /// Already inside the package, or intentionally left untouched.
    PassThrough,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Ignore => ActionKind::Ignore,
            Action::Mirror => ActionKind::Mirror,
            Action::Redirect(_) => ActionKind::Redirect,
            Action::PassThrough => ActionKind::PassThrough,
        }
    }
}

/// Trees whose contents are machine-local by nature and would be wrong
/// to capture or redirect.
const IGNORED_PREFIXES: &[&str] = &["/proc", "/sys", "/dev", "/tmp", "/run"];

/// Classify one already-resolved path argument.
///
/// Paths under the package are `PassThrough` so that redirecting an
/// already-redirected path is a no-op: nested traced children re-issue
/// syscalls whose arguments an ancestor already rewrote.
pub fn classify(session: &Session, path: &Path) -> Action {
    if !path.is_absolute() {
        return Action::Ignore;
    }
    if session.layout.contains(path) {
        return Action::PassThrough;
    }
    if IGNORED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return Action::Ignore;
    }
    match session.mode {
        Mode::Audit => Action::Mirror,
        Mode::Exec => Action::Redirect(session.layout.to_packaged(path)),
    }
}

/// Lexically normalize an absolute path: drop `.`, resolve `..` against
/// the parent component. No filesystem access, so symlinks are left as
/// the tracee spelled them.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("/");
                }
            }
            Component::Normal(part) => out.push(part),
            Component::Prefix(_) => {}
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        out
    }
}
