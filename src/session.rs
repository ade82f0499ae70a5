use std::path::Path;

use crate::error::Result;
use crate::package::PackageLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Observe the program and copy its filesystem dependencies into
    /// the package.
    Audit,
    /// Replay a captured package by redirecting filesystem paths.
    Exec,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Audit => "audit",
            Mode::Exec => "exec",
        }
    }
}

/// Process-wide state for one invocation. Constructed once at startup,
/// immutable afterward; every component reads mode and package layout
/// from here.
#[derive(Debug, Clone)]
pub struct Session {
    pub mode: Mode,
    pub layout: PackageLayout,
    pub verbose: bool,
    pub follow_ssh: bool,
}

impl Session {
    /// Start an audit session: create the package skeleton and snapshot
    /// the starting environment into the reserved metadata space.
    pub fn audit(app_dir: &Path, verbose: bool, follow_ssh: bool) -> Result<Self> {
        let layout = PackageLayout::new(app_dir);
        layout.create()?;
        layout.write_environment_snapshot()?;
        Ok(Self {
            mode: Mode::Audit,
            layout,
            verbose,
            follow_ssh,
        })
    }

    /// Start an exec session against a previously captured package.
    /// The package is read-only in this mode.
    pub fn exec(app_dir: &Path, verbose: bool, follow_ssh: bool) -> Result<Self> {
        let layout = PackageLayout::new(app_dir);
        layout.verify()?;
        Ok(Self {
            mode: Mode::Exec,
            layout,
            verbose,
            follow_ssh,
        })
    }
}
