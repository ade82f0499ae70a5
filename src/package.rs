use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PackageError;

/// Subdirectory of the package that mirrors absolute source paths.
pub const ROOT_DIR: &str = "root";

/// Reserved metadata space. Never mirrored into, never read as a dependency.
pub const META_DIR: &str = "meta";

const ENVIRONMENT_FILE: &str = "environment";
const CWD_FILE: &str = "cwd";
const INCOMPLETE_MARKER: &str = "incomplete";

/// On-disk layout of one package: `<app_dir>/root/` holds the mirrored
/// tree, `<app_dir>/meta/` holds session metadata.
///
/// The mapping source path -> packaged path is a pure function of the
/// root directory and is stable for the whole session.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    app_dir: PathBuf,
    root: PathBuf,
    meta: PathBuf,
}

impl PackageLayout {
    pub fn new(app_dir: &Path) -> Self {
        let app_dir = absolutize(app_dir);
        Self {
            root: app_dir.join(ROOT_DIR),
            meta: app_dir.join(META_DIR),
            app_dir,
        }
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &Path {
        &self.meta
    }

    /// Create the package skeleton. Existing directories are reused.
    pub fn create(&self) -> Result<(), PackageError> {
        for dir in [&self.root, &self.meta] {
            fs::create_dir_all(dir).map_err(|source| PackageError::Create {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Check that a previously captured package is present.
    pub fn verify(&self) -> Result<(), PackageError> {
        if !self.root.is_dir() {
            return Err(PackageError::MissingRoot(self.root.clone()));
        }
        Ok(())
    }

    /// True for any path inside the package, mirrored tree and reserved
    /// metadata space alike.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.app_dir)
    }

    /// Packaged location of an absolute source path:
    /// `/usr/lib/libc.so` -> `<root>/usr/lib/libc.so`.
    pub fn to_packaged(&self, abs: &Path) -> PathBuf {
        match abs.strip_prefix("/") {
            Ok(rel) => self.root.join(rel),
            Err(_) => self.root.join(abs),
        }
    }

    /// Inverse of [`to_packaged`]: recover the original absolute path
    /// from a path under the mirrored tree.
    pub fn strip_root(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| Path::new("/").join(rel))
    }

    /// Snapshot the starting environment and working directory into the
    /// metadata space.
    pub fn write_environment_snapshot(&self) -> Result<(), PackageError> {
        let env_path = self.meta.join(ENVIRONMENT_FILE);
        let mut out = String::new();
        for (key, value) in std::env::vars() {
            out.push_str(&key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        fs::write(&env_path, out).map_err(|source| PackageError::Metadata {
            path: env_path.clone(),
            source,
        })?;

        let cwd_path = self.meta.join(CWD_FILE);
        let cwd = std::env::current_dir().map_err(|source| PackageError::Metadata {
            path: cwd_path.clone(),
            source,
        })?;
        fs::write(&cwd_path, format!("{}\n", cwd.display())).map_err(|source| {
            PackageError::Metadata {
                path: cwd_path.clone(),
                source,
            }
        })
    }

    /// Mark an interrupted capture. The package stays usable as a
    /// partial capture; the marker records that it may be missing
    /// dependencies.
    pub fn mark_incomplete(&self) -> Result<(), PackageError> {
        let path = self.meta.join(INCOMPLETE_MARKER);
        fs::write(&path, "capture interrupted before the traced tree exited\n").map_err(
            |source| PackageError::Metadata { path: path.clone(), source },
        )
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn packaged_path_mirrors_absolute_location() {
        let layout = PackageLayout::new(Path::new("/pkg"));
        assert_eq!(
            layout.to_packaged(Path::new("/usr/lib/libc.so")),
            PathBuf::from("/pkg/root/usr/lib/libc.so")
        );
    }

    #[test]
    fn strip_root_round_trips() {
        let layout = PackageLayout::new(Path::new("/pkg"));
        let original = Path::new("/etc/hosts");
        let packaged = layout.to_packaged(original);
        assert_eq!(layout.strip_root(&packaged).as_deref(), Some(original));
    }

    #[test]
    fn strip_root_rejects_outside_paths() {
        let layout = PackageLayout::new(Path::new("/pkg"));
        assert_eq!(layout.strip_root(Path::new("/etc/hosts")), None);
        assert_eq!(layout.strip_root(Path::new("/pkg/meta/environment")), None);
    }

    #[test]
    fn contains_covers_root_and_meta() {
        let layout = PackageLayout::new(Path::new("/pkg"));
        assert!(layout.contains(Path::new("/pkg/root/etc/hosts")));
        assert!(layout.contains(Path::new("/pkg/meta/environment")));
        assert!(!layout.contains(Path::new("/etc/hosts")));
    }

    #[test]
    fn create_and_snapshot_populate_meta() {
        let dir = tempdir().unwrap();
        let layout = PackageLayout::new(&dir.path().join("app"));
        layout.create().unwrap();
        assert!(layout.root().is_dir());
        assert!(layout.meta().is_dir());

        layout.write_environment_snapshot().unwrap();
        assert!(layout.meta().join(ENVIRONMENT_FILE).is_file());
        assert!(layout.meta().join(CWD_FILE).is_file());

        layout.mark_incomplete().unwrap();
        assert!(layout.meta().join(INCOMPLETE_MARKER).is_file());
    }

    #[test]
    fn verify_requires_captured_root() {
        let dir = tempdir().unwrap();
        let layout = PackageLayout::new(&dir.path().join("missing"));
        assert!(layout.verify().is_err());
        layout.create().unwrap();
        assert!(layout.verify().is_ok());
    }
}
