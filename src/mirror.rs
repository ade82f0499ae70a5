use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::classify::normalize_lexical;
use crate::error::MirrorError;
use crate::package::PackageLayout;

/// Symlink chains longer than this are abandoned rather than followed.
const MAX_LINK_DEPTH: u32 = 16;

/// One source path copied into the package during a `mirror` call.
#[derive(Debug, Clone)]
pub struct MirroredEntry {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Copies dependencies into the package root at the same relative
/// location, preserving permission bits and symlink targets.
///
/// All mutations of the package root go through this type, on the
/// single controller thread. Idempotent: a path already mirrored in
/// this session, or already present in the package, is skipped.
pub struct Mirror {
    layout: PackageLayout,
    seen: HashSet<PathBuf>,
}

impl Mirror {
    pub fn new(layout: PackageLayout) -> Self {
        Self {
            layout,
            seen: HashSet::new(),
        }
    }

    /// Copy `path` (file, directory, or symlink) into the package.
    ///
    /// Symlinks are copied as links with the target string unchanged,
    /// and the resolved target is mirrored independently so both ends
    /// exist after relocation. Returns the entries actually copied;
    /// an empty list means everything was already in place.
    pub fn mirror(&mut self, path: &Path) -> Result<Vec<MirroredEntry>, MirrorError> {
        let mut copied = Vec::new();
        self.mirror_inner(path, 0, &mut copied)?;
        Ok(copied)
    }

    fn mirror_inner(
        &mut self,
        path: &Path,
        depth: u32,
        copied: &mut Vec<MirroredEntry>,
    ) -> Result<(), MirrorError> {
        if depth > MAX_LINK_DEPTH {
            log::debug!("symlink chain too deep, abandoning {}", path.display());
            return Ok(());
        }
        // The package must never capture itself.
        if !path.is_absolute() || self.layout.contains(path) {
            return Ok(());
        }
        if self.seen.contains(path) {
            return Ok(());
        }

        let meta = fs::symlink_metadata(path).map_err(|source| MirrorError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let dest = self.layout.to_packaged(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| MirrorError::Destination {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            self.mirror_symlink(path, &dest, depth, copied)?;
        } else if file_type.is_dir() {
            self.mirror_dir(path, &dest, &meta, depth, copied)?;
        } else if file_type.is_file() {
            self.mirror_file(path, &dest, copied)?;
        } else {
            // Sockets, fifos, device nodes: nothing portable to copy.
            log::debug!("skipping special file {}", path.display());
        }

        // Marked only after a successful copy, so a source that failed
        // this time is retried when the tracee references it again.
        self.seen.insert(path.to_path_buf());
        Ok(())
    }

    fn mirror_symlink(
        &mut self,
        path: &Path,
        dest: &Path,
        depth: u32,
        copied: &mut Vec<MirroredEntry>,
    ) -> Result<(), MirrorError> {
        let target = fs::read_link(path).map_err(|source| MirrorError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        if fs::symlink_metadata(dest).is_err() {
            std::os::unix::fs::symlink(&target, dest).map_err(|source| {
                MirrorError::Destination {
                    path: dest.to_path_buf(),
                    source,
                }
            })?;
            copied.push(MirroredEntry {
                source: path.to_path_buf(),
                dest: dest.to_path_buf(),
            });
        }

        // The target is a dependency in its own right. Its failure must
        // not undo the link copy that already succeeded.
        let resolved = if target.is_absolute() {
            target
        } else {
            match path.parent() {
                Some(parent) => parent.join(&target),
                None => return Ok(()),
            }
        };
        let resolved = normalize_lexical(&resolved);
        if let Err(err) = self.mirror_inner(&resolved, depth + 1, copied) {
            log::debug!("symlink target not mirrored: {err}");
        }
        Ok(())
    }

    fn mirror_dir(
        &mut self,
        path: &Path,
        dest: &Path,
        meta: &fs::Metadata,
        depth: u32,
        copied: &mut Vec<MirroredEntry>,
    ) -> Result<(), MirrorError> {
        let fresh = !dest.is_dir();
        fs::create_dir_all(dest).map_err(|source| MirrorError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;
        fs::set_permissions(dest, meta.permissions()).map_err(|source| {
            MirrorError::Destination {
                path: dest.to_path_buf(),
                source,
            }
        })?;
        if fresh {
            copied.push(MirroredEntry {
                source: path.to_path_buf(),
                dest: dest.to_path_buf(),
            });
        }

        let entries = fs::read_dir(path).map_err(|source| MirrorError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("unreadable entry under {}: {err}", path.display());
                    continue;
                }
            };
            if let Err(err) = self.mirror_inner(&entry.path(), depth, copied) {
                log::debug!("directory entry not mirrored: {err}");
            }
        }
        Ok(())
    }

    fn mirror_file(
        &mut self,
        path: &Path,
        dest: &Path,
        copied: &mut Vec<MirroredEntry>,
    ) -> Result<(), MirrorError> {
        if dest.exists() {
            // Trust the existing copy rather than re-reading the source.
            return Ok(());
        }
        let mut reader = fs::File::open(path).map_err(|source| MirrorError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = fs::File::create(dest).map_err(|source| MirrorError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;
        if let Err(source) = io::copy(&mut reader, &mut writer) {
            // A truncated copy must not be trusted by later skips.
            drop(writer);
            let _ = fs::remove_file(dest);
            return Err(MirrorError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            });
        }

        let perms = reader
            .metadata()
            .map_err(|source| MirrorError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            })?
            .permissions();
        fs::set_permissions(dest, perms).map_err(|source| MirrorError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;

        copied.push(MirroredEntry {
            source: path.to_path_buf(),
            dest: dest.to_path_buf(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn layout_in(dir: &Path) -> PackageLayout {
        let layout = PackageLayout::new(&dir.join("pkg"));
        layout.create().unwrap();
        layout
    }

    #[test]
    fn mirrors_file_with_content_and_permissions() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("hosts");
        fs::write(&source, "127.0.0.1 localhost\n").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).unwrap();

        let mut mirror = Mirror::new(layout_in(dir.path()));
        let copied = mirror.mirror(&source).unwrap();
        assert_eq!(copied.len(), 1);

        let dest = &copied[0].dest;
        assert_eq!(fs::read_to_string(dest).unwrap(), "127.0.0.1 localhost\n");
        let mode = fs::metadata(dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn mirror_is_idempotent() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("data");
        fs::write(&source, "v1").unwrap();

        let mut mirror = Mirror::new(layout_in(dir.path()));
        let first = mirror.mirror(&source).unwrap();
        assert_eq!(first.len(), 1);

        // Source changes after the first capture; the package keeps the
        // copy it already has.
        fs::write(&source, "v2").unwrap();
        let second = mirror.mirror(&source).unwrap();
        assert!(second.is_empty());
        assert_eq!(fs::read_to_string(&first[0].dest).unwrap(), "v1");
    }

    #[test]
    fn seen_set_survives_across_calls_but_existing_dest_also_skips() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("lib.so");
        fs::write(&source, "elf").unwrap();

        let layout = layout_in(dir.path());
        let mut first = Mirror::new(layout.clone());
        first.mirror(&source).unwrap();

        // A fresh session over the same package trusts the existing copy.
        let mut second = Mirror::new(layout);
        assert!(second.mirror(&source).unwrap().is_empty());
    }

    #[test]
    fn symlink_and_outside_target_both_mirrored() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real.conf");
        fs::write(&target, "key=value\n").unwrap();
        let link = dir.path().join("alias.conf");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let layout = layout_in(dir.path());
        let mut mirror = Mirror::new(layout.clone());
        mirror.mirror(&link).unwrap();

        let packaged_link = layout.to_packaged(&link);
        let packaged_target = layout.to_packaged(&target);
        // Link copied as a link, target string unchanged.
        assert_eq!(fs::read_link(&packaged_link).unwrap(), target);
        // Resolved target mirrored independently.
        assert_eq!(fs::read_to_string(&packaged_target).unwrap(), "key=value\n");
    }

    #[test]
    fn relative_symlink_target_resolved_against_link_parent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("versions").join("v2.bin");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "binary").unwrap();
        let link = dir.path().join("current.bin");
        std::os::unix::fs::symlink("versions/v2.bin", &link).unwrap();

        let layout = layout_in(dir.path());
        let mut mirror = Mirror::new(layout.clone());
        mirror.mirror(&link).unwrap();

        assert_eq!(
            fs::read_link(layout.to_packaged(&link)).unwrap(),
            PathBuf::from("versions/v2.bin")
        );
        assert!(layout.to_packaged(&target).is_file());
    }

    #[test]
    fn directories_are_copied_recursively() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("conf.d");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("a.conf"), "a").unwrap();
        fs::write(tree.join("sub").join("b.conf"), "b").unwrap();

        let layout = layout_in(dir.path());
        let mut mirror = Mirror::new(layout.clone());
        mirror.mirror(&tree).unwrap();

        assert!(layout.to_packaged(&tree.join("a.conf")).is_file());
        assert!(layout.to_packaged(&tree.join("sub").join("b.conf")).is_file());
    }

    #[test]
    fn missing_source_is_source_unreadable() {
        let dir = tempdir().unwrap();
        let mut mirror = Mirror::new(layout_in(dir.path()));
        let err = mirror.mirror(&dir.path().join("vanished")).unwrap_err();
        assert!(matches!(err, MirrorError::SourceUnreadable { .. }));
    }

    #[test]
    fn paths_inside_package_are_never_mirrored() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let inside = layout.meta().join("environment");
        fs::write(&inside, "HOME=/root\n").unwrap();

        let mut mirror = Mirror::new(layout);
        assert!(mirror.mirror(&inside).unwrap().is_empty());
    }
}
