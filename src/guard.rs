//! Path restriction for everything written into the target root.
//!
//! [`restricted_path`] is the single enforcement point that keeps actions
//! from writing outside the root filesystem under construction. It
//! normalizes traversal segments and then walks existing path components,
//! resolving symlinks as if `rootdir` were `/`, so neither `..` segments
//! nor links planted inside the tree can redirect a write to the host.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Link hops allowed while resolving a single destination.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `destination` inside `rootdir`.
///
/// Absolute and relative destinations are both taken relative to
/// `rootdir`; an empty destination is `rootdir` itself. The returned path
/// is always `rootdir` (canonicalized when it exists) or a descendant.
///
/// # Errors
///
/// * [`Error::Config`] if `rootdir` is not absolute
/// * [`Error::PathEscape`] if the resolved destination leaves `rootdir`
pub fn restricted_path(rootdir: &Path, destination: &str) -> Result<PathBuf> {
    if !rootdir.is_absolute() {
        return Err(Error::config(format!(
            "root directory '{}' is not absolute",
            rootdir.display()
        )));
    }

    let root = fs::canonicalize(rootdir).unwrap_or_else(|_| normalize(rootdir));
    let requested = normalize(&root.join(destination.trim_start_matches('/')));
    let relative = requested
        .strip_prefix(&root)
        .map_err(|_| Error::escape(&root, destination))?;

    let pending = relative
        .components()
        .map(|c| c.as_os_str().to_os_string())
        .collect();
    resolve_within(&root, pending, destination)
}

fn resolve_within(root: &Path, mut pending: VecDeque<OsString>, original: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            if resolved == root {
                return Err(Error::escape(root, original));
            }
            resolved.pop();
            continue;
        }
        if part == "." || part.is_empty() {
            continue;
        }

        let candidate = resolved.join(&part);
        let is_link = fs::symlink_metadata(&candidate)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            resolved = candidate;
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(Error::escape(root, original));
        }
        let target = fs::read_link(&candidate)
            .io_context(|| format!("reading link '{}'", candidate.display()))?;
        if target.is_absolute() {
            resolved = root.to_path_buf();
        }
        let mut next: VecDeque<OsString> = target
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .map(|c| c.as_os_str().to_os_string())
            .collect();
        next.extend(pending.drain(..));
        pending = next;
    }

    Ok(resolved)
}

/// Join a relative `path` onto `base` and normalize it lexically.
///
/// Absolute paths are only normalized. This does not restrict anything;
/// use [`restricted_path`] for destinations.
pub fn clean_path_at(path: &str, base: &Path) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&base.join(candidate))
    }
}

/// Lexically collapse `.` and `..` segments. `..` never climbs above `/`.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::CurDir => {}
            Component::RootDir => out.push("/"),
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("rootfs");
        fs::create_dir_all(&root).unwrap();
        let root = fs::canonicalize(&root).unwrap();
        (temp, root)
    }

    #[test]
    fn test_empty_destination_is_root() {
        let (_temp, root) = temp_root();
        assert_eq!(restricted_path(&root, "").unwrap(), root);
        assert_eq!(restricted_path(&root, "/").unwrap(), root);
    }

    #[test]
    fn test_absolute_and_relative_destinations_land_under_root() {
        let (_temp, root) = temp_root();
        assert_eq!(restricted_path(&root, "/etc/data").unwrap(), root.join("etc/data"));
        assert_eq!(restricted_path(&root, "etc/data").unwrap(), root.join("etc/data"));
        assert_eq!(restricted_path(&root, "/usr/../etc/./x").unwrap(), root.join("etc/x"));
    }

    #[test]
    fn test_traversal_outside_root_is_rejected() {
        let (_temp, root) = temp_root();
        for dest in ["..", "../etc", "/../etc/passwd", "a/../../b", "/a/b/../../../.."] {
            let err = restricted_path(&root, dest).unwrap_err();
            assert!(
                matches!(err, Error::PathEscape { ref path, .. } if path == dest),
                "expected escape for {dest}, got {err}"
            );
        }
    }

    #[test]
    fn test_absolute_symlink_is_rerooted() {
        let (_temp, root) = temp_root();
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        symlink("/usr/lib", root.join("lib")).unwrap();

        let resolved = restricted_path(&root, "/lib/modules").unwrap();
        assert_eq!(resolved, root.join("usr/lib/modules"));
    }

    #[test]
    fn test_relative_symlink_inside_root_is_followed() {
        let (_temp, root) = temp_root();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        symlink("usr/bin", root.join("bin")).unwrap();

        assert_eq!(restricted_path(&root, "/bin/sh").unwrap(), root.join("usr/bin/sh"));
    }

    #[test]
    fn test_relative_symlink_climbing_out_is_rejected() {
        let (_temp, root) = temp_root();
        symlink("../../../../..", root.join("escape")).unwrap();

        let err = restricted_path(&root, "/escape/etc").unwrap_err();
        assert!(matches!(err, Error::PathEscape { .. }));
    }

    #[test]
    fn test_symlink_loop_is_rejected() {
        let (_temp, root) = temp_root();
        symlink("b", root.join("a")).unwrap();
        symlink("a", root.join("b")).unwrap();

        let err = restricted_path(&root, "/a/file").unwrap_err();
        assert!(matches!(err, Error::PathEscape { .. }));
    }

    #[test]
    fn test_missing_root_is_resolved_lexically() {
        let root = Path::new("/nonexistent-rootfs-xyz/root");
        assert_eq!(
            restricted_path(root, "/etc").unwrap(),
            PathBuf::from("/nonexistent-rootfs-xyz/root/etc")
        );
        assert!(restricted_path(root, "/../../etc").is_err());
    }

    #[test]
    fn test_relative_root_is_config_error() {
        let err = restricted_path(Path::new("rootfs"), "/etc").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_clean_path_at() {
        let base = Path::new("/recipes/board");
        assert_eq!(
            clean_path_at("scripts/../setup.sh", base),
            PathBuf::from("/recipes/board/setup.sh")
        );
        assert_eq!(clean_path_at("/opt/./x.sh", base), PathBuf::from("/opt/x.sh"));
    }
}
