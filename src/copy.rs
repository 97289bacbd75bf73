//! Recursive overlay copy into the target root.
//!
//! Every path written is resolved through [`restricted_path`], not only
//! the top-level destination, so links already present in the target
//! tree cannot redirect nested entries to the host.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{lchown, symlink, MetadataExt};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};
use crate::guard::restricted_path;

/// Copy `source` onto `destination` inside `rootdir`.
///
/// Directories are merged into an existing destination: entries present
/// in both are overwritten, destination-only entries are kept. A file
/// source lands inside the destination when it is an existing directory,
/// otherwise at the destination path itself. Permissions, ownership and
/// symlinks are preserved.
pub fn copy_tree(source: &Path, rootdir: &Path, destination: &str) -> Result<()> {
    let meta = fs::symlink_metadata(source)
        .io_context(|| format!("reading overlay source '{}'", source.display()))?;

    if !meta.is_dir() {
        let dest = restricted_path(rootdir, destination)?;
        let dest_rel = if dest.is_dir() {
            let name = source.file_name().ok_or_else(|| {
                Error::config(format!("source '{}' has no file name", source.display()))
            })?;
            Path::new(destination).join(name)
        } else {
            PathBuf::from(destination)
        };
        return copy_entry(source, &meta, rootdir, &dest_rel);
    }

    prepare_dir(rootdir, Path::new(destination))?;

    let mut dirs = Vec::new();
    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            Error::Io {
                context: format!("walking overlay source '{}'", path),
                source: err.into(),
            }
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| Error::config(format!("'{}' outside source", entry.path().display())))?;
        let dest_rel = Path::new(destination).join(rel);
        let meta = entry
            .metadata()
            .map_err(|err| Error::Io {
                context: format!("reading metadata '{}'", entry.path().display()),
                source: err.into(),
            })?;

        if meta.is_dir() {
            let target = prepare_dir(rootdir, &dest_rel)?;
            dirs.push((target, meta));
        } else {
            copy_entry(entry.path(), &meta, rootdir, &dest_rel)?;
        }
    }

    // Children first, so read-only directories do not block their own contents.
    for (target, meta) in dirs.iter().rev() {
        fs::set_permissions(target, meta.permissions())
            .io_context(|| format!("setting permissions '{}'", target.display()))?;
        copy_ownership(meta, target)?;
    }

    Ok(())
}

/// Immediate subdirectories of `parent`, sorted by name. Plain files and
/// links are skipped.
pub fn list_directories(parent: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(parent)
        .io_context(|| format!("reading directory '{}'", parent.display()))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry =
            entry.io_context(|| format!("reading directory entry in '{}'", parent.display()))?;
        let file_type = entry
            .file_type()
            .io_context(|| format!("reading file type for '{}'", entry.path().display()))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Make sure `dest_rel` is a directory inside `rootdir`, replacing a
/// non-directory entry in its place.
fn prepare_dir(rootdir: &Path, dest_rel: &Path) -> Result<PathBuf> {
    let resolved = restricted_path(rootdir, &dest_rel.to_string_lossy())?;
    if resolved.is_dir() {
        return Ok(resolved);
    }

    let entry = unresolved_entry(rootdir, dest_rel)?;
    if fs::symlink_metadata(&entry).is_ok() {
        fs::remove_file(&entry).io_context(|| format!("replacing '{}'", entry.display()))?;
        fs::create_dir(&entry).io_context(|| format!("creating '{}'", entry.display()))?;
        return Ok(entry);
    }

    fs::create_dir_all(&resolved).io_context(|| format!("creating '{}'", resolved.display()))?;
    Ok(resolved)
}

/// Guarded parent of `dest_rel` joined with its final component, without
/// following a link in that final component.
fn unresolved_entry(rootdir: &Path, dest_rel: &Path) -> Result<PathBuf> {
    let raw = dest_rel.to_string_lossy();
    let name = dest_rel
        .file_name()
        .ok_or_else(|| Error::escape(rootdir, raw.to_string()))?;
    let parent = dest_rel.parent().unwrap_or_else(|| Path::new(""));
    let parent = restricted_path(rootdir, &parent.to_string_lossy())?;
    Ok(parent.join(name))
}

fn copy_entry(src: &Path, meta: &Metadata, rootdir: &Path, dest_rel: &Path) -> Result<()> {
    if let Some(parent) = dest_rel.parent() {
        prepare_dir(rootdir, parent)?;
    }
    let target = unresolved_entry(rootdir, dest_rel)?;
    remove_existing(&target)?;

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let link = fs::read_link(src).io_context(|| format!("reading link '{}'", src.display()))?;
        symlink(&link, &target).io_context(|| {
            format!("linking '{}' -> '{}'", target.display(), link.display())
        })?;
    } else if file_type.is_file() {
        fs::copy(src, &target).io_context(|| {
            format!("copying '{}' to '{}'", src.display(), target.display())
        })?;
        fs::set_permissions(&target, meta.permissions())
            .io_context(|| format!("setting permissions '{}'", target.display()))?;
    } else {
        warn!("skipping special file {}", src.display());
        return Ok(());
    }

    copy_ownership(meta, &target)
}

fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => Err(Error::Io {
            context: format!("replacing '{}'", target.display()),
            source: io::Error::new(io::ErrorKind::Other, "destination is a directory"),
        }),
        Ok(_) => fs::remove_file(target).io_context(|| format!("replacing '{}'", target.display())),
        Err(_) => Ok(()),
    }
}

fn copy_ownership(meta: &Metadata, target: &Path) -> Result<()> {
    match lchown(target, Some(meta.uid()), Some(meta.gid())) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied && !running_as_root() => {
            debug!("not preserving ownership of {}: {}", target.display(), err);
            Ok(())
        }
        Err(err) => Err(Error::Io {
            context: format!("changing ownership of '{}'", target.display()),
            source: err,
        }),
    }
}

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}
