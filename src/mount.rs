//! Scoped bind mounts for chroot execution.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};
use crate::guard::restricted_path;

/// A host directory exposed at a path inside another filesystem view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Directory on the host.
    pub source: PathBuf,
    /// Absolute path as seen from inside the target root.
    pub target: PathBuf,
}

impl BindMount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Bind-mount `source` onto `target` below `rootdir`.
    ///
    /// The returned guard unmounts on drop, on both success and error
    /// paths of the caller.
    pub fn acquire(&self, rootdir: &Path) -> Result<MountGuard> {
        let mountpoint = restricted_path(rootdir, &self.target.to_string_lossy())?;
        fs::create_dir_all(&mountpoint)
            .io_context(|| format!("creating mountpoint '{}'", mountpoint.display()))?;

        let source = c_path(&self.source)?;
        let target = c_path(&mountpoint)?;
        // SAFETY: both pointers come from live CStrings; fstype and data may be null for MS_BIND.
        let rc = unsafe {
            libc::mount(
                source.as_ptr(),
                target.as_ptr(),
                std::ptr::null(),
                libc::MS_BIND,
                std::ptr::null(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error()).io_context(|| {
                format!(
                    "bind-mounting '{}' on '{}'",
                    self.source.display(),
                    mountpoint.display()
                )
            });
        }

        debug!(
            "bind-mounted {} on {}",
            self.source.display(),
            mountpoint.display()
        );
        Ok(MountGuard { mountpoint })
    }
}

/// RAII guard: unmounts the bind mount on drop.
#[derive(Debug)]
pub struct MountGuard {
    mountpoint: PathBuf,
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        let Ok(target) = c_path(&self.mountpoint) else {
            return;
        };
        // SAFETY: target is a valid NUL-terminated path for the duration of the call.
        let rc = unsafe { libc::umount2(target.as_ptr(), 0) };
        if rc != 0 {
            // Busy: fall back to a lazy detach.
            // SAFETY: as above.
            let lazy = unsafe { libc::umount2(target.as_ptr(), libc::MNT_DETACH) };
            if lazy != 0 {
                warn!(
                    "failed to unmount {}: {}",
                    self.mountpoint.display(),
                    io::Error::last_os_error()
                );
                return;
            }
        }
        debug!("unmounted {}", self.mountpoint.display());
    }
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::config(format!(
            "path '{}' contains an interior NUL byte",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_rejects_target_outside_root() {
        let temp = TempDir::new().unwrap();
        let mount = BindMount::new(temp.path(), "/../../escape");

        let err = mount.acquire(temp.path()).unwrap_err();
        assert!(matches!(err, Error::PathEscape { .. }));
    }

    #[test]
    fn test_c_path_rejects_nul() {
        let err = c_path(Path::new("bad\0path")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
