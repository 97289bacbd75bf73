//! Preflight checks for build validation.
//!
//! Validates that the host has the tools actions shell out to before any
//! action runs, so a missing `chroot` shows up as one clear error rather
//! than halfway through a build.
//!
//! # Example
//!
//! ```rust
//! use rootfs_builder::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("chroot") {
//!     println!("coreutils chroot not installed");
//! }
//!
//! let tools = &[("sh", "dash"), ("chroot", "coreutils")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::error::{Error, Result};

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every build needs. Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("sh", "dash")];

/// Tools needed when any action runs inside the target root.
pub const CHROOT_TOOLS: &[(&str, &str)] = &[("chroot", "coreutils")];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * [`Error::Config`] listing missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        return Err(Error::config(format!(
            "Missing required host tools:\n{}",
            missing.join("\n")
        )));
    }

    Ok(())
}

/// Check the tools a recipe needs, including chroot support if asked.
pub fn check_host_tools(needs_chroot: bool) -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)?;
    if needs_chroot {
        check_required_tools(CHROOT_TOOLS)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "dash"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
        assert!(check_host_tools(false).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure_lists_package() {
        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("fake-package"));
    }
}
