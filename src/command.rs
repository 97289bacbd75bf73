//! Command execution on the host or inside the target root.
//!
//! A [`Command`] is built fresh for every execution. It carries the
//! environment to export, the bind mounts needed inside the chroot and
//! the chroot root itself, and runs a command line through `sh -c`.
//!
//! ```rust,ignore
//! use rootfs_builder::command::Command;
//!
//! let mut cmd = Command::chroot("/scratch/root");
//! cmd.add_bind_mount("/recipes/scripts", "/tmp/script");
//! cmd.add_env_key("IMAGE", "/out/disk.img");
//! cmd.run("setup.sh", &["/tmp/script/setup.sh --fast"])?;
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;

use tracing::info;

use crate::error::{Error, IoContext, Result};
use crate::guard::clean_path_at;
use crate::mount::BindMount;

/// Where script directories are exposed inside the target root.
pub const SCRIPT_MOUNT_POINT: &str = "/tmp/script";

/// Longest inline-command label before it is truncated.
pub const MAX_LABEL_LENGTH: usize = 40;

const ELLIPSIS: &str = "...";

/// Variables that only make sense with a host view of the filesystem.
pub const HOST_ONLY_ENV: &[&str] = &["RECIPEDIR", "ARTIFACTDIR", "ROOTDIR", "IMAGEMNTDIR"];

/// A command line as declared by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// An external script plus its arguments.
    Script { path: PathBuf, args: Option<String> },
    /// An inline shell command, possibly spanning several lines.
    Inline(String),
}

impl CommandLine {
    /// Parse `"path/to/script arg..."`, resolving the path against `base`.
    ///
    /// Only the first space separates the path from its arguments, so
    /// script paths cannot contain spaces.
    pub fn script(raw: &str, base: &Path) -> Self {
        let raw = raw.trim();
        let (path, args) = match raw.split_once(' ') {
            Some((path, args)) => (path, Some(args.to_string())),
            None => (raw, None),
        };
        CommandLine::Script {
            path: clean_path_at(path, base),
            args,
        }
    }

    pub fn inline(command: impl Into<String>) -> Self {
        CommandLine::Inline(command.into())
    }

    /// Label used to prefix output when no override is given: the script
    /// file name followed by its arguments, or the inline command label.
    pub fn label(&self) -> String {
        match self {
            CommandLine::Script { path, args } => {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                match args {
                    Some(args) => format!("{} {}", name, args),
                    None => name,
                }
            }
            CommandLine::Inline(command) => inline_label(command),
        }
    }

    /// Move a script into the bind-mounted script directory.
    ///
    /// Returns the host directory to mount at [`SCRIPT_MOUNT_POINT`], or
    /// `None` for inline commands.
    pub fn remount_script(&mut self) -> Option<PathBuf> {
        let CommandLine::Script { path, .. } = self else {
            return None;
        };
        let dir = path.parent()?.to_path_buf();
        let name = path.file_name()?.to_os_string();
        *path = Path::new(SCRIPT_MOUNT_POINT).join(name);
        Some(dir)
    }

    /// The single shell string passed to `sh -c`.
    pub fn render(&self) -> String {
        match self {
            CommandLine::Script { path, args: None } => path.display().to_string(),
            CommandLine::Script {
                path,
                args: Some(args),
            } => format!("{} {}", path.display(), args),
            CommandLine::Inline(command) => command.clone(),
        }
    }
}

/// Derive a log label from an inline command.
///
/// The first line of the trimmed command is used. Lines longer than
/// [`MAX_LABEL_LENGTH`] characters are cut and get `...`; so does any
/// command with more than one line.
pub fn inline_label(command: &str) -> String {
    let trimmed = command.trim();
    let mut lines = trimmed.split('\n');
    let first = lines.next().unwrap_or_default();
    let multi_line = lines.next().is_some();

    if first.chars().count() > MAX_LABEL_LENGTH {
        let cut: String = first.chars().take(MAX_LABEL_LENGTH).collect();
        format!("{}{}", cut.trim(), ELLIPSIS)
    } else if multi_line {
        format!("{}{}", first, ELLIPSIS)
    } else {
        first.to_string()
    }
}

/// A single process invocation, on the host or chrooted into a root.
#[derive(Debug, Clone, Default)]
pub struct Command {
    chroot: Option<PathBuf>,
    env: BTreeMap<String, String>,
    bind_mounts: Vec<BindMount>,
    current_dir: Option<PathBuf>,
}

impl Command {
    /// A command running directly on the host.
    pub fn host() -> Self {
        Self::default()
    }

    /// A command running with `rootdir` as its root directory.
    pub fn chroot(rootdir: impl Into<PathBuf>) -> Self {
        Self {
            chroot: Some(rootdir.into()),
            ..Self::default()
        }
    }

    pub fn add_env_key(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Expose host directory `source` at `target` inside the chroot.
    ///
    /// Ignored for host commands.
    pub fn add_bind_mount(&mut self, source: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        self.bind_mounts.push(BindMount::new(source, target));
    }

    pub fn set_current_dir(&mut self, dir: impl Into<PathBuf>) {
        self.current_dir = Some(dir.into());
    }

    pub fn chroot_root(&self) -> Option<&Path> {
        self.chroot.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn bind_mounts(&self) -> &[BindMount] {
        &self.bind_mounts
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Full argument vector: the tokens joined into one `sh -c` string,
    /// prefixed by `chroot <root>` in chroot mode.
    pub fn argv(&self, cmdline: &[&str]) -> Vec<OsString> {
        let mut argv = Vec::new();
        if let Some(root) = &self.chroot {
            argv.push(OsString::from("chroot"));
            argv.push(root.as_os_str().to_os_string());
        }
        argv.push(OsString::from("sh"));
        argv.push(OsString::from("-c"));
        argv.push(OsString::from(cmdline.join(" ")));
        argv
    }

    /// The process to spawn for `cmdline`, with the environment applied.
    ///
    /// In chroot mode the host-only variables are removed from the
    /// inherited environment unless they were set explicitly.
    fn process(&self, cmdline: &[&str]) -> Result<process::Command> {
        let argv = self.argv(cmdline);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::config("empty command line"))?;

        let mut proc = process::Command::new(program);
        proc.args(args).envs(&self.env);
        if self.chroot.is_some() {
            for key in HOST_ONLY_ENV {
                if !self.env.contains_key(*key) {
                    proc.env_remove(key);
                }
            }
        }
        if let Some(dir) = &self.current_dir {
            proc.current_dir(dir);
        }
        Ok(proc)
    }

    /// Run `cmdline` synchronously and return its captured output.
    ///
    /// Bind mounts are held only for the duration of the call. Each output
    /// line is logged prefixed with `label`.
    ///
    /// # Errors
    ///
    /// * [`Error::CommandExecution`] for a non-zero exit status
    /// * [`Error::Io`] if the process cannot be spawned or a mount fails
    pub fn run(&self, label: &str, cmdline: &[&str]) -> Result<String> {
        let mut proc = self.process(cmdline)?;

        let _mounts = match &self.chroot {
            Some(root) => self
                .bind_mounts
                .iter()
                .map(|mount| mount.acquire(root))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let output = proc
            .output()
            .io_context(|| format!("spawning '{}'", label))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);
        for line in combined.lines() {
            info!("{} | {}", label, line);
        }

        if !output.status.success() {
            return Err(Error::CommandExecution {
                label: label.to_string(),
                code: output.status.code(),
                output: combined,
            });
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_inline_label_short_single_line() {
        assert_eq!(inline_label("  apt-get update\n"), "apt-get update");
    }

    #[test]
    fn test_inline_label_truncates_long_line() {
        let command = "echo 0123456789012345678901234567890123456789abcdefghij";
        assert_eq!(command.len(), 55);
        let label = inline_label(command);
        assert_eq!(label, format!("{}...", &command[..40]));
    }

    #[test]
    fn test_inline_label_trims_after_cut() {
        let command = format!("{} {}", "x".repeat(39), "y".repeat(10));
        assert_eq!(inline_label(&command), format!("{}...", "x".repeat(39)));
    }

    #[test]
    fn test_inline_label_multi_line_gets_ellipsis() {
        assert_eq!(inline_label("set -e\nmake install\n"), "set -e...");
        let long_first = format!("{}\nsecond", "z".repeat(60));
        assert_eq!(inline_label(&long_first), format!("{}...", "z".repeat(40)));
    }

    #[test]
    fn test_inline_label_counts_characters_not_bytes() {
        let command = "é".repeat(45);
        assert_eq!(inline_label(&command), format!("{}...", "é".repeat(40)));
    }

    #[test]
    fn test_script_label_and_args() {
        let line = CommandLine::script("sub/setup.sh --fast now", Path::new("/recipes"));
        assert_eq!(
            line,
            CommandLine::Script {
                path: PathBuf::from("/recipes/sub/setup.sh"),
                args: Some("--fast now".into()),
            }
        );
        assert_eq!(line.label(), "setup.sh --fast now");
        assert_eq!(line.render(), "/recipes/sub/setup.sh --fast now");

        let bare = CommandLine::script("  sub/setup.sh ", Path::new("/recipes"));
        assert_eq!(bare.label(), "setup.sh");
    }

    #[test]
    fn test_remount_script_rewrites_path() {
        let mut line = CommandLine::script("/recipe/sub/script.sh arg1", Path::new("/ignored"));
        let dir = line.remount_script();
        assert_eq!(dir, Some(PathBuf::from("/recipe/sub")));
        assert_eq!(line.render(), "/tmp/script/script.sh arg1");

        let mut inline = CommandLine::inline("true");
        assert_eq!(inline.remount_script(), None);
    }

    #[test]
    fn test_argv_wraps_in_shell() {
        let cmd = Command::host();
        assert_eq!(
            cmd.argv(&["echo a && echo b"]),
            vec![
                OsString::from("sh"),
                OsString::from("-c"),
                OsString::from("echo a && echo b")
            ]
        );

        let cmd = Command::chroot("/scratch/root");
        let argv = cmd.argv(&["/tmp/script/x.sh", "1"]);
        assert_eq!(argv[0], "chroot");
        assert_eq!(argv[1], "/scratch/root");
        assert_eq!(argv[4], "/tmp/script/x.sh 1");
    }

    #[test]
    fn test_chroot_process_removes_host_only_env() {
        let mut cmd = Command::chroot("/scratch/root");
        cmd.add_env_key("IMAGE", "/out/disk.img");
        cmd.add_env_key("ROOTDIR", "/explicit");
        let proc = cmd.process(&["true"]).unwrap();

        assert_eq!(proc.get_program(), "chroot");
        let envs: BTreeMap<String, Option<String>> = proc
            .get_envs()
            .map(|(key, value)| {
                (
                    key.to_string_lossy().into_owned(),
                    value.map(|v| v.to_string_lossy().into_owned()),
                )
            })
            .collect();
        for key in ["RECIPEDIR", "ARTIFACTDIR", "IMAGEMNTDIR"] {
            assert_eq!(envs.get(key), Some(&None), "{key} not removed");
        }
        assert_eq!(envs.get("ROOTDIR"), Some(&Some("/explicit".to_string())));
        assert_eq!(envs.get("IMAGE"), Some(&Some("/out/disk.img".to_string())));
    }

    #[test]
    fn test_host_process_keeps_inherited_env() {
        let proc = Command::host().process(&["true"]).unwrap();
        assert_eq!(proc.get_program(), "sh");
        assert_eq!(proc.get_envs().count(), 0);
    }

    #[test]
    fn test_run_returns_output_and_exports_env() {
        let temp = TempDir::new().unwrap();
        let mut cmd = Command::host();
        cmd.add_env_key("GREETING", "hello");
        cmd.set_current_dir(temp.path());

        let out = cmd.run("greet", &["echo $GREETING && pwd"]).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("hello"));
        let cwd = std::fs::canonicalize(temp.path()).unwrap();
        assert_eq!(lines.next().map(PathBuf::from), Some(cwd));
    }

    #[test]
    fn test_run_failure_carries_code_and_output() {
        let cmd = Command::host();
        let err = cmd.run("fails", &["echo oops >&2; exit 7"]).unwrap_err();
        match err {
            Error::CommandExecution {
                label,
                code,
                output,
            } => {
                assert_eq!(label, "fails");
                assert_eq!(code, Some(7));
                assert_eq!(output.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
