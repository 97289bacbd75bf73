//! Error types shared by every build phase.

use std::fmt;
use std::path::PathBuf;

/// Result type alias for action and pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle phase an action error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Verify,
    PreMachine,
    Run,
    PostMachine,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Verify => write!(f, "Verify"),
            Phase::PreMachine => write!(f, "PreMachine"),
            Phase::Run => write!(f, "Run"),
            Phase::PostMachine => write!(f, "PostMachine"),
        }
    }
}

/// Errors that can occur while verifying or executing actions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An action or context invariant is violated.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A named origin was looked up but never registered.
    #[error("origin not found '{0}'")]
    OriginNotFound(String),

    /// A destination resolves outside the target root.
    #[error("path '{path}' escapes root '{}'", .root.display())]
    PathEscape { root: PathBuf, path: String },

    /// A command exited unsuccessfully.
    #[error("command '{label}' failed ({}): {}", exit_code_display(.code), .output.trim())]
    CommandExecution {
        label: String,
        code: Option<i32>,
        output: String,
    },

    /// Filesystem or process I/O failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A phase of a labelled action failed.
    #[error("{label}: {phase} failed: {source}")]
    Action {
        label: String,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn escape(root: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Error::PathEscape {
            root: root.into(),
            path: path.into(),
        }
    }

    /// Innermost error, looking through action wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Action { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn exit_code_display(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Attach a context message to I/O results, in the manner of
/// `anyhow::Context`.
pub trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::Io {
            context: f().into(),
            source,
        })
    }
}
