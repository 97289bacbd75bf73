//! Recipe loading: the ordered action list in TOML form.
//!
//! ```toml
//! [[actions]]
//! action = "overlay"
//! source = "overlays/base"
//!
//! [[actions]]
//! action = "run"
//! chroot = true
//! command = "apt-get clean"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::action::ActionKind;
use crate::error::{Error, IoContext, Result};
use crate::pipeline::Pipeline;

/// Parsed recipe file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    #[serde(default)]
    pub actions: Vec<ActionKind>,
}

impl Recipe {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| Error::config(format!("parsing recipe: {}", err)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .io_context(|| format!("reading recipe '{}'", path.display()))?;
        toml::from_str(&contents).map_err(|err| {
            Error::config(format!("parsing recipe '{}': {}", path.display(), err))
        })
    }

    /// Whether any run action executes inside the target root.
    pub fn uses_chroot(&self) -> bool {
        self.actions
            .iter()
            .any(|action| matches!(action, ActionKind::Run(run) if run.chroot))
    }

    pub fn into_pipeline(self) -> Pipeline {
        Pipeline::new(self.actions)
    }
}
