//! Action lifecycle: the phased contract every build step implements.
//!
//! Each action goes through `Verify`, an optional `PreMachine`, `Run` and
//! an optional `PostMachine`. The optional phases are separate traits;
//! the runner asks an [`ActionKind`] for them with [`ActionKind::as_pre_machine`]
//! and [`ActionKind::as_post_machine`] and skips kinds that return `None`.
//!
//! # Example
//!
//! ```rust,ignore
//! use rootfs_builder::action::{ActionKind, OverlayAction};
//!
//! let mut overlay = ActionKind::Overlay(OverlayAction::new("overlays/base", "/"));
//! overlay.verify(&ctx)?;
//! overlay.run(&mut ctx)?;
//! ```

pub mod overlay;
pub mod run;

use serde::Deserialize;

use crate::build::context::BuildContext;
use crate::error::Result;
use crate::machine::Machine;

pub use overlay::OverlayAction;
pub use run::RunAction;

/// Phases every action implements.
pub trait Action {
    /// Validate the action without side effects.
    fn verify(&self, ctx: &BuildContext) -> Result<()>;

    /// Primary effect. A no-op for postprocess actions.
    fn run(&mut self, ctx: &mut BuildContext) -> Result<()>;

    /// Label used in logs and errors.
    fn label(&self) -> String;

    /// Whether the effect is deferred until after the machine is gone.
    fn is_postprocess(&self) -> bool {
        false
    }
}

/// Optional phase run before the isolated machine is started.
pub trait PreMachine {
    fn pre_machine(
        &mut self,
        ctx: &BuildContext,
        machine: &mut dyn Machine,
        args: &mut Vec<String>,
    ) -> Result<()>;
}

/// Optional phase run after the isolated machine is torn down.
pub trait PostMachine {
    fn post_machine(&mut self, ctx: &mut BuildContext) -> Result<()>;
}

/// Metadata shared by every action kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMeta {
    /// Overrides the derived log label.
    pub label: Option<String>,
    pub description: Option<String>,
}

impl ActionMeta {
    /// The override label, when one is set and non-empty.
    pub fn label_override(&self) -> Option<&str> {
        self.label.as_deref().filter(|label| !label.is_empty())
    }
}

/// All action kinds a recipe can declare.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionKind {
    Overlay(OverlayAction),
    Run(RunAction),
}

impl ActionKind {
    pub fn as_action(&self) -> &dyn Action {
        match self {
            ActionKind::Overlay(action) => action,
            ActionKind::Run(action) => action,
        }
    }

    pub fn as_action_mut(&mut self) -> &mut dyn Action {
        match self {
            ActionKind::Overlay(action) => action,
            ActionKind::Run(action) => action,
        }
    }

    /// Capability query for the `PreMachine` phase.
    pub fn as_pre_machine(&mut self) -> Option<&mut dyn PreMachine> {
        match self {
            ActionKind::Run(action) => Some(action),
            ActionKind::Overlay(_) => None,
        }
    }

    /// Capability query for the `PostMachine` phase.
    pub fn as_post_machine(&mut self) -> Option<&mut dyn PostMachine> {
        match self {
            ActionKind::Run(action) => Some(action),
            ActionKind::Overlay(_) => None,
        }
    }

    pub fn verify(&self, ctx: &BuildContext) -> Result<()> {
        self.as_action().verify(ctx)
    }

    pub fn run(&mut self, ctx: &mut BuildContext) -> Result<()> {
        self.as_action_mut().run(ctx)
    }

    pub fn label(&self) -> String {
        self.as_action().label()
    }

    pub fn is_postprocess(&self) -> bool {
        self.as_action().is_postprocess()
    }
}

impl From<OverlayAction> for ActionKind {
    fn from(action: OverlayAction) -> Self {
        ActionKind::Overlay(action)
    }
}

impl From<RunAction> for ActionKind {
    fn from(action: RunAction) -> Self {
        ActionKind::Run(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_queries() {
        let mut overlay = ActionKind::from(OverlayAction::new("data", "/"));
        assert!(overlay.as_pre_machine().is_none());
        assert!(overlay.as_post_machine().is_none());

        let mut run = ActionKind::from(RunAction::command("true"));
        assert!(run.as_pre_machine().is_some());
        assert!(run.as_post_machine().is_some());
    }

    #[test]
    fn test_label_override_ignores_empty() {
        let meta = ActionMeta {
            label: Some(String::new()),
            description: None,
        };
        assert_eq!(meta.label_override(), None);

        let meta = ActionMeta {
            label: Some("hooks".into()),
            description: None,
        };
        assert_eq!(meta.label_override(), Some("hooks"));
    }

    #[test]
    fn test_labels_delegate_to_kind() {
        let overlay = ActionKind::from(OverlayAction::new("overlays/base", "/"));
        assert_eq!(overlay.label(), "overlay overlays/base");

        let run = ActionKind::from(RunAction::command("apt-get clean\nrm -rf /tmp/*"));
        assert_eq!(run.label(), "apt-get clean...");
        assert!(!run.is_postprocess());
    }
}
