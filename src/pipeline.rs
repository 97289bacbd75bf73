//! Recipe runner: drives an ordered action list through the lifecycle.
//!
//! Global ordering for a build:
//!
//! 1. `Verify` for every action (stops at the first failure)
//! 2. `PreMachine` for every action, in declared order
//! 3. `Run` for every non-postprocess action
//! 4. `PostMachine` for every non-postprocess action
//! 5. `Run` then `PostMachine` for every postprocess action
//!
//! Steps 3 and 4 are what the isolated machine executes; step 5 runs on
//! the host after the machine is gone. [`Pipeline::run`] does all of them
//! in one process. Any failure aborts the remaining pipeline.

use tracing::info;

use crate::action::ActionKind;
use crate::build::context::BuildContext;
use crate::error::{Error, Phase, Result};
use crate::machine::Machine;

/// An ordered list of actions for one build.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    actions: Vec<ActionKind>,
}

impl Pipeline {
    pub fn new(actions: Vec<ActionKind>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[ActionKind] {
        &self.actions
    }

    /// Verify every action before anything has side effects.
    pub fn verify(&self, ctx: &BuildContext) -> Result<()> {
        for action in &self.actions {
            action
                .verify(ctx)
                .map_err(|err| wrap(action, Phase::Verify, err))?;
        }
        Ok(())
    }

    /// Let actions register machine volumes and arguments.
    pub fn pre_machine(
        &mut self,
        ctx: &BuildContext,
        machine: &mut dyn Machine,
        args: &mut Vec<String>,
    ) -> Result<()> {
        for action in &mut self.actions {
            let label = action.label();
            if let Some(phase) = action.as_pre_machine() {
                phase
                    .pre_machine(ctx, machine, args)
                    .map_err(|err| labelled(label, Phase::PreMachine, err))?;
            }
        }
        Ok(())
    }

    /// `Run` and `PostMachine` for every non-postprocess action.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the root directory does not exist, otherwise
    /// the first action failure.
    pub fn run_machine_phases(&mut self, ctx: &mut BuildContext) -> Result<()> {
        if !ctx.rootdir.is_dir() {
            return Err(Error::config(format!(
                "root directory '{}' does not exist",
                ctx.rootdir.display()
            )));
        }

        for action in self.actions.iter_mut().filter(|a| !a.is_postprocess()) {
            let label = action.label();
            info!("==> {}", label);
            action
                .run(ctx)
                .map_err(|err| labelled(label, Phase::Run, err))?;
        }

        for action in self.actions.iter_mut().filter(|a| !a.is_postprocess()) {
            let label = action.label();
            if let Some(phase) = action.as_post_machine() {
                phase
                    .post_machine(ctx)
                    .map_err(|err| labelled(label, Phase::PostMachine, err))?;
            }
        }
        Ok(())
    }

    /// `Run` and `PostMachine` for every postprocess action, in order.
    pub fn run_postprocess(&mut self, ctx: &mut BuildContext) -> Result<()> {
        for action in self.actions.iter_mut().filter(|a| a.is_postprocess()) {
            let label = action.label();
            info!("==> {} (postprocess)", label);
            action
                .run(ctx)
                .map_err(|err| labelled(label.clone(), Phase::Run, err))?;
            if let Some(phase) = action.as_post_machine() {
                phase
                    .post_machine(ctx)
                    .map_err(|err| labelled(label, Phase::PostMachine, err))?;
            }
        }
        Ok(())
    }

    /// Run the whole build in this process.
    pub fn run(
        &mut self,
        ctx: &mut BuildContext,
        machine: &mut dyn Machine,
        args: &mut Vec<String>,
    ) -> Result<()> {
        self.verify(ctx)?;
        self.pre_machine(ctx, machine, args)?;
        self.run_machine_phases(ctx)?;
        self.run_postprocess(ctx)?;
        info!("{} actions completed", self.actions.len());
        Ok(())
    }
}

fn wrap(action: &ActionKind, phase: Phase, err: Error) -> Error {
    labelled(action.label(), phase, err)
}

fn labelled(label: String, phase: Phase, err: Error) -> Error {
    Error::Action {
        label,
        phase,
        source: Box::new(err),
    }
}
