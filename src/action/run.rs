//! Run action: execute a script or inline command on the host or in the
//! target root.
//!
//! ```toml
//! [[actions]]
//! action = "run"
//! chroot = true
//! script = "scripts/setup.sh --minimal"
//!
//! [[actions]]
//! action = "run"
//! postprocess = true
//! command = "gzip -f $ARTIFACTDIR/disk.img"
//! ```
//!
//! Host commands see `RECIPEDIR` and `ARTIFACTDIR`, plus `ROOTDIR` and
//! `IMAGEMNTDIR` unless they are postprocess commands. `IMAGE` is exported
//! whenever the build has an image. Chroot commands get none of the host
//! directories.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::info;

use super::{Action, ActionMeta, PostMachine, PreMachine};
use crate::build::context::BuildContext;
use crate::command::{Command, CommandLine, SCRIPT_MOUNT_POINT};
use crate::error::{Error, Result};
use crate::guard::clean_path_at;
use crate::machine::Machine;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RunFields")]
pub struct RunAction {
    pub meta: ActionMeta,
    /// Run inside the target root.
    pub chroot: bool,
    /// Defer until after the build machine is torn down.
    pub postprocess: bool,
    /// Script path relative to the recipe directory, plus arguments.
    pub script: Option<String>,
    /// Inline shell command.
    pub command: Option<String>,
    /// Script path resolved during `PreMachine`.
    resolved_script: Option<PathBuf>,
    /// Output of the last execution.
    output: Option<String>,
}

/// Recipe table for a run action.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunFields {
    label: Option<String>,
    description: Option<String>,
    chroot: bool,
    postprocess: bool,
    script: Option<String>,
    command: Option<String>,
}

impl From<RunFields> for RunAction {
    fn from(fields: RunFields) -> Self {
        Self {
            meta: ActionMeta {
                label: fields.label,
                description: fields.description,
            },
            chroot: fields.chroot,
            postprocess: fields.postprocess,
            script: fields.script,
            command: fields.command,
            ..Self::default()
        }
    }
}

/// A fully wired command, ready to execute.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub label: String,
    pub command: Command,
    pub line: String,
}

impl RunAction {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn script(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            ..Self::default()
        }
    }

    pub fn in_chroot(mut self) -> Self {
        self.chroot = true;
        self
    }

    pub fn postprocess(mut self) -> Self {
        self.postprocess = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.meta.label = Some(label.into());
        self
    }

    /// Captured output of the last successful execution.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    fn script_str(&self) -> Option<&str> {
        self.script.as_deref().filter(|s| !s.trim().is_empty())
    }

    fn command_str(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    fn command_line(&self, ctx: &BuildContext) -> Result<CommandLine> {
        match (self.script_str(), self.command_str()) {
            (Some(script), _) => {
                let mut line = CommandLine::script(script, &ctx.recipedir);
                if let (Some(resolved), CommandLine::Script { path, .. }) =
                    (&self.resolved_script, &mut line)
                {
                    *path = resolved.clone();
                }
                Ok(line)
            }
            (None, Some(command)) => Ok(CommandLine::inline(command)),
            (None, None) => Err(Error::config("Script and Command both cannot be empty")),
        }
    }

    /// Build the command this action would execute against `ctx`.
    pub fn prepare(&self, ctx: &BuildContext) -> Result<Invocation> {
        let mut line = self.command_line(ctx)?;
        let derived = line.label();

        let mut cmd = if self.chroot {
            Command::chroot(&ctx.rootdir)
        } else {
            Command::host()
        };

        if self.chroot {
            if let Some(dir) = line.remount_script() {
                cmd.add_bind_mount(dir, SCRIPT_MOUNT_POINT);
            }
        }

        for (key, value) in &ctx.env {
            cmd.add_env_key(key, value);
        }
        if !self.chroot {
            cmd.add_env_key("RECIPEDIR", ctx.recipedir.to_string_lossy());
            cmd.add_env_key("ARTIFACTDIR", ctx.artifactdir.to_string_lossy());
            if !self.postprocess {
                cmd.add_env_key("ROOTDIR", ctx.rootdir.to_string_lossy());
                if let Some(mnt) = &ctx.image_mnt_dir {
                    cmd.add_env_key("IMAGEMNTDIR", mnt.to_string_lossy());
                }
            }
        }
        if let Some(image) = &ctx.image {
            cmd.add_env_key("IMAGE", image.to_string_lossy());
        }
        if self.postprocess {
            cmd.set_current_dir(&ctx.artifactdir);
        }

        let label = self
            .meta
            .label_override()
            .map(str::to_string)
            .unwrap_or(derived);

        Ok(Invocation {
            label,
            command: cmd,
            line: line.render(),
        })
    }

    fn execute(&mut self, ctx: &BuildContext) -> Result<()> {
        let invocation = self.prepare(ctx)?;
        info!("running {}", invocation.label);
        let output = invocation
            .command
            .run(&invocation.label, &[invocation.line.as_str()])?;
        self.output = Some(output);
        Ok(())
    }
}

impl Action for RunAction {
    fn verify(&self, _ctx: &BuildContext) -> Result<()> {
        if self.postprocess && self.chroot {
            return Err(Error::config("Cannot run postprocessing in the chroot"));
        }
        match (self.script_str(), self.command_str()) {
            (None, None) => Err(Error::config("Script and Command both cannot be empty")),
            (Some(_), Some(_)) => Err(Error::config(
                "Script and Command are mutually exclusive",
            )),
            _ => Ok(()),
        }
    }

    fn run(&mut self, ctx: &mut BuildContext) -> Result<()> {
        if self.postprocess {
            return Ok(());
        }
        self.execute(ctx)
    }

    fn label(&self) -> String {
        if let Some(label) = self.meta.label_override() {
            return label.to_string();
        }
        match (self.script_str(), self.command_str()) {
            (Some(script), _) => CommandLine::script(script, std::path::Path::new("/")).label(),
            (None, Some(command)) => CommandLine::inline(command).label(),
            (None, None) => "run".to_string(),
        }
    }

    fn is_postprocess(&self) -> bool {
        self.postprocess
    }
}

impl PreMachine for RunAction {
    fn pre_machine(
        &mut self,
        ctx: &BuildContext,
        machine: &mut dyn Machine,
        _args: &mut Vec<String>,
    ) -> Result<()> {
        let Some(script) = self.script_str() else {
            return Ok(());
        };
        let path = script.trim().split(' ').next().unwrap_or_default();
        let resolved = clean_path_at(path, &ctx.recipedir);

        if !self.postprocess {
            if let Some(dir) = resolved.parent() {
                machine.add_volume(dir);
            }
        }
        self.resolved_script = Some(resolved);
        Ok(())
    }
}

impl PostMachine for RunAction {
    fn post_machine(&mut self, ctx: &mut BuildContext) -> Result<()> {
        if !self.postprocess {
            return Ok(());
        }
        self.execute(ctx)
    }
}
