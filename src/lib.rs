//! Action pipeline for building target root filesystems.
//!
//! A build is an ordered list of declarative actions (copy an overlay,
//! run a script) executed against one shared [`BuildContext`]. This crate
//! provides the pieces that need careful invariants:
//!
//! - **Action lifecycle** - `Verify`, `PreMachine`, `Run`, `PostMachine`
//!   and the global ordering between them
//! - **Command executor** - host or chroot execution, environment wiring,
//!   scoped bind mounts
//! - **Path restriction** - the single check keeping writes inside the
//!   target root
//! - **Overlay copier** - merge-copy of trees into the target root
//!
//! # Architecture
//!
//! ```text
//! Recipe (TOML) ──► Pipeline ──► ActionKind::{Overlay, Run}
//!                      │               │
//!                      │               ├── copy::copy_tree ──► guard::restricted_path
//!                      │               └── command::Command ──► mount::BindMount
//!                      │
//!                      └── BuildContext (dirs, image, origins, env)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rootfs_builder::{BuildContext, HostMachine, Recipe};
//!
//! let mut ctx = BuildContext::new(rootdir, artifactdir, recipedir);
//! let mut pipeline = Recipe::load(&recipe_path)?.into_pipeline();
//! pipeline.run(&mut ctx, &mut HostMachine::new(), &mut Vec::new())?;
//! ```

pub mod action;
pub mod build;
pub mod command;
pub mod copy;
pub mod error;
pub mod guard;
pub mod machine;
pub mod mount;
pub mod pipeline;
pub mod preflight;
pub mod recipe;

pub use action::{Action, ActionKind, ActionMeta, OverlayAction, PostMachine, PreMachine, RunAction};
pub use build::context::BuildContext;
pub use command::{Command, CommandLine};
pub use error::{Error, Phase, Result};
pub use guard::restricted_path;
pub use machine::{HostMachine, Machine};
pub use pipeline::Pipeline;
pub use recipe::Recipe;
