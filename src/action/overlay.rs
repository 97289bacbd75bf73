//! Overlay action: recursive copy of a directory or file into the target.
//!
//! ```toml
//! [[actions]]
//! action = "overlay"
//! origin = "firmware"        # optional, defaults to the recipe directory
//! source = "overlays/base"   # or "overlays/*" to select every subdirectory
//! destination = "/"          # optional, defaults to the root
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use super::{Action, ActionMeta};
use crate::build::context::BuildContext;
use crate::copy::{copy_tree, list_directories};
use crate::error::{Error, Result};
use crate::guard::{normalize, restricted_path};

/// Marker turning a source into a directory selector.
const DIRECTORY_SELECTOR: char = '*';

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "OverlayFields")]
pub struct OverlayAction {
    pub meta: ActionMeta,
    /// Named origin the source is relative to.
    pub origin: Option<String>,
    /// Path relative to the origin, or a `dir/*` directory selector.
    pub source: String,
    /// Absolute path inside the target root.
    pub destination: String,
}

impl Default for OverlayAction {
    fn default() -> Self {
        Self {
            meta: ActionMeta::default(),
            origin: None,
            source: String::new(),
            destination: "/".to_string(),
        }
    }
}

/// Recipe table for an overlay action.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OverlayFields {
    label: Option<String>,
    description: Option<String>,
    origin: Option<String>,
    source: String,
    destination: String,
}

impl Default for OverlayFields {
    fn default() -> Self {
        Self {
            label: None,
            description: None,
            origin: None,
            source: String::new(),
            destination: "/".to_string(),
        }
    }
}

impl From<OverlayFields> for OverlayAction {
    fn from(fields: OverlayFields) -> Self {
        Self {
            meta: ActionMeta {
                label: fields.label,
                description: fields.description,
            },
            origin: fields.origin,
            source: fields.source,
            destination: fields.destination,
        }
    }
}

impl OverlayAction {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    fn origin_name(&self) -> Option<&str> {
        self.origin.as_deref().filter(|origin| !origin.is_empty())
    }

    fn base_dir<'a>(&self, ctx: &'a BuildContext) -> Result<&'a Path> {
        match self.origin_name() {
            Some(name) => ctx.require_origin(name),
            None => Ok(ctx.recipedir.as_path()),
        }
    }

    /// Directories to copy, in order.
    fn sources(&self, base: &Path) -> Result<Vec<PathBuf>> {
        match self.source.strip_suffix(DIRECTORY_SELECTOR) {
            Some(prefix) => {
                let parent = join_source(base, prefix);
                let dirs = list_directories(&parent)?;
                info!(
                    "overlay list: {}",
                    dirs.iter()
                        .filter_map(|d| d.file_name())
                        .map(|d| d.to_string_lossy())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                Ok(dirs)
            }
            None => Ok(vec![join_source(base, &self.source)]),
        }
    }
}

impl Action for OverlayAction {
    fn verify(&self, ctx: &BuildContext) -> Result<()> {
        if self.source.is_empty() && self.origin_name().is_none() {
            return Err(Error::config("overlay needs a 'source' or an 'origin'"));
        }
        restricted_path(&ctx.rootdir, &self.destination)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let base = self.base_dir(ctx)?;
        for source in self.sources(base)? {
            info!("overlaying {} on {}", source.display(), self.destination);
            copy_tree(&source, &ctx.rootdir, &self.destination)?;
        }
        Ok(())
    }

    fn label(&self) -> String {
        if let Some(label) = self.meta.label_override() {
            return label.to_string();
        }
        match (self.source.is_empty(), self.origin_name()) {
            (true, Some(origin)) => format!("overlay {}", origin),
            _ => format!("overlay {}", self.source),
        }
    }
}

/// Join a recipe-relative source onto `base`. Leading slashes do not
/// discard the base.
fn join_source(base: &Path, source: &str) -> PathBuf {
    normalize(&base.join(source.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        ctx: BuildContext,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("rootfs");
        let artifacts = temp.path().join("artifacts");
        let recipe = temp.path().join("recipe");
        for dir in [&root, &artifacts, &recipe] {
            fs::create_dir_all(dir).unwrap();
        }
        let root = fs::canonicalize(root).unwrap();
        Fixture {
            ctx: BuildContext::new(root, artifacts, recipe),
            _temp: temp,
        }
    }

    #[test]
    fn test_verify_requires_source_or_origin() {
        let f = fixture();
        let err = OverlayAction::new("", "/").verify(&f.ctx).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        OverlayAction::new("", "/")
            .with_origin("artifacts")
            .verify(&f.ctx)
            .unwrap();
    }

    #[test]
    fn test_verify_rejects_escaping_destination() {
        let f = fixture();
        let err = OverlayAction::new("data", "/../../etc")
            .verify(&f.ctx)
            .unwrap_err();
        assert!(matches!(err, Error::PathEscape { .. }));
    }

    #[test]
    fn test_run_literal_source_from_recipe_dir() {
        let mut f = fixture();
        fs::create_dir_all(f.ctx.recipedir.join("data")).unwrap();
        fs::write(f.ctx.recipedir.join("data/file"), "payload").unwrap();

        let mut action = OverlayAction::new("data", "/etc/data");
        action.verify(&f.ctx).unwrap();
        action.run(&mut f.ctx).unwrap();

        assert_eq!(
            fs::read_to_string(f.ctx.rootdir.join("etc/data/file")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn test_run_directory_selector_copies_only_subdirectories() {
        let mut f = fixture();
        let foo = f.ctx.recipedir.join("foo");
        fs::create_dir_all(foo.join("a")).unwrap();
        fs::create_dir_all(foo.join("b")).unwrap();
        fs::write(foo.join("a/from-a"), "a").unwrap();
        fs::write(foo.join("b/from-b"), "b").unwrap();
        fs::write(foo.join("c"), "plain file").unwrap();

        let mut action = OverlayAction::new("foo/*", "/srv");
        action.run(&mut f.ctx).unwrap();

        let srv = f.ctx.rootdir.join("srv");
        assert_eq!(fs::read_to_string(srv.join("from-a")).unwrap(), "a");
        assert_eq!(fs::read_to_string(srv.join("from-b")).unwrap(), "b");
        assert!(!srv.join("c").exists());
        assert!(foo.join("c").is_file());
    }

    #[test]
    fn test_run_uses_registered_origin() {
        let mut f = fixture();
        let debs = f.ctx.artifactdir.join("debs");
        fs::create_dir_all(&debs).unwrap();
        fs::write(debs.join("pkg.deb"), "deb").unwrap();
        f.ctx.register_origin("debs", debs).unwrap();

        let mut action = OverlayAction::new("", "/var/cache/debs").with_origin("debs");
        action.run(&mut f.ctx).unwrap();

        assert!(f.ctx.rootdir.join("var/cache/debs/pkg.deb").is_file());
    }

    #[test]
    fn test_run_unknown_origin_fails() {
        let mut f = fixture();
        let mut action = OverlayAction::new("x", "/").with_origin("missing");
        let err = action.run(&mut f.ctx).unwrap_err();
        assert!(matches!(err, Error::OriginNotFound(name) if name == "missing"));
    }

    #[test]
    fn test_run_missing_source_is_io_error() {
        let mut f = fixture();
        let mut action = OverlayAction::new("absent", "/");
        let err = action.run(&mut f.ctx).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_deserialize_defaults() {
        let action: OverlayAction = toml::from_str("source = \"overlays/base\"").unwrap();
        assert_eq!(action.destination, "/");
        assert_eq!(action.origin, None);
        assert_eq!(action.label(), "overlay overlays/base");
    }

    #[test]
    fn test_deserialize_rejects_misspelled_destination() {
        let err = toml::from_str::<OverlayAction>(
            "source = \"overlays/base\"\ndestinaton = \"/etc\"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("destinaton"));
    }
}
