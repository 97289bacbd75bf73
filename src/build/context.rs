//! Build context shared by every action phase.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Origin registered for the recipe directory.
pub const ORIGIN_RECIPE: &str = "recipe";
/// Origin registered for the artifact directory.
pub const ORIGIN_ARTIFACTS: &str = "artifacts";
/// Origin registered for the target root filesystem.
pub const ORIGIN_FILESYSTEM: &str = "filesystem";

/// State threaded through all actions of a single build.
///
/// Created once per build by the runner and handed to each phase by
/// reference. Actions never replace it; they only register origins.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Target root filesystem. Must exist before the run phase.
    pub rootdir: PathBuf,
    /// Directory receiving build outputs.
    pub artifactdir: PathBuf,
    /// Directory holding the recipe and the files it references.
    pub recipedir: PathBuf,
    /// Image file, when the build produces one.
    pub image: Option<PathBuf>,
    /// Where the image is mounted, when it is.
    pub image_mnt_dir: Option<PathBuf>,
    /// Extra environment exported to every command.
    pub env: BTreeMap<String, String>,
    origins: OriginRegistry,
}

impl BuildContext {
    /// Create a context with the `recipe`, `artifacts` and `filesystem`
    /// origins pre-registered.
    pub fn new(rootdir: PathBuf, artifactdir: PathBuf, recipedir: PathBuf) -> Self {
        let mut origins = OriginRegistry::default();
        origins.entries.insert(ORIGIN_RECIPE.into(), recipedir.clone());
        origins.entries.insert(ORIGIN_ARTIFACTS.into(), artifactdir.clone());
        origins.entries.insert(ORIGIN_FILESYSTEM.into(), rootdir.clone());

        Self {
            rootdir,
            artifactdir,
            recipedir,
            image: None,
            image_mnt_dir: None,
            env: BTreeMap::new(),
            origins,
        }
    }

    pub fn with_image(mut self, image: PathBuf) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_image_mnt_dir(mut self, dir: PathBuf) -> Self {
        self.image_mnt_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Look up a named origin.
    pub fn origin(&self, name: &str) -> Option<&Path> {
        self.origins.entries.get(name).map(PathBuf::as_path)
    }

    /// Look up a named origin, failing with [`Error::OriginNotFound`].
    pub fn require_origin(&self, name: &str) -> Result<&Path> {
        self.origin(name)
            .ok_or_else(|| Error::OriginNotFound(name.to_string()))
    }

    /// Register a new origin. Existing entries are never replaced.
    pub fn register_origin(&mut self, name: impl Into<String>, path: PathBuf) -> Result<()> {
        let name = name.into();
        if !path.is_absolute() {
            return Err(Error::config(format!(
                "origin '{}' path '{}' is not absolute",
                name,
                path.display()
            )));
        }
        if self.origins.entries.contains_key(&name) {
            return Err(Error::config(format!("origin '{}' is already registered", name)));
        }
        self.origins.entries.insert(name, path);
        Ok(())
    }

    /// Registered origin names, sorted.
    pub fn origin_names(&self) -> impl Iterator<Item = &str> {
        self.origins.entries.keys().map(String::as_str)
    }
}

/// Append-only name → absolute path map.
#[derive(Debug, Clone, Default)]
struct OriginRegistry {
    entries: BTreeMap<String, PathBuf>,
}
