use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rootfs_builder::preflight::check_host_tools;
use rootfs_builder::{BuildContext, HostMachine, Recipe};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  rootfs-builder run <recipe.toml> --rootdir <dir> --artifactdir <dir> [options]\n  rootfs-builder verify <recipe.toml> --rootdir <dir> --artifactdir <dir> [options]\n\nOptions:\n  --recipedir <dir>      defaults to the recipe file's directory\n  --image <path>\n  --image-mnt-dir <dir>\n  --env KEY=VALUE        may be repeated"
}

#[derive(Debug, Default)]
struct Options {
    rootdir: Option<PathBuf>,
    artifactdir: Option<PathBuf>,
    recipedir: Option<PathBuf>,
    image: Option<PathBuf>,
    image_mnt_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .without_time()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, recipe, rest @ ..] if cmd == "run" => {
            run(Path::new(recipe), parse_options(rest)?, true)
        }
        [cmd, recipe, rest @ ..] if cmd == "verify" => {
            run(Path::new(recipe), parse_options(rest)?, false)
        }
        _ => bail!(usage()),
    }
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .with_context(|| format!("missing value for '{}'\n\n{}", flag, usage()))
        };
        match flag.as_str() {
            "--rootdir" => options.rootdir = Some(absolute(value()?)?),
            "--artifactdir" => options.artifactdir = Some(absolute(value()?)?),
            "--recipedir" => options.recipedir = Some(absolute(value()?)?),
            "--image" => options.image = Some(absolute(value()?)?),
            "--image-mnt-dir" => options.image_mnt_dir = Some(absolute(value()?)?),
            "--env" => {
                let pair = value()?;
                let (key, val) = pair
                    .split_once('=')
                    .with_context(|| format!("--env expects KEY=VALUE, got '{}'", pair))?;
                options.env.push((key.to_string(), val.to_string()));
            }
            other => bail!("unknown option '{}'\n\n{}", other, usage()),
        }
    }

    Ok(options)
}

fn absolute(path: String) -> Result<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("resolving current directory")?;
    Ok(cwd.join(path))
}

fn run(recipe_path: &Path, options: Options, execute: bool) -> Result<()> {
    let recipe_path = absolute(recipe_path.to_string_lossy().into_owned())?;
    let recipe = Recipe::load(&recipe_path)
        .with_context(|| format!("loading recipe '{}'", recipe_path.display()))?;

    let rootdir = options.rootdir.context("--rootdir is required")?;
    let artifactdir = options.artifactdir.context("--artifactdir is required")?;
    let recipedir = match options.recipedir {
        Some(dir) => dir,
        None => recipe_path
            .parent()
            .map(Path::to_path_buf)
            .context("recipe path has no parent directory")?,
    };

    let mut ctx = BuildContext::new(rootdir, artifactdir, recipedir);
    if let Some(image) = options.image {
        ctx = ctx.with_image(image);
    }
    if let Some(dir) = options.image_mnt_dir {
        ctx = ctx.with_image_mnt_dir(dir);
    }
    for (key, value) in options.env {
        ctx = ctx.with_env(key, value);
    }

    let needs_chroot = recipe.uses_chroot();
    let mut pipeline = recipe.into_pipeline();
    pipeline.verify(&ctx).context("verifying recipe")?;
    if !execute {
        println!(
            "[verify] {} actions OK in '{}'",
            pipeline.actions().len(),
            recipe_path.display()
        );
        return Ok(());
    }

    check_host_tools(needs_chroot)?;
    std::fs::create_dir_all(&ctx.artifactdir).with_context(|| {
        format!(
            "creating artifact directory '{}'",
            ctx.artifactdir.display()
        )
    })?;

    let mut machine = HostMachine::new();
    let mut machine_args = Vec::new();
    pipeline
        .run(&mut ctx, &mut machine, &mut machine_args)
        .context("building root filesystem")?;

    info!("root filesystem ready at {}", ctx.rootdir.display());
    Ok(())
}
