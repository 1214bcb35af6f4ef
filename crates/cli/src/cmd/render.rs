//! Implementation of the `kiln render` command.
//!
//! Writes everything a build would ship (Makefile, bill of materials, build
//! metadata, packaging descriptors) without selecting a host or fetching
//! sources.

use std::path::PathBuf;

use anyhow::{Context, Result};

use kiln_lib::config::UserConfig;
use kiln_lib::driver::render;
use kiln_lib::source::RewriteRules;

use super::{load, split_platforms};
use crate::output::{print_stat, print_success};

pub struct RenderArgs {
  pub project: String,
  pub platforms: String,
  pub configdir: PathBuf,
  pub workdir: Option<PathBuf>,
  pub only_build: Vec<String>,
  pub skipcheck: bool,
}

pub fn cmd_render(args: RenderArgs) -> Result<()> {
  let platforms = split_platforms(&args.platforms)?;
  let config = UserConfig::load().context("Failed to load user config")?;
  let rewrite = RewriteRules::from_prefixes(config.rewrite.iter());
  let base = match &args.workdir {
    Some(dir) => dir.clone(),
    None => std::env::current_dir()
      .context("Failed to read current directory")?
      .join("render"),
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  for platform in &platforms {
    let workdir = if args.workdir.is_some() && platforms.len() == 1 {
      base.clone()
    } else {
      base.join(platform)
    };

    let mut project = load(&args.project, platform, &args.configdir)?;
    if !args.only_build.is_empty() {
      project
        .retain_components(&args.only_build)
        .with_context(|| format!("Failed to filter components of {}", project.name))?;
    }
    project.skipcheck |= args.skipcheck;

    let written = rt
      .block_on(render(&mut project, &workdir, &rewrite))
      .with_context(|| format!("Failed to render {} for {}", project.name, platform))?;

    print_success(&format!("Rendered {} for {}", project.name, platform));
    print_stat("Directory", &workdir.display().to_string());
    for path in &written {
      let shown = path.strip_prefix(&workdir).unwrap_or(path);
      print_stat("Wrote", &shown.display().to_string());
    }
  }
  Ok(())
}
