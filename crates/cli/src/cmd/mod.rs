mod build;
mod inspect;
mod list;
mod render;

use std::path::Path;

use anyhow::{Context, Result, bail};

use kiln_lib::platform::load_platform;
use kiln_lib::project::{Project, load_project};

pub use build::{BuildArgs, cmd_build};
pub use inspect::cmd_inspect;
pub use list::cmd_list;
pub use render::{RenderArgs, cmd_render};

/// Split a comma-separated platform list, dropping empty entries.
fn split_platforms(platforms: &str) -> Result<Vec<String>> {
  let names: Vec<String> = platforms
    .split(',')
    .map(str::trim)
    .filter(|name| !name.is_empty())
    .map(str::to_string)
    .collect();
  if names.is_empty() {
    bail!("no platform given");
  }
  Ok(names)
}

/// Load `project` for the platform named `platform` from `configdir`.
fn load(project: &str, platform: &str, configdir: &Path) -> Result<Project> {
  let loaded_platform =
    load_platform(platform, configdir).with_context(|| format!("Failed to load platform '{}'", platform))?;
  load_project(project, configdir, loaded_platform)
    .with_context(|| format!("Failed to load project '{}' for {}", project, platform))
}
