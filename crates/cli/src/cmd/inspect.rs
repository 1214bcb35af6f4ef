//! Implementation of the `kiln inspect` command.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use kiln_lib::component::Component;

use super::{load, split_platforms};
use crate::output::print_json;

/// Print each platform's components, as loaded and resolved for it, as JSON
/// keyed by platform name.
pub fn cmd_inspect(project: &str, platforms: &str, configdir: &Path) -> Result<()> {
  let mut resolved: BTreeMap<String, Vec<Component>> = BTreeMap::new();
  for platform in split_platforms(platforms)? {
    let loaded = load(project, &platform, configdir)?;
    resolved.insert(platform, loaded.components);
  }
  print_json(&resolved)
}
