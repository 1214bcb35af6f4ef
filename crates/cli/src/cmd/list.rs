//! Implementation of the `kiln list` command.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::config::{DefinitionKind, list_definitions};

use crate::output::print_info;

/// List definitions under `configdir`. With neither filter set, lists both
/// projects and platforms.
pub fn cmd_list(configdir: &Path, projects: bool, platforms: bool) -> Result<()> {
  let both = !projects && !platforms;
  let mut kinds = Vec::new();
  if projects || both {
    kinds.push(DefinitionKind::Project);
  }
  if platforms || both {
    kinds.push(DefinitionKind::Platform);
  }

  for kind in kinds {
    let names = list_definitions(kind, configdir)
      .with_context(|| format!("Failed to list {} in {}", kind.dir_name(), configdir.display()))?;
    if names.is_empty() {
      print_info(&format!("No {} found in {}", kind.dir_name(), configdir.display()));
      continue;
    }
    println!("{}:", kind.dir_name());
    for name in names {
      println!("  {}", name);
    }
  }
  Ok(())
}
