//! Build files written into the local work directory before shipping.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::{BOM_FILENAME, BUILD_METADATA_FILENAME, MAKEFILE_NAME};
use crate::error::KilnError;
use crate::project::Project;
use crate::rules::{render_makefile, synthesize};
use crate::source::RewriteRules;

fn write(path: PathBuf, content: &str) -> Result<PathBuf, KilnError> {
  std::fs::write(&path, content).map_err(|source| KilnError::Write {
    path: path.clone(),
    source,
  })?;
  debug!(path = ?path, bytes = content.len(), "wrote build file");
  Ok(path)
}

fn json_error(path: &Path, err: serde_json::Error) -> KilnError {
  KilnError::Write {
    path: path.to_path_buf(),
    source: std::io::Error::other(err),
  }
}

/// Write the Makefile, bill of materials, build metadata and packaging
/// descriptors for `project` into `workdir`. Sources must already be
/// resolved or fetched.
pub fn write_build_files(project: &Project, workdir: &Path) -> Result<Vec<PathBuf>, KilnError> {
  std::fs::create_dir_all(workdir).map_err(|source| KilnError::Write {
    path: workdir.to_path_buf(),
    source,
  })?;

  let rules = synthesize(project)?;
  let mut written = vec![write(workdir.join(MAKEFILE_NAME), &render_makefile(&rules, project))?];

  let bom_path = workdir.join(BOM_FILENAME);
  let bom = project.bill_of_materials().map_err(|e| json_error(&bom_path, e))?;
  written.push(write(bom_path, &bom)?);

  let metadata_path = workdir.join(BUILD_METADATA_FILENAME);
  let metadata = project.build_metadata().map_err(|e| json_error(&metadata_path, e))?;
  written.push(write(metadata_path, &metadata)?);

  if !project.no_packaging {
    let artifacts = project
      .generate_packaging_artifacts(workdir)
      .map_err(|source| KilnError::Write {
        path: workdir.to_path_buf(),
        source,
      })?;
    written.extend(artifacts);
  }

  info!(
    project = %project.name,
    platform = %project.platform.name,
    rules = rules.len(),
    files = written.len(),
    "build files written"
  );
  Ok(written)
}

/// Resolve every source layout without fetching, stage patches, and write
/// the build files: everything a build ships, produced without a host.
pub async fn render(project: &mut Project, workdir: &Path, rewrite: &RewriteRules) -> Result<Vec<PathBuf>, KilnError> {
  let tar = project.platform.toolchain.tar.clone();
  for component in &mut project.components {
    component.resolve_source(workdir, rewrite, &tar)?;
    component.get_patches(workdir).await?;
  }
  write_build_files(project, workdir)
}
