//! Component model: one buildable unit of a project.
//!
//! Components are assembled through [`ComponentBuilder`], usually from a
//! `components/<name>.toml` definition (see [`load_component`]). Every list
//! starts empty and every command setter appends, so repeated declarations
//! accumulate in declaration order.

mod builder;
mod load;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::consts::PATCHES_DIR;
use crate::source::{FetchContext, RewriteRules, Source, SourceError, SourceLocator, acquire};

pub use builder::ComponentBuilder;
pub use load::{ComponentDefinition, build_component, load_component};
pub use types::{
  ActionTiming, Directory, InstalledFile, PackageAction, PackageState, Patch, PatchPhase, Relation, Service,
  SourceLayout,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
  pub name: String,
  pub version: Option<String>,
  pub source: SourceLocator,
  /// Declared dirname, overriding the one derived from the source.
  pub dirname_override: Option<String>,
  /// Out-of-source build directory, relative to the workdir.
  pub build_dir: Option<String>,
  pub install_only: bool,
  pub configure: Vec<String>,
  pub build: Vec<String>,
  pub check: Vec<String>,
  pub install: Vec<String>,
  pub environment: BTreeMap<String, String>,
  pub patches: Vec<Patch>,
  pub build_requires: Vec<String>,
  pub requires: Vec<Relation>,
  pub provides: Vec<Relation>,
  pub replaces: Vec<Relation>,
  pub conflicts: Vec<Relation>,
  pub directories: Vec<Directory>,
  pub files: Vec<InstalledFile>,
  pub service: Option<Service>,
  pub actions: Vec<PackageAction>,
  pub license: Option<String>,
  /// Set once the source has been resolved.
  pub layout: Option<SourceLayout>,
  /// Commit of a git source after fetching.
  pub commit: Option<String>,
}

impl Component {
  pub fn builder(name: impl Into<String>) -> ComponentBuilder {
    ComponentBuilder::new(name)
  }

  /// Explicitly flagged, or nothing to compile but something to install.
  pub fn is_install_only(&self) -> bool {
    self.install_only
      || (self.configure.is_empty() && self.build.is_empty() && self.check.is_empty() && !self.install.is_empty())
  }

  /// Directory recipes `cd` into: the resolved dirname, `./` before resolution.
  pub fn dirname(&self) -> &str {
    self.layout.as_ref().map_or("./", |layout| layout.dirname.as_str())
  }

  /// `export K=V` lines joined for a recipe prefix, or `None` without an
  /// environment.
  pub fn environment_exports(&self) -> Option<String> {
    if self.environment.is_empty() {
      return None;
    }
    let exports: Vec<String> = self
      .environment
      .iter()
      .map(|(key, value)| format!("export {key}=\"{value}\""))
      .collect();
    Some(exports.join(" && "))
  }

  pub fn patches_in(&self, phase: PatchPhase) -> impl Iterator<Item = &Patch> {
    self.patches.iter().filter(move |patch| patch.phase == phase)
  }

  fn apply_layout(&mut self, source: Option<&Source>, tar: &str) {
    let mut layout = match source {
      Some(source) => SourceLayout {
        file: source.file().map(str::to_string),
        dirname: source.dirname(),
        extract: source.extract_command(tar),
        cleanup: source.cleanup_command(),
      },
      None => SourceLayout::empty(),
    };
    if let Some(dirname) = &self.dirname_override {
      layout.dirname = dirname.clone();
    }
    self.layout = Some(layout);
  }

  /// Compute the source layout without fetching anything.
  pub fn resolve_source(&mut self, workdir: &Path, rewrite: &RewriteRules, tar: &str) -> Result<(), SourceError> {
    let source = match self.source.url.as_deref() {
      Some(url) => Some(Source::resolve(&rewrite.rewrite(url), &self.source, workdir)?),
      None => None,
    };
    self.apply_layout(source.as_ref(), tar);
    Ok(())
  }

  /// Fetch and verify the source into `workdir`, then record its layout.
  ///
  /// A git source also fills in the version (when none is declared) and the
  /// checked-out commit.
  pub async fn get_source(&mut self, workdir: &Path, ctx: &FetchContext<'_>, tar: &str) -> Result<(), SourceError> {
    if self.source.url.is_none() {
      debug!(component = %self.name, "no source to fetch");
      self.apply_layout(None, tar);
      return Ok(());
    }

    let source = acquire(&self.source, workdir, ctx).await?;
    if self.version.is_none()
      && let Some(version) = source.version()
    {
      info!(component = %self.name, version = %version, "version from git describe");
      self.version = Some(version.to_string());
    }
    self.commit = source.commit().map(str::to_string);
    self.apply_layout(Some(&source), tar);
    Ok(())
  }

  /// Copy patch files into `<workdir>/patches/<component>/`.
  pub async fn get_patches(&self, workdir: &Path) -> Result<(), SourceError> {
    if self.patches.is_empty() {
      return Ok(());
    }

    let dir = workdir.join(PATCHES_DIR).join(&self.name);
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|source| SourceError::Io { path: dir.clone(), source })?;

    for patch in &self.patches {
      let dest = dir.join(patch.file_name());
      tokio::fs::copy(&patch.path, &dest)
        .await
        .map_err(|source| SourceError::Io {
          path: patch.path.clone(),
          source,
        })?;
      debug!(component = %self.name, patch = ?dest, "patch staged");
    }
    Ok(())
  }
}
