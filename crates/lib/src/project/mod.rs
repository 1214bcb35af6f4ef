//! Project model: the ordered components built for one platform.
//!
//! A project is defined in `projects/<name>.toml`:
//!
//! ```toml
//! version = "1.2.3"
//! license = "Apache-2.0"
//! components = ["component1", "component2"]
//!
//! [settings]
//! prefix = "/opt/my-app"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::{Component, Directory, load_component};
use crate::config::{DefinitionKind, read_definition};
use crate::error::{ConfigError, DependencyError};
use crate::graph::DependencyGraph;
use crate::packaging;
use crate::platform::Platform;
use crate::retry::RetryPolicy;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectDefinition {
  pub version: Option<String>,
  pub release: Option<String>,
  pub license: Option<String>,
  pub vendor: Option<String>,
  pub homepage: Option<String>,
  pub description: Option<String>,
  pub components: Vec<String>,
  pub settings: BTreeMap<String, String>,
  pub directory: Vec<Directory>,
  pub retry_count: Option<u32>,
  /// Per-attempt timeout in seconds.
  pub timeout: Option<u64>,
  pub cleanup: bool,
  pub skipcheck: bool,
  pub no_packaging: bool,
  /// Extra paths, relative to the remote workdir, retrieved after the build.
  pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
  pub name: String,
  pub version: Option<String>,
  pub release: String,
  pub license: Option<String>,
  pub vendor: Option<String>,
  pub homepage: Option<String>,
  pub description: Option<String>,
  /// Platform settings overlaid with the project's own.
  pub settings: BTreeMap<String, String>,
  pub directories: Vec<Directory>,
  pub retry_count: Option<u32>,
  pub timeout: Option<u64>,
  pub cleanup: bool,
  pub skipcheck: bool,
  pub no_packaging: bool,
  pub artifacts: Vec<String>,
  pub platform: Platform,
  pub components: Vec<Component>,
  #[serde(skip)]
  configdir: PathBuf,
}

/// One bill-of-materials entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BomEntry {
  pub version: Option<String>,
  #[serde(rename = "ref")]
  pub git_ref: Option<String>,
  pub url: Option<String>,
  pub commit: Option<String>,
}

#[derive(Debug, Serialize)]
struct BuildMetadata<'a> {
  project: &'a str,
  version: Option<&'a str>,
  release: &'a str,
  platform: &'a str,
  package_format: &'a str,
  kiln_version: &'static str,
  components: BTreeMap<&'a str, BomEntry>,
}

/// Load `projects/<name>.toml` and its components for `platform`.
pub fn load_project(name: &str, configdir: &Path, platform: Platform) -> Result<Project, ConfigError> {
  let (definition, path) = read_definition::<ProjectDefinition>(DefinitionKind::Project, configdir, name)?;
  debug!(project = %name, path = ?path, "loaded project definition");

  let component_names = definition.components.clone();
  let mut project = Project::from_definition(name, definition, platform, configdir);
  for component in &component_names {
    project.component(component)?;
  }

  info!(
    project = %project.name,
    platform = %project.platform.name,
    components = project.components.len(),
    "project loaded"
  );
  Ok(project)
}

impl Project {
  pub fn from_definition(name: &str, def: ProjectDefinition, platform: Platform, configdir: &Path) -> Self {
    let mut settings = platform.settings.clone();
    settings.extend(def.settings);

    Self {
      name: name.to_string(),
      version: def.version.filter(|v| !v.trim().is_empty()),
      release: def.release.unwrap_or_else(|| "1".to_string()),
      license: def.license,
      vendor: def.vendor,
      homepage: def.homepage,
      description: def.description,
      settings,
      directories: def.directory,
      retry_count: def.retry_count,
      timeout: def.timeout,
      cleanup: def.cleanup,
      skipcheck: def.skipcheck,
      no_packaging: def.no_packaging,
      artifacts: def.artifacts,
      platform,
      components: Vec::new(),
      configdir: configdir.to_path_buf(),
    }
  }

  /// Load component `name` and append it. Returns `false` when the component
  /// does not apply to this platform.
  pub fn component(&mut self, name: &str) -> Result<bool, ConfigError> {
    match load_component(name, &self.configdir, &self.settings, &self.platform)? {
      Some(component) => {
        self.components.push(component);
        Ok(true)
      }
      None => {
        warn!(component = %name, platform = %self.platform.name, "skipping component not applicable to platform");
        Ok(false)
      }
    }
  }

  /// Append an already-built component.
  pub fn add_component(&mut self, component: Component) {
    self.components.push(component);
  }

  pub fn get_component(&self, name: &str) -> Option<&Component> {
    self.components.iter().find(|c| c.name == name)
  }

  pub fn component_names(&self) -> Vec<&str> {
    self.components.iter().map(|c| c.name.as_str()).collect()
  }

  /// The project version, required before a build.
  pub fn validate_version(&self) -> Result<&str, ConfigError> {
    self
      .version
      .as_deref()
      .ok_or_else(|| ConfigError::MissingVersion(self.name.clone()))
  }

  pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
    RetryPolicy::resolve(self.retry_count, self.timeout)
  }

  /// Graph of intra-project `build_requires` edges.
  pub fn component_graph(&self) -> DependencyGraph {
    let names: HashSet<&str> = self.component_names().into_iter().collect();
    let mut graph = DependencyGraph::new();
    for component in &self.components {
      graph.add_node(&component.name);
    }
    for component in &self.components {
      for dep in &component.build_requires {
        if names.contains(dep.as_str()) {
          graph.add_dependency(&component.name, dep);
        }
      }
    }
    graph
  }

  /// The requested components plus the transitive closure of their
  /// intra-project build dependencies, in project order.
  ///
  /// Build dependencies that are not project components are external
  /// packages and are left out without error.
  pub fn filter_components<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, DependencyError> {
    for name in names {
      if self.get_component(name.as_ref()).is_none() {
        return Err(DependencyError::UnknownComponent {
          project: self.name.clone(),
          name: name.as_ref().to_string(),
        });
      }
    }

    let graph = self.component_graph();
    graph.verify_acyclic()?;

    let keep: HashSet<String> = graph.closure(names).into_iter().collect();
    Ok(
      self
        .components
        .iter()
        .filter(|c| keep.contains(&c.name))
        .map(|c| c.name.clone())
        .collect(),
    )
  }

  /// Drop every component outside [`Project::filter_components`].
  pub fn retain_components<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), DependencyError> {
    let keep: HashSet<String> = self.filter_components(names)?.into_iter().collect();
    self.components.retain(|c| keep.contains(&c.name));
    debug!(project = %self.name, kept = ?keep, "filtered components");
    Ok(())
  }

  /// External build dependencies: every component's `build_requires` that
  /// is not itself a project component, first occurrence order, no repeats.
  pub fn list_build_dependencies(&self) -> Vec<String> {
    let names: HashSet<&str> = self.component_names().into_iter().collect();
    let mut seen = HashSet::new();
    self
      .components
      .iter()
      .flat_map(|c| c.build_requires.iter())
      .filter(|dep| !names.contains(dep.as_str()))
      .filter(|dep| seen.insert(dep.as_str()))
      .cloned()
      .collect()
  }

  fn bom_entries(&self) -> BTreeMap<&str, BomEntry> {
    self
      .components
      .iter()
      .map(|c| {
        (
          c.name.as_str(),
          BomEntry {
            version: c.version.clone(),
            git_ref: c.source.git_ref.clone(),
            url: c.source.url.clone(),
            commit: c.commit.clone(),
          },
        )
      })
      .collect()
  }

  /// Component name -> resolved version, ref, url and commit, as JSON.
  pub fn bill_of_materials(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&self.bom_entries())
  }

  /// Project, platform and component provenance, as JSON.
  pub fn build_metadata(&self) -> Result<String, serde_json::Error> {
    let metadata = BuildMetadata {
      project: &self.name,
      version: self.version.as_deref(),
      release: &self.release,
      platform: &self.platform.name,
      package_format: self.platform.package_format.as_str(),
      kiln_version: env!("CARGO_PKG_VERSION"),
      components: self.bom_entries(),
    };
    serde_json::to_string_pretty(&metadata)
  }

  /// `<name>-<version>.tar.gz`, the tarball of the installed tree.
  pub fn tarball_name(&self) -> String {
    format!("{}-{}.tar.gz", self.name, self.version.as_deref().unwrap_or("0.0.0"))
  }

  pub fn package_name(&self) -> String {
    packaging::package_name(self)
  }

  /// Shell commands producing the package in the remote workdir.
  pub fn generate_package(&self) -> Vec<String> {
    packaging::generate_package(self)
  }

  /// Write the packaging descriptors into `workdir`.
  pub fn generate_packaging_artifacts(&self, workdir: &Path) -> std::io::Result<Vec<PathBuf>> {
    packaging::generate_packaging_artifacts(self, workdir)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn project_with(components: Vec<Component>) -> Project {
    let mut project = Project::from_definition(
      "my-app",
      ProjectDefinition {
        version: Some("1.2.3".to_string()),
        ..Default::default()
      },
      Platform::from_name("el-7-x86_64").unwrap(),
      Path::new("/defs"),
    );
    for component in components {
      project.add_component(component);
    }
    project
  }

  fn component(name: &str, build_requires: &[&str]) -> Component {
    build_requires
      .iter()
      .fold(Component::builder(name), |b, dep| b.build_requires(*dep))
      .finish()
      .unwrap()
  }

  #[test]
  fn filter_includes_transitive_intra_project_requirements() {
    let project = project_with(vec![
      component("zlib", &["gcc"]),
      component("openssl", &["zlib", "perl"]),
      component("curl", &["openssl"]),
      component("docs", &[]),
    ]);

    assert_eq!(project.filter_components(&["curl"]).unwrap(), vec!["zlib", "openssl", "curl"]);
    assert_eq!(project.filter_components(&["docs"]).unwrap(), vec!["docs"]);
  }

  #[test]
  fn filter_rejects_unknown_names() {
    let project = project_with(vec![component("zlib", &[])]);
    assert_eq!(
      project.filter_components(&["nope"]).unwrap_err(),
      DependencyError::UnknownComponent {
        project: "my-app".into(),
        name: "nope".into()
      }
    );
  }

  #[test]
  fn filter_reports_cycles() {
    let project = project_with(vec![component("a", &["b"]), component("b", &["a"])]);
    assert_eq!(
      project.filter_components(&["a"]).unwrap_err().to_string(),
      "build_requires cycle: a -> b -> a"
    );
  }

  #[test]
  fn build_dependencies_exclude_project_components() {
    let project = project_with(vec![
      component("zlib", &["gcc", "make"]),
      component("openssl", &["zlib", "perl", "gcc"]),
    ]);
    assert_eq!(project.list_build_dependencies(), vec!["gcc", "make", "perl"]);
  }

  #[test]
  fn bill_of_materials_lists_components() {
    let mut zlib = Component::builder("zlib")
      .version("1.3.1")
      .url("https://zlib.net/zlib-1.3.1.tar.gz")
      .sum("abc")
      .finish()
      .unwrap();
    zlib.commit = None;
    let project = project_with(vec![zlib]);

    let bom: serde_json::Value = serde_json::from_str(&project.bill_of_materials().unwrap()).unwrap();
    assert_eq!(bom["zlib"]["version"], "1.3.1");
    assert_eq!(bom["zlib"]["url"], "https://zlib.net/zlib-1.3.1.tar.gz");
    assert!(bom["zlib"]["ref"].is_null());

    let metadata: serde_json::Value = serde_json::from_str(&project.build_metadata().unwrap()).unwrap();
    assert_eq!(metadata["platform"], "el-7-x86_64");
    assert_eq!(metadata["package_format"], "rpm");
  }

  #[test]
  fn missing_version_is_rejected() {
    let project = Project::from_definition(
      "my-app",
      ProjectDefinition::default(),
      Platform::from_name("el-7-x86_64").unwrap(),
      Path::new("/defs"),
    );
    assert!(matches!(project.validate_version(), Err(ConfigError::MissingVersion(_))));
  }

  #[test]
  fn loads_components_and_skips_inapplicable_ones() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    std::fs::create_dir_all(root.join("projects")).unwrap();
    std::fs::create_dir_all(root.join("components")).unwrap();
    std::fs::write(
      root.join("projects/my-app.toml"),
      r#"
        version = "1.2.3"
        components = ["component1", "component2", "mac-only"]

        [settings]
        prefix = "/opt/my-app"
      "#,
    )
    .unwrap();
    std::fs::write(
      root.join("components/component1.toml"),
      r#"configure = ["./configure --prefix=%{settings:prefix}"]"#,
    )
    .unwrap();
    std::fs::write(root.join("components/component2.toml"), r#"build_requires = ["component1"]"#).unwrap();
    std::fs::write(root.join("components/mac-only.toml"), r#"platforms = ["osx-*"]"#).unwrap();

    let project = load_project("my-app", root, Platform::from_name("el-7-x86_64").unwrap()).unwrap();
    assert_eq!(project.component_names(), vec!["component1", "component2"]);
    assert_eq!(
      project.components[0].configure,
      vec!["./configure --prefix=/opt/my-app"]
    );
  }
}
