//! Loading components from `components/<name>.toml`.
//!
//! ```toml
//! version = "1.3.1"
//! url = "https://zlib.net/zlib-1.3.1.tar.gz"
//! sum = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
//! sum_type = "sha256"
//! platforms = ["el-*", "debian-*"]
//! configure = ["./configure --prefix=%{settings:prefix}"]
//! build = ["%{platform:make} -j%{platform:num_cores}"]
//! install = ["%{platform:make} install"]
//!
//! [[patch]]
//! path = "patches/zlib/0001-fix-build.patch"
//!
//! [[overlay]]
//! when = ["aix"]
//! environment = { CC = "/opt/freeware/bin/gcc" }
//! ```
//!
//! Overlays apply after the base section, in order, when any `when` entry
//! names the platform (glob), its family, os name, or package format.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DefinitionKind, read_definition};
use crate::error::ConfigError;
use crate::placeholder::{self, PlaceholderError, Resolver};
use crate::platform::{Platform, ServiceType};

use super::Component;
use super::builder::ComponentBuilder;
use super::types::{
  ActionTiming, Directory, InstalledFile, PackageState, Patch, PatchPhase, Relation, RelationSpec, Service,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComponentDefinition {
  /// Platform-name globs this component applies to; empty means all.
  pub platforms: Vec<String>,
  /// Overlay selector; ignored on the base section.
  pub when: Vec<String>,
  pub version: Option<String>,
  pub url: Option<String>,
  #[serde(rename = "ref")]
  pub git_ref: Option<String>,
  pub sum: Option<String>,
  pub sum_type: Option<String>,
  pub mirrors: Vec<String>,
  pub dirname: Option<String>,
  pub build_dir: Option<String>,
  pub install_only: Option<bool>,
  pub license: Option<String>,
  pub configure: Vec<String>,
  pub build: Vec<String>,
  pub check: Vec<String>,
  pub install: Vec<String>,
  pub environment: BTreeMap<String, String>,
  pub build_requires: Vec<String>,
  pub requires: Vec<RelationSpec>,
  pub provides: Vec<RelationSpec>,
  pub replaces: Vec<RelationSpec>,
  pub conflicts: Vec<RelationSpec>,
  pub patch: Vec<PatchDefinition>,
  pub directory: Vec<Directory>,
  pub file: Vec<InstalledFile>,
  pub service: Option<ServiceDefinition>,
  pub action: Vec<ActionDefinition>,
  pub overlay: Vec<ComponentDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchDefinition {
  pub path: String,
  #[serde(default)]
  pub strip: Option<u32>,
  #[serde(default)]
  pub fuzz: Option<u32>,
  #[serde(default)]
  pub phase: Option<String>,
  #[serde(default)]
  pub destination: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
  pub name: String,
  #[serde(default)]
  pub file: Option<String>,
  #[serde(default, rename = "type")]
  pub service_type: Option<ServiceType>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDefinition {
  pub state: String,
  pub timing: String,
  pub script: Vec<String>,
}

/// Resolves `%{settings:..}` against the project settings and
/// `%{platform:..}` against platform attributes.
struct DefinitionResolver<'a> {
  settings: &'a BTreeMap<String, String>,
  platform: &'a Platform,
}

impl Resolver for DefinitionResolver<'_> {
  fn resolve_setting(&self, key: &str) -> Result<String, PlaceholderError> {
    self
      .settings
      .get(key)
      .or_else(|| self.platform.settings.get(key))
      .cloned()
      .ok_or_else(|| PlaceholderError::UnresolvedSetting(key.to_string()))
  }

  fn resolve_platform(&self, attr: &str) -> Result<String, PlaceholderError> {
    self
      .platform
      .attribute(attr)
      .ok_or_else(|| PlaceholderError::UnresolvedPlatform(attr.to_string()))
  }
}

impl DefinitionResolver<'_> {
  fn expand(&self, input: &str) -> Result<String, ConfigError> {
    if !placeholder::contains_placeholder(input) {
      return Ok(input.to_string());
    }
    placeholder::substitute(input, self).map_err(|source| ConfigError::Placeholder {
      input: input.to_string(),
      source,
    })
  }

  fn expand_all(&self, inputs: &[String]) -> Result<Vec<String>, ConfigError> {
    inputs.iter().map(|s| self.expand(s)).collect()
  }

  fn expand_opt(&self, input: &Option<String>) -> Result<Option<String>, ConfigError> {
    input.as_deref().map(|s| self.expand(s)).transpose()
  }
}

/// Load `components/<name>.toml` for `platform`.
///
/// Returns `Ok(None)` when the definition's `platforms` list excludes the
/// platform. Every failure is wrapped in [`ConfigError::ComponentLoad`].
pub fn load_component(
  name: &str,
  configdir: &Path,
  settings: &BTreeMap<String, String>,
  platform: &Platform,
) -> Result<Option<Component>, ConfigError> {
  let path = crate::config::definition_path(DefinitionKind::Component, configdir, name);
  let wrap = |source: ConfigError| ConfigError::ComponentLoad {
    name: name.to_string(),
    path: path.clone(),
    source: Box::new(source),
  };

  let (definition, _) = read_definition::<ComponentDefinition>(DefinitionKind::Component, configdir, name).map_err(wrap)?;
  build_component(name, definition, configdir, settings, platform).map_err(wrap)
}

/// Turn a parsed definition into a component for `platform`.
pub fn build_component(
  name: &str,
  definition: ComponentDefinition,
  configdir: &Path,
  settings: &BTreeMap<String, String>,
  platform: &Platform,
) -> Result<Option<Component>, ConfigError> {
  if !definition.platforms.is_empty() && !definition.platforms.iter().any(|p| glob_match(p, &platform.name)) {
    info!(component = %name, platform = %platform.name, "component does not apply to platform");
    return Ok(None);
  }

  let resolver = DefinitionResolver { settings, platform };
  let mut builder = apply(ComponentBuilder::new(name), &definition, &resolver, configdir)?;

  for overlay in &definition.overlay {
    if overlay_applies(&overlay.when, platform) {
      debug!(component = %name, when = ?overlay.when, "applying overlay");
      builder = apply(builder, overlay, &resolver, configdir)?;
    }
  }

  builder.finish().map(Some)
}

fn overlay_applies(when: &[String], platform: &Platform) -> bool {
  when.iter().any(|key| {
    key == platform.family.as_str()
      || key == &platform.os_name
      || key == platform.package_format.as_str()
      || glob_match(key, &platform.name)
  })
}

fn apply(
  mut builder: ComponentBuilder,
  def: &ComponentDefinition,
  resolver: &DefinitionResolver<'_>,
  configdir: &Path,
) -> Result<ComponentBuilder, ConfigError> {
  if let Some(version) = resolver.expand_opt(&def.version)? {
    builder = builder.version(version);
  }
  if let Some(url) = resolver.expand_opt(&def.url)? {
    builder = builder.url(url);
  }
  if let Some(git_ref) = resolver.expand_opt(&def.git_ref)? {
    builder = builder.git_ref(git_ref);
  }
  if let Some(sum) = resolver.expand_opt(&def.sum)? {
    builder = builder.sum(sum);
  }
  if let Some(sum_type) = &def.sum_type {
    builder = builder.sum_type(sum_type.parse()?);
  }
  for mirror in resolver.expand_all(&def.mirrors)? {
    builder = builder.mirror(mirror);
  }
  if let Some(dirname) = resolver.expand_opt(&def.dirname)? {
    builder = builder.dirname(dirname);
  }
  if let Some(build_dir) = resolver.expand_opt(&def.build_dir)? {
    builder = builder.build_dir(build_dir);
  }
  if let Some(install_only) = def.install_only {
    builder = builder.install_only(install_only);
  }
  if let Some(license) = &def.license {
    builder = builder.license(license.clone());
  }

  builder = builder
    .configure(resolver.expand_all(&def.configure)?)
    .build(resolver.expand_all(&def.build)?)
    .check(resolver.expand_all(&def.check)?)
    .install(resolver.expand_all(&def.install)?);

  for (key, value) in &def.environment {
    builder = builder.environment(key.clone(), resolver.expand(value)?);
  }
  for name in &def.build_requires {
    builder = builder.build_requires(resolver.expand(name)?);
  }
  for spec in &def.requires {
    builder = builder.requires(Relation::from(spec.clone()));
  }
  for spec in &def.provides {
    builder = builder.provides(Relation::from(spec.clone()));
  }
  for spec in &def.replaces {
    builder = builder.replaces(Relation::from(spec.clone()));
  }
  for spec in &def.conflicts {
    builder = builder.conflicts(Relation::from(spec.clone()));
  }

  for patch in &def.patch {
    builder = builder.patch(patch_from(patch, resolver, configdir)?);
  }
  for dir in &def.directory {
    let mut dir = dir.clone();
    dir.path = resolver.expand(&dir.path)?;
    builder = builder.directory(dir);
  }
  for file in &def.file {
    let mut file = file.clone();
    file.path = resolver.expand(&file.path)?;
    builder = builder.install_file(file);
  }
  if let Some(service) = &def.service {
    builder = builder.service(Service {
      name: resolver.expand(&service.name)?,
      file: resolver.expand_opt(&service.file)?,
      service_type: service.service_type,
    });
  }
  for action in &def.action {
    let state: PackageState = action.state.parse()?;
    let timing: ActionTiming = action.timing.parse()?;
    builder = builder.action(state, timing, resolver.expand_all(&action.script)?);
  }

  Ok(builder)
}

fn patch_from(def: &PatchDefinition, resolver: &DefinitionResolver<'_>, configdir: &Path) -> Result<Patch, ConfigError> {
  let path = PathBuf::from(resolver.expand(&def.path)?);
  let path = if path.is_absolute() { path } else { configdir.join(path) };

  let mut patch = Patch::new(path);
  if let Some(strip) = def.strip {
    patch = patch.strip(strip);
  }
  if let Some(fuzz) = def.fuzz {
    patch = patch.fuzz(fuzz);
  }
  if let Some(phase) = &def.phase {
    patch.phase = phase.parse::<PatchPhase>()?;
  }
  patch.destination = resolver.expand_opt(&def.destination)?;
  patch.validate()?;
  Ok(patch)
}

/// Match `name` against a glob where `*` is any run and `?` any one char.
fn glob_match(pattern: &str, name: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let name: Vec<char> = name.chars().collect();
  let (mut p, mut n) = (0, 0);
  let mut backtrack: Option<(usize, usize)> = None;

  while n < name.len() {
    match pattern.get(p) {
      Some('*') => {
        backtrack = Some((p, n));
        p += 1;
      }
      Some(&c) if c == '?' || c == name[n] => {
        p += 1;
        n += 1;
      }
      _ => match backtrack {
        Some((star, matched)) => {
          p = star + 1;
          n = matched + 1;
          backtrack = Some((star, matched + 1));
        }
        None => return false,
      },
    }
  }
  pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn el7() -> Platform {
    Platform::from_name("el-7-x86_64").unwrap()
  }

  fn settings() -> BTreeMap<String, String> {
    BTreeMap::from([("prefix".to_string(), "/opt/app".to_string())])
  }

  fn write_component(dir: &Path, name: &str, content: &str) {
    let components = dir.join("components");
    std::fs::create_dir_all(&components).unwrap();
    std::fs::write(components.join(format!("{name}.toml")), content).unwrap();
  }

  #[test]
  fn glob_matching() {
    assert!(glob_match("el-*", "el-7-x86_64"));
    assert!(glob_match("*-x86_64", "el-7-x86_64"));
    assert!(glob_match("el-?-x86_64", "el-7-x86_64"));
    assert!(!glob_match("debian-*", "el-7-x86_64"));
    assert!(glob_match("*", "anything"));
  }

  #[test]
  fn placeholders_resolve_at_load() {
    let temp = TempDir::new().unwrap();
    write_component(
      temp.path(),
      "zlib",
      r#"
        version = "1.3.1"
        configure = ["./configure --prefix=%{settings:prefix}"]
        build = ["%{platform:make}"]
      "#,
    );

    let component = load_component("zlib", temp.path(), &settings(), &el7()).unwrap().unwrap();
    assert_eq!(component.configure, vec!["./configure --prefix=/opt/app"]);
    assert_eq!(component.build, vec!["make"]);
  }

  #[test]
  fn platform_restriction_yields_none() {
    let temp = TempDir::new().unwrap();
    write_component(temp.path(), "launchd-plist", r#"platforms = ["osx-*", "macos-*"]"#);

    assert!(load_component("launchd-plist", temp.path(), &settings(), &el7()).unwrap().is_none());
  }

  #[test]
  fn overlays_append_after_base() {
    let temp = TempDir::new().unwrap();
    write_component(
      temp.path(),
      "openssl",
      r#"
        configure = ["./config"]

        [[overlay]]
        when = ["rpm"]
        configure = ["echo rpm"]

        [[overlay]]
        when = ["debian"]
        configure = ["echo debian"]

        [[overlay]]
        when = ["el-7-x86_64"]
        configure = ["echo el7"]
        version = "3.0.13"
      "#,
    );

    let component = load_component("openssl", temp.path(), &settings(), &el7()).unwrap().unwrap();
    assert_eq!(component.configure, vec!["./config", "echo rpm", "echo el7"]);
    assert_eq!(component.version.as_deref(), Some("3.0.13"));
  }

  #[test]
  fn invalid_patch_phase_is_wrapped() {
    let temp = TempDir::new().unwrap();
    write_component(
      temp.path(),
      "app",
      r#"
        [[patch]]
        path = "patches/app/fix.patch"
        phase = "build"
      "#,
    );

    match load_component("app", temp.path(), &settings(), &el7()).unwrap_err() {
      ConfigError::ComponentLoad { name, source, .. } => {
        assert_eq!(name, "app");
        assert!(matches!(*source, ConfigError::InvalidPatchPhase(ref p) if p == "build"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn missing_definition_is_wrapped() {
    let temp = TempDir::new().unwrap();
    let err = load_component("ghost", temp.path(), &settings(), &el7()).unwrap_err();
    match err {
      ConfigError::ComponentLoad { source, .. } => {
        assert!(matches!(*source, ConfigError::DefinitionNotFound { .. }))
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn patch_paths_resolve_against_configdir() {
    let temp = TempDir::new().unwrap();
    write_component(
      temp.path(),
      "app",
      r#"
        [[patch]]
        path = "patches/app/0001.patch"
        strip = 2

        [[patch]]
        path = "/abs/0002.patch"
        phase = "install"
        destination = "%{settings:prefix}/lib"
      "#,
    );

    let component = load_component("app", temp.path(), &settings(), &el7()).unwrap().unwrap();
    assert_eq!(component.patches[0].path, temp.path().join("patches/app/0001.patch"));
    assert_eq!(component.patches[0].strip, 2);
    assert_eq!(component.patches[1].phase, PatchPhase::Install);
    assert_eq!(component.patches[1].destination.as_deref(), Some("/opt/app/lib"));
  }
}
