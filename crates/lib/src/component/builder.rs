use std::collections::{BTreeMap, HashSet};

use crate::error::ConfigError;
use crate::source::{ChecksumAlgorithm, SourceLocator};

use super::Component;
use super::types::{
  ActionTiming, Directory, InstalledFile, PackageAction, PackageState, Patch, Relation, Service, SourceLayout,
};

/// Typed builder for [`Component`].
///
/// Scalar setters replace; list setters append in call order.
#[derive(Debug, Clone)]
pub struct ComponentBuilder {
  component: Component,
}

fn strings<I, S>(items: I) -> impl Iterator<Item = String>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  items.into_iter().map(Into::into)
}

impl ComponentBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      component: Component {
        name: name.into(),
        version: None,
        source: SourceLocator::default(),
        dirname_override: None,
        build_dir: None,
        install_only: false,
        configure: Vec::new(),
        build: Vec::new(),
        check: Vec::new(),
        install: Vec::new(),
        environment: BTreeMap::new(),
        patches: Vec::new(),
        build_requires: Vec::new(),
        requires: Vec::new(),
        provides: Vec::new(),
        replaces: Vec::new(),
        conflicts: Vec::new(),
        directories: Vec::new(),
        files: Vec::new(),
        service: None,
        actions: Vec::new(),
        license: None,
        layout: None,
        commit: None,
      },
    }
  }

  pub fn version(mut self, version: impl Into<String>) -> Self {
    self.component.version = Some(version.into());
    self
  }

  pub fn url(mut self, url: impl Into<String>) -> Self {
    self.component.source.url = Some(url.into());
    self
  }

  pub fn git_ref(mut self, git_ref: impl Into<String>) -> Self {
    self.component.source.git_ref = Some(git_ref.into());
    self
  }

  pub fn sum(mut self, sum: impl Into<String>) -> Self {
    self.component.source.sum = Some(sum.into());
    self
  }

  pub fn sum_type(mut self, algorithm: ChecksumAlgorithm) -> Self {
    self.component.source.sum_type = algorithm;
    self
  }

  pub fn mirror(mut self, url: impl Into<String>) -> Self {
    self.component.source.mirrors.push(url.into());
    self
  }

  pub fn dirname(mut self, dirname: impl Into<String>) -> Self {
    self.component.dirname_override = Some(dirname.into());
    self
  }

  pub fn build_dir(mut self, dir: impl Into<String>) -> Self {
    self.component.build_dir = Some(dir.into());
    self
  }

  pub fn install_only(mut self, install_only: bool) -> Self {
    self.component.install_only = install_only;
    self
  }

  pub fn license(mut self, license: impl Into<String>) -> Self {
    self.component.license = Some(license.into());
    self
  }

  pub fn configure<I, S>(mut self, commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.component.configure.extend(strings(commands));
    self
  }

  pub fn build<I, S>(mut self, commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.component.build.extend(strings(commands));
    self
  }

  pub fn check<I, S>(mut self, commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.component.check.extend(strings(commands));
    self
  }

  pub fn install<I, S>(mut self, commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.component.install.extend(strings(commands));
    self
  }

  pub fn environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.component.environment.insert(key.into(), value.into());
    self
  }

  pub fn patch(mut self, patch: Patch) -> Self {
    self.component.patches.push(patch);
    self
  }

  pub fn build_requires(mut self, name: impl Into<String>) -> Self {
    self.component.build_requires.push(name.into());
    self
  }

  pub fn requires(mut self, relation: Relation) -> Self {
    self.component.requires.push(relation);
    self
  }

  pub fn provides(mut self, relation: Relation) -> Self {
    self.component.provides.push(relation);
    self
  }

  pub fn replaces(mut self, relation: Relation) -> Self {
    self.component.replaces.push(relation);
    self
  }

  pub fn conflicts(mut self, relation: Relation) -> Self {
    self.component.conflicts.push(relation);
    self
  }

  pub fn directory(mut self, directory: Directory) -> Self {
    self.component.directories.push(directory);
    self
  }

  pub fn install_file(mut self, file: InstalledFile) -> Self {
    self.component.files.push(file);
    self
  }

  pub fn service(mut self, service: Service) -> Self {
    self.component.service = Some(service);
    self
  }

  /// Append `scripts` to the action for `(state, timing)`.
  pub fn action<I, S>(mut self, state: PackageState, timing: ActionTiming, scripts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let actions = &mut self.component.actions;
    match actions.iter_mut().find(|a| a.state == state && a.timing == timing) {
      Some(action) => action.scripts.extend(strings(scripts)),
      None => actions.push(PackageAction {
        state,
        timing,
        scripts: strings(scripts).collect(),
      }),
    }
    self
  }

  /// Validate and return the component.
  pub fn finish(mut self) -> Result<Component, ConfigError> {
    let mut staged = HashSet::new();
    for patch in &self.component.patches {
      patch.validate()?;
      // Patches are staged flat under patches/<component>/.
      let file_name = patch.file_name();
      if !staged.insert(file_name.clone()) {
        return Err(ConfigError::DuplicatePatchName {
          component: self.component.name.clone(),
          file_name,
        });
      }
    }

    if self.component.source.url.is_none() {
      let mut layout = SourceLayout::empty();
      if let Some(dirname) = &self.component.dirname_override {
        layout.dirname = dirname.clone();
      }
      self.component.layout = Some(layout);
    }
    Ok(self.component)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_setters_append_in_call_order() {
    let component = ComponentBuilder::new("app")
      .configure(["./configure"])
      .configure(["cmake .."])
      .build(["make -j4"])
      .build(["make docs", "make man"])
      .finish()
      .unwrap();

    assert_eq!(component.configure, vec!["./configure", "cmake .."]);
    assert_eq!(component.build, vec!["make -j4", "make docs", "make man"]);
    assert!(component.check.is_empty());
  }

  #[test]
  fn actions_accumulate_per_state_and_timing() {
    let component = ComponentBuilder::new("app")
      .action(PackageState::Install, ActionTiming::Post, ["systemctl daemon-reload"])
      .action(PackageState::Install, ActionTiming::Post, ["systemctl enable app"])
      .action(PackageState::Removal, ActionTiming::Pre, ["systemctl stop app"])
      .finish()
      .unwrap();

    assert_eq!(component.actions.len(), 2);
    assert_eq!(
      component.actions[0].scripts,
      vec!["systemctl daemon-reload", "systemctl enable app"]
    );
  }

  #[test]
  fn finish_rejects_install_patch_without_destination() {
    let mut patch = Patch::new("fix.patch");
    patch.phase = super::super::PatchPhase::Install;
    let err = ComponentBuilder::new("app").patch(patch).finish().unwrap_err();
    assert!(matches!(err, ConfigError::MissingPatchDestination(_)));
  }

  #[test]
  fn finish_rejects_patches_sharing_a_file_name() {
    let err = ComponentBuilder::new("app")
      .patch(Patch::new("/defs/patches/app/fix.patch"))
      .patch(Patch::new("/defs/patches/common/fix.patch"))
      .finish()
      .unwrap_err();
    match err {
      ConfigError::DuplicatePatchName { component, file_name } => {
        assert_eq!(component, "app");
        assert_eq!(file_name, "fix.patch");
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}
