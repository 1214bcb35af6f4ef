//! Build-rule synthesis.
//!
//! Every component becomes a chain of rules (`unpack`, `patch`, `configure`,
//! `build`, `check`, `install`, optional `cleanup`) plus the phony `clean` and
//! `clobber` teardown rules. Project-level rules collect the installed file
//! list, pack the tarball and run the packager. Non-phony rules end with
//! `touch <target>` so a re-run skips completed phases.
//!
//! The resulting [`RuleSet`] renders to a Makefile ([`render_makefile`]) or
//! runs in-process through [`RuleRunner`].

mod makefile;
mod run;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::component::{Component, PatchPhase};
use crate::consts::{FILE_LIST_AFTER_BUILD, FILE_LIST_BEFORE_BUILD};
use crate::error::{DependencyError, ErrorKind};
use crate::graph::DependencyGraph;
use crate::packaging;
use crate::process::CommandError;
use crate::project::Project;

pub use makefile::render_makefile;
pub use run::{RuleRunner, RunReport};

#[derive(Debug, Error)]
pub enum RuleError {
  #[error("component '{component}' has no resolved source layout")]
  UnresolvedSource { component: String },

  #[error("duplicate rule target '{0}'")]
  DuplicateTarget(String),

  #[error("no rule to make target '{0}'")]
  UnknownTarget(String),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("recipe for '{target}' failed: {source}")]
  Recipe {
    target: String,
    #[source]
    source: CommandError,
  },

  #[error("failed to inspect {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl RuleError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      RuleError::UnresolvedSource { .. } => ErrorKind::SourceAcquisition,
      RuleError::DuplicateTarget(_) | RuleError::UnknownTarget(_) | RuleError::Dependency(_) => ErrorKind::Dependency,
      RuleError::Recipe { .. } => ErrorKind::RemoteExecution,
      RuleError::Io { .. } => ErrorKind::Configuration,
    }
  }
}

/// One target with its prerequisites and recipe lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRule {
  pub target: String,
  pub dependencies: Vec<String>,
  pub recipe: Vec<String>,
  pub phony: bool,
}

impl BuildRule {
  pub fn new(target: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      dependencies: Vec::new(),
      recipe: Vec::new(),
      phony: false,
    }
  }

  pub fn phony(mut self) -> Self {
    self.phony = true;
    self
  }

  pub fn depends_on(mut self, target: impl Into<String>) -> Self {
    self.dependencies.push(target.into());
    self
  }

  pub fn depends_on_all<I, S>(mut self, targets: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.dependencies.extend(targets.into_iter().map(Into::into));
    self
  }

  pub fn line(mut self, line: impl Into<String>) -> Self {
    self.recipe.push(line.into());
    self
  }

  pub fn lines<I, S>(mut self, lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.recipe.extend(lines.into_iter().map(Into::into));
    self
  }

  /// Seal the rule: non-phony rules get their completion marker.
  fn done(mut self) -> Self {
    if !self.phony {
      self.recipe.push(format!("touch {}", self.target));
    }
    self
  }
}

/// Ordered, uniquely named rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
  rules: Vec<BuildRule>,
  index: HashMap<String, usize>,
}

impl RuleSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, rule: BuildRule) -> Result<(), RuleError> {
    if self.index.contains_key(&rule.target) {
      return Err(RuleError::DuplicateTarget(rule.target));
    }
    self.index.insert(rule.target.clone(), self.rules.len());
    self.rules.push(rule);
    Ok(())
  }

  pub fn get(&self, target: &str) -> Option<&BuildRule> {
    self.index.get(target).map(|&i| &self.rules[i])
  }

  pub fn rules(&self) -> &[BuildRule] {
    &self.rules
  }

  pub fn targets(&self) -> impl Iterator<Item = &str> {
    self.rules.iter().map(|r| r.target.as_str())
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Every prerequisite that names a rule, as a graph.
  pub fn graph(&self) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for rule in &self.rules {
      graph.add_node(&rule.target);
      for dep in &rule.dependencies {
        if self.index.contains_key(dep) {
          graph.add_dependency(&rule.target, dep);
        }
      }
    }
    graph
  }

  pub fn verify(&self) -> Result<(), RuleError> {
    Ok(self.graph().verify_acyclic()?)
  }
}

/// `a && b && c` over the present, non-empty parts.
fn and_and<I>(parts: I) -> String
where
  I: IntoIterator<Item = Option<String>>,
{
  parts
    .into_iter()
    .flatten()
    .filter(|p| !p.is_empty())
    .collect::<Vec<_>>()
    .join(" && ")
}

fn target(component: &str, phase: &str) -> String {
  format!("{component}-{phase}")
}

/// Directory the configure, build, check and install commands run in.
fn work_dir(component: &Component) -> String {
  match &component.build_dir {
    Some(build_dir) => format!("{}/{}", component.dirname().trim_end_matches('/'), build_dir),
    None => component.dirname().to_string(),
  }
}

/// One line running `commands` in `dir` with the component environment, or
/// nothing when there are no commands.
fn command_line(component: &Component, dir: &str, commands: &[String]) -> Option<String> {
  if commands.is_empty() {
    return None;
  }
  Some(and_and([
    component.environment_exports(),
    Some(format!("cd {dir}")),
    Some(commands.join(" && ")),
  ]))
}

struct Synthesizer<'a> {
  project: &'a Project,
  /// Names of the project's components, for cross-component edges.
  members: HashSet<&'a str>,
  rules: RuleSet,
}

impl<'a> Synthesizer<'a> {
  fn new(project: &'a Project) -> Self {
    Self {
      project,
      members: project.component_names().into_iter().collect(),
      rules: RuleSet::new(),
    }
  }

  /// `D-install` for every build requirement that is a project component.
  fn requirement_installs(&self, component: &Component) -> Vec<String> {
    component
      .build_requires
      .iter()
      .filter(|dep| self.members.contains(dep.as_str()))
      .map(|dep| target(dep, "install"))
      .collect()
  }

  fn patch_lines(&self, component: &Component, phase: PatchPhase) -> Vec<String> {
    let patch_tool = &self.project.platform.toolchain.patch;
    component
      .patches_in(phase)
      .map(|patch| {
        let dir = match phase {
          PatchPhase::Unpack => component.dirname(),
          PatchPhase::Install => patch.destination.as_deref().unwrap_or("/"),
        };
        format!("cd {dir} && {}", patch.apply_command(patch_tool, &component.name))
      })
      .collect()
  }

  fn extract_line(component: &Component) -> Result<String, RuleError> {
    let layout = component.layout.as_ref().ok_or_else(|| RuleError::UnresolvedSource {
      component: component.name.clone(),
    })?;
    Ok(and_and([component.environment_exports(), Some(layout.extract.clone())]))
  }

  fn add(&mut self, rule: BuildRule) -> Result<(), RuleError> {
    self.rules.push(rule.done())
  }

  fn component_chain(&mut self, component: &Component) -> Result<(), RuleError> {
    let name = component.name.as_str();
    let dir = work_dir(component);
    let make = &self.project.platform.toolchain.make;

    self.add(
      BuildRule::new(target(name, "unpack"))
        .depends_on(FILE_LIST_BEFORE_BUILD)
        .line(Self::extract_line(component)?),
    )?;

    self.add(
      BuildRule::new(target(name, "patch"))
        .depends_on(target(name, "unpack"))
        .lines(self.patch_lines(component, PatchPhase::Unpack)),
    )?;

    let mut configure = BuildRule::new(target(name, "configure"))
      .depends_on(target(name, "patch"))
      .depends_on_all(self.requirement_installs(component));
    if component.build_dir.is_some() {
      configure = configure.line(format!("[ -d {dir} ] || mkdir -p {dir}"));
    }
    configure = configure.lines(command_line(component, &dir, &component.configure));
    self.add(configure)?;

    self.add(
      BuildRule::new(target(name, "build"))
        .depends_on(target(name, "configure"))
        .lines(command_line(component, &dir, &component.build)),
    )?;

    let mut check = BuildRule::new(target(name, "check")).depends_on(target(name, "build"));
    if !self.project.skipcheck {
      check = check.lines(command_line(component, &dir, &component.check));
    }
    self.add(check)?;

    self.add(
      BuildRule::new(target(name, "install"))
        .depends_on(target(name, "check"))
        .lines(command_line(component, &dir, &component.install))
        .lines(self.patch_lines(component, PatchPhase::Install)),
    )?;

    let mut clean = BuildRule::new(target(name, "clean"))
      .phony()
      .line(format!("[ -d {dir} ] && cd {dir} && {make} clean || true"));
    for phase in ["configure", "build", "check", "install"] {
      let marker = target(name, phase);
      clean = clean.line(format!("[ -e {marker} ] && rm {marker} || true"));
    }
    self.add(clean)?;

    self.clobber(component)
  }

  fn install_only_chain(&mut self, component: &Component) -> Result<(), RuleError> {
    let name = component.name.as_str();

    let mut dirs: Vec<&str> = component.directories.iter().map(|d| d.path.as_str()).collect();
    dirs.extend(component.files.iter().filter_map(|f| f.parent()));
    let mut seen = HashSet::new();
    dirs.retain(|dir| seen.insert(*dir));
    let mut create = BuildRule::new(target(name, "create-directories")).depends_on(FILE_LIST_BEFORE_BUILD);
    if !dirs.is_empty() {
      create = create.line(format!("mkdir -p {}", dirs.join(" ")));
    }
    self.add(create)?;

    self.add(
      BuildRule::new(target(name, "copy-sources"))
        .depends_on(target(name, "create-directories"))
        .line(Self::extract_line(component)?)
        .lines(self.patch_lines(component, PatchPhase::Unpack)),
    )?;

    self.add(
      BuildRule::new(target(name, "install"))
        .depends_on(target(name, "copy-sources"))
        .depends_on_all(self.requirement_installs(component))
        .lines(command_line(component, component.dirname(), &component.install))
        .lines(self.patch_lines(component, PatchPhase::Install)),
    )?;

    let marker = target(name, "install");
    self.add(
      BuildRule::new(target(name, "clean"))
        .phony()
        .line(format!("[ -e {marker} ] && rm {marker} || true")),
    )?;

    self.clobber(component)
  }

  fn clobber(&mut self, component: &Component) -> Result<(), RuleError> {
    let name = component.name.as_str();
    let dirname = component.dirname().trim_end_matches('/');
    let first = if component.is_install_only() {
      target(name, "copy-sources")
    } else {
      target(name, "unpack")
    };

    let mut clobber = BuildRule::new(target(name, "clobber"))
      .phony()
      .depends_on(target(name, "clean"));
    if !dirname.is_empty() && dirname != "." {
      clobber = clobber.line(format!("[ -d {dirname} ] && rm -r {dirname} || true"));
    }
    clobber = clobber.line(format!("[ -e {first} ] && rm {first} || true"));
    self.add(clobber)?;

    if self.project.cleanup {
      let layout_cleanup = component.layout.as_ref().map_or(":", |l| l.cleanup.as_str());
      self.add(
        BuildRule::new(target(name, "cleanup"))
          .depends_on(target(name, "install"))
          .line(layout_cleanup),
      )?;
    }
    Ok(())
  }

  fn project_rules(&mut self) -> Result<(), RuleError> {
    let project = self.project;
    let toolchain = &project.platform.toolchain;
    let names = project.component_names();
    let project_target = format!("{}-project", project.name);
    let tarball = project.tarball_name();
    let staging = format!("{}-{}", project.name, project.version.as_deref().unwrap_or("0.0.0"));
    let find_dirs = packaging::tracked_directories(project).join(" ");
    let file_list = |out: &str| format!("{} {find_dirs} 2>/dev/null | {} > {out}", toolchain.find, toolchain.sort);

    self.add(BuildRule::new(FILE_LIST_BEFORE_BUILD).line(file_list(FILE_LIST_BEFORE_BUILD)))?;
    self.add(
      BuildRule::new(FILE_LIST_AFTER_BUILD)
        .depends_on_all(names.iter().map(|n| target(n, "install")))
        .line(file_list(FILE_LIST_AFTER_BUILD)),
    )?;

    let mut project_rule = BuildRule::new(&project_target).depends_on(FILE_LIST_AFTER_BUILD);
    if project.cleanup {
      self.add(BuildRule::new("cleanup-components").depends_on_all(names.iter().map(|n| target(n, "cleanup"))))?;
      project_rule = project_rule.depends_on("cleanup-components");
    }
    self.add(project_rule)?;

    self.add(
      BuildRule::new("file-list")
        .depends_on(&project_target)
        .line(format!("comm -23 {FILE_LIST_AFTER_BUILD} {FILE_LIST_BEFORE_BUILD} > file-list")),
    )?;

    self.add(
      BuildRule::new(&tarball)
        .depends_on("file-list")
        .line(format!("mkdir -p {staging}"))
        .line(format!(
          "{tar} -cf - --no-recursion -T file-list | ( cd {staging}/ && {tar} xfp - )",
          tar = toolchain.tar
        ))
        .line(format!("{} -cf - {staging}/ | gzip -9c > {tarball}", toolchain.tar))
        .line(format!("rm -rf {staging}"))
        .line(format!("mkdir -p {}", crate::consts::OUTPUT_DIR))
        .line(format!("cp {tarball} {}/", crate::consts::OUTPUT_DIR)),
    )?;

    let mut all = BuildRule::new("all").phony().depends_on(&project_target);
    if project.no_packaging {
      all = all.depends_on(&tarball);
    } else {
      self.add(
        BuildRule::new("package")
          .depends_on(&tarball)
          .lines(packaging::generate_package(project)),
      )?;
      all = all.depends_on("package");
    }
    self.add(all)?;

    self.add(
      BuildRule::new("clean")
        .phony()
        .depends_on_all(names.iter().map(|n| target(n, "clean"))),
    )?;

    let mut clobber = BuildRule::new("clobber")
      .phony()
      .depends_on("clean")
      .depends_on_all(names.iter().map(|n| target(n, "clobber")));
    let mut markers = vec![
      FILE_LIST_BEFORE_BUILD.to_string(),
      FILE_LIST_AFTER_BUILD.to_string(),
      "file-list".to_string(),
      project_target.clone(),
      tarball.clone(),
    ];
    if !project.no_packaging {
      markers.push("package".to_string());
    }
    if project.cleanup {
      markers.push("cleanup-components".to_string());
    }
    for marker in markers {
      clobber = clobber.line(format!("[ -e {marker} ] && rm {marker} || true"));
    }
    self.add(clobber)
  }
}

/// Synthesize every rule of `project`.
///
/// Components must have a resolved source layout
/// ([`Component::resolve_source`] or [`Component::get_source`]). Both the
/// component graph and the rule graph are checked for cycles.
pub fn synthesize(project: &Project) -> Result<RuleSet, RuleError> {
  project.component_graph().verify_acyclic()?;

  let mut synth = Synthesizer::new(project);
  for component in &project.components {
    if component.is_install_only() {
      synth.install_only_chain(component)?;
    } else {
      synth.component_chain(component)?;
    }
  }
  synth.project_rules()?;

  let rules = synth.rules;
  rules.verify()?;
  debug!(project = %project.name, rules = rules.len(), "synthesized build rules");
  Ok(rules)
}
