//! In-process execution of a [`RuleSet`] with make semantics.
//!
//! Targets are visited depth-first in prerequisite order. A non-phony target
//! is skipped when its completion marker exists in the workdir, no
//! prerequisite ran in this pass, and no prerequisite marker is newer than
//! it. Each recipe line runs through `/bin/sh -c` in the workdir after
//! `$(workdir)`/`$(tempdir)` expansion and `$$` unescaping.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::process::{CommandRunner, Invocation, run_checked};

use super::{BuildRule, RuleError, RuleSet};

/// Targets executed and skipped by one [`RuleRunner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
  pub executed: Vec<String>,
  pub skipped: Vec<String>,
}

pub struct RuleRunner<'a> {
  rules: &'a RuleSet,
  runner: &'a dyn CommandRunner,
  workdir: PathBuf,
  tempdir: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Visiting,
  Done,
}

impl<'a> RuleRunner<'a> {
  pub fn new(rules: &'a RuleSet, runner: &'a dyn CommandRunner, workdir: impl Into<PathBuf>) -> Self {
    Self {
      rules,
      runner,
      workdir: workdir.into(),
      tempdir: None,
    }
  }

  /// Use `dir` for `$(tempdir)` instead of a fresh temporary directory.
  pub fn tempdir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.tempdir = Some(dir.into());
    self
  }

  /// Make `targets` (or `all` when empty).
  pub async fn run<S: AsRef<str>>(&self, targets: &[S]) -> Result<RunReport, RuleError> {
    let goals: Vec<&str> = if targets.is_empty() {
      vec!["all"]
    } else {
      targets.iter().map(AsRef::as_ref).collect()
    };
    let plan = self.plan(&goals)?;

    let scratch;
    let tempdir = match &self.tempdir {
      Some(dir) => dir.clone(),
      None => {
        scratch = tempfile::Builder::new()
          .prefix("kiln-rules-")
          .tempdir()
          .map_err(|source| RuleError::Io {
            path: std::env::temp_dir(),
            source,
          })?;
        scratch.path().to_path_buf()
      }
    };

    let mut report = RunReport::default();
    let mut ran: HashSet<&str> = HashSet::new();
    for rule in plan {
      if self.up_to_date(rule, &ran)? {
        debug!(target = %rule.target, "up to date");
        report.skipped.push(rule.target.clone());
        continue;
      }

      info!(target = %rule.target, "making target");
      for line in &rule.recipe {
        let script = expand(line, &self.workdir, &tempdir);
        let invocation = Invocation::shell(script).cwd(&self.workdir);
        run_checked(self.runner, &invocation)
          .await
          .map_err(|source| RuleError::Recipe {
            target: rule.target.clone(),
            source,
          })?;
      }
      ran.insert(rule.target.as_str());
      report.executed.push(rule.target.clone());
    }
    Ok(report)
  }

  /// Rules reachable from `goals`, prerequisites first.
  fn plan(&self, goals: &[&str]) -> Result<Vec<&'a BuildRule>, RuleError> {
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut order = Vec::new();
    for goal in goals {
      self.visit(goal, &mut marks, &mut order)?;
    }
    Ok(order)
  }

  fn visit(&self, target: &str, marks: &mut HashMap<String, Mark>, order: &mut Vec<&'a BuildRule>) -> Result<(), RuleError> {
    match marks.get(target) {
      Some(Mark::Done) => return Ok(()),
      Some(Mark::Visiting) => {
        // The graph check names the whole cycle.
        self.rules.verify()?;
        return Err(RuleError::UnknownTarget(target.to_string()));
      }
      None => {}
    }

    let rules: &'a RuleSet = self.rules;
    let Some(rule) = rules.get(target) else {
      if self.workdir.join(target).exists() {
        marks.insert(target.to_string(), Mark::Done);
        return Ok(());
      }
      return Err(RuleError::UnknownTarget(target.to_string()));
    };

    marks.insert(target.to_string(), Mark::Visiting);
    for dep in &rule.dependencies {
      self.visit(dep, marks, order)?;
    }
    marks.insert(target.to_string(), Mark::Done);
    order.push(rule);
    Ok(())
  }

  fn up_to_date(&self, rule: &BuildRule, ran: &HashSet<&str>) -> Result<bool, RuleError> {
    if rule.phony {
      return Ok(false);
    }
    let Some(built) = self.marker_time(&rule.target)? else {
      return Ok(false);
    };

    for dep in &rule.dependencies {
      if ran.contains(dep.as_str()) {
        return Ok(false);
      }
      if let Some(dep_time) = self.marker_time(dep)?
        && dep_time > built
      {
        return Ok(false);
      }
    }
    Ok(true)
  }

  fn marker_time(&self, target: &str) -> Result<Option<SystemTime>, RuleError> {
    let path = self.workdir.join(target);
    match std::fs::metadata(&path) {
      Ok(meta) => meta.modified().map(Some).map_err(|source| RuleError::Io { path, source }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(RuleError::Io { path, source }),
    }
  }
}

/// Expand the make variables the synthesizer emits.
fn expand(line: &str, workdir: &Path, tempdir: &Path) -> String {
  let mut out = String::with_capacity(line.len());
  let mut rest = line;
  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let tail = &rest[pos..];
    if let Some(after) = tail.strip_prefix("$$") {
      out.push('$');
      rest = after;
    } else if let Some(after) = tail.strip_prefix("$(workdir)") {
      out.push_str(&workdir.to_string_lossy());
      rest = after;
    } else if let Some(after) = tail.strip_prefix("$(tempdir)") {
      out.push_str(&tempdir.to_string_lossy());
      rest = after;
    } else {
      out.push('$');
      rest = &tail[1..];
    }
  }
  out.push_str(rest);
  out
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::TempDir;

  use super::*;
  use crate::process::MockRunner;
  use crate::rules::BuildRule;

  fn chain() -> RuleSet {
    let mut rules = RuleSet::new();
    let phases = ["unpack", "patch", "configure", "build"];
    for (i, phase) in phases.iter().enumerate() {
      let mut rule = BuildRule::new(format!("app-{phase}")).line(format!("echo {phase}"));
      if i > 0 {
        rule = rule.depends_on(format!("app-{}", phases[i - 1]));
      }
      rules.push(rule.done()).unwrap();
    }
    rules
  }

  #[test]
  fn expand_substitutes_make_variables() {
    let line = "cd $(workdir) && mktemp -p $(tempdir) && echo $$HOME $(other)";
    assert_eq!(
      expand(line, Path::new("/w"), Path::new("/t")),
      "cd /w && mktemp -p /t && echo $HOME $(other)"
    );
  }

  #[tokio::test]
  async fn runs_chain_in_prerequisite_order() {
    let temp = TempDir::new().unwrap();
    let rules = chain();
    let runner = MockRunner::new();

    let report = RuleRunner::new(&rules, &runner, temp.path())
      .tempdir(temp.path())
      .run(&["app-build"])
      .await
      .unwrap();

    assert_eq!(report.executed, vec!["app-unpack", "app-patch", "app-configure", "app-build"]);
    let commands = runner.commands();
    assert!(commands[0].ends_with("'echo unpack'"));
    assert!(commands[1].ends_with("'touch app-unpack'"));
    assert!(runner.position("echo patch") < runner.position("echo configure"));
  }

  #[tokio::test]
  async fn resumes_after_completed_phases() {
    let temp = TempDir::new().unwrap();
    for marker in ["app-unpack", "app-patch"] {
      fs::write(temp.path().join(marker), "").unwrap();
    }
    let rules = chain();
    let runner = MockRunner::new();

    let report = RuleRunner::new(&rules, &runner, temp.path())
      .tempdir(temp.path())
      .run(&["app-build"])
      .await
      .unwrap();

    assert_eq!(report.skipped, vec!["app-unpack", "app-patch"]);
    assert_eq!(report.executed, vec!["app-configure", "app-build"]);
    assert!(runner.position("echo unpack").is_none());
    assert!(runner.position("echo patch").is_none());
  }

  #[tokio::test]
  async fn failing_recipe_stops_the_run() {
    let temp = TempDir::new().unwrap();
    let rules = chain();
    let runner = MockRunner::new();
    runner.fail_on("echo configure", 2);

    let err = RuleRunner::new(&rules, &runner, temp.path())
      .tempdir(temp.path())
      .run(&["app-build"])
      .await
      .unwrap_err();

    assert!(matches!(err, RuleError::Recipe { ref target, .. } if target == "app-configure"));
    assert!(runner.position("echo build").is_none());
  }

  #[tokio::test]
  async fn unknown_target_is_an_error() {
    let temp = TempDir::new().unwrap();
    let rules = chain();
    let runner = MockRunner::new();
    let err = RuleRunner::new(&rules, &runner, temp.path())
      .run(&["missing"])
      .await
      .unwrap_err();
    assert!(matches!(err, RuleError::UnknownTarget(t) if t == "missing"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn system_runner_writes_markers() {
    let temp = TempDir::new().unwrap();
    let rules = chain();
    let runner = crate::process::SystemRunner;

    RuleRunner::new(&rules, &runner, temp.path()).run(&["app-build"]).await.unwrap();
    assert!(temp.path().join("app-build").exists());

    let report = RuleRunner::new(&rules, &runner, temp.path()).run(&["app-build"]).await.unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(report.skipped.len(), 4);
  }
}
