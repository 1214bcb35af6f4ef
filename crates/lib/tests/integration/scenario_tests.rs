//! The `my-app` on `el-7-x86_64` scenario, from definition files to
//! executed recipes.

use kiln_lib::driver::render;
use kiln_lib::process::MockRunner;
use kiln_lib::rules::{RuleRunner, synthesize};
use kiln_lib::source::RewriteRules;
use tempfile::TempDir;

use super::common::{load_my_app, my_app_configdir};

#[test]
fn definitions_load_in_declaration_order() {
  let configdir = my_app_configdir();
  let project = load_my_app(configdir.path());

  assert_eq!(project.component_names(), vec!["component1", "component2"]);
  assert_eq!(project.list_build_dependencies(), vec!["zlib-devel"]);
  let component1 = project.get_component("component1").unwrap();
  assert_eq!(component1.configure, vec!["echo c1-configure /opt/my-app"]);
}

#[tokio::test]
async fn component2_configure_waits_for_component1_install() {
  let configdir = my_app_configdir();
  let workdir = TempDir::new().unwrap();
  let mut project = load_my_app(configdir.path());
  render(&mut project, workdir.path(), &RewriteRules::new()).await.unwrap();

  let rules = synthesize(&project).unwrap();
  let configure = rules.get("component2-configure").unwrap();
  assert!(configure.dependencies.contains(&"component2-patch".to_string()));
  assert!(configure.dependencies.contains(&"component1-install".to_string()));

  let runner = MockRunner::new();
  let report = RuleRunner::new(&rules, &runner, workdir.path())
    .tempdir(workdir.path())
    .run(&["component2-configure"])
    .await
    .unwrap();

  let c2_configure = runner.position("echo c2-configure").unwrap();
  for step in ["echo c1-configure", "echo c1-build", "echo c1-install", "touch component1-install"] {
    assert!(runner.position(step).unwrap() < c2_configure, "{step}");
  }
  assert_eq!(report.executed.last().unwrap(), "component2-configure");
  assert!(runner.position("echo c2-build").is_none());
}

#[tokio::test]
async fn rerun_resumes_after_completed_phases() {
  let configdir = my_app_configdir();
  let workdir = TempDir::new().unwrap();
  let mut project = load_my_app(configdir.path());
  render(&mut project, workdir.path(), &RewriteRules::new()).await.unwrap();
  let rules = synthesize(&project).unwrap();

  // The mock runner does not create files, so leave the markers by hand.
  let done = [
    "file-list-before-build",
    "component1-unpack",
    "component1-patch",
    "component1-configure",
  ];
  for marker in done {
    std::fs::write(workdir.path().join(marker), "").unwrap();
  }

  let runner = MockRunner::new();
  let report = RuleRunner::new(&rules, &runner, workdir.path())
    .tempdir(workdir.path())
    .run(&["component1-install"])
    .await
    .unwrap();

  assert_eq!(report.skipped, done);
  assert_eq!(report.executed, vec!["component1-build", "component1-check", "component1-install"]);
  assert!(runner.position("echo c1-configure").is_none());
  assert!(runner.position("echo c1-build").unwrap() < runner.position("echo c1-install").unwrap());
}

#[tokio::test]
async fn only_build_keeps_the_dependency_closure() {
  let configdir = my_app_configdir();
  let workdir = TempDir::new().unwrap();
  let mut project = load_my_app(configdir.path());
  project.retain_components(&["component1"]).unwrap();
  render(&mut project, workdir.path(), &RewriteRules::new()).await.unwrap();

  let rules = synthesize(&project).unwrap();
  assert!(rules.get("component1-install").is_some());
  assert!(rules.get("component2-configure").is_none());
}
