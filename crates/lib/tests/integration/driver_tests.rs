//! Whole builds on the local engine, with every shell command going to a
//! recording runner.

use std::path::Path;
use std::sync::Arc;

use kiln_lib::config::UserConfig;
use kiln_lib::driver::{BuildOptions, BuildState, Driver, PreservePolicy, create_engine};
use kiln_lib::engine::EngineRegistry;
use kiln_lib::error::{ErrorKind, KilnError};
use kiln_lib::process::MockRunner;
use kiln_lib::project::Project;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::common::{load_my_app, my_app_configdir, write};

fn local_options(workdir: &Path, output_dir: &Path, preserve: PreservePolicy) -> BuildOptions {
  BuildOptions {
    engine: Some("local".to_string()),
    preserve,
    workdir: Some(workdir.to_path_buf()),
    remote_workdir: Some(workdir.to_string_lossy().into_owned()),
    output_dir: output_dir.to_path_buf(),
    ..Default::default()
  }
}

fn driver(project: Project, runner: Arc<MockRunner>, options: BuildOptions) -> Driver {
  let registry = EngineRegistry::with_defaults().unwrap();
  let engine = create_engine(&registry, &project, runner.clone(), UserConfig::default(), &options).unwrap();
  Driver::new(project, engine, runner, UserConfig::default(), options)
}

#[tokio::test]
async fn local_build_runs_make_and_collects_output() {
  let configdir = my_app_configdir();
  let scratch = TempDir::new().unwrap();
  let workdir = scratch.path().join("work");
  let output_dir = scratch.path().join("out");
  // What make would have left behind.
  write(&workdir.join("output/el/7/products/x86_64/my-app-1.2.3-1.el7.x86_64.rpm"), "rpm");

  let runner = Arc::new(MockRunner::new());
  let options = local_options(&workdir, &output_dir, PreservePolicy::OnFailure);
  let mut driver = driver(load_my_app(configdir.path()), runner.clone(), options);

  let report = driver.run().await.unwrap();

  assert_eq!(report.engine, "local");
  assert_eq!(report.platform, "el-7-x86_64");
  assert_eq!(driver.state(), BuildState::TornDown);

  let install = runner.position("zlib-devel").unwrap();
  let make = runner.position(&format!("(cd {}; make)", workdir.display())).unwrap();
  assert!(runner.position("mkdir -p").unwrap() < install);
  assert!(install < make);

  assert!(workdir.join("Makefile").is_file());
  assert!(workdir.join("bill-of-materials").is_file());
  assert!(output_dir.join("output/el/7/products/x86_64/my-app-1.2.3-1.el7.x86_64.rpm").is_file());
  // A workdir the caller named is never removed.
  assert!(workdir.is_dir());
}

#[tokio::test]
async fn failed_make_is_a_remote_execution_error() {
  let configdir = my_app_configdir();
  let scratch = TempDir::new().unwrap();
  let workdir = scratch.path().join("work");

  let runner = Arc::new(MockRunner::new());
  runner.fail_on("; make)", 2);
  let options = local_options(&workdir, &scratch.path().join("out"), PreservePolicy::Never);
  let mut driver = driver(load_my_app(configdir.path()), runner.clone(), options);

  let err = driver.run().await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::RemoteExecution);
  assert_eq!(driver.state(), BuildState::TornDown);
}

#[tokio::test]
async fn source_checksum_gates_the_build() {
  let body = b"component tarball";
  let mut server = mockito::Server::new_async().await;
  let _tarball = server
    .mock("GET", "/component3-3.0.tar.gz")
    .with_status(200)
    .with_body(body)
    .create_async()
    .await;

  let good = hex::encode(Sha256::digest(body));
  let bad = "0".repeat(64);

  for (sum, expect_ok) in [(good.as_str(), true), (bad.as_str(), false)] {
    let configdir = my_app_configdir();
    write(
      &configdir.path().join("components/component3.toml"),
      &format!(
        r#"
          version = "3.0"
          url = "{}/component3-3.0.tar.gz"
          sum = "{sum}"
          sum_type = "sha256"
          build = ["echo c3-build"]
        "#,
        server.url()
      ),
    );
    let mut project = load_my_app(configdir.path());
    project.component("component3").unwrap();

    let scratch = TempDir::new().unwrap();
    let workdir = scratch.path().join("work");
    write(&workdir.join("output/my-app.rpm"), "rpm");
    let runner = Arc::new(MockRunner::new());
    let options = local_options(&workdir, &scratch.path().join("out"), PreservePolicy::OnFailure);
    let mut driver = driver(project, runner.clone(), options);

    let result = driver.run().await;
    if expect_ok {
      result.unwrap();
      assert!(workdir.join("component3-3.0.tar.gz").is_file());
      assert!(runner.position("; make)").is_some());
    } else {
      let err = result.unwrap_err();
      match &err {
        KilnError::SourcesFailed { failures } => {
          assert_eq!(failures.len(), 1);
          assert_eq!(failures[0].0, "component3");
          let message = failures[0].1.to_string();
          assert!(message.contains(&bad), "{message}");
          assert!(message.contains(&good), "{message}");
        }
        other => panic!("unexpected error: {other}"),
      }
      assert!(runner.position("; make)").is_none());
      // on-failure keeps the (non-ephemeral) host as it was.
      assert_ne!(driver.state(), BuildState::TornDown);
    }
  }
}
