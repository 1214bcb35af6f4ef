//! Builds on the machine kiln runs on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::platform::Platform;
use crate::process::{CommandRunner, Invocation, run_checked};
use crate::util::fs::copy_tree;

use super::{Capabilities, Engine, EngineContext, EngineError, Step, prepare_host};

const NAME: &str = "local";

pub struct LocalEngine {
  platform: Platform,
  runner: Arc<dyn CommandRunner>,
  configured_workdir: Option<String>,
  target: Option<String>,
  workdir: Option<PathBuf>,
}

impl LocalEngine {
  pub fn new(ctx: EngineContext) -> Self {
    Self {
      platform: ctx.platform,
      runner: ctx.runner,
      configured_workdir: ctx.remote_workdir,
      target: None,
      workdir: None,
    }
  }

  fn ready_workdir(&self, operation: Step) -> Result<&Path, EngineError> {
    self.workdir.as_deref().ok_or(EngineError::NotReady { engine: NAME, operation })
  }

  fn io_error(step: Step, path: &Path) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |source| EngineError::Io {
      engine: NAME,
      step,
      path: path.to_path_buf(),
      source,
    }
  }
}

#[async_trait]
impl Engine for LocalEngine {
  fn name(&self) -> &'static str {
    NAME
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities::default()
  }

  fn target(&self) -> Option<&str> {
    self.target.as_deref()
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.workdir.as_deref().and_then(Path::to_str)
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    self.target = Some("localhost".to_string());
    Ok("localhost".to_string())
  }

  async fn setup(&mut self) -> Result<(), EngineError> {
    let configured = match &self.configured_workdir {
      Some(dir) => dir.clone(),
      // Kept past the engine's lifetime; the driver decides whether to remove it.
      None => tempfile::Builder::new()
        .prefix("kiln-")
        .tempdir()
        .map_err(Self::io_error(Step::Provision, &std::env::temp_dir()))?
        .keep()
        .to_string_lossy()
        .into_owned(),
    };
    let dir = prepare_host(&*self, &self.platform, Some(&configured)).await?;
    info!(engine = NAME, workdir = %dir, "local workdir ready");
    self.workdir = Some(PathBuf::from(dir));
    Ok(())
  }

  async fn dispatch(&self, command: &str, capture: bool) -> Result<Option<String>, EngineError> {
    debug!(engine = NAME, command, "running locally");
    let mut invocation = Invocation::shell(command).inherit_output(!capture);
    if let Some(dir) = self.workdir.as_deref().filter(|d| d.is_dir()) {
      invocation = invocation.cwd(dir);
    }
    let output = run_checked(self.runner.as_ref(), &invocation)
      .await
      .map_err(|source| EngineError::Command {
        engine: NAME,
        step: Step::Dispatch,
        source,
      })?;
    Ok(capture.then_some(output.stdout))
  }

  async fn ship_workdir(&self, workdir: &Path) -> Result<(), EngineError> {
    let dest = self.ready_workdir(Step::Ship)?.to_path_buf();
    if dunce::canonicalize(workdir).ok() == dunce::canonicalize(&dest).ok() {
      return Ok(());
    }
    let src = workdir.to_path_buf();
    let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dest, false).map_err(|e| (dest, e)))
      .await
      .map_err(|e| EngineError::Io {
        engine: NAME,
        step: Step::Ship,
        path: workdir.to_path_buf(),
        source: std::io::Error::other(e),
      })?
      .map_err(|(path, source)| EngineError::Io {
        engine: NAME,
        step: Step::Ship,
        path,
        source,
      })?;
    debug!(engine = NAME, files = copied, "workdir copied");
    Ok(())
  }

  async fn retrieve_built_artifact(&self, paths: &[String], output_dir: &Path) -> Result<(), EngineError> {
    let workdir = self.ready_workdir(Step::Retrieve)?;
    std::fs::create_dir_all(output_dir).map_err(Self::io_error(Step::Retrieve, output_dir))?;
    for path in paths {
      let src = workdir.join(path);
      let Some(name) = src.file_name() else {
        continue;
      };
      let dest = output_dir.join(name);
      copy_tree(&src, &dest, true).map_err(Self::io_error(Step::Retrieve, &src))?;
    }
    Ok(())
  }

  async fn teardown(&mut self) -> Result<(), EngineError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::test_support::context;
  use tempfile::TempDir;

  fn platform() -> Platform {
    Platform::from_name("el-7-x86_64").unwrap()
  }

  #[tokio::test]
  async fn configured_workdir_is_created_with_mkdir() {
    let temp = TempDir::new().unwrap();
    let (mut ctx, runner) = context(platform());
    let dir = temp.path().join("work").to_string_lossy().into_owned();
    ctx.remote_workdir = Some(dir.clone());
    let mut engine = LocalEngine::new(ctx);

    assert_eq!(engine.select_target().await.unwrap(), "localhost");
    engine.setup().await.unwrap();

    assert_eq!(engine.remote_workdir(), Some(dir.as_str()));
    assert!(runner.position(&format!("mkdir -p {dir}")).is_some());
  }

  #[tokio::test]
  async fn provisioning_runs_before_workdir() {
    let temp = TempDir::new().unwrap();
    let mut platform = platform();
    platform.provisioning = vec!["yum install -y make".into(), "echo ok".into()];
    let (mut ctx, runner) = context(platform);
    ctx.remote_workdir = Some(temp.path().to_string_lossy().into_owned());
    let mut engine = LocalEngine::new(ctx);
    engine.setup().await.unwrap();

    assert_eq!(runner.position("yum install -y make; echo ok"), Some(0));
    assert_eq!(runner.position("mkdir -p"), Some(1));
  }

  #[tokio::test]
  async fn ship_and_retrieve_copy_files() {
    let temp = TempDir::new().unwrap();
    let local = temp.path().join("local");
    let build = temp.path().join("build");
    std::fs::create_dir_all(local.join("output/el/7")).unwrap();
    std::fs::write(local.join("Makefile"), "all:\n").unwrap();
    std::fs::write(local.join("output/el/7/app.rpm"), "rpm").unwrap();

    let (mut ctx, _runner) = context(platform());
    ctx.remote_workdir = Some(build.to_string_lossy().into_owned());
    let mut engine = LocalEngine::new(ctx);
    engine.setup().await.unwrap();
    std::fs::create_dir_all(&build).unwrap();

    engine.ship_workdir(&local).await.unwrap();
    assert!(build.join("Makefile").exists());

    let out = temp.path().join("out");
    engine.retrieve_built_artifact(&["output".into()], &out).await.unwrap();
    assert_eq!(std::fs::read_to_string(out.join("output/el/7/app.rpm")).unwrap(), "rpm");
  }

  #[tokio::test]
  async fn dispatch_before_setup_still_runs() {
    let (ctx, runner) = context(platform());
    let engine = LocalEngine::new(ctx);
    runner.respond_ok("uname", "Linux\n");
    let out = engine.dispatch("uname", true).await.unwrap();
    assert_eq!(out.as_deref(), Some("Linux\n"));
  }

  #[tokio::test]
  async fn ship_before_setup_is_not_ready() {
    let (ctx, _runner) = context(platform());
    let engine = LocalEngine::new(ctx);
    let err = engine.ship_workdir(Path::new("/tmp")).await.unwrap_err();
    assert!(matches!(err, EngineError::NotReady { operation: Step::Ship, .. }));
  }
}
