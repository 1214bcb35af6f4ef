//! Builds inside a throwaway container started from the platform's image.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::platform::Platform;
use crate::process::{CommandRunner, Invocation, run_checked};

use super::{Capabilities, Engine, EngineContext, EngineError, Step, prepare_host};

const NAME: &str = "docker";

pub struct DockerEngine {
  platform: Platform,
  runner: Arc<dyn CommandRunner>,
  configured_workdir: Option<String>,
  container: Option<String>,
  workdir: Option<String>,
}

impl DockerEngine {
  pub fn new(ctx: EngineContext) -> Self {
    Self {
      platform: ctx.platform,
      runner: ctx.runner,
      configured_workdir: ctx.remote_workdir,
      container: None,
      workdir: None,
    }
  }

  fn container_name(&self) -> String {
    format!("kiln-{}-{}", self.platform.name, std::process::id())
  }

  fn ready_container(&self, operation: Step) -> Result<&str, EngineError> {
    self.container.as_deref().ok_or(EngineError::NotReady { engine: NAME, operation })
  }

  fn ready_workdir(&self, operation: Step) -> Result<&str, EngineError> {
    self.workdir.as_deref().ok_or(EngineError::NotReady { engine: NAME, operation })
  }

  async fn docker(&self, step: Step, invocation: Invocation) -> Result<String, EngineError> {
    run_checked(self.runner.as_ref(), &invocation)
      .await
      .map(|out| out.stdout)
      .map_err(|source| EngineError::Command {
        engine: NAME,
        step,
        source,
      })
  }
}

#[async_trait]
impl Engine for DockerEngine {
  fn name(&self) -> &'static str {
    NAME
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      remote: true,
      teardown: true,
      ephemeral: false,
    }
  }

  fn required_attributes(&self) -> &'static [&'static str] {
    &["docker_image"]
  }

  fn target(&self) -> Option<&str> {
    self.container.as_deref()
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.workdir.as_deref()
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    let image = self.platform.engine.docker_image.clone().ok_or_else(|| EngineError::MissingPlatformAttribute {
      engine: NAME,
      platform: self.platform.name.clone(),
      missing: vec!["docker_image".to_string()],
    })?;

    let name = self.container_name();
    let invocation = Invocation::new("docker")
      .args(["run", "-d", "--name", &name])
      .args(self.platform.engine.docker_run_args.iter().cloned())
      .args([image.as_str(), "tail", "-f", "/dev/null"]);
    let stdout = self.docker(Step::SelectTarget, invocation).await?;

    let id = stdout.trim();
    let container = if id.is_empty() { name } else { id.to_string() };
    info!(engine = NAME, image = %image, container = %container, "container started");
    self.container = Some(container.clone());
    Ok(container)
  }

  async fn setup(&mut self) -> Result<(), EngineError> {
    let workdir = prepare_host(&*self, &self.platform, self.configured_workdir.as_deref()).await?;
    self.workdir = Some(workdir);
    Ok(())
  }

  async fn dispatch(&self, command: &str, capture: bool) -> Result<Option<String>, EngineError> {
    let container = self.ready_container(Step::Dispatch)?;
    let invocation = Invocation::new("docker")
      .args(["exec", container, "/bin/sh", "-c", command])
      .inherit_output(!capture);
    let stdout = self.docker(Step::Dispatch, invocation).await?;
    Ok(capture.then_some(stdout))
  }

  async fn ship_workdir(&self, workdir: &Path) -> Result<(), EngineError> {
    let container = self.ready_container(Step::Ship)?;
    let remote = self.ready_workdir(Step::Ship)?;
    self
      .docker(Step::Ship, Invocation::new("docker").args(["exec", container, "mkdir", "-p", remote]))
      .await?;
    let source = format!("{}/.", workdir.to_string_lossy().trim_end_matches('/'));
    self
      .docker(
        Step::Ship,
        Invocation::new("docker").args(["cp", &source, &format!("{container}:{remote}")]),
      )
      .await?;
    Ok(())
  }

  async fn retrieve_built_artifact(&self, paths: &[String], output_dir: &Path) -> Result<(), EngineError> {
    let container = self.ready_container(Step::Retrieve)?;
    let remote = self.ready_workdir(Step::Retrieve)?;
    std::fs::create_dir_all(output_dir).map_err(|source| EngineError::Io {
      engine: NAME,
      step: Step::Retrieve,
      path: output_dir.to_path_buf(),
      source,
    })?;
    let dest = format!("{}/", output_dir.to_string_lossy().trim_end_matches('/'));
    for path in paths {
      let source = format!("{container}:{}/{path}", remote.trim_end_matches('/'));
      self
        .docker(Step::Retrieve, Invocation::new("docker").args(["cp", &source, &dest]))
        .await?;
    }
    Ok(())
  }

  async fn teardown(&mut self) -> Result<(), EngineError> {
    let Some(container) = self.container.clone() else {
      return Ok(());
    };
    info!(engine = NAME, container = %container, "removing container");
    if let Err(err) = self
      .docker(Step::Teardown, Invocation::new("docker").args(["stop", &container]))
      .await
    {
      warn!(engine = NAME, container = %container, error = %err, "docker stop failed; removing anyway");
    }
    self
      .docker(Step::Teardown, Invocation::new("docker").args(["rm", "-f", &container]))
      .await?;
    self.container = None;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::test_support::context;

  fn platform() -> Platform {
    let mut platform = Platform::from_name("debian-12-amd64").unwrap();
    platform.engine.docker_image = Some("debian:12".into());
    platform.engine.docker_run_args = vec!["--privileged".into()];
    platform
  }

  #[tokio::test]
  async fn full_lifecycle_uses_docker_cli() {
    let temp = tempfile::TempDir::new().unwrap();
    let (ctx, runner) = context(platform());
    runner
      .respond_ok("docker run", "abc123\n")
      .respond_ok("mktemp", "/var/tmp/tmp.x1\n");
    let mut engine = DockerEngine::new(ctx);

    assert_eq!(engine.select_target().await.unwrap(), "abc123");
    engine.setup().await.unwrap();
    engine.ship_workdir(Path::new("/work")).await.unwrap();
    engine.dispatch("make", false).await.unwrap();
    engine
      .retrieve_built_artifact(&["output".into()], temp.path())
      .await
      .unwrap();
    engine.teardown().await.unwrap();

    let commands = runner.commands();
    assert!(commands[0].contains("--privileged debian:12 tail -f /dev/null"));
    assert!(commands.contains(&"docker exec abc123 /bin/sh -c 'mktemp -d -p /var/tmp'".to_string()));
    assert!(commands.contains(&"docker cp /work/. abc123:/var/tmp/tmp.x1".to_string()));
    assert!(commands.iter().any(|c| c.starts_with("docker cp abc123:/var/tmp/tmp.x1/output ")));
    assert!(runner.position("docker stop abc123") < runner.position("docker rm -f abc123"));
    assert!(engine.target().is_none());
  }

  #[tokio::test]
  async fn teardown_without_container_is_a_no_op() {
    let (ctx, runner) = context(platform());
    let mut engine = DockerEngine::new(ctx);
    engine.teardown().await.unwrap();
    assert!(runner.commands().is_empty());
  }

  #[test]
  fn missing_image_fails_validation() {
    let (ctx, _runner) = context(Platform::from_name("debian-12-amd64").unwrap());
    let engine = DockerEngine::new(ctx);
    let err = engine.validate_platform(&Platform::from_name("debian-12-amd64").unwrap()).unwrap_err();
    assert!(err.to_string().contains("docker_image"));
  }
}
