//! Builds on a host the user names with `--target`; nothing is acquired or
//! released.

use std::path::Path;

use async_trait::async_trait;

use crate::platform::Platform;

use super::{Capabilities, Engine, EngineContext, EngineError, RemoteHost, RemoteSession, prepare_host};

const NAME: &str = "base";

pub struct BaseEngine {
  ctx: EngineContext,
  session: RemoteSession,
}

impl BaseEngine {
  pub fn new(ctx: EngineContext) -> Self {
    let session = RemoteSession::new(NAME, ctx.runner.clone());
    Self { ctx, session }
  }
}

/// Connection details for `host` as described by `platform`.
pub(super) fn remote_host(ctx: &EngineContext, host: &str, platform: &Platform) -> RemoteHost {
  RemoteHost::new(host, &platform.engine.target_user, platform.engine.ssh_port).key(ctx.config.ssh.key.clone())
}

#[async_trait]
impl Engine for BaseEngine {
  fn name(&self) -> &'static str {
    NAME
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      remote: true,
      ..Default::default()
    }
  }

  fn required_attributes(&self) -> &'static [&'static str] {
    &["ssh_port"]
  }

  fn target(&self) -> Option<&str> {
    self.session.host().map(|h| h.host.as_str())
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.session.workdir()
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    let host = self.ctx.target.clone().ok_or_else(|| EngineError::NoTarget {
      engine: NAME,
      reason: "no target host given (use --target)".to_string(),
    })?;
    self.session.connect(remote_host(&self.ctx, &host, &self.ctx.platform));
    Ok(host)
  }

  async fn setup(&mut self) -> Result<(), EngineError> {
    let workdir = prepare_host(&*self, &self.ctx.platform, self.ctx.remote_workdir.as_deref()).await?;
    self.session.set_workdir(workdir);
    Ok(())
  }

  async fn dispatch(&self, command: &str, capture: bool) -> Result<Option<String>, EngineError> {
    self.session.dispatch(command, capture).await
  }

  async fn ship_workdir(&self, workdir: &Path) -> Result<(), EngineError> {
    self.session.ship(workdir).await
  }

  async fn retrieve_built_artifact(&self, paths: &[String], output_dir: &Path) -> Result<(), EngineError> {
    self.session.retrieve(paths, output_dir).await
  }

  async fn teardown(&mut self) -> Result<(), EngineError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::test_support::context;

  #[tokio::test]
  async fn requires_a_target() {
    let (ctx, _runner) = context(Platform::from_name("el-7-x86_64").unwrap());
    let mut engine = BaseEngine::new(ctx);
    let err = engine.select_target().await.unwrap_err();
    assert!(matches!(err, EngineError::NoTarget { .. }));
  }

  #[tokio::test]
  async fn setup_uses_mktemp_output() {
    let (mut ctx, runner) = context(Platform::from_name("el-7-x86_64").unwrap());
    ctx.target = Some("builder.example.net".into());
    runner.respond_ok("mktemp -d -p /var/tmp", "/var/tmp/tmp.abc123\n");
    let mut engine = BaseEngine::new(ctx);

    assert_eq!(engine.select_target().await.unwrap(), "builder.example.net");
    engine.setup().await.unwrap();

    assert_eq!(engine.remote_workdir(), Some("/var/tmp/tmp.abc123"));
    let commands = runner.commands();
    assert!(commands[0].starts_with("ssh -p 22 "));
    assert!(commands[0].contains("root@builder.example.net"));
  }

  #[tokio::test]
  async fn empty_mktemp_output_fails_setup() {
    let (mut ctx, runner) = context(Platform::from_name("el-7-x86_64").unwrap());
    ctx.target = Some("builder".into());
    runner.respond_ok("mktemp", "  \n");
    let mut engine = BaseEngine::new(ctx);
    engine.select_target().await.unwrap();
    let err = engine.setup().await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyWorkdir { engine: "base" }));
  }
}
