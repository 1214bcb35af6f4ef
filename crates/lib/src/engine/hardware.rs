//! Builds on a pool of shared physical hosts, one build per host at a time.
//!
//! Hosts come from the platform's `build_hosts`. A host is claimed by taking
//! its lock through a [`LockService`]; when every host is busy the engine
//! polls until one frees up or the configured timeout passes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::base::remote_host;
use super::lock::{DirLockService, LockOwner, LockService};
use super::{Capabilities, Engine, EngineContext, EngineError, RemoteSession, prepare_host};

const NAME: &str = "hardware";

pub struct HardwareEngine {
  ctx: EngineContext,
  session: RemoteSession,
  locks: Arc<dyn LockService>,
  owner: LockOwner,
  locked: Option<String>,
}

impl HardwareEngine {
  pub fn new(ctx: EngineContext) -> Self {
    let locks = Arc::new(DirLockService::new(ctx.config.hardware.lock_dir()));
    Self::with_locks(ctx, locks)
  }

  pub fn with_locks(ctx: EngineContext, locks: Arc<dyn LockService>) -> Self {
    let user = ctx
      .config
      .hardware
      .user
      .clone()
      .or_else(|| std::env::var("USER").ok())
      .unwrap_or_else(|| crate::consts::APP_NAME.to_string());
    let owner = LockOwner::current(user, format!("{}-{}", ctx.job_name, ctx.platform.name));
    let session = RemoteSession::new(NAME, ctx.runner.clone());
    Self {
      ctx,
      session,
      locks,
      owner,
      locked: None,
    }
  }

  fn candidates(&self) -> Vec<String> {
    match &self.ctx.target {
      Some(host) => vec![host.clone()],
      None => self.ctx.platform.engine.build_hosts.clone(),
    }
  }

  fn try_any(&self, hosts: &[String]) -> Result<Option<String>, EngineError> {
    for host in hosts {
      if self.locks.try_lock(host, &self.owner)? {
        return Ok(Some(host.clone()));
      }
      // An unreadable lock is still somebody's lock; move on.
      match self.locks.holder(host) {
        Ok(Some(holder)) => debug!(engine = NAME, host = %host, holder = %holder.user, job = %holder.job, "host busy"),
        Ok(None) => {}
        Err(e) => debug!(engine = NAME, host = %host, error = %e, "host busy, holder unknown"),
      }
    }
    Ok(None)
  }
}

#[async_trait]
impl Engine for HardwareEngine {
  fn name(&self) -> &'static str {
    NAME
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      remote: true,
      teardown: true,
      ephemeral: true,
    }
  }

  fn required_attributes(&self) -> &'static [&'static str] {
    &["build_hosts"]
  }

  fn target(&self) -> Option<&str> {
    self.session.host().map(|h| h.host.as_str())
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.session.workdir()
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    let hosts = self.candidates();
    if hosts.is_empty() {
      return Err(EngineError::NoTarget {
        engine: NAME,
        reason: format!("platform {} lists no build_hosts", self.ctx.platform.name),
      });
    }

    let settings = &self.ctx.config.hardware;
    let poll = Duration::from_secs(settings.poll_interval_secs.max(1));
    let deadline = Instant::now() + Duration::from_secs(settings.timeout_secs);
    info!(engine = NAME, hosts = %hosts.join(","), "waiting for a free build host");

    let host = loop {
      if let Some(host) = self.try_any(&hosts)? {
        break host;
      }
      if Instant::now() + poll > deadline {
        return Err(EngineError::NoTarget {
          engine: NAME,
          reason: format!(
            "every host in [{}] stayed locked for {}",
            hosts.join(", "),
            humantime::format_duration(Duration::from_secs(settings.timeout_secs))
          ),
        });
      }
      tokio::time::sleep(poll).await;
    };

    self.locked = Some(host.clone());
    self
      .session
      .connect(remote_host(&self.ctx, &host, &self.ctx.platform));
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
    let Some(host) = self.locked.take() else {
      return Ok(());
    };
    info!(engine = NAME, host = %host, "releasing build host");
    self.locks.unlock(&host, &self.owner)?;
    Ok(())
  }
}
