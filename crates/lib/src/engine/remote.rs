//! ssh/rsync plumbing shared by every engine that reaches a host over ssh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::process::{CommandRunner, Invocation, run_checked, shell_quote};

use super::{EngineError, Step};

/// A host reachable over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
  pub host: String,
  pub user: String,
  pub port: u16,
  pub key: Option<PathBuf>,
}

impl RemoteHost {
  pub fn new(host: impl Into<String>, user: impl Into<String>, port: u16) -> Self {
    Self {
      host: host.into(),
      user: user.into(),
      port,
      key: None,
    }
  }

  pub fn key(mut self, key: Option<PathBuf>) -> Self {
    self.key = key;
    self
  }

  pub fn destination(&self) -> String {
    format!("{}@{}", self.user, self.host)
  }

  fn ssh_options(&self) -> Vec<String> {
    let mut options = vec![
      "-p".to_string(),
      self.port.to_string(),
      "-o".to_string(),
      "StrictHostKeyChecking=no".to_string(),
      "-o".to_string(),
      "UserKnownHostsFile=/dev/null".to_string(),
      "-o".to_string(),
      "LogLevel=ERROR".to_string(),
    ];
    if let Some(key) = &self.key {
      options.push("-i".to_string());
      options.push(key.to_string_lossy().into_owned());
    }
    options
  }

  /// `ssh <options> user@host <command>`.
  pub fn ssh(&self, command: &str) -> Invocation {
    Invocation::new("ssh")
      .args(self.ssh_options())
      .arg(self.destination())
      .arg(command)
  }

  fn rsync_shell(&self) -> String {
    let options: Vec<String> = self
      .ssh_options()
      .iter()
      .map(|o| if o.contains(' ') { shell_quote(o) } else { o.clone() })
      .collect();
    format!("ssh {}", options.join(" "))
  }

  /// Copy the contents of `local` into `remote_dir`, never overwriting.
  pub fn rsync_to(&self, local: &Path, remote_dir: &str) -> Invocation {
    Invocation::new("rsync")
      .args(["-rHlv", "--no-perms", "--no-owner", "--no-group", "--ignore-existing"])
      .arg("-e")
      .arg(self.rsync_shell())
      .arg(format!("{}/", local.to_string_lossy().trim_end_matches('/')))
      .arg(format!("{}:{}/", self.destination(), remote_dir.trim_end_matches('/')))
  }

  /// Copy `remote_path` into the local directory `local`.
  pub fn rsync_from(&self, remote_path: &str, local: &Path) -> Invocation {
    Invocation::new("rsync")
      .args(["-rHlv", "-O", "--no-perms", "--no-owner", "--no-group"])
      .arg("-e")
      .arg(self.rsync_shell())
      .arg(format!("{}:{}", self.destination(), remote_path))
      .arg(format!("{}/", local.to_string_lossy().trim_end_matches('/')))
  }
}

/// Command runner bound to one host and remote workdir.
#[derive(Clone)]
pub struct RemoteSession {
  engine: &'static str,
  runner: Arc<dyn CommandRunner>,
  host: Option<RemoteHost>,
  workdir: Option<String>,
}

impl RemoteSession {
  pub fn new(engine: &'static str, runner: Arc<dyn CommandRunner>) -> Self {
    Self {
      engine,
      runner,
      host: None,
      workdir: None,
    }
  }

  pub fn connect(&mut self, host: RemoteHost) {
    info!(engine = self.engine, host = %host.host, "using build host");
    self.host = Some(host);
  }

  pub fn host(&self) -> Option<&RemoteHost> {
    self.host.as_ref()
  }

  pub fn set_workdir(&mut self, workdir: String) {
    self.workdir = Some(workdir);
  }

  pub fn workdir(&self) -> Option<&str> {
    self.workdir.as_deref()
  }

  fn ready_host(&self, operation: Step) -> Result<&RemoteHost, EngineError> {
    self.host.as_ref().ok_or(EngineError::NotReady {
      engine: self.engine,
      operation,
    })
  }

  fn ready_workdir(&self, operation: Step) -> Result<&str, EngineError> {
    self.workdir.as_deref().ok_or(EngineError::NotReady {
      engine: self.engine,
      operation,
    })
  }

  async fn run(&self, step: Step, invocation: Invocation) -> Result<String, EngineError> {
    run_checked(self.runner.as_ref(), &invocation)
      .await
      .map(|output| output.stdout)
      .map_err(|source| EngineError::Command {
        engine: self.engine,
        step,
        source,
      })
  }

  pub async fn dispatch(&self, command: &str, capture: bool) -> Result<Option<String>, EngineError> {
    let host = self.ready_host(Step::Dispatch)?;
    debug!(engine = self.engine, host = %host.host, command, "dispatching");
    let stdout = self
      .run(Step::Dispatch, host.ssh(command).inherit_output(!capture))
      .await?;
    Ok(capture.then_some(stdout))
  }

  pub async fn ship(&self, workdir: &Path) -> Result<(), EngineError> {
    let host = self.ready_host(Step::Ship)?;
    let remote = self.ready_workdir(Step::Ship)?;
    info!(engine = self.engine, host = %host.host, remote_workdir = %remote, "shipping workdir");
    self.run(Step::Ship, host.rsync_to(workdir, remote)).await?;
    Ok(())
  }

  pub async fn retrieve(&self, paths: &[String], output_dir: &Path) -> Result<(), EngineError> {
    let host = self.ready_host(Step::Retrieve)?;
    let remote = self.ready_workdir(Step::Retrieve)?;
    std::fs::create_dir_all(output_dir).map_err(|source| EngineError::Io {
      engine: self.engine,
      step: Step::Retrieve,
      path: output_dir.to_path_buf(),
      source,
    })?;
    for path in paths {
      let remote_path = format!("{}/{}", remote.trim_end_matches('/'), path);
      self.run(Step::Retrieve, host.rsync_from(&remote_path, output_dir)).await?;
    }
    Ok(())
  }
}
