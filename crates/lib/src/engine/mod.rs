//! Build-host engines.
//!
//! An [`Engine`] acquires a host, prepares a remote work directory, runs
//! commands there, moves files in and out, and releases the host. Engines are
//! created through an [`EngineRegistry`] built once at startup; the driver
//! tracks the lifecycle and decides when to tear down.

mod abs;
mod base;
mod docker;
mod ec2;
mod hardware;
mod local;
pub mod lock;
mod pooler;
mod registry;
mod remote;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::UserConfig;
use crate::error::ErrorKind;
use crate::platform::Platform;
use crate::process::{CommandError, CommandRunner};
use crate::retry::RetryError;

pub use abs::AbsEngine;
pub use base::BaseEngine;
pub use docker::DockerEngine;
pub use ec2::Ec2Engine;
pub use hardware::HardwareEngine;
pub use local::LocalEngine;
pub use lock::{DirLockService, LockError, LockOwner, LockService};
pub use pooler::PoolerEngine;
pub use registry::{EngineFactory, EngineRegistry, default_engine_for};
pub use remote::{RemoteHost, RemoteSession};

/// What an engine can do; checked by the registry on registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
  /// Runs commands on another machine.
  pub remote: bool,
  /// Has host state to release.
  pub teardown: bool,
  /// The host must be released after every build, whatever the preserve
  /// policy says.
  pub ephemeral: bool,
}

/// Lifecycle step an engine failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  SelectTarget,
  Provision,
  Dispatch,
  Ship,
  Retrieve,
  Teardown,
}

impl Step {
  pub fn as_str(&self) -> &'static str {
    match self {
      Step::SelectTarget => "select target",
      Step::Provision => "provision",
      Step::Dispatch => "dispatch",
      Step::Ship => "ship workdir",
      Step::Retrieve => "retrieve artifacts",
      Step::Teardown => "teardown",
    }
  }

  fn kind(&self) -> ErrorKind {
    match self {
      Step::SelectTarget | Step::Provision => ErrorKind::HostProvisioning,
      Step::Dispatch | Step::Ship | Step::Retrieve => ErrorKind::RemoteExecution,
      Step::Teardown => ErrorKind::Teardown,
    }
  }
}

impl std::fmt::Display for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("{engine} engine cannot build {platform}: missing platform attribute(s) {}", .missing.join(", "))]
  MissingPlatformAttribute {
    engine: &'static str,
    platform: String,
    missing: Vec<String>,
  },

  #[error("{engine} engine requires the '{setting}' setting")]
  MissingSetting { engine: &'static str, setting: &'static str },

  #[error("unknown engine '{0}'")]
  UnknownEngine(String),

  #[error("engine '{0}' is already registered")]
  DuplicateEngine(String),

  #[error("engine '{0}' is ephemeral but cannot tear down")]
  EphemeralWithoutTeardown(String),

  #[error("{engine} engine: {operation} before a host was selected and set up")]
  NotReady { engine: &'static str, operation: Step },

  #[error("{engine} engine: remote mktemp returned no directory")]
  EmptyWorkdir { engine: &'static str },

  #[error("{engine} engine: no build host available: {reason}")]
  NoTarget { engine: &'static str, reason: String },

  #[error("{engine} engine: {step} failed: {source}")]
  Command {
    engine: &'static str,
    step: Step,
    #[source]
    source: CommandError,
  },

  #[error("{engine} engine: {step} failed: {message}")]
  Http {
    engine: &'static str,
    step: Step,
    message: String,
  },

  #[error("{engine} engine: {step} failed on {path}: {source}")]
  Io {
    engine: &'static str,
    step: Step,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Retry(Box<RetryError<EngineError>>),
}

impl From<RetryError<EngineError>> for EngineError {
  fn from(err: RetryError<EngineError>) -> Self {
    EngineError::Retry(Box::new(err))
  }
}

impl EngineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      EngineError::MissingPlatformAttribute { .. }
      | EngineError::MissingSetting { .. }
      | EngineError::UnknownEngine(_)
      | EngineError::DuplicateEngine(_)
      | EngineError::EphemeralWithoutTeardown(_) => ErrorKind::Configuration,
      EngineError::NotReady { operation, .. } => operation.kind(),
      EngineError::NoTarget { .. } | EngineError::EmptyWorkdir { .. } | EngineError::Lock(_) => {
        ErrorKind::HostProvisioning
      }
      EngineError::Command { step, .. } | EngineError::Http { step, .. } | EngineError::Io { step, .. } => step.kind(),
      EngineError::Retry(err) => err.last_error().map_or(ErrorKind::RemoteExecution, EngineError::kind),
    }
  }
}

/// Everything an engine is constructed from.
#[derive(Clone)]
pub struct EngineContext {
  pub platform: Platform,
  pub runner: Arc<dyn CommandRunner>,
  pub config: UserConfig,
  /// Host named by the user (`--target`).
  pub target: Option<String>,
  /// Remote work directory named by the user; a fresh one otherwise.
  pub remote_workdir: Option<String>,
  pub client: reqwest::Client,
  /// Recorded with host reservations and locks.
  pub job_name: String,
}

impl EngineContext {
  pub fn new(platform: Platform, runner: Arc<dyn CommandRunner>, config: UserConfig) -> Self {
    Self {
      platform,
      runner,
      config,
      target: None,
      remote_workdir: None,
      client: reqwest::Client::new(),
      job_name: crate::consts::APP_NAME.to_string(),
    }
  }
}

#[async_trait]
pub trait Engine: Send + Sync {
  fn name(&self) -> &'static str;

  fn capabilities(&self) -> Capabilities;

  /// Platform attributes ([`Platform::attribute`]) this engine needs.
  fn required_attributes(&self) -> &'static [&'static str] {
    &[]
  }

  /// Fail with every missing required attribute before any side effect.
  fn validate_platform(&self, platform: &Platform) -> Result<(), EngineError> {
    let missing: Vec<String> = self
      .required_attributes()
      .iter()
      .filter(|attr| platform.attribute(attr).is_none())
      .map(|attr| attr.to_string())
      .collect();
    if missing.is_empty() {
      return Ok(());
    }
    Err(EngineError::MissingPlatformAttribute {
      engine: self.name(),
      platform: platform.name.clone(),
      missing,
    })
  }

  /// The selected host, once there is one.
  fn target(&self) -> Option<&str>;

  /// The remote work directory, once set up.
  fn remote_workdir(&self) -> Option<&str>;

  async fn select_target(&mut self) -> Result<String, EngineError>;

  /// Run provisioning and create the remote work directory.
  async fn setup(&mut self) -> Result<(), EngineError>;

  /// Run `command` on the host; stdout is returned when `capture` is set,
  /// otherwise output streams to the terminal.
  async fn dispatch(&self, command: &str, capture: bool) -> Result<Option<String>, EngineError>;

  async fn ship_workdir(&self, workdir: &Path) -> Result<(), EngineError>;

  /// Copy `paths` (relative to the remote workdir) into `output_dir`.
  async fn retrieve_built_artifact(&self, paths: &[String], output_dir: &Path) -> Result<(), EngineError>;

  /// Release the host. Safe to call when nothing was acquired.
  async fn teardown(&mut self) -> Result<(), EngineError>;
}

/// Shared setup: provisioning commands, then the remote workdir (the
/// configured one, or a fresh `mktemp` directory).
pub(crate) async fn prepare_host(
  engine: &dyn Engine,
  platform: &Platform,
  configured: Option<&str>,
) -> Result<String, EngineError> {
  if !platform.provisioning.is_empty() {
    info!(engine = engine.name(), commands = platform.provisioning.len(), "provisioning host");
    engine.dispatch(&platform.provisioning.join("; "), false).await?;
  }

  let workdir = match configured {
    Some(dir) => {
      engine.dispatch(&format!("mkdir -p {dir}"), false).await?;
      dir.to_string()
    }
    None => engine
      .dispatch(&platform.toolchain.mktemp, true)
      .await?
      .map(|out| out.trim().to_string())
      .filter(|dir| !dir.is_empty())
      .ok_or(EngineError::EmptyWorkdir { engine: engine.name() })?,
  };
  debug!(engine = engine.name(), remote_workdir = %workdir, "remote workdir ready");
  Ok(workdir)
}

#[cfg(test)]
pub(crate) mod test_support {
  use std::sync::Arc;

  use super::EngineContext;
  use crate::config::UserConfig;
  use crate::platform::Platform;
  use crate::process::MockRunner;

  pub fn context(platform: Platform) -> (EngineContext, Arc<MockRunner>) {
    let runner = Arc::new(MockRunner::new());
    let ctx = EngineContext::new(platform, runner.clone(), UserConfig::default());
    (ctx, runner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_attribute_message_lists_names() {
    let err = EngineError::MissingPlatformAttribute {
      engine: "ec2",
      platform: "el-7-x86_64".into(),
      missing: vec!["aws_ami".into(), "aws_key_name".into()],
    };
    assert_eq!(
      err.to_string(),
      "ec2 engine cannot build el-7-x86_64: missing platform attribute(s) aws_ami, aws_key_name"
    );
    assert_eq!(err.kind(), ErrorKind::Configuration);
  }

  #[test]
  fn step_decides_the_error_kind() {
    let err = EngineError::Http {
      engine: "pooler",
      step: Step::SelectTarget,
      message: "503".into(),
    };
    assert_eq!(err.kind(), ErrorKind::HostProvisioning);

    let err = EngineError::Io {
      engine: "local",
      step: Step::Retrieve,
      path: "/tmp/x".into(),
      source: std::io::Error::other("boom"),
    };
    assert_eq!(err.kind(), ErrorKind::RemoteExecution);
  }
}
