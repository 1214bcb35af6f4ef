//! Build orchestration for one project on one platform.
//!
//! [`Driver::run`] walks the whole pipeline:
//!
//! 1. Validate the project version
//! 2. Validate the platform, select a host and set it up
//! 3. Install external build dependencies (retried)
//! 4. Fetch every component source and stage patches
//! 5. Write the Makefile, bill of materials, metadata and packaging files
//! 6. Ship the workdir, run make remotely, retrieve the output
//!
//! Whatever happens, including Ctrl-C, [`Driver::run`] then applies the
//! preserve policy: ephemeral engines are always torn down, others only when
//! the policy releases them. Teardown runs at most once and its failures are
//! logged, never returned.

mod files;
mod types;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::UserConfig;
use crate::consts::OUTPUT_DIR;
use crate::engine::{Engine, EngineContext, EngineRegistry, default_engine_for};
use crate::error::KilnError;
use crate::process::CommandRunner;
use crate::project::Project;
use crate::retry::retry_with_timeout;
use crate::source::{FetchContext, RewriteRules, build_client};

pub use files::{render, write_build_files};
pub use types::{BuildOptions, BuildReport, BuildState, Lifecycle, PreservePolicy};

/// Create the engine `options` names (or the platform's default) for
/// `project`.
pub fn create_engine(
  registry: &EngineRegistry,
  project: &Project,
  runner: Arc<dyn CommandRunner>,
  config: UserConfig,
  options: &BuildOptions,
) -> Result<Box<dyn Engine>, KilnError> {
  let name = options
    .engine
    .clone()
    .unwrap_or_else(|| default_engine_for(&project.platform).to_string());
  let mut ctx = EngineContext::new(project.platform.clone(), runner, config);
  ctx.target = options.target.clone();
  ctx.remote_workdir = options.remote_workdir.clone();
  ctx.job_name = project.name.clone();
  info!(project = %project.name, platform = %project.platform.name, engine = %name, "engine selected");
  Ok(registry.create(&name, ctx)?)
}

pub struct Driver {
  project: Project,
  engine: Box<dyn Engine>,
  runner: Arc<dyn CommandRunner>,
  config: UserConfig,
  rewrite: RewriteRules,
  options: BuildOptions,
  lifecycle: Lifecycle,
  /// Local staging directory and whether the driver created it.
  workdir: Option<(PathBuf, bool)>,
}

impl Driver {
  pub fn new(
    project: Project,
    engine: Box<dyn Engine>,
    runner: Arc<dyn CommandRunner>,
    config: UserConfig,
    options: BuildOptions,
  ) -> Self {
    let rewrite = RewriteRules::from_prefixes(config.rewrite.iter());
    Self {
      project,
      engine,
      runner,
      config,
      rewrite,
      options,
      lifecycle: Lifecycle::default(),
      workdir: None,
    }
  }

  pub fn state(&self) -> BuildState {
    self.lifecycle.state()
  }

  pub fn project(&self) -> &Project {
    &self.project
  }

  /// Build, racing the pipeline against Ctrl-C.
  pub async fn run(&mut self) -> Result<BuildReport, KilnError> {
    self
      .run_until(async {
        if tokio::signal::ctrl_c().await.is_err() {
          // No signal handler available: never interrupt.
          std::future::pending::<()>().await;
        }
      })
      .await
  }

  /// Build, treating completion of `interrupt` as an interrupt.
  pub async fn run_until(&mut self, interrupt: impl Future<Output = ()>) -> Result<BuildReport, KilnError> {
    let project = self.project.name.clone();
    let platform = self.project.platform.name.clone();

    let outcome = tokio::select! {
      biased;
      () = interrupt => {
        warn!(project = %project, platform = %platform, "interrupted; cleaning up");
        Err(KilnError::Interrupted {
          project: project.clone(),
          platform: platform.clone(),
        })
      }
      result = self.execute() => result,
    };

    if let Err(err) = &outcome {
      error!(project = %project, platform = %platform, kind = %err.kind(), error = %err, "build failed");
    }
    self.finish(outcome.is_err()).await;
    outcome
  }

  async fn execute(&mut self) -> Result<BuildReport, KilnError> {
    let version = self.project.validate_version()?.to_string();
    let policy = self.project.retry_policy()?;
    if !self.options.only_build.is_empty() {
      self.project.retain_components(&self.options.only_build)?;
    }
    self.project.skipcheck |= self.options.skipcheck;
    info!(
      project = %self.project.name,
      version = %version,
      platform = %self.project.platform.name,
      engine = self.engine.name(),
      "starting build"
    );

    self.engine.validate_platform(&self.project.platform)?;
    let host = self.engine.select_target().await?;
    self.lifecycle.advance(BuildState::HostSelected)?;
    info!(engine = self.engine.name(), host = %host, "host selected");

    self.engine.setup().await?;
    self.lifecycle.advance(BuildState::Provisioned)?;

    let deps = self.project.list_build_dependencies();
    if let Some(command) = self.project.platform.install_build_dependencies(&deps) {
      info!(count = deps.len(), "installing build dependencies");
      let engine: &dyn Engine = self.engine.as_ref();
      retry_with_timeout(&policy, "install build dependencies", || engine.dispatch(&command, false))
        .await
        .map_err(crate::engine::EngineError::from)?;
    }

    let workdir = self.local_workdir()?;
    self.fetch_sources(&workdir, policy).await?;
    write_build_files(&self.project, &workdir)?;

    self.engine.ship_workdir(&workdir).await?;
    self.lifecycle.advance(BuildState::WorkdirShipped)?;

    let remote = self
      .engine
      .remote_workdir()
      .map(str::to_string)
      .unwrap_or_else(|| workdir.to_string_lossy().into_owned());
    let mut make = format!("(cd {remote}; {}", self.project.platform.toolchain.make);
    for target in &self.options.targets {
      make.push(' ');
      make.push_str(target);
    }
    make.push(')');
    info!(host = %host, command = %make, "running build");
    self.engine.dispatch(&make, false).await?;
    self.lifecycle.advance(BuildState::Dispatched)?;

    let mut paths = vec![OUTPUT_DIR.to_string()];
    paths.extend(self.project.artifacts.iter().cloned());
    self
      .engine
      .retrieve_built_artifact(&paths, &self.options.output_dir)
      .await?;
    self.lifecycle.advance(BuildState::ArtifactRetrieved)?;

    let report = BuildReport {
      project: self.project.name.clone(),
      platform: self.project.platform.name.clone(),
      engine: self.engine.name().to_string(),
      host: self.engine.target().map(str::to_string),
      remote_workdir: self.engine.remote_workdir().map(str::to_string),
      package: self.project.package_name(),
      output_dir: self.options.output_dir.clone(),
    };
    info!(project = %report.project, platform = %report.platform, package = %report.package, "build complete");
    Ok(report)
  }

  /// The local staging directory, created on first use.
  fn local_workdir(&mut self) -> Result<PathBuf, KilnError> {
    if let Some((dir, _)) = &self.workdir {
      return Ok(dir.clone());
    }
    let (dir, created) = match &self.options.workdir {
      Some(dir) => {
        std::fs::create_dir_all(dir).map_err(|source| KilnError::Write {
          path: dir.clone(),
          source,
        })?;
        (dir.clone(), false)
      }
      None => {
        let dir = tempfile::Builder::new().prefix("kiln-work-").tempdir()?.keep();
        (dir, true)
      }
    };
    info!(workdir = ?dir, "local workdir");
    self.workdir = Some((dir.clone(), created));
    Ok(dir)
  }

  /// Fetch every component source, collecting all failures before giving up.
  async fn fetch_sources(&mut self, workdir: &Path, policy: crate::retry::RetryPolicy) -> Result<(), KilnError> {
    let ctx = FetchContext {
      runner: self.runner.as_ref(),
      client: build_client()?,
      retry: policy,
      rewrite: &self.rewrite,
      use_mirrors: self.config.use_mirrors,
    };
    let tar = self.project.platform.toolchain.tar.clone();

    let mut failures = Vec::new();
    for component in &mut self.project.components {
      let fetched = match component.get_source(workdir, &ctx, &tar).await {
        Ok(()) => component.get_patches(workdir).await,
        Err(err) => Err(err),
      };
      if let Err(err) = fetched {
        error!(component = %component.name, error = %err, "source acquisition failed");
        failures.push((component.name.clone(), err));
      }
    }
    if !failures.is_empty() {
      return Err(KilnError::SourcesFailed { failures });
    }
    Ok(())
  }

  /// Apply the preserve policy once the pipeline has ended.
  async fn finish(&mut self, failed: bool) {
    if self.lifecycle.state() == BuildState::TornDown {
      return;
    }
    let release = self.options.preserve.releases(failed);
    let ephemeral = self.engine.capabilities().ephemeral;

    if !release && !ephemeral {
      info!(
        preserve = %self.options.preserve,
        host = ?self.engine.target(),
        remote_workdir = ?self.engine.remote_workdir(),
        workdir = ?self.workdir.as_ref().map(|(dir, _)| dir),
        "preserving build host and workdir"
      );
      return;
    }

    if release {
      self.cleanup_remote_workdir().await;
    }
    if let Err(err) = self.engine.teardown().await {
      warn!(engine = self.engine.name(), error = %err, "teardown failed");
    }
    if let Err(err) = self.lifecycle.advance(BuildState::TornDown) {
      warn!(error = %err, "teardown recorded twice");
    }
    if release {
      self.cleanup_local_workdir();
    }
  }

  /// Remove a remote workdir the build created on a host that outlives it.
  async fn cleanup_remote_workdir(&self) {
    if self.options.remote_workdir.is_some() || self.engine.capabilities().teardown {
      return;
    }
    let Some(remote) = self.engine.remote_workdir() else {
      return;
    };
    if let Err(err) = self.engine.dispatch(&format!("rm -rf {remote}"), true).await {
      warn!(remote_workdir = %remote, error = %err, "failed to remove remote workdir");
    }
  }

  fn cleanup_local_workdir(&mut self) {
    let Some((dir, created)) = self.workdir.take() else {
      return;
    };
    if !created {
      return;
    }
    if let Err(err) = std::fs::remove_dir_all(&dir) {
      warn!(workdir = ?dir, error = %err, "failed to remove local workdir");
    }
  }
}
