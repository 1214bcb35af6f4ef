//! Implementation of the `kiln build` command.
//!
//! Builds the project once per platform, one after the other or, with
//! `--concurrent`, all at once. Every platform is attempted; the command
//! fails if any of them did.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinSet;
use tracing::info;

use kiln_lib::config::UserConfig;
use kiln_lib::consts::OUTPUT_DIR;
use kiln_lib::driver::{BuildOptions, BuildReport, Driver, PreservePolicy, create_engine};
use kiln_lib::engine::EngineRegistry;
use kiln_lib::process::{CommandRunner, SystemRunner};

use super::{load, split_platforms};
use crate::output::{format_duration, print_error, print_info, print_stat, print_success};

pub struct BuildArgs {
  pub project: String,
  pub platforms: String,
  pub targets: Vec<String>,
  pub configdir: PathBuf,
  pub engine: Option<String>,
  pub only_build: Vec<String>,
  pub preserve: PreservePolicy,
  pub skipcheck: bool,
  pub workdir: Option<PathBuf>,
  pub remote_workdir: Option<String>,
  pub target: Option<String>,
  pub concurrent: bool,
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let platforms = split_platforms(&args.platforms)?;
  let config = UserConfig::load().context("Failed to load user config")?;
  let output_dir = std::env::current_dir()
    .context("Failed to read current directory")?
    .join(OUTPUT_DIR);

  let jobs: Vec<(String, BuildOptions)> = platforms
    .iter()
    .map(|platform| {
      // Platforms never share a staging directory.
      let workdir = match &args.workdir {
        Some(dir) if platforms.len() > 1 => Some(dir.join(platform)),
        other => other.clone(),
      };
      let options = BuildOptions {
        engine: args.engine.clone(),
        targets: args.targets.clone(),
        only_build: args.only_build.clone(),
        preserve: args.preserve,
        skipcheck: args.skipcheck,
        workdir,
        remote_workdir: args.remote_workdir.clone(),
        target: args.target.clone(),
        output_dir: output_dir.clone(),
      };
      (platform.clone(), options)
    })
    .collect();

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let results = rt.block_on(async {
    if args.concurrent {
      build_concurrently(&args.project, &args.configdir, &config, jobs).await
    } else {
      let mut results = Vec::with_capacity(jobs.len());
      for (platform, options) in jobs {
        let result = build_one(&args.project, &platform, &args.configdir, config.clone(), options).await;
        results.push((platform, result));
      }
      results
    }
  });

  let mut failed = Vec::new();
  for (platform, result) in results {
    match result {
      Ok(report) => print_report(&report),
      Err(err) => {
        print_error(&format!("{} failed on {}: {:#}", args.project, platform, err));
        failed.push(platform);
      }
    }
  }
  info!(elapsed = %format_duration(started.elapsed()), "finished");

  if !failed.is_empty() {
    return Err(anyhow!("build failed for {}", failed.join(", ")));
  }
  Ok(())
}

async fn build_concurrently(
  project: &str,
  configdir: &Path,
  config: &UserConfig,
  jobs: Vec<(String, BuildOptions)>,
) -> Vec<(String, Result<BuildReport>)> {
  let order: Vec<String> = jobs.iter().map(|(platform, _)| platform.clone()).collect();
  let mut set = JoinSet::new();
  for (platform, options) in jobs {
    let project = project.to_string();
    let configdir = configdir.to_path_buf();
    let config = config.clone();
    set.spawn(async move {
      let result = build_one(&project, &platform, &configdir, config, options).await;
      (platform, result)
    });
  }

  let mut finished = Vec::with_capacity(order.len());
  while let Some(joined) = set.join_next().await {
    match joined {
      Ok(done) => finished.push(done),
      Err(err) => print_error(&format!("build task panicked: {}", err)),
    }
  }

  // Report in the order the platforms were given.
  let mut results = Vec::with_capacity(order.len());
  for platform in order {
    match finished.iter().position(|(p, _)| *p == platform) {
      Some(index) => results.push(finished.swap_remove(index)),
      None => results.push((platform, Err(anyhow!("build task did not complete")))),
    }
  }
  results
}

async fn build_one(
  project: &str,
  platform: &str,
  configdir: &Path,
  config: UserConfig,
  options: BuildOptions,
) -> Result<BuildReport> {
  let project = load(project, platform, configdir)?;
  let registry = EngineRegistry::with_defaults().context("Failed to register engines")?;
  let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
  let engine = create_engine(&registry, &project, runner.clone(), config.clone(), &options)
    .with_context(|| format!("Failed to create engine for {}", platform))?;

  print_info(&format!("Building {} for {} with {}", project.name, platform, engine.name()));
  let mut driver = Driver::new(project, engine, runner, config, options);
  let report = driver.run().await?;
  Ok(report)
}

fn print_report(report: &BuildReport) {
  print_success(&format!("Built {} for {}", report.package, report.platform));
  print_stat("Engine", &report.engine);
  if let Some(host) = &report.host {
    print_stat("Host", host);
  }
  if let Some(workdir) = &report.remote_workdir {
    print_stat("Remote workdir", workdir);
  }
  print_stat("Output", &report.output_dir.display().to_string());
}
