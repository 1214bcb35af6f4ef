mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::driver::PreservePolicy;

use cmd::{BuildArgs, RenderArgs, cmd_build, cmd_inspect, cmd_list, cmd_render};

/// kiln - build packages for many platforms from one project definition
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct ConfigDirArg {
  /// Directory holding projects/, platforms/ and components/
  #[arg(long, default_value = "configs")]
  configdir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a project's package on one or more platforms
  Build {
    /// Project name
    project: String,

    /// Comma-separated platform names
    platforms: String,

    /// Make targets to run instead of the default goal
    targets: Vec<String>,

    #[command(flatten)]
    config: ConfigDirArg,

    /// Engine to build with (default: chosen from the platform)
    #[arg(short, long)]
    engine: Option<String>,

    /// Build only these components and their build dependencies
    #[arg(long, value_delimiter = ',')]
    only_build: Vec<String>,

    /// Keep the build host and workdir: always, never or on-failure
    #[arg(short, long, default_value_t = PreservePolicy::OnFailure)]
    preserve: PreservePolicy,

    /// Skip components' check steps
    #[arg(long)]
    skipcheck: bool,

    /// Local staging directory (default: a fresh temporary directory)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Work directory on the build host (default: created with mktemp)
    #[arg(long)]
    remote_workdir: Option<String>,

    /// Build host, for engines that take one
    #[arg(short, long)]
    target: Option<String>,

    /// Build every platform at the same time
    #[arg(long)]
    concurrent: bool,
  },

  /// Write the Makefile, bill of materials and packaging files without building
  Render {
    /// Project name
    project: String,

    /// Comma-separated platform names
    platforms: String,

    #[command(flatten)]
    config: ConfigDirArg,

    /// Directory to render into (default: ./render/<platform>)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Render only these components and their build dependencies
    #[arg(long, value_delimiter = ',')]
    only_build: Vec<String>,

    /// Leave components' check steps out of the Makefile
    #[arg(long)]
    skipcheck: bool,
  },

  /// Print a project's resolved components as JSON
  Inspect {
    /// Project name
    project: String,

    /// Comma-separated platform names
    platforms: String,

    #[command(flatten)]
    config: ConfigDirArg,
  },

  /// List the projects and platforms under the config directory
  List {
    #[command(flatten)]
    config: ConfigDirArg,

    /// Only list projects
    #[arg(long)]
    projects: bool,

    /// Only list platforms
    #[arg(long)]
    platforms: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      project,
      platforms,
      targets,
      config,
      engine,
      only_build,
      preserve,
      skipcheck,
      workdir,
      remote_workdir,
      target,
      concurrent,
    } => cmd_build(BuildArgs {
      project,
      platforms,
      targets,
      configdir: config.configdir,
      engine,
      only_build,
      preserve,
      skipcheck,
      workdir,
      remote_workdir,
      target,
      concurrent,
    }),
    Commands::Render {
      project,
      platforms,
      config,
      workdir,
      only_build,
      skipcheck,
    } => cmd_render(RenderArgs {
      project,
      platforms,
      configdir: config.configdir,
      workdir,
      only_build,
      skipcheck,
    }),
    Commands::Inspect {
      project,
      platforms,
      config,
    } => cmd_inspect(&project, &platforms, &config.configdir),
    Commands::List {
      config,
      projects,
      platforms,
    } => cmd_list(&config.configdir, projects, platforms),
  }
}
