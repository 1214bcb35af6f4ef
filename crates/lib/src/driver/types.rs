use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ConfigError, KilnError};

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildState {
  Uninitialized,
  HostSelected,
  Provisioned,
  WorkdirShipped,
  Dispatched,
  ArtifactRetrieved,
  TornDown,
}

impl BuildState {
  pub fn as_str(&self) -> &'static str {
    match self {
      BuildState::Uninitialized => "uninitialized",
      BuildState::HostSelected => "host-selected",
      BuildState::Provisioned => "provisioned",
      BuildState::WorkdirShipped => "workdir-shipped",
      BuildState::Dispatched => "dispatched",
      BuildState::ArtifactRetrieved => "artifact-retrieved",
      BuildState::TornDown => "torn-down",
    }
  }

  /// Forward one step at a time; teardown from anywhere but itself.
  pub fn can_transition_to(&self, next: BuildState) -> bool {
    use BuildState::*;
    matches!(
      (self, next),
      (Uninitialized, HostSelected)
        | (HostSelected, Provisioned)
        | (Provisioned, WorkdirShipped)
        | (WorkdirShipped, Dispatched)
        | (Dispatched, ArtifactRetrieved)
    ) || (next == TornDown && *self != TornDown)
  }
}

impl fmt::Display for BuildState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Tracks the state of one build and rejects illegal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
  state: BuildState,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: BuildState::Uninitialized,
    }
  }
}

impl Lifecycle {
  pub fn state(&self) -> BuildState {
    self.state
  }

  pub fn advance(&mut self, next: BuildState) -> Result<(), KilnError> {
    if !self.state.can_transition_to(next) {
      return Err(KilnError::InvalidTransition {
        from: self.state.to_string(),
        to: next.to_string(),
      });
    }
    self.state = next;
    Ok(())
  }
}

/// Whether the build host and workdir are kept after a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreservePolicy {
  /// Keep everything.
  Always,
  /// Release everything.
  Never,
  /// Keep everything only when the build failed.
  #[default]
  OnFailure,
}

impl PreservePolicy {
  pub fn as_str(&self) -> &'static str {
    match self {
      PreservePolicy::Always => "always",
      PreservePolicy::Never => "never",
      PreservePolicy::OnFailure => "on-failure",
    }
  }

  /// Whether teardown and cleanup run after a build that `failed` or not.
  pub fn releases(&self, failed: bool) -> bool {
    match self {
      PreservePolicy::Always => false,
      PreservePolicy::Never => true,
      PreservePolicy::OnFailure => !failed,
    }
  }
}

impl FromStr for PreservePolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "always" => Ok(PreservePolicy::Always),
      "never" => Ok(PreservePolicy::Never),
      "on-failure" | "on_failure" => Ok(PreservePolicy::OnFailure),
      _ => Err(ConfigError::InvalidPreserve(s.to_string())),
    }
  }
}

impl fmt::Display for PreservePolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Knobs for one build, mostly straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Engine name; chosen from the platform when unset.
  pub engine: Option<String>,
  /// Make targets; the default goal when empty.
  pub targets: Vec<String>,
  /// Build only these components and their build dependencies.
  pub only_build: Vec<String>,
  pub preserve: PreservePolicy,
  pub skipcheck: bool,
  /// Local staging directory; a fresh temporary one when unset.
  pub workdir: Option<PathBuf>,
  pub remote_workdir: Option<String>,
  /// Build host for engines that take one.
  pub target: Option<String>,
  /// Where retrieved artifacts land.
  pub output_dir: PathBuf,
}

/// What a successful build produced.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub project: String,
  pub platform: String,
  pub engine: String,
  pub host: Option<String>,
  pub remote_workdir: Option<String>,
  pub package: String,
  pub output_dir: PathBuf,
}
