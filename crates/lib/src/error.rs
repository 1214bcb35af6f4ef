//! Top-level error type and the error taxonomy.
//!
//! Every module owns its own `thiserror` enum. [`KilnError`] aggregates them
//! for the driver and the CLI, and [`ErrorKind`] classifies any of them into
//! the categories operators reason about (configuration, dependency, source,
//! provisioning, remote execution, teardown).

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;
use crate::placeholder::PlaceholderError;
use crate::rules::RuleError;
use crate::source::SourceError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Malformed or missing definitions, invalid values. Never retried.
  Configuration,
  /// Cycles or unresolvable build dependencies.
  Dependency,
  /// Fetching or verifying a component source.
  SourceAcquisition,
  /// Acquiring or preparing a build host. Retriable up to the policy limit.
  HostProvisioning,
  /// A dispatched command exited non-zero.
  RemoteExecution,
  /// Releasing a host. Logged, never raised by the driver.
  Teardown,
  /// The build was interrupted by a signal.
  Interrupted,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Configuration => "configuration",
      ErrorKind::Dependency => "dependency",
      ErrorKind::SourceAcquisition => "source-acquisition",
      ErrorKind::HostProvisioning => "host-provisioning",
      ErrorKind::RemoteExecution => "remote-execution",
      ErrorKind::Teardown => "teardown",
      ErrorKind::Interrupted => "interrupted",
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Errors raised while loading platform, project, or component definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("no {kind} definition named '{name}' (looked for {path})")]
  DefinitionNotFound {
    kind: &'static str,
    name: String,
    path: PathBuf,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("failed to load component '{name}' from {path}: {source}")]
  ComponentLoad {
    name: String,
    path: PathBuf,
    #[source]
    source: Box<ConfigError>,
  },

  #[error("platform name '{0}' does not follow the family-version-arch convention")]
  InvalidPlatformName(String),

  #[error("unsupported platform family '{family}' in platform '{platform}'")]
  UnsupportedFamily { platform: String, family: String },

  #[error("invalid patch phase '{0}' (expected 'unpack' or 'install')")]
  InvalidPatchPhase(String),

  #[error("install-phase patch '{0}' must declare a destination")]
  MissingPatchDestination(String),

  #[error("component '{component}' has two patches named '{file_name}'")]
  DuplicatePatchName { component: String, file_name: String },

  #[error("invalid preserve policy '{0}' (expected always, never, or on-failure)")]
  InvalidPreserve(String),

  #[error("invalid checksum type '{0}' (expected md5, sha1, sha256, or sha512)")]
  InvalidChecksumType(String),

  #[error("invalid package state '{0}' (expected install, upgrade, or removal)")]
  InvalidPackageState(String),

  #[error("invalid action timing '{0}' (expected pre or post)")]
  InvalidActionTiming(String),

  #[error("project '{0}' has no version")]
  MissingVersion(String),

  #[error("invalid value '{value}' for {var}")]
  InvalidEnv { var: String, value: String },

  #[error("placeholder error in '{input}': {source}")]
  Placeholder {
    input: String,
    #[source]
    source: PlaceholderError,
  },
}

/// Errors in the component dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
  #[error("build_requires cycle: {}", .chain.join(" -> "))]
  Cycle { chain: Vec<String> },

  #[error("unknown component '{name}' in project '{project}'")]
  UnknownComponent { project: String, name: String },
}

/// The error type returned by the driver and the build-file writers.
#[derive(Debug, Error)]
pub enum KilnError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error("{} component source(s) failed to fetch: {}", .failures.len(), failed_names(.failures))]
  SourcesFailed { failures: Vec<(String, SourceError)> },

  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error(transparent)]
  Rule(#[from] RuleError),

  #[error("illegal build state transition from {from} to {to}")]
  InvalidTransition { from: String, to: String },

  #[error("build of {project} on {platform} was interrupted")]
  Interrupted { project: String, platform: String },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// `err` followed by each of its sources, joined with `: `.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
  let mut message = err.to_string();
  let mut source = err.source();
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}

fn failed_names(failures: &[(String, SourceError)]) -> String {
  failures.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", ")
}

impl KilnError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      KilnError::Config(_) => ErrorKind::Configuration,
      KilnError::Dependency(_) => ErrorKind::Dependency,
      KilnError::Source(_) | KilnError::SourcesFailed { .. } => ErrorKind::SourceAcquisition,
      KilnError::Engine(e) => e.kind(),
      KilnError::Rule(e) => e.kind(),
      KilnError::InvalidTransition { .. } => ErrorKind::Configuration,
      KilnError::Interrupted { .. } => ErrorKind::Interrupted,
      KilnError::Write { .. } | KilnError::Io(_) => ErrorKind::Configuration,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cycle_message_names_the_chain() {
    let err = DependencyError::Cycle {
      chain: vec!["a".into(), "b".into(), "a".into()],
    };
    assert_eq!(err.to_string(), "build_requires cycle: a -> b -> a");
  }

  #[test]
  fn sources_failed_lists_components() {
    let err = KilnError::SourcesFailed {
      failures: vec![
        ("zlib".into(), SourceError::MissingChecksum { url: "http://x/zlib.tar.gz".into() }),
        ("curl".into(), SourceError::MissingChecksum { url: "http://x/curl.tar.gz".into() }),
      ],
    };
    assert_eq!(err.to_string(), "2 component source(s) failed to fetch: zlib, curl");
    assert_eq!(err.kind(), ErrorKind::SourceAcquisition);
  }

  #[test]
  fn config_errors_classify_as_configuration() {
    let err: KilnError = ConfigError::InvalidPatchPhase("build".into()).into();
    assert_eq!(err.kind(), ErrorKind::Configuration);
  }
}
