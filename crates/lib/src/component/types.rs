//! Value types carried by a component.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::platform::ServiceType;

/// When a patch is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchPhase {
  /// Right after the source is unpacked, inside its dirname.
  #[default]
  Unpack,
  /// After the install commands, inside the patch's destination.
  Install,
}

impl FromStr for PatchPhase {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "unpack" => Ok(PatchPhase::Unpack),
      "install" => Ok(PatchPhase::Install),
      other => Err(ConfigError::InvalidPatchPhase(other.to_string())),
    }
  }
}

/// A patch applied to a component during unpack or install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
  pub path: PathBuf,
  pub strip: u32,
  pub fuzz: u32,
  pub phase: PatchPhase,
  pub destination: Option<String>,
}

impl Patch {
  /// An unpack-phase patch with strip 1 and fuzz 0.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      strip: 1,
      fuzz: 0,
      phase: PatchPhase::Unpack,
      destination: None,
    }
  }

  pub fn strip(mut self, strip: u32) -> Self {
    self.strip = strip;
    self
  }

  pub fn fuzz(mut self, fuzz: u32) -> Self {
    self.fuzz = fuzz;
    self
  }

  /// Move the patch to the install phase; install patches need a destination.
  pub fn at_install(mut self, destination: impl Into<String>) -> Self {
    self.phase = PatchPhase::Install;
    self.destination = Some(destination.into());
    self
  }

  /// Check the phase/destination pairing.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.phase == PatchPhase::Install && self.destination.as_deref().is_none_or(str::is_empty) {
      return Err(ConfigError::MissingPatchDestination(self.path.display().to_string()));
    }
    Ok(())
  }

  /// Name the patch is stored under in `patches/<component>/`.
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.path.display().to_string())
  }

  /// `<patch> --strip=S --fuzz=F ... < $(workdir)/patches/<component>/<file>`
  pub fn apply_command(&self, patch_tool: &str, component: &str) -> String {
    format!(
      "{patch_tool} --strip={} --fuzz={} --ignore-whitespace --no-backup-if-mismatch < $(workdir)/patches/{component}/{}",
      self.strip,
      self.fuzz,
      self.file_name()
    )
  }
}

/// A package relation: a name with an optional version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationSpec {
  Name(String),
  Versioned {
    name: String,
    #[serde(default)]
    version: Option<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
  pub name: String,
  pub version: Option<String>,
}

impl Relation {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: None,
    }
  }

  pub fn versioned(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: Some(version.into()),
    }
  }
}

impl From<RelationSpec> for Relation {
  fn from(spec: RelationSpec) -> Self {
    match spec {
      RelationSpec::Name(name) => Relation::new(name),
      RelationSpec::Versioned { name, version } => Relation { name, version },
    }
  }
}

impl fmt::Display for Relation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.version {
      Some(version) => write!(f, "{} {}", self.name, version),
      None => write!(f, "{}", self.name),
    }
  }
}

/// A directory the package owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Directory {
  pub path: String,
  #[serde(default)]
  pub mode: Option<String>,
  #[serde(default)]
  pub owner: Option<String>,
  #[serde(default)]
  pub group: Option<String>,
}

/// A file the package installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstalledFile {
  pub path: String,
  #[serde(default)]
  pub mode: Option<String>,
  #[serde(default)]
  pub owner: Option<String>,
  #[serde(default)]
  pub group: Option<String>,
  /// Configuration files are preserved on upgrade.
  #[serde(default)]
  pub config: bool,
}

impl InstalledFile {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      mode: None,
      owner: None,
      group: None,
      config: false,
    }
  }

  pub fn parent(&self) -> Option<&str> {
    Path::new(&self.path)
      .parent()
      .and_then(Path::to_str)
      .filter(|p| !p.is_empty() && *p != "/")
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
  pub name: String,
  /// Service definition shipped with the component, if any.
  pub file: Option<String>,
  /// Overrides the platform's service type.
  pub service_type: Option<ServiceType>,
}

/// Package lifecycle event an action script runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
  Install,
  Upgrade,
  Removal,
}

impl FromStr for PackageState {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "install" => Ok(PackageState::Install),
      "upgrade" => Ok(PackageState::Upgrade),
      "removal" => Ok(PackageState::Removal),
      other => Err(ConfigError::InvalidPackageState(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionTiming {
  Pre,
  Post,
}

impl FromStr for ActionTiming {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pre" => Ok(ActionTiming::Pre),
      "post" => Ok(ActionTiming::Post),
      other => Err(ConfigError::InvalidActionTiming(other.to_string())),
    }
  }
}

/// Shell lines run by the package manager at `(state, timing)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageAction {
  pub state: PackageState,
  pub timing: ActionTiming,
  pub scripts: Vec<String>,
}

/// Where a resolved source lives in the workdir and how to unpack it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLayout {
  pub file: Option<String>,
  pub dirname: String,
  pub extract: String,
  pub cleanup: String,
}

impl SourceLayout {
  /// Layout of a component without a source.
  pub fn empty() -> Self {
    Self {
      file: None,
      dirname: "./".to_string(),
      extract: crate::consts::NOTHING_TO_EXTRACT.to_string(),
      cleanup: ":".to_string(),
    }
  }
}
