//! Definition-file loading and user configuration.
//!
//! Definitions live under a config directory as
//! `{projects,platforms,components}/<name>.toml`. User-level settings (engine
//! endpoints, credentials, lock directory) come from
//! `$XDG_CONFIG_HOME/kiln/config.toml`, with environment variables taking
//! precedence over the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ConfigError;
use crate::platform::paths;

/// Which kind of definition is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
  Project,
  Platform,
  Component,
}

impl DefinitionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      DefinitionKind::Project => "project",
      DefinitionKind::Platform => "platform",
      DefinitionKind::Component => "component",
    }
  }

  /// Directory under the config directory holding this kind.
  pub fn dir_name(&self) -> &'static str {
    match self {
      DefinitionKind::Project => "projects",
      DefinitionKind::Platform => "platforms",
      DefinitionKind::Component => "components",
    }
  }
}

/// Path of the definition `name` of `kind` under `configdir`.
pub fn definition_path(kind: DefinitionKind, configdir: &Path, name: &str) -> PathBuf {
  configdir.join(kind.dir_name()).join(format!("{name}.toml"))
}

/// Read and parse a definition, returning it together with its path.
pub fn read_definition<T: DeserializeOwned>(
  kind: DefinitionKind,
  configdir: &Path,
  name: &str,
) -> Result<(T, PathBuf), ConfigError> {
  let path = definition_path(kind, configdir, name);
  if !path.is_file() {
    return Err(ConfigError::DefinitionNotFound {
      kind: kind.as_str(),
      name: name.to_string(),
      path,
    });
  }

  let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
    path: path.clone(),
    source,
  })?;
  let parsed = toml::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.clone(),
    source: Box::new(source),
  })?;
  Ok((parsed, path))
}

/// Names of all definitions of `kind` under `configdir`, sorted.
pub fn list_definitions(kind: DefinitionKind, configdir: &Path) -> Result<Vec<String>, ConfigError> {
  let dir = configdir.join(kind.dir_name());
  if !dir.is_dir() {
    return Ok(Vec::new());
  }

  let entries = std::fs::read_dir(&dir).map_err(|source| ConfigError::Read {
    path: dir.clone(),
    source,
  })?;

  let mut names: Vec<String> = entries
    .filter_map(Result::ok)
    .map(|entry| entry.path())
    .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
    .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
    .collect();
  names.sort();
  Ok(names)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolerConfig {
  pub url: Option<String>,
  pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbsConfig {
  pub url: Option<String>,
  pub token: Option<String>,
  pub poll_interval_secs: u64,
  pub timeout_secs: u64,
}

impl Default for AbsConfig {
  fn default() -> Self {
    Self {
      url: None,
      token: None,
      poll_interval_secs: 10,
      timeout_secs: 3600,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareConfig {
  /// Shared directory holding `<host>.lock` files.
  pub lock_dir: Option<PathBuf>,
  /// Name recorded as the lock owner.
  pub user: Option<String>,
  pub poll_interval_secs: u64,
  pub timeout_secs: u64,
}

impl Default for HardwareConfig {
  fn default() -> Self {
    Self {
      lock_dir: None,
      user: None,
      poll_interval_secs: 5,
      timeout_secs: 3600,
    }
  }
}

impl HardwareConfig {
  pub fn lock_dir(&self) -> PathBuf {
    self
      .lock_dir
      .clone()
      .unwrap_or_else(|| paths::state_dir().join("locks"))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Ec2Config {
  pub region: Option<String>,
  /// Private key used to reach launched instances.
  pub ssh_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
  pub key: Option<PathBuf>,
}

/// User-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
  pub use_mirrors: bool,
  pub pooler: PoolerConfig,
  pub abs: AbsConfig,
  pub hardware: HardwareConfig,
  pub ec2: Ec2Config,
  pub ssh: SshConfig,
  /// Source URL rewrite rules: protocol -> replacement for `protocol://host`.
  pub rewrite: BTreeMap<String, String>,
}

impl Default for UserConfig {
  fn default() -> Self {
    Self {
      use_mirrors: true,
      pooler: PoolerConfig::default(),
      abs: AbsConfig::default(),
      hardware: HardwareConfig::default(),
      ec2: Ec2Config::default(),
      ssh: SshConfig::default(),
      rewrite: BTreeMap::new(),
    }
  }
}

impl UserConfig {
  /// Load the user config file (if any) and apply environment overrides.
  pub fn load() -> Result<Self, ConfigError> {
    Self::load_from(&paths::user_config_file())
  }

  /// Load `path` (a missing file yields defaults) and apply environment
  /// overrides.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let mut config = if path.is_file() {
      debug!(path = ?path, "reading user config");
      let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
      })?
    } else {
      Self::default()
    };
    config.apply_env()?;
    Ok(config)
  }

  /// Overlay environment variables on top of file values.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    set_from_env(&mut self.pooler.url, "VMPOOLER_URL");
    set_from_env(&mut self.pooler.token, "VMPOOLER_TOKEN");
    set_from_env(&mut self.abs.url, "ABS_URL");
    set_from_env(&mut self.abs.token, "ABS_TOKEN");
    set_from_env(&mut self.hardware.user, "KILN_LOCK_USER");
    set_from_env(&mut self.ec2.region, "AWS_REGION");

    if let Some(dir) = env_value("KILN_LOCK_DIR") {
      self.hardware.lock_dir = Some(PathBuf::from(dir));
    }
    if let Some(key) = env_value("KILN_SSH_KEY") {
      self.ssh.key = Some(PathBuf::from(key));
    }
    if let Some(value) = env_value("KILN_USE_MIRRORS") {
      self.use_mirrors = match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => true,
        "n" | "no" | "false" | "0" => false,
        _ => {
          return Err(ConfigError::InvalidEnv {
            var: "KILN_USE_MIRRORS".to_string(),
            value,
          });
        }
      };
    }
    Ok(())
  }
}

fn env_value(var: &str) -> Option<String> {
  std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn set_from_env(field: &mut Option<String>, var: &str) {
  if let Some(value) = env_value(var) {
    *field = Some(value);
  }
}
