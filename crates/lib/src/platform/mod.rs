//! Target platform model.
//!
//! A platform is identified by a `family-version-arch` name such as
//! `el-7-x86_64` or `cisco-wrlinux-7-x86_64`. Toolchain paths, service
//! conventions and the packaging backend start from per-family defaults and
//! are overridden by the platform's definition file.

pub mod defaults;
pub mod family;
pub mod paths;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DefinitionKind, read_definition};
use crate::consts::DEFAULT_SSH_PORT;
use crate::error::ConfigError;

pub use defaults::{DependencyInstaller, Toolchain};
pub use family::{OsFamily, PackageFormat, ServiceType};

/// Platform definition as written in `platforms/<name>.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformDefinition {
  pub codename: Option<String>,

  pub make: Option<String>,
  pub tar: Option<String>,
  pub patch: Option<String>,
  pub install: Option<String>,
  pub mktemp: Option<String>,
  pub sort: Option<String>,
  pub find: Option<String>,
  pub shasum: Option<String>,
  pub copy: Option<String>,
  pub cflags: Option<String>,
  pub ldflags: Option<String>,

  pub servicetype: Option<ServiceType>,
  pub servicedir: Option<String>,
  pub defaultdir: Option<String>,

  pub provisioning: Vec<String>,
  pub build_dependencies: Option<InstallerDefinition>,
  pub num_cores: Option<String>,

  pub docker_image: Option<String>,
  pub docker_run_args: Vec<String>,
  pub build_hosts: Vec<String>,
  pub vmpooler_template: Option<String>,
  pub abs_resource_name: Option<String>,
  pub aws_ami: Option<String>,
  pub aws_instance_type: Option<String>,
  pub aws_key_name: Option<String>,
  pub aws_region: Option<String>,
  pub aws_subnet_id: Option<String>,
  pub ssh_port: Option<u16>,
  pub target_user: Option<String>,

  pub environment: BTreeMap<String, String>,
  pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallerDefinition {
  pub command: String,
  #[serde(default)]
  pub suffix: String,
}

/// Attributes consumed by engines to reach a build host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineAttributes {
  pub docker_image: Option<String>,
  pub docker_run_args: Vec<String>,
  pub build_hosts: Vec<String>,
  pub vmpooler_template: Option<String>,
  pub abs_resource_name: Option<String>,
  pub aws_ami: Option<String>,
  pub aws_instance_type: Option<String>,
  pub aws_key_name: Option<String>,
  pub aws_region: Option<String>,
  pub aws_subnet_id: Option<String>,
  pub ssh_port: u16,
  pub target_user: String,
}

/// A fully resolved target platform. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
  pub name: String,
  pub os_name: String,
  pub os_version: String,
  architecture: String,
  pub family: OsFamily,
  pub package_format: PackageFormat,
  pub codename: Option<String>,
  pub toolchain: Toolchain,
  pub servicetype: ServiceType,
  pub servicedir: String,
  pub defaultdir: String,
  pub provisioning: Vec<String>,
  pub installer: DependencyInstaller,
  pub num_cores: Option<String>,
  pub engine: EngineAttributes,
  pub environment: BTreeMap<String, String>,
  pub settings: BTreeMap<String, String>,
}

/// Split a platform name into `(os_name, os_version, architecture)`.
///
/// The family may itself contain dashes, so the split happens on the last two.
pub fn parse_platform_name(name: &str) -> Result<(&str, &str, &str), ConfigError> {
  let mut parts = name.rsplitn(3, '-');
  let arch = parts.next().unwrap_or_default();
  let version = parts.next().unwrap_or_default();
  let os = parts.next().unwrap_or_default();

  if os.is_empty() || version.is_empty() || arch.is_empty() {
    return Err(ConfigError::InvalidPlatformName(name.to_string()));
  }
  Ok((os, version, arch))
}

impl Platform {
  /// Build a platform from its name alone, using family defaults.
  pub fn from_name(name: &str) -> Result<Self, ConfigError> {
    Self::from_definition(name, PlatformDefinition::default())
  }

  /// Build a platform from its name and a parsed definition.
  pub fn from_definition(name: &str, def: PlatformDefinition) -> Result<Self, ConfigError> {
    let (os_name, os_version, architecture) = parse_platform_name(name)?;
    let family = OsFamily::parse(os_name, os_version).ok_or_else(|| ConfigError::UnsupportedFamily {
      platform: name.to_string(),
      family: os_name.to_string(),
    })?;
    let d = defaults::for_family(family, os_version);

    let toolchain = Toolchain {
      make: def.make.unwrap_or(d.toolchain.make),
      tar: def.tar.unwrap_or(d.toolchain.tar),
      patch: def.patch.unwrap_or(d.toolchain.patch),
      install: def.install.unwrap_or(d.toolchain.install),
      mktemp: def.mktemp.unwrap_or(d.toolchain.mktemp),
      sort: def.sort.unwrap_or(d.toolchain.sort),
      find: def.find.unwrap_or(d.toolchain.find),
      shasum: def.shasum.unwrap_or(d.toolchain.shasum),
      copy: def.copy.unwrap_or(d.toolchain.copy),
      cflags: def.cflags.unwrap_or(d.toolchain.cflags),
      ldflags: def.ldflags.unwrap_or(d.toolchain.ldflags),
    };

    let installer = match def.build_dependencies {
      Some(i) => DependencyInstaller {
        command: i.command,
        suffix: i.suffix,
      },
      None => d.installer,
    };

    Ok(Self {
      name: name.to_string(),
      os_name: os_name.to_string(),
      os_version: os_version.to_string(),
      architecture: architecture.to_string(),
      family,
      package_format: family.package_format(),
      codename: def.codename,
      toolchain,
      servicetype: def.servicetype.unwrap_or(d.servicetype),
      servicedir: def.servicedir.unwrap_or(d.servicedir),
      defaultdir: def.defaultdir.unwrap_or(d.defaultdir),
      provisioning: def.provisioning,
      installer,
      num_cores: def.num_cores,
      engine: EngineAttributes {
        docker_image: def.docker_image,
        docker_run_args: def.docker_run_args,
        build_hosts: def.build_hosts,
        vmpooler_template: def.vmpooler_template,
        abs_resource_name: def.abs_resource_name,
        aws_ami: def.aws_ami,
        aws_instance_type: def.aws_instance_type,
        aws_key_name: def.aws_key_name,
        aws_region: def.aws_region,
        aws_subnet_id: def.aws_subnet_id,
        ssh_port: def.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
        target_user: def.target_user.unwrap_or_else(|| "root".to_string()),
      },
      environment: def.environment,
      settings: def.settings,
    })
  }

  /// Trailing `-arch` segment of the name.
  pub fn architecture(&self) -> &str {
    &self.architecture
  }

  /// The build-dependency install command for `dependencies`, if any.
  pub fn install_build_dependencies(&self, dependencies: &[String]) -> Option<String> {
    self.installer.command_for(dependencies)
  }

  /// Look up an attribute by name.
  ///
  /// Used by engines to check required attributes and by definition
  /// placeholders (`%{platform:<attr>}`). Unset optional attributes and empty
  /// lists are `None`.
  pub fn attribute(&self, key: &str) -> Option<String> {
    let non_empty = |v: &str| (!v.is_empty()).then(|| v.to_string());
    let e = &self.engine;
    match key {
      "name" => Some(self.name.clone()),
      "os_name" => Some(self.os_name.clone()),
      "os_version" => Some(self.os_version.clone()),
      "architecture" => Some(self.architecture.clone()),
      "family" => Some(self.family.as_str().to_string()),
      "package_format" => Some(self.package_format.as_str().to_string()),
      "codename" => self.codename.clone(),
      "make" => Some(self.toolchain.make.clone()),
      "tar" => Some(self.toolchain.tar.clone()),
      "patch" => Some(self.toolchain.patch.clone()),
      "install" => Some(self.toolchain.install.clone()),
      "mktemp" => Some(self.toolchain.mktemp.clone()),
      "sort" => Some(self.toolchain.sort.clone()),
      "find" => Some(self.toolchain.find.clone()),
      "shasum" => Some(self.toolchain.shasum.clone()),
      "copy" => Some(self.toolchain.copy.clone()),
      "cflags" => non_empty(&self.toolchain.cflags),
      "ldflags" => non_empty(&self.toolchain.ldflags),
      "servicetype" => Some(self.servicetype.as_str().to_string()),
      "servicedir" => non_empty(&self.servicedir),
      "defaultdir" => non_empty(&self.defaultdir),
      "num_cores" => self.num_cores.clone(),
      "docker_image" => e.docker_image.clone(),
      "build_hosts" => (!e.build_hosts.is_empty()).then(|| e.build_hosts.join(",")),
      "vmpooler_template" => e.vmpooler_template.clone(),
      "abs_resource_name" => e.abs_resource_name.clone(),
      "aws_ami" => e.aws_ami.clone(),
      "aws_instance_type" => e.aws_instance_type.clone(),
      "aws_key_name" => e.aws_key_name.clone(),
      "aws_region" => e.aws_region.clone(),
      "aws_subnet_id" => e.aws_subnet_id.clone(),
      "ssh_port" => Some(e.ssh_port.to_string()),
      "target_user" => Some(e.target_user.clone()),
      _ => None,
    }
  }

  pub fn is_deb(&self) -> bool {
    self.package_format == PackageFormat::Deb
  }

  pub fn is_rpm(&self) -> bool {
    self.package_format == PackageFormat::Rpm
  }

  pub fn is_el(&self) -> bool {
    matches!(self.family, OsFamily::El | OsFamily::RedHatFips)
  }

  pub fn is_sles(&self) -> bool {
    self.family == OsFamily::Sles
  }

  pub fn is_fedora(&self) -> bool {
    self.family == OsFamily::Fedora
  }

  pub fn is_aix(&self) -> bool {
    self.family == OsFamily::Aix
  }

  pub fn is_eos(&self) -> bool {
    self.family == OsFamily::Eos
  }

  pub fn is_cisco_wrlinux(&self) -> bool {
    self.family == OsFamily::CiscoWrlinux
  }

  pub fn is_huaweios(&self) -> bool {
    self.family == OsFamily::HuaweiOs
  }

  pub fn is_cumulus(&self) -> bool {
    self.family == OsFamily::Cumulus
  }

  pub fn is_macos(&self) -> bool {
    matches!(self.family, OsFamily::Osx | OsFamily::MacOs)
  }

  pub fn is_solaris(&self) -> bool {
    matches!(self.family, OsFamily::Solaris10 | OsFamily::Solaris11)
  }

  pub fn is_solaris_10(&self) -> bool {
    self.family == OsFamily::Solaris10
  }

  pub fn is_solaris_11(&self) -> bool {
    self.family == OsFamily::Solaris11
  }

  pub fn is_windows(&self) -> bool {
    self.family == OsFamily::Windows
  }

  pub fn is_linux(&self) -> bool {
    match self.family {
      OsFamily::Debian
      | OsFamily::Ubuntu
      | OsFamily::Cumulus
      | OsFamily::HuaweiOs
      | OsFamily::El
      | OsFamily::RedHatFips
      | OsFamily::Fedora
      | OsFamily::Sles
      | OsFamily::CiscoWrlinux
      | OsFamily::Eos => true,
      OsFamily::Aix
      | OsFamily::Osx
      | OsFamily::MacOs
      | OsFamily::Solaris10
      | OsFamily::Solaris11
      | OsFamily::Windows => false,
    }
  }

  pub fn is_unix(&self) -> bool {
    !self.is_windows()
  }
}

impl std::fmt::Display for Platform {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name)
  }
}

/// Load `platforms/<name>.toml` from `configdir`.
pub fn load_platform(name: &str, configdir: &Path) -> Result<Platform, ConfigError> {
  // Reject malformed names before touching the filesystem.
  parse_platform_name(name)?;
  let (def, path) = read_definition::<PlatformDefinition>(DefinitionKind::Platform, configdir, name)?;
  debug!(platform = %name, path = ?path, "loaded platform definition");
  Platform::from_definition(name, def)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn parses_name_segments() {
    assert_eq!(parse_platform_name("el-7-x86_64").unwrap(), ("el", "7", "x86_64"));
    assert_eq!(
      parse_platform_name("cisco-wrlinux-7-x86_64").unwrap(),
      ("cisco-wrlinux", "7", "x86_64")
    );
  }

  #[test]
  fn rejects_names_without_three_segments() {
    assert!(matches!(
      parse_platform_name("el7").unwrap_err(),
      ConfigError::InvalidPlatformName(_)
    ));
    assert!(parse_platform_name("el-x86_64").is_err());
    assert!(parse_platform_name("-7-x86_64").is_err());
  }

  #[test]
  fn defaults_follow_family() {
    let platform = Platform::from_name("el-7-x86_64").unwrap();
    assert_eq!(platform.architecture(), "x86_64");
    assert_eq!(platform.family, OsFamily::El);
    assert!(platform.is_rpm());
    assert!(platform.is_el());
    assert!(platform.is_linux());
    assert!(!platform.is_deb());
    assert_eq!(platform.servicetype, ServiceType::Systemd);
    assert_eq!(platform.engine.ssh_port, 22);
  }

  #[test]
  fn unsupported_family_is_an_error() {
    let err = Platform::from_name("plan9-4-x86_64").unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFamily { .. }));
  }

  #[test]
  fn definition_overrides_defaults() {
    let def: PlatformDefinition = toml::from_str(
      r#"
        make = "/usr/local/bin/gmake"
        servicetype = "sysv"
        docker_image = "centos:7"
        build_hosts = ["a.example.com", "b.example.com"]
        ssh_port = 2222
        [build_dependencies]
        command = "yum install -y"
        suffix = "--nogpgcheck"
      "#,
    )
    .unwrap();

    let platform = Platform::from_definition("el-7-x86_64", def).unwrap();
    assert_eq!(platform.toolchain.make, "/usr/local/bin/gmake");
    assert_eq!(platform.servicetype, ServiceType::Sysv);
    assert_eq!(platform.attribute("docker_image").as_deref(), Some("centos:7"));
    assert_eq!(
      platform.attribute("build_hosts").as_deref(),
      Some("a.example.com,b.example.com")
    );
    assert_eq!(platform.attribute("ssh_port").as_deref(), Some("2222"));
    assert_eq!(
      platform.install_build_dependencies(&["gcc".to_string()]).as_deref(),
      Some("yum install -y gcc --nogpgcheck")
    );
  }

  #[test]
  fn unset_attributes_are_none() {
    let platform = Platform::from_name("debian-12-amd64").unwrap();
    assert_eq!(platform.attribute("docker_image"), None);
    assert_eq!(platform.attribute("build_hosts"), None);
    assert_eq!(platform.attribute("no_such_attribute"), None);
  }

  #[test]
  fn unknown_definition_keys_are_rejected() {
    let result = toml::from_str::<PlatformDefinition>("dokcer_image = \"typo\"");
    assert!(result.is_err());
  }

  #[test]
  fn load_platform_reads_definition() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("platforms")).unwrap();
    std::fs::write(
      temp.path().join("platforms/ubuntu-22.04-amd64.toml"),
      "codename = \"jammy\"\n",
    )
    .unwrap();

    let platform = load_platform("ubuntu-22.04-amd64", temp.path()).unwrap();
    assert!(platform.is_deb());
    assert_eq!(platform.codename.as_deref(), Some("jammy"));
  }

  #[test]
  fn load_platform_missing_definition() {
    let temp = TempDir::new().unwrap();
    let err = load_platform("el-8-x86_64", temp.path()).unwrap_err();
    assert!(matches!(err, ConfigError::DefinitionNotFound { .. }));
  }
}
