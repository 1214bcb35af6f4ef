//! Platform families, package formats, and service types.
//!
//! The family is computed once from the platform name; every family-specific
//! branch in the crate matches on [`OsFamily`] exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating-system family, parsed from the leading segment of a platform name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsFamily {
  Debian,
  Ubuntu,
  Cumulus,
  HuaweiOs,
  El,
  RedHatFips,
  Fedora,
  Sles,
  CiscoWrlinux,
  Aix,
  Eos,
  Osx,
  MacOs,
  Solaris10,
  Solaris11,
  Windows,
}

impl OsFamily {
  /// Parse the family from the os-name and os-version segments.
  ///
  /// Solaris is split by major version since 10 and 11 differ in every
  /// toolchain convention.
  pub fn parse(os_name: &str, os_version: &str) -> Option<Self> {
    let family = match os_name {
      "debian" => OsFamily::Debian,
      "ubuntu" => OsFamily::Ubuntu,
      "cumulus" => OsFamily::Cumulus,
      "huaweios" => OsFamily::HuaweiOs,
      "el" | "redhat" | "centos" => OsFamily::El,
      "redhatfips" => OsFamily::RedHatFips,
      "fedora" => OsFamily::Fedora,
      "sles" => OsFamily::Sles,
      "cisco-wrlinux" => OsFamily::CiscoWrlinux,
      "aix" => OsFamily::Aix,
      "eos" => OsFamily::Eos,
      "osx" => OsFamily::Osx,
      "macos" => OsFamily::MacOs,
      "solaris" => match os_version.split('.').next() {
        Some("10") => OsFamily::Solaris10,
        Some("11") => OsFamily::Solaris11,
        _ => return None,
      },
      "windows" | "windowsfips" => OsFamily::Windows,
      _ => return None,
    };
    Some(family)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      OsFamily::Debian => "debian",
      OsFamily::Ubuntu => "ubuntu",
      OsFamily::Cumulus => "cumulus",
      OsFamily::HuaweiOs => "huaweios",
      OsFamily::El => "el",
      OsFamily::RedHatFips => "redhatfips",
      OsFamily::Fedora => "fedora",
      OsFamily::Sles => "sles",
      OsFamily::CiscoWrlinux => "cisco-wrlinux",
      OsFamily::Aix => "aix",
      OsFamily::Eos => "eos",
      OsFamily::Osx => "osx",
      OsFamily::MacOs => "macos",
      OsFamily::Solaris10 => "solaris-10",
      OsFamily::Solaris11 => "solaris-11",
      OsFamily::Windows => "windows",
    }
  }

  /// The packaging backend this family builds with.
  pub fn package_format(&self) -> PackageFormat {
    match self {
      OsFamily::Debian | OsFamily::Ubuntu | OsFamily::Cumulus | OsFamily::HuaweiOs => PackageFormat::Deb,
      OsFamily::El
      | OsFamily::RedHatFips
      | OsFamily::Fedora
      | OsFamily::Sles
      | OsFamily::CiscoWrlinux
      | OsFamily::Aix => PackageFormat::Rpm,
      OsFamily::Eos => PackageFormat::Swix,
      OsFamily::Osx | OsFamily::MacOs => PackageFormat::Osx,
      OsFamily::Solaris10 => PackageFormat::Solaris10,
      OsFamily::Solaris11 => PackageFormat::Solaris11,
      OsFamily::Windows => PackageFormat::Msi,
    }
  }
}

impl fmt::Display for OsFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Packaging backend identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
  Deb,
  Rpm,
  Osx,
  Solaris10,
  Solaris11,
  Msi,
  Swix,
}

impl PackageFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      PackageFormat::Deb => "deb",
      PackageFormat::Rpm => "rpm",
      PackageFormat::Osx => "osx",
      PackageFormat::Solaris10 => "solaris10",
      PackageFormat::Solaris11 => "solaris11",
      PackageFormat::Msi => "msi",
      PackageFormat::Swix => "swix",
    }
  }
}

impl fmt::Display for PackageFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Service manager convention; decides the service-file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
  Sysv,
  Systemd,
  Launchd,
  Smf,
  Aix,
  Windows,
}

impl ServiceType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServiceType::Sysv => "sysv",
      ServiceType::Systemd => "systemd",
      ServiceType::Launchd => "launchd",
      ServiceType::Smf => "smf",
      ServiceType::Aix => "aix",
      ServiceType::Windows => "windows",
    }
  }

  /// File name a service named `name` is installed under.
  pub fn service_file_name(&self, name: &str) -> String {
    match self {
      ServiceType::Systemd => format!("{name}.service"),
      ServiceType::Launchd => format!("{name}.plist"),
      ServiceType::Smf => format!("{name}.xml"),
      ServiceType::Sysv | ServiceType::Aix | ServiceType::Windows => name.to_string(),
    }
  }
}

impl fmt::Display for ServiceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
