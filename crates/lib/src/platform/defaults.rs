//! Per-family toolchain defaults.
//!
//! A base record covers the common Linux conventions; each family applies a
//! small override on top. Platform definitions override any field again.

use super::family::{OsFamily, ServiceType};

/// Tool locations used when synthesizing recipes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Toolchain {
  pub make: String,
  pub tar: String,
  pub patch: String,
  pub install: String,
  pub mktemp: String,
  pub sort: String,
  pub find: String,
  pub shasum: String,
  pub copy: String,
  pub cflags: String,
  pub ldflags: String,
}

/// Command that installs a list of build dependencies: `<command> <deps> <suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct DependencyInstaller {
  pub command: String,
  pub suffix: String,
}

impl DependencyInstaller {
  pub fn new(command: &str) -> Self {
    Self {
      command: command.to_string(),
      suffix: String::new(),
    }
  }

  /// The full install command, or `None` when there is nothing to install.
  pub fn command_for(&self, dependencies: &[String]) -> Option<String> {
    if dependencies.is_empty() || self.command.is_empty() {
      return None;
    }
    let mut line = format!("{} {}", self.command, dependencies.join(" "));
    if !self.suffix.is_empty() {
      line.push(' ');
      line.push_str(&self.suffix);
    }
    Some(line)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDefaults {
  pub toolchain: Toolchain,
  pub servicetype: ServiceType,
  pub servicedir: String,
  pub defaultdir: String,
  pub installer: DependencyInstaller,
}

fn base() -> PlatformDefaults {
  PlatformDefaults {
    toolchain: Toolchain {
      make: "make".to_string(),
      tar: "tar".to_string(),
      patch: "/usr/bin/patch".to_string(),
      install: "install".to_string(),
      mktemp: "mktemp -d -p /var/tmp".to_string(),
      sort: "sort".to_string(),
      find: "find".to_string(),
      shasum: "sha1sum".to_string(),
      copy: "cp -rp".to_string(),
      cflags: String::new(),
      ldflags: String::new(),
    },
    servicetype: ServiceType::Systemd,
    servicedir: "/usr/lib/systemd/system".to_string(),
    defaultdir: "/etc/sysconfig".to_string(),
    installer: DependencyInstaller::default(),
  }
}

fn major_version(os_version: &str) -> u32 {
  os_version
    .split(|c: char| !c.is_ascii_digit())
    .next()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

fn sysv(defaults: &mut PlatformDefaults, servicedir: &str) {
  defaults.servicetype = ServiceType::Sysv;
  defaults.servicedir = servicedir.to_string();
}

/// Compose the defaults for `family` at `os_version`.
pub fn for_family(family: OsFamily, os_version: &str) -> PlatformDefaults {
  let mut d = base();
  let major = major_version(os_version);

  match family {
    OsFamily::Debian | OsFamily::Ubuntu | OsFamily::Cumulus | OsFamily::HuaweiOs => {
      d.servicedir = "/lib/systemd/system".to_string();
      d.defaultdir = "/etc/default".to_string();
      d.installer = DependencyInstaller::new("DEBIAN_FRONTEND=noninteractive apt-get install -qy --no-install-recommends");
    }
    OsFamily::El | OsFamily::RedHatFips => {
      if major < 7 {
        sysv(&mut d, "/etc/rc.d/init.d");
      }
      d.installer = DependencyInstaller::new("yum install --assumeyes");
    }
    OsFamily::Fedora => {
      d.installer = DependencyInstaller::new("/usr/bin/dnf install -y --best --allowerasing");
    }
    OsFamily::Sles => {
      if major < 12 {
        sysv(&mut d, "/etc/init.d");
      }
      d.installer = DependencyInstaller::new("zypper -n --no-gpg-checks install -y");
    }
    OsFamily::CiscoWrlinux => {
      sysv(&mut d, "/etc/init.d");
      d.installer = DependencyInstaller::new("yum install --assumeyes");
    }
    OsFamily::Eos => {
      sysv(&mut d, "/etc/init.d");
      d.installer = DependencyInstaller::new("rpm -Uvh --replacepkgs");
    }
    OsFamily::Aix => {
      d.toolchain.make = "gmake".to_string();
      d.toolchain.tar = "/opt/freeware/bin/tar".to_string();
      d.toolchain.patch = "/opt/freeware/bin/patch".to_string();
      d.toolchain.install = "/opt/freeware/bin/install".to_string();
      d.toolchain.mktemp = "/opt/freeware/bin/mktemp -d".to_string();
      d.toolchain.find = "/opt/freeware/bin/find".to_string();
      d.toolchain.sort = "/opt/freeware/bin/sort".to_string();
      d.toolchain.shasum = "/opt/freeware/bin/sha1sum".to_string();
      d.servicetype = ServiceType::Aix;
      d.servicedir = "/etc/rc.d".to_string();
      d.defaultdir = "/etc/rc.d".to_string();
      d.installer = DependencyInstaller::new("rpm -Uvh --replacepkgs");
    }
    OsFamily::Osx | OsFamily::MacOs => {
      d.toolchain.patch = "/usr/bin/patch".to_string();
      d.toolchain.mktemp = "mktemp -d -t 'tmp'".to_string();
      d.toolchain.shasum = "/usr/bin/shasum".to_string();
      d.toolchain.copy = "cp -RP".to_string();
      d.servicetype = ServiceType::Launchd;
      d.servicedir = "/Library/LaunchDaemons".to_string();
      d.defaultdir = "/usr/local/etc".to_string();
      d.installer = DependencyInstaller::new("brew install");
    }
    OsFamily::Solaris10 => {
      d.toolchain.make = "/opt/csw/bin/gmake".to_string();
      d.toolchain.tar = "/usr/sfw/bin/gtar".to_string();
      d.toolchain.patch = "/usr/bin/gpatch".to_string();
      d.toolchain.install = "/opt/csw/bin/ginstall".to_string();
      d.toolchain.mktemp = "/opt/csw/bin/gmktemp -d -p /var/tmp".to_string();
      d.toolchain.sort = "/usr/xpg4/bin/sort".to_string();
      d.toolchain.find = "/opt/csw/bin/gfind".to_string();
      d.toolchain.shasum = "/opt/csw/bin/gsha1sum".to_string();
      d.servicetype = ServiceType::Smf;
      d.servicedir = "/var/svc/manifest".to_string();
      d.defaultdir = "/lib/svc/method".to_string();
      d.installer = DependencyInstaller {
        command: "/opt/csw/bin/pkgutil -y -i".to_string(),
        suffix: String::new(),
      };
    }
    OsFamily::Solaris11 => {
      d.toolchain.make = "/usr/bin/gmake".to_string();
      d.toolchain.tar = "/usr/bin/gtar".to_string();
      d.toolchain.patch = "/usr/bin/gpatch".to_string();
      d.toolchain.install = "/usr/bin/ginstall".to_string();
      d.toolchain.sort = "/usr/bin/sort".to_string();
      d.toolchain.find = "/usr/bin/find".to_string();
      d.toolchain.shasum = "/usr/bin/shasum".to_string();
      d.servicetype = ServiceType::Smf;
      d.servicedir = "/lib/svc/manifest".to_string();
      d.defaultdir = "/lib/svc/method".to_string();
      d.installer = DependencyInstaller {
        command: "pkg install".to_string(),
        suffix: "|| [[ $? -eq 4 ]]".to_string(),
      };
    }
    OsFamily::Windows => {
      d.toolchain.make = "/usr/bin/make".to_string();
      d.toolchain.tar = "/usr/bin/tar".to_string();
      d.toolchain.patch = "/usr/bin/patch".to_string();
      d.toolchain.install = "/usr/bin/install".to_string();
      d.toolchain.mktemp = "mktemp -d -p C:/cygwin64/var/tmp".to_string();
      d.toolchain.shasum = "/usr/bin/sha1sum".to_string();
      d.servicetype = ServiceType::Windows;
      d.servicedir = String::new();
      d.defaultdir = String::new();
      d.installer = DependencyInstaller::new("C:/ProgramData/chocolatey/bin/choco.exe install -y");
    }
  }

  d
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn el6_uses_sysv_and_el7_systemd() {
    assert_eq!(for_family(OsFamily::El, "6").servicetype, ServiceType::Sysv);
    assert_eq!(for_family(OsFamily::El, "6").servicedir, "/etc/rc.d/init.d");
    assert_eq!(for_family(OsFamily::El, "7").servicetype, ServiceType::Systemd);
  }

  #[test]
  fn aix_overrides_make_and_service() {
    let d = for_family(OsFamily::Aix, "7.2");
    assert_eq!(d.toolchain.make, "gmake");
    assert_eq!(d.servicetype, ServiceType::Aix);
    // untouched base values remain
    assert_eq!(d.toolchain.cflags, "");
  }

  #[test]
  fn debian_installs_with_apt() {
    let d = for_family(OsFamily::Debian, "12");
    assert!(d.installer.command.contains("apt-get install"));
    assert_eq!(d.defaultdir, "/etc/default");
  }

  #[test]
  fn installer_command_skips_empty_lists() {
    let installer = DependencyInstaller::new("yum install --assumeyes");
    assert_eq!(installer.command_for(&[]), None);
    assert_eq!(
      installer.command_for(&["gcc".to_string(), "make".to_string()]),
      Some("yum install --assumeyes gcc make".to_string())
    );
  }

  #[test]
  fn installer_appends_suffix() {
    let d = for_family(OsFamily::Solaris11, "11");
    let cmd = d.installer.command_for(&["gcc".to_string()]).unwrap();
    assert!(cmd.ends_with("gcc || [[ $? -eq 4 ]]"));
  }
}
