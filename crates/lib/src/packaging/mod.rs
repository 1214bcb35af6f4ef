//! Packaging backends.
//!
//! Each [`PackageFormat`] has a base strategy (package naming, the shell
//! commands of the `package` rule, and the descriptor files it needs). Family
//! quirks are a small [`Overrides`] record applied on top, never a separate
//! backend.

mod deb;
mod osx;
mod rpm;
mod solaris;
mod windows;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::component::{ActionTiming, PackageAction, PackageState, Relation};
use crate::consts::OUTPUT_DIR;
use crate::platform::{OsFamily, PackageFormat, Platform};
use crate::project::Project;

/// Family-specific adjustments to a format's base strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
  /// Architecture label used in package names and tool invocations.
  pub arch: Option<String>,
  /// `rpmbuild` replacement.
  pub rpmbuild: Option<&'static str>,
  /// `%{dist}` tag for rpm releases.
  pub dist: Option<String>,
  /// Extra `--define` arguments for rpmbuild.
  pub rpm_defines: Vec<String>,
}

pub fn overrides_for(platform: &Platform) -> Overrides {
  let major = platform.os_version.split('.').next().unwrap_or(&platform.os_version);
  let arch = platform.architecture();
  let mut o = Overrides::default();

  match platform.family {
    OsFamily::El | OsFamily::RedHatFips => o.dist = Some(format!("el{major}")),
    OsFamily::Fedora => o.dist = Some(format!("fc{major}")),
    OsFamily::Sles => o.dist = Some(format!("sles{major}")),
    OsFamily::CiscoWrlinux => o.dist = Some(format!("cisco_wrlinux{major}")),
    OsFamily::Eos => o.dist = Some(format!("eos{major}")),
    OsFamily::Aix => {
      o.dist = Some(format!("aix{}", platform.os_version));
      o.arch = Some("ppc".to_string());
      o.rpmbuild = Some("/usr/bin/rpm");
      o.rpm_defines.push("_binary_payload w9.gzdio".to_string());
    }
    OsFamily::Debian | OsFamily::Ubuntu | OsFamily::Cumulus | OsFamily::HuaweiOs => {
      let deb_arch = match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "i686" | "i386" => "i386",
        other => other,
      };
      o.arch = Some(deb_arch.to_string());
    }
    OsFamily::Windows => {
      let msi_arch = if matches!(arch, "x64" | "x86_64") { "x64" } else { "x86" };
      o.arch = Some(msi_arch.to_string());
    }
    OsFamily::Solaris10 | OsFamily::Solaris11 => {
      let sol_arch = if arch == "sparc" { "sparc" } else { "i386" };
      o.arch = Some(sol_arch.to_string());
    }
    OsFamily::Osx | OsFamily::MacOs => {}
  }
  o
}

/// Everything the format strategies need from a project.
pub(crate) struct PackageContext<'a> {
  pub project: &'a Project,
  pub platform: &'a Platform,
  pub overrides: Overrides,
  pub name: &'a str,
  pub version: &'a str,
  pub release: &'a str,
  pub arch: String,
}

impl<'a> PackageContext<'a> {
  fn new(project: &'a Project) -> Self {
    let platform = &project.platform;
    let overrides = overrides_for(platform);
    let arch = overrides
      .arch
      .clone()
      .unwrap_or_else(|| platform.architecture().to_string());
    Self {
      project,
      platform,
      overrides,
      name: &project.name,
      version: project.version.as_deref().unwrap_or("0.0.0"),
      release: &project.release,
      arch,
    }
  }

  /// Directory under `output/` packages land in.
  pub fn output_dir(&self) -> String {
    let p = self.platform;
    let major = p.os_version.split('.').next().unwrap_or(&p.os_version);
    match p.package_format {
      PackageFormat::Rpm => format!("{}/{}/products/{}", p.os_name, p.os_version, self.arch),
      PackageFormat::Deb => format!("deb/{}", p.codename.as_deref().unwrap_or(&p.os_version)),
      PackageFormat::Osx => format!("apple/{}/products/{}", p.os_version, p.architecture()),
      PackageFormat::Solaris10 | PackageFormat::Solaris11 => format!("solaris/{major}/products"),
      PackageFormat::Msi => "windows".to_string(),
      PackageFormat::Swix => format!("eos/{}/products/{}", p.os_version, p.architecture()),
    }
  }

  pub fn tarball(&self) -> String {
    self.project.tarball_name()
  }

  pub fn summary(&self) -> String {
    self
      .project
      .description
      .as_deref()
      .and_then(|d| d.lines().next())
      .unwrap_or(self.name)
      .to_string()
  }

  /// Every component's relations of one kind, deduplicated by name.
  pub fn relations(&self, pick: fn(&crate::component::Component) -> &Vec<Relation>) -> Vec<Relation> {
    let mut out: Vec<Relation> = Vec::new();
    for component in &self.project.components {
      for relation in pick(component) {
        if !out.iter().any(|r| r.name == relation.name) {
          out.push(relation.clone());
        }
      }
    }
    out
  }

  /// All component action scripts for `(state, timing)`, in component order.
  pub fn scripts(&self, state: PackageState, timing: ActionTiming) -> Vec<String> {
    self
      .project
      .components
      .iter()
      .flat_map(|c| c.actions.iter())
      .filter(|a: &&PackageAction| a.state == state && a.timing == timing)
      .flat_map(|a| a.scripts.iter().cloned())
      .collect()
  }

  pub fn config_files(&self) -> Vec<String> {
    self
      .project
      .components
      .iter()
      .flat_map(|c| c.files.iter())
      .filter(|f| f.config)
      .map(|f| f.path.clone())
      .collect()
  }
}

/// Installed-tree roots scanned before and after the build to compute the
/// package file list.
pub fn tracked_directories(project: &Project) -> Vec<String> {
  let mut dirs: Vec<String> = Vec::new();

  for dir in &project.directories {
    push_unique(&mut dirs, &dir.path);
  }
  for component in &project.components {
    for dir in &component.directories {
      push_unique(&mut dirs, &dir.path);
    }
    for file in &component.files {
      if let Some(parent) = file.parent() {
        push_unique(&mut dirs, parent);
      }
    }
  }
  if dirs.is_empty() {
    let fallback = match project.settings.get("prefix") {
      Some(prefix) => prefix.clone(),
      None => format!("/opt/{}", project.name),
    };
    push_unique(&mut dirs, &fallback);
  }
  dirs
}

fn push_unique(dirs: &mut Vec<String>, dir: &str) {
  if !dir.is_empty() && !dirs.iter().any(|d| d == dir) {
    dirs.push(dir.to_string());
  }
}

pub fn package_name(project: &Project) -> String {
  let ctx = PackageContext::new(project);
  match project.platform.package_format {
    PackageFormat::Rpm => rpm::package_name(&ctx),
    PackageFormat::Swix => rpm::swix_name(&ctx),
    PackageFormat::Deb => deb::package_name(&ctx),
    PackageFormat::Osx => osx::package_name(&ctx),
    PackageFormat::Solaris10 => solaris::package_name_10(&ctx),
    PackageFormat::Solaris11 => solaris::package_name_11(&ctx),
    PackageFormat::Msi => windows::package_name(&ctx),
  }
}

/// Directory under the workdir where packages are collected.
pub fn output_dir(project: &Project) -> String {
  format!("{OUTPUT_DIR}/{}", PackageContext::new(project).output_dir())
}

/// Recipe lines of the `package` rule.
pub fn generate_package(project: &Project) -> Vec<String> {
  let ctx = PackageContext::new(project);
  let mut commands = vec![format!("mkdir -p {}", output_dir(project))];
  commands.extend(match project.platform.package_format {
    PackageFormat::Rpm => rpm::commands(&ctx),
    PackageFormat::Swix => rpm::swix_commands(&ctx),
    PackageFormat::Deb => deb::commands(&ctx),
    PackageFormat::Osx => osx::commands(&ctx),
    PackageFormat::Solaris10 => solaris::commands_10(&ctx),
    PackageFormat::Solaris11 => solaris::commands_11(&ctx),
    PackageFormat::Msi => windows::commands(&ctx),
  });
  commands
}

/// Write the format's descriptor files into `workdir`, returning their paths.
pub fn generate_packaging_artifacts(project: &Project, workdir: &Path) -> std::io::Result<Vec<PathBuf>> {
  let ctx = PackageContext::new(project);
  let files = match project.platform.package_format {
    PackageFormat::Rpm | PackageFormat::Swix => rpm::artifacts(&ctx),
    PackageFormat::Deb => deb::artifacts(&ctx),
    PackageFormat::Osx => osx::artifacts(&ctx),
    PackageFormat::Solaris10 => solaris::artifacts_10(&ctx),
    PackageFormat::Solaris11 => solaris::artifacts_11(&ctx),
    PackageFormat::Msi => windows::artifacts(&ctx),
  };

  let mut written = Vec::with_capacity(files.len());
  for (relative, content, executable) in files {
    let path = workdir.join(&relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    if executable {
      set_executable(&path)?;
    }
    debug!(path = ?path, "wrote packaging artifact");
    written.push(path);
  }
  Ok(written)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

/// A descriptor file: path relative to the workdir, content, executable bit.
pub(crate) type Artifact = (String, String, bool);

/// A maintainer script body, or `None` when there is nothing to run.
pub(crate) fn shell_script(lines: &[String]) -> Option<String> {
  if lines.is_empty() {
    return None;
  }
  let mut script = String::from("#!/bin/sh\nset -e\n");
  for line in lines {
    script.push_str(line);
    script.push('\n');
  }
  Some(script)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::component::{Component, Directory, InstalledFile};
  use crate::project::ProjectDefinition;
  use tempfile::TempDir;

  pub(crate) fn project_on(platform: &str) -> Project {
    let mut project = Project::from_definition(
      "my-app",
      ProjectDefinition {
        version: Some("1.2.3".to_string()),
        description: Some("My application\nLonger text".to_string()),
        settings: [("prefix".to_string(), "/opt/my-app".to_string())].into(),
        ..Default::default()
      },
      Platform::from_name(platform).unwrap(),
      Path::new("/defs"),
    );
    project.add_component(
      Component::builder("component1")
        .requires(Relation::new("openssl"))
        .action(PackageState::Install, ActionTiming::Post, ["echo installed"])
        .finish()
        .unwrap(),
    );
    project
  }

  #[test]
  fn package_names_per_format() {
    assert_eq!(package_name(&project_on("el-7-x86_64")), "my-app-1.2.3-1.el7.x86_64.rpm");
    assert_eq!(package_name(&project_on("debian-12-x86_64")), "my-app_1.2.3-1_amd64.deb");
    assert_eq!(package_name(&project_on("windows-2019-x64")), "my-app-1.2.3-x64.msi");
    assert_eq!(package_name(&project_on("solaris-11-i386")), "my-app@1.2.3,5.11-1.i386.p5p");
    assert_eq!(package_name(&project_on("aix-7.2-ppc")), "my-app-1.2.3-1.aix7.2.ppc.rpm");
  }

  #[test]
  fn output_dirs_per_format() {
    assert_eq!(output_dir(&project_on("el-7-x86_64")), "output/el/7/products/x86_64");
    assert_eq!(output_dir(&project_on("debian-12-x86_64")), "output/deb/12");
    assert_eq!(output_dir(&project_on("solaris-10-sparc")), "output/solaris/10/products");
  }

  #[test]
  fn package_commands_start_with_output_dir() {
    for platform in ["el-7-x86_64", "debian-12-x86_64", "osx-12-x86_64", "solaris-10-i386", "windows-2019-x64", "eos-4-i386"] {
      let project = project_on(platform);
      let commands = generate_package(&project);
      assert_eq!(commands[0], format!("mkdir -p {}", output_dir(&project)), "{platform}");
      assert!(commands.len() > 1, "{platform}");
    }
  }

  #[test]
  fn aix_overrides_compose_on_rpm() {
    let project = project_on("aix-7.2-ppc");
    let commands = generate_package(&project).join("\n");
    assert!(commands.contains("/usr/bin/rpm -bb"));
    assert!(commands.contains("--define '_binary_payload w9.gzdio'"));
  }

  #[test]
  fn tracked_directories_fall_back_to_prefix() {
    assert_eq!(tracked_directories(&project_on("el-7-x86_64")), vec!["/opt/my-app"]);
  }

  #[test]
  fn tracked_directories_are_listed_once() {
    let mut project = project_on("el-7-x86_64");
    project.add_component(
      Component::builder("component2")
        .directory(Directory {
          path: "/opt/my-app/etc".to_string(),
          mode: None,
          owner: None,
          group: None,
        })
        .install_file(InstalledFile::new("/opt/my-app/etc/app.conf"))
        .install_file(InstalledFile::new("/opt/my-app/bin/app"))
        .finish()
        .unwrap(),
    );
    assert_eq!(tracked_directories(&project), vec!["/opt/my-app/etc", "/opt/my-app/bin"]);
  }

  #[test]
  fn artifacts_are_written() {
    let temp = TempDir::new().unwrap();
    let written = generate_packaging_artifacts(&project_on("el-7-x86_64"), temp.path()).unwrap();
    assert_eq!(written, vec![temp.path().join("my-app.spec")]);

    let written = generate_packaging_artifacts(&project_on("debian-12-x86_64"), temp.path()).unwrap();
    assert!(written.contains(&temp.path().join("debian/control")));
    assert!(written.contains(&temp.path().join("debian/postinst")));
  }
}
