use std::fmt::Write as _;

use crate::component::{ActionTiming, PackageState, Relation};

use super::{Artifact, PackageContext, shell_script};

pub(super) fn package_name(ctx: &PackageContext<'_>) -> String {
  let codename = ctx.platform.codename.as_deref().unwrap_or_default();
  format!("{}_{}-{}{}_{}.deb", ctx.name, ctx.version, ctx.release, codename, ctx.arch)
}

pub(super) fn commands(ctx: &PackageContext<'_>) -> Vec<String> {
  let tar = &ctx.platform.toolchain.tar;
  let stage = format!("$(tempdir)/{}-{}", ctx.name, ctx.version);
  vec![
    format!("mkdir -p {stage}"),
    format!("cp -pr debian {stage}"),
    changelog_command(ctx, &stage),
    format!("gunzip -c {} | '{tar}' -C '{stage}' --strip-components 1 -xf -", ctx.tarball()),
    format!("sed -e 's|^/||' file-list > {stage}/debian/{}.install", ctx.name),
    format!("(cd {stage}; debuild --no-lintian -uc -us -b)"),
    format!("cp $(tempdir)/*.deb ./{}", super::output_dir(ctx.project)),
  ]
}

fn relation_list(relations: &[Relation]) -> String {
  relations
    .iter()
    .map(|r| match &r.version {
      Some(version) => format!("{} ({version})", r.name),
      None => r.name.clone(),
    })
    .collect::<Vec<_>>()
    .join(", ")
}

fn control(ctx: &PackageContext<'_>) -> String {
  let project = ctx.project;
  let maintainer = project.vendor.as_deref().unwrap_or("kiln <kiln@localhost>");
  let mut out = String::new();

  let _ = writeln!(out, "Source: {}", ctx.name);
  let _ = writeln!(out, "Maintainer: {maintainer}");
  out.push_str("Section: admin\nPriority: optional\nBuild-Depends: debhelper (>= 9)\nStandards-Version: 3.9.1\n");
  if let Some(homepage) = &project.homepage {
    let _ = writeln!(out, "Homepage: {homepage}");
  }

  let _ = writeln!(out, "\nPackage: {}", ctx.name);
  let _ = writeln!(out, "Architecture: {}", ctx.arch);
  let fields: [(&str, Vec<Relation>); 4] = [
    ("Depends", ctx.relations(|c| &c.requires)),
    ("Provides", ctx.relations(|c| &c.provides)),
    ("Conflicts", ctx.relations(|c| &c.conflicts)),
    ("Replaces", ctx.relations(|c| &c.replaces)),
  ];
  for (field, relations) in fields {
    if !relations.is_empty() {
      let _ = writeln!(out, "{field}: {}", relation_list(&relations));
    }
  }
  let _ = writeln!(out, "Description: {}", ctx.summary());
  for line in project.description.iter().flat_map(|d| d.lines().skip(1)) {
    let line = if line.trim().is_empty() { "." } else { line };
    let _ = writeln!(out, " {line}");
  }
  out
}

/// Changelog written at package time, stamped with the build date.
fn changelog_command(ctx: &PackageContext<'_>, stage: &str) -> String {
  let maintainer = ctx.project.vendor.as_deref().unwrap_or("kiln <kiln@localhost>");
  format!(
    "printf '%s (%s-%s) stable; urgency=low\\n\\n  * Build by kiln\\n\\n -- %s  %s\\n' '{}' '{}' '{}' '{maintainer}' \"$$(date -R)\" > {stage}/debian/changelog",
    ctx.name, ctx.version, ctx.release
  )
}

const RULES: &str = "#!/usr/bin/make -f\n\n%:\n\tdh $@\n\noverride_dh_auto_build:\noverride_dh_auto_install:\noverride_dh_auto_test:\noverride_dh_strip:\noverride_dh_shlibdeps:\n";

/// Maintainer script body: the install and upgrade branches of
/// `preinst`/`postinst`, the removal branch of `prerm`/`postrm`.
fn maintainer_script(ctx: &PackageContext<'_>, timing: ActionTiming, removal: bool) -> Option<String> {
  let mut lines = Vec::new();
  if removal {
    let scripts = ctx.scripts(PackageState::Removal, timing);
    if !scripts.is_empty() {
      lines.push("if [ \"$1\" = remove ]; then".to_string());
      lines.extend(scripts.into_iter().map(|s| format!("  {s}")));
      lines.push("fi".to_string());
    }
  } else {
    let install = ctx.scripts(PackageState::Install, timing);
    let upgrade = ctx.scripts(PackageState::Upgrade, timing);
    if !install.is_empty() {
      lines.push("if [ -z \"$2\" ]; then".to_string());
      lines.extend(install.into_iter().map(|s| format!("  {s}")));
      lines.push("fi".to_string());
    }
    if !upgrade.is_empty() {
      lines.push("if [ -n \"$2\" ]; then".to_string());
      lines.extend(upgrade.into_iter().map(|s| format!("  {s}")));
      lines.push("fi".to_string());
    }
  }
  shell_script(&lines)
}

pub(super) fn artifacts(ctx: &PackageContext<'_>) -> Vec<Artifact> {
  let mut files = vec![
    ("debian/control".to_string(), control(ctx), false),
    ("debian/compat".to_string(), "9\n".to_string(), false),
    ("debian/rules".to_string(), RULES.to_string(), true),
  ];

  let conffiles = ctx.config_files();
  if !conffiles.is_empty() {
    files.push(("debian/conffiles".to_string(), format!("{}\n", conffiles.join("\n")), false));
  }

  let hooks = [
    ("preinst", ActionTiming::Pre, false),
    ("postinst", ActionTiming::Post, false),
    ("prerm", ActionTiming::Pre, true),
    ("postrm", ActionTiming::Post, true),
  ];
  for (hook, timing, removal) in hooks {
    if let Some(script) = maintainer_script(ctx, timing, removal) {
      files.push((format!("debian/{hook}"), script, true));
    }
  }
  files
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::packaging::tests::project_on;

  #[test]
  fn control_lists_depends() {
    let project = project_on("debian-12-x86_64");
    let ctx = PackageContext::new(&project);
    let control = control(&ctx);
    assert!(control.contains("Package: my-app\nArchitecture: amd64\n"));
    assert!(control.contains("Depends: openssl\n"));
    assert!(control.contains("Description: My application\n Longer text\n"));
  }

  #[test]
  fn postinst_runs_install_branch_only_on_fresh_install() {
    let project = project_on("ubuntu-22.04-x86_64");
    let ctx = PackageContext::new(&project);
    let script = maintainer_script(&ctx, ActionTiming::Post, false).unwrap();
    assert!(script.contains("if [ -z \"$2\" ]; then\n  echo installed\nfi"));
    assert!(maintainer_script(&ctx, ActionTiming::Pre, true).is_none());
  }
}
