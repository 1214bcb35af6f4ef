//! rpm (and swix, which wraps an rpm).

use std::fmt::Write as _;

use crate::component::{ActionTiming, PackageState, Relation};

use super::{Artifact, PackageContext};

fn dist(ctx: &PackageContext<'_>) -> String {
  ctx
    .overrides
    .dist
    .clone()
    .unwrap_or_else(|| format!("{}{}", ctx.platform.os_name, ctx.platform.os_version))
}

pub(super) fn package_name(ctx: &PackageContext<'_>) -> String {
  format!("{}-{}-{}.{}.{}.rpm", ctx.name, ctx.version, ctx.release, dist(ctx), ctx.arch)
}

pub(super) fn swix_name(ctx: &PackageContext<'_>) -> String {
  format!("{}-{}-{}.{}.{}.swix", ctx.name, ctx.version, ctx.release, dist(ctx), ctx.arch)
}

fn spec_name(ctx: &PackageContext<'_>) -> String {
  format!("{}.spec", ctx.name)
}

pub(super) fn commands(ctx: &PackageContext<'_>) -> Vec<String> {
  let rpmbuild = ctx.overrides.rpmbuild.unwrap_or("rpmbuild");
  let mut defines = vec![
    "_topdir $(tempdir)/rpmbuild".to_string(),
    format!("dist .{}", dist(ctx)),
  ];
  defines.extend(ctx.overrides.rpm_defines.iter().cloned());
  let defines: Vec<String> = defines.iter().map(|d| format!("--define '{d}'")).collect();

  vec![
    "mkdir -p $(tempdir)/rpmbuild/SOURCES $(tempdir)/rpmbuild/SPECS $(tempdir)/rpmbuild/BUILD $(tempdir)/rpmbuild/RPMS $(tempdir)/rpmbuild/SRPMS".to_string(),
    format!("cp {} file-list $(tempdir)/rpmbuild/SOURCES", ctx.tarball()),
    format!("cp {} $(tempdir)/rpmbuild/SPECS", spec_name(ctx)),
    format!(
      "{rpmbuild} -bb --target {} {} $(tempdir)/rpmbuild/SPECS/{}",
      ctx.arch,
      defines.join(" "),
      spec_name(ctx)
    ),
    format!("cp $(tempdir)/rpmbuild/RPMS/*/*.rpm ./{}", super::output_dir(ctx.project)),
  ]
}

pub(super) fn swix_commands(ctx: &PackageContext<'_>) -> Vec<String> {
  let mut commands = commands(ctx);
  commands.push(format!(
    "swix create ./{}/{} $(tempdir)/rpmbuild/RPMS/*/*.rpm",
    super::output_dir(ctx.project),
    swix_name(ctx)
  ));
  commands
}

fn relation_line(tag: &str, relation: &Relation) -> String {
  match &relation.version {
    Some(version) => format!("{tag}: {} {version}\n", relation.name),
    None => format!("{tag}: {}\n", relation.name),
  }
}

/// Scriptlet body guarded by the rpm transaction count.
fn scriptlet(out: &mut String, section: &str, guarded: &[(&str, Vec<String>)]) {
  if guarded.iter().all(|(_, lines)| lines.is_empty()) {
    return;
  }
  let _ = writeln!(out, "\n{section}");
  for (condition, lines) in guarded {
    if lines.is_empty() {
      continue;
    }
    let _ = writeln!(out, "if {condition}; then");
    for line in lines {
      let _ = writeln!(out, "  {line}");
    }
    out.push_str("fi\n");
  }
}

fn spec(ctx: &PackageContext<'_>) -> String {
  let project = ctx.project;
  let mut out = String::new();

  out.push_str("%global debug_package %{nil}\n");
  out.push_str("%define __os_install_post %{nil}\n\n");
  let _ = writeln!(out, "Name: {}", ctx.name);
  let _ = writeln!(out, "Version: {}", ctx.version);
  let _ = writeln!(out, "Release: {}%{{?dist}}", ctx.release);
  let _ = writeln!(out, "Summary: {}", ctx.summary());
  let _ = writeln!(out, "License: {}", project.license.as_deref().unwrap_or("Unknown"));
  if let Some(vendor) = &project.vendor {
    let _ = writeln!(out, "Vendor: {vendor}");
  }
  if let Some(homepage) = &project.homepage {
    let _ = writeln!(out, "URL: {homepage}");
  }
  let _ = writeln!(out, "Source0: {}", ctx.tarball());
  out.push_str("Source1: file-list\n");
  out.push_str("AutoReqProv: no\n");

  for relation in ctx.relations(|c| &c.requires) {
    out.push_str(&relation_line("Requires", &relation));
  }
  for relation in ctx.relations(|c| &c.provides) {
    out.push_str(&relation_line("Provides", &relation));
  }
  for relation in ctx.relations(|c| &c.conflicts) {
    out.push_str(&relation_line("Conflicts", &relation));
  }
  for relation in ctx.relations(|c| &c.replaces) {
    out.push_str(&relation_line("Obsoletes", &relation));
  }

  let _ = writeln!(
    out,
    "\n%description\n{}",
    project.description.as_deref().unwrap_or(ctx.name)
  );
  let _ = writeln!(out, "\n%prep\n%setup -q -n {}-{}", ctx.name, ctx.version);
  out.push_str("\n%build\n");
  out.push_str("\n%install\nmkdir -p %{buildroot}\ncp -pr . %{buildroot}/\n");
  out.push_str("sed -e 's|^|/|' -e 's|^//|/|' %{SOURCE1} > %{_builddir}/file-list-for-rpm\n");

  scriptlet(
    &mut out,
    "%pre",
    &[
      ("[ \"$1\" -eq 1 ]", ctx.scripts(PackageState::Install, ActionTiming::Pre)),
      ("[ \"$1\" -gt 1 ]", ctx.scripts(PackageState::Upgrade, ActionTiming::Pre)),
    ],
  );
  scriptlet(
    &mut out,
    "%post",
    &[
      ("[ \"$1\" -eq 1 ]", ctx.scripts(PackageState::Install, ActionTiming::Post)),
      ("[ \"$1\" -gt 1 ]", ctx.scripts(PackageState::Upgrade, ActionTiming::Post)),
    ],
  );
  scriptlet(
    &mut out,
    "%preun",
    &[("[ \"$1\" -eq 0 ]", ctx.scripts(PackageState::Removal, ActionTiming::Pre))],
  );
  scriptlet(
    &mut out,
    "%postun",
    &[("[ \"$1\" -eq 0 ]", ctx.scripts(PackageState::Removal, ActionTiming::Post))],
  );

  out.push_str("\n%files -f %{_builddir}/file-list-for-rpm\n%defattr(-, root, root, 0755)\n");
  for dir in project.directories.iter().chain(project.components.iter().flat_map(|c| c.directories.iter())) {
    let mode = dir.mode.as_deref().unwrap_or("-");
    let owner = dir.owner.as_deref().unwrap_or("-");
    let group = dir.group.as_deref().unwrap_or("-");
    let _ = writeln!(out, "%dir %attr({mode}, {owner}, {group}) {}", dir.path);
  }
  for file in ctx.config_files() {
    let _ = writeln!(out, "%config(noreplace) {file}");
  }
  out
}

pub(super) fn artifacts(ctx: &PackageContext<'_>) -> Vec<Artifact> {
  vec![(spec_name(ctx), spec(ctx), false)]
}
