//! Solaris 10 SVR4 datastreams and Solaris 11 IPS archives.

use std::fmt::Write as _;

use crate::component::{ActionTiming, PackageState};

use super::{Artifact, PackageContext, shell_script};

const PACKAGING_DIR: &str = "packaging/solaris";

/// SVR4 package instance names are limited to 32 characters.
fn pkg_instance(ctx: &PackageContext<'_>) -> String {
  ctx.name.chars().take(32).collect()
}

pub(super) fn package_name_10(ctx: &PackageContext<'_>) -> String {
  format!("{}-{}-{}.{}.pkg.gz", ctx.name, ctx.version, ctx.release, ctx.arch)
}

pub(super) fn package_name_11(ctx: &PackageContext<'_>) -> String {
  format!("{}@{},5.11-{}.{}.p5p", ctx.name, ctx.version, ctx.release, ctx.arch)
}

fn unpack(ctx: &PackageContext<'_>, dest: &str) -> String {
  format!(
    "gunzip -c {} | '{}' -C {dest} --strip-components 1 -xf -",
    ctx.tarball(),
    ctx.platform.toolchain.tar
  )
}

pub(super) fn commands_10(ctx: &PackageContext<'_>) -> Vec<String> {
  let root = "$(tempdir)/root";
  let stream = format!("$(tempdir)/{}", package_name_10(ctx).trim_end_matches(".gz"));
  vec![
    format!("mkdir -p {root} $(tempdir)/spool"),
    unpack(ctx, root),
    format!("sed -e 's|@WORKDIR@|$(workdir)|g' {PACKAGING_DIR}/prototype > $(tempdir)/prototype"),
    format!("(cd {root}; pkgproto .=/) >> $(tempdir)/prototype"),
    format!(
      "pkgmk -o -r {root} -d $(tempdir)/spool -f $(tempdir)/prototype -a {}",
      ctx.arch
    ),
    format!("pkgtrans -s $(tempdir)/spool {stream} {}", pkg_instance(ctx)),
    format!(
      "gzip -c {stream} > ./{}/{}",
      super::output_dir(ctx.project),
      package_name_10(ctx)
    ),
  ]
}

pub(super) fn commands_11(ctx: &PackageContext<'_>) -> Vec<String> {
  let proto = "$(tempdir)/proto";
  let manifest = format!("{PACKAGING_DIR}/{}.p5m", ctx.name);
  vec![
    format!("mkdir -p {proto}"),
    unpack(ctx, proto),
    format!("pkgsend generate {proto} | pkgfmt > $(tempdir)/{}.p5m.gen", ctx.name),
    format!(
      "pkgmogrify -DARCH=`uname -p` {manifest} $(tempdir)/{}.p5m.gen | pkgfmt > $(tempdir)/{}.p5m",
      ctx.name, ctx.name
    ),
    "pkgrepo create $(tempdir)/repo".to_string(),
    format!(
      "pkgrepo -s $(tempdir)/repo set publisher/prefix={}",
      publisher(ctx)
    ),
    format!(
      "pkgsend -s 'file://$(tempdir)/repo' publish -d {proto} --fmri-in-manifest $(tempdir)/{}.p5m",
      ctx.name
    ),
    format!(
      "pkgrecv -s 'file://$(tempdir)/repo' -a -d ./{}/{} '{}@{},5.11-{}'",
      super::output_dir(ctx.project),
      package_name_11(ctx),
      ctx.name,
      ctx.version,
      ctx.release
    ),
  ]
}

fn publisher(ctx: &PackageContext<'_>) -> String {
  ctx
    .project
    .vendor
    .as_deref()
    .and_then(|v| v.split_whitespace().next())
    .unwrap_or("kiln")
    .to_lowercase()
}

fn pkginfo(ctx: &PackageContext<'_>) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "PKG=\"{}\"", pkg_instance(ctx));
  let _ = writeln!(out, "NAME=\"{}\"", ctx.summary());
  let _ = writeln!(out, "ARCH=\"{}\"", ctx.arch);
  let _ = writeln!(out, "VERSION=\"{},REV={}\"", ctx.version, ctx.release);
  out.push_str("CATEGORY=\"application\"\n");
  let _ = writeln!(out, "VENDOR=\"{}\"", ctx.project.vendor.as_deref().unwrap_or("kiln"));
  out.push_str("BASEDIR=\"/\"\nCLASSES=\"none\"\n");
  out
}

pub(super) fn artifacts_10(ctx: &PackageContext<'_>) -> Vec<Artifact> {
  let hooks = [
    ("preinstall", PackageState::Install, ActionTiming::Pre),
    ("postinstall", PackageState::Install, ActionTiming::Post),
    ("preremove", PackageState::Removal, ActionTiming::Pre),
    ("postremove", PackageState::Removal, ActionTiming::Post),
  ];

  let mut prototype = format!("i pkginfo=@WORKDIR@/{PACKAGING_DIR}/pkginfo\n");
  let mut files = Vec::new();
  for (hook, state, timing) in hooks {
    if let Some(script) = shell_script(&ctx.scripts(state, timing)) {
      let _ = writeln!(prototype, "i {hook}=@WORKDIR@/{PACKAGING_DIR}/{hook}");
      files.push((format!("{PACKAGING_DIR}/{hook}"), script, true));
    }
  }
  files.insert(0, (format!("{PACKAGING_DIR}/pkginfo"), pkginfo(ctx), false));
  files.insert(1, (format!("{PACKAGING_DIR}/prototype"), prototype, false));
  files
}

/// IPS manifest template merged with the generated file list by pkgmogrify.
fn manifest(ctx: &PackageContext<'_>) -> String {
  let mut out = String::new();
  let _ = writeln!(
    out,
    "set name=pkg.fmri value=pkg://{}/{}@{},5.11-{}",
    publisher(ctx),
    ctx.name,
    ctx.version,
    ctx.release
  );
  let _ = writeln!(out, "set name=pkg.summary value=\"{}\"", ctx.summary());
  out.push_str("set name=variant.arch value=$(ARCH)\n");
  for relation in ctx.relations(|c| &c.requires) {
    let _ = writeln!(out, "depend fmri={} type=require", relation.name);
  }
  for file in ctx.config_files() {
    let _ = writeln!(
      out,
      "<transform file path={} -> add preserve renamenew>",
      file.trim_start_matches('/')
    );
  }
  out
}

pub(super) fn artifacts_11(ctx: &PackageContext<'_>) -> Vec<Artifact> {
  vec![(format!("{PACKAGING_DIR}/{}.p5m", ctx.name), manifest(ctx), false)]
}
