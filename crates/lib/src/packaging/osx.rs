use crate::component::{ActionTiming, PackageState};

use super::{Artifact, PackageContext, shell_script};

const SCRIPTS_DIR: &str = "packaging/osx/scripts";

pub(super) fn package_name(ctx: &PackageContext<'_>) -> String {
  format!(
    "{}-{}-{}.{}{}.dmg",
    ctx.name, ctx.version, ctx.release, ctx.platform.os_name, ctx.platform.os_version
  )
}

fn identifier(ctx: &PackageContext<'_>) -> String {
  let vendor = ctx
    .project
    .vendor
    .as_deref()
    .and_then(|v| v.split_whitespace().next())
    .unwrap_or("kiln")
    .to_lowercase();
  format!("com.{vendor}.{}", ctx.name)
}

pub(super) fn commands(ctx: &PackageContext<'_>) -> Vec<String> {
  let root = "$(tempdir)/osx/root";
  let pkg = format!("$(tempdir)/osx/dmg/{}-{}.pkg", ctx.name, ctx.version);
  vec![
    format!("mkdir -p {root} $(tempdir)/osx/dmg"),
    format!("tar -C {root} --strip-components 1 -xzf {}", ctx.tarball()),
    format!(
      "pkgbuild --root {root} --identifier {} --version {} --scripts {SCRIPTS_DIR} {pkg}",
      identifier(ctx),
      ctx.version
    ),
    format!(
      "hdiutil create -volname {}-{} -srcfolder $(tempdir)/osx/dmg -ov -format UDZO ./{}/{}",
      ctx.name,
      ctx.version,
      super::output_dir(ctx.project),
      package_name(ctx)
    ),
  ]
}

/// `preinstall`/`postinstall` always exist so `pkgbuild --scripts` has a
/// directory to read; upgrade actions run on the same hooks.
pub(super) fn artifacts(ctx: &PackageContext<'_>) -> Vec<Artifact> {
  [("preinstall", ActionTiming::Pre), ("postinstall", ActionTiming::Post)]
    .into_iter()
    .map(|(hook, timing)| {
      let mut lines = ctx.scripts(PackageState::Install, timing);
      lines.extend(ctx.scripts(PackageState::Upgrade, timing));
      let script = shell_script(&lines).unwrap_or_else(|| "#!/bin/sh\nexit 0\n".to_string());
      (format!("{SCRIPTS_DIR}/{hook}"), script, true)
    })
    .collect()
}
