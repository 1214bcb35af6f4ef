use std::fmt::Write as _;

use super::{Artifact, PackageContext};

const WIX_BIN: &str = "C:/Program Files (x86)/WiX Toolset v3.11/bin";

pub(super) fn package_name(ctx: &PackageContext<'_>) -> String {
  format!("{}-{}-{}.msi", ctx.name, ctx.version, ctx.arch)
}

fn wxs_path(ctx: &PackageContext<'_>) -> String {
  format!("packaging/windows/{}.wxs", ctx.name)
}

pub(super) fn commands(ctx: &PackageContext<'_>) -> Vec<String> {
  vec![
    "mkdir -p $(tempdir)/wix/SourceDir".to_string(),
    format!(
      "gunzip -c {} | '{}' -C $(tempdir)/wix/SourceDir --strip-components 1 -xf -",
      ctx.tarball(),
      ctx.platform.toolchain.tar
    ),
    format!(
      "cd $(tempdir)/wix && \"{WIX_BIN}/heat.exe\" dir SourceDir -nologo -srd -gg -cg AppFiles -dr INSTALLDIR -var var.SourceDir -out files.wxs"
    ),
    format!(
      "\"{WIX_BIN}/candle.exe\" -nologo -arch {} -dSourceDir=$(tempdir)/wix/SourceDir -out $(tempdir)/wix/ {} $(tempdir)/wix/files.wxs",
      ctx.arch,
      wxs_path(ctx)
    ),
    format!(
      "\"{WIX_BIN}/light.exe\" -nologo -b $(tempdir)/wix/SourceDir -out ./{}/{} $(tempdir)/wix/*.wixobj",
      super::output_dir(ctx.project),
      package_name(ctx)
    ),
  ]
}

fn wxs(ctx: &PackageContext<'_>) -> String {
  let vendor = ctx.project.vendor.as_deref().unwrap_or("kiln");
  let program_files = if ctx.arch == "x64" { "ProgramFiles64Folder" } else { "ProgramFilesFolder" };
  let mut out = String::new();
  out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
  out.push_str("<Wix xmlns=\"http://schemas.microsoft.com/wix/2006/wi\">\n");
  let _ = writeln!(
    out,
    "  <Product Id=\"*\" Name=\"{}\" Language=\"1033\" Version=\"{}\" Manufacturer=\"{vendor}\" UpgradeCode=\"{}\">",
    ctx.name,
    ctx.version,
    upgrade_code(ctx.name)
  );
  out.push_str("    <Package InstallerVersion=\"300\" Compressed=\"yes\" InstallScope=\"perMachine\" />\n");
  out.push_str("    <MajorUpgrade DowngradeErrorMessage=\"A newer version is already installed.\" />\n");
  out.push_str("    <MediaTemplate EmbedCab=\"yes\" />\n");
  out.push_str("    <Directory Id=\"TARGETDIR\" Name=\"SourceDir\">\n");
  let _ = writeln!(out, "      <Directory Id=\"{program_files}\">");
  let _ = writeln!(out, "        <Directory Id=\"INSTALLDIR\" Name=\"{}\" />", ctx.name);
  out.push_str("      </Directory>\n    </Directory>\n");
  out.push_str("    <Feature Id=\"Main\" Level=\"1\">\n      <ComponentGroupRef Id=\"AppFiles\" />\n    </Feature>\n");
  out.push_str("  </Product>\n</Wix>\n");
  out
}

/// Stable upgrade GUID derived from the package name.
fn upgrade_code(name: &str) -> String {
  let digest = format!("{:x}", md5::compute(format!("kiln-upgrade-{name}")));
  format!(
    "{}-{}-{}-{}-{}",
    &digest[0..8],
    &digest[8..12],
    &digest[12..16],
    &digest[16..20],
    &digest[20..32]
  )
  .to_uppercase()
}

pub(super) fn artifacts(ctx: &PackageContext<'_>) -> Vec<Artifact> {
  vec![(wxs_path(ctx), wxs(ctx), false)]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::packaging::tests::project_on;

  #[test]
  fn upgrade_code_is_stable_guid() {
    let code = upgrade_code("my-app");
    assert_eq!(code, upgrade_code("my-app"));
    assert_ne!(code, upgrade_code("other"));
    assert_eq!(code.len(), 36);
    assert_eq!(code.matches('-').count(), 4);
  }

  #[test]
  fn wxs_targets_program_files_for_arch() {
    let project = project_on("windows-2019-x64");
    let ctx = PackageContext::new(&project);
    assert!(wxs(&ctx).contains("ProgramFiles64Folder"));

    let project = project_on("windows-2012-x86");
    let ctx = PackageContext::new(&project);
    assert!(wxs(&ctx).contains("\"ProgramFilesFolder\""));
  }
}
