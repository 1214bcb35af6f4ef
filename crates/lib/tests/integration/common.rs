use std::path::Path;

use kiln_lib::platform::load_platform;
use kiln_lib::project::{Project, load_project};
use tempfile::TempDir;

pub fn write(path: &Path, content: &str) {
  std::fs::create_dir_all(path.parent().unwrap()).unwrap();
  std::fs::write(path, content).unwrap();
}

/// Config directory holding `my-app` 1.2.3 for `el-7-x86_64`, where
/// component2 build-requires component1 and the external `zlib-devel`.
pub fn my_app_configdir() -> TempDir {
  let temp = TempDir::new().unwrap();
  let root = temp.path();

  write(&root.join("platforms/el-7-x86_64.toml"), "");
  write(
    &root.join("projects/my-app.toml"),
    r#"
      version = "1.2.3"
      license = "Apache-2.0"
      vendor = "Example Inc."
      description = "An example application"
      components = ["component1", "component2"]

      [settings]
      prefix = "/opt/my-app"
    "#,
  );
  write(
    &root.join("components/component1.toml"),
    r#"
      version = "1.0.0"
      configure = ["echo c1-configure %{settings:prefix}"]
      build = ["echo c1-build"]
      install = ["echo c1-install"]
    "#,
  );
  write(
    &root.join("components/component2.toml"),
    r#"
      version = "2.0.0"
      build_requires = ["component1", "zlib-devel"]
      configure = ["echo c2-configure"]
      build = ["echo c2-build"]
      install = ["echo c2-install"]
    "#,
  );
  temp
}

pub fn load_my_app(configdir: &Path) -> Project {
  let platform = load_platform("el-7-x86_64", configdir).unwrap();
  load_project("my-app", configdir, platform).unwrap()
}
