use std::fmt::Write as _;

use crate::project::Project;

use super::RuleSet;

/// Render `rules` as a Makefile for `project`.
///
/// `all` is emitted first so it is the default goal. `workdir` and `tempdir`
/// are make variables; recipes refer to them as `$(workdir)`/`$(tempdir)`.
pub fn render_makefile(rules: &RuleSet, project: &Project) -> String {
  let mut out = String::new();
  let _ = writeln!(
    out,
    "# Generated by kiln {} for {} on {}",
    env!("CARGO_PKG_VERSION"),
    project.name,
    project.platform.name
  );
  out.push_str("# Do not edit: re-run `kiln render` instead.\n\n");
  out.push_str("workdir := $(shell pwd)\n");
  let _ = writeln!(out, "tempdir := $(shell {})", project.platform.toolchain.mktemp);
  out.push_str("export workdir\n\n");

  let phony: Vec<&str> = rules.rules().iter().filter(|r| r.phony).map(|r| r.target.as_str()).collect();
  if !phony.is_empty() {
    let _ = writeln!(out, ".PHONY: {}\n", phony.join(" "));
  }

  let ordered = rules
    .get("all")
    .into_iter()
    .chain(rules.rules().iter().filter(|r| r.target != "all"));
  for rule in ordered {
    if rule.dependencies.is_empty() {
      let _ = writeln!(out, "{}:", rule.target);
    } else {
      let _ = writeln!(out, "{}: {}", rule.target, rule.dependencies.join(" "));
    }
    for line in &rule.recipe {
      let _ = writeln!(out, "\t{line}");
    }
    out.push('\n');
  }
  out
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;
  use crate::component::Component;
  use crate::platform::Platform;
  use crate::project::ProjectDefinition;
  use crate::rules::synthesize;

  fn project() -> Project {
    let mut project = Project::from_definition(
      "my-app",
      ProjectDefinition {
        version: Some("1.2.3".to_string()),
        ..Default::default()
      },
      Platform::from_name("el-7-x86_64").unwrap(),
      Path::new("/defs"),
    );
    project.add_component(Component::builder("tool").build(["make -j2"]).finish().unwrap());
    project
  }

  #[test]
  fn all_is_the_default_goal() {
    let project = project();
    let makefile = render_makefile(&synthesize(&project).unwrap(), &project);

    let first_rule = makefile
      .lines()
      .find(|l| !l.starts_with('#') && !l.starts_with('.') && l.contains(':') && !l.contains(":="))
      .unwrap();
    assert_eq!(first_rule, "all: my-app-project package");
    assert!(makefile.contains(".PHONY: tool-clean tool-clobber all clean clobber\n"));
  }

  #[test]
  fn recipes_are_tab_indented() {
    let project = project();
    let makefile = render_makefile(&synthesize(&project).unwrap(), &project);
    assert!(makefile.contains("tool-build: tool-configure\n\tcd ./ && make -j2\n\ttouch tool-build\n"));
    assert!(makefile.contains("tempdir := $(shell mktemp -d -p /var/tmp)\n"));
  }
}
