use std::collections::BTreeMap;

use tracing::debug;

use crate::platform::Platform;

use super::{
  AbsEngine, BaseEngine, Capabilities, DockerEngine, Ec2Engine, Engine, EngineContext, EngineError, HardwareEngine,
  LocalEngine, PoolerEngine,
};

/// Constructs an engine from its context.
pub type EngineFactory = fn(EngineContext) -> Box<dyn Engine>;

struct Registration {
  capabilities: Capabilities,
  factory: EngineFactory,
}

/// Engines by name. Built once at startup and passed to whoever creates
/// engines.
#[derive(Default)]
pub struct EngineRegistry {
  engines: BTreeMap<String, Registration>,
}

impl EngineRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry holding every built-in engine.
  pub fn with_defaults() -> Result<Self, EngineError> {
    let mut registry = Self::new();
    registry.register("local", Capabilities::default(), |ctx| Box::new(LocalEngine::new(ctx)))?;
    registry.register(
      "base",
      Capabilities {
        remote: true,
        ..Default::default()
      },
      |ctx| Box::new(BaseEngine::new(ctx)),
    )?;
    let leased = Capabilities {
      remote: true,
      teardown: true,
      ephemeral: false,
    };
    let ephemeral = Capabilities {
      ephemeral: true,
      ..leased
    };
    registry.register("docker", leased, |ctx| Box::new(DockerEngine::new(ctx)))?;
    registry.register("hardware", ephemeral, |ctx| Box::new(HardwareEngine::new(ctx)))?;
    registry.register("pooler", leased, |ctx| Box::new(PoolerEngine::new(ctx)))?;
    registry.register("always_be_scheduling", leased, |ctx| Box::new(AbsEngine::new(ctx)))?;
    registry.register("ec2", ephemeral, |ctx| Box::new(Ec2Engine::new(ctx)))?;
    Ok(registry)
  }

  pub fn register(
    &mut self,
    name: impl Into<String>,
    capabilities: Capabilities,
    factory: EngineFactory,
  ) -> Result<(), EngineError> {
    let name = name.into();
    if self.engines.contains_key(&name) {
      return Err(EngineError::DuplicateEngine(name));
    }
    if capabilities.ephemeral && !capabilities.teardown {
      return Err(EngineError::EphemeralWithoutTeardown(name));
    }
    debug!(engine = %name, ?capabilities, "registering engine");
    self.engines.insert(name, Registration { capabilities, factory });
    Ok(())
  }

  pub fn create(&self, name: &str, ctx: EngineContext) -> Result<Box<dyn Engine>, EngineError> {
    let registration = self
      .engines
      .get(name)
      .ok_or_else(|| EngineError::UnknownEngine(name.to_string()))?;
    Ok((registration.factory)(ctx))
  }

  pub fn capabilities(&self, name: &str) -> Option<Capabilities> {
    self.engines.get(name).map(|r| r.capabilities)
  }

  pub fn names(&self) -> Vec<&str> {
    self.engines.keys().map(String::as_str).collect()
  }
}

/// Engine used when none is named: chosen from the platform's attributes.
pub fn default_engine_for(platform: &Platform) -> &'static str {
  let engine = &platform.engine;
  if !engine.build_hosts.is_empty() {
    "hardware"
  } else if engine.aws_ami.is_some() {
    "ec2"
  } else if engine.docker_image.is_some() {
    "docker"
  } else {
    "pooler"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::test_support::context;

  #[test]
  fn defaults_register_every_engine() {
    let registry = EngineRegistry::with_defaults().unwrap();
    assert_eq!(
      registry.names(),
      vec!["always_be_scheduling", "base", "docker", "ec2", "hardware", "local", "pooler"]
    );
  }

  #[test]
  fn created_engines_report_registered_capabilities() {
    let registry = EngineRegistry::with_defaults().unwrap();
    let platform = Platform::from_name("el-7-x86_64").unwrap();
    for name in registry.names() {
      let (ctx, _runner) = context(platform.clone());
      let engine = registry.create(name, ctx).unwrap();
      assert_eq!(engine.name(), name);
      assert_eq!(Some(engine.capabilities()), registry.capabilities(name), "{name}");
      assert!(engine.target().is_none(), "{name}");
      assert!(engine.remote_workdir().is_none(), "{name}");
    }
  }

  #[tokio::test]
  async fn teardown_before_select_is_harmless() {
    let registry = EngineRegistry::with_defaults().unwrap();
    let platform = Platform::from_name("el-7-x86_64").unwrap();
    for name in registry.names() {
      let (ctx, runner) = context(platform.clone());
      let mut engine = registry.create(name, ctx).unwrap();
      engine.teardown().await.unwrap();
      assert!(runner.commands().is_empty(), "{name}");
    }
  }

  #[test]
  fn rejects_duplicates_and_ephemeral_without_teardown() {
    let mut registry = EngineRegistry::with_defaults().unwrap();
    let err = registry
      .register("local", Capabilities::default(), |ctx| Box::new(LocalEngine::new(ctx)))
      .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateEngine(n) if n == "local"));

    let err = registry
      .register(
        "broken",
        Capabilities {
          ephemeral: true,
          ..Default::default()
        },
        |ctx| Box::new(LocalEngine::new(ctx)),
      )
      .unwrap_err();
    assert!(matches!(err, EngineError::EphemeralWithoutTeardown(_)));
  }

  #[test]
  fn unknown_engine_is_a_configuration_error() {
    let registry = EngineRegistry::with_defaults().unwrap();
    let (ctx, _runner) = context(Platform::from_name("el-7-x86_64").unwrap());
    let err = registry.create("vagrant", ctx).err().unwrap();
    assert_eq!(err.to_string(), "unknown engine 'vagrant'");
  }

  fn fully_described_platform() -> Platform {
    let mut platform = Platform::from_name("el-7-x86_64").unwrap();
    let e = &mut platform.engine;
    e.docker_image = Some("centos:7".into());
    e.build_hosts = vec!["h1".into(), "h2".into()];
    e.vmpooler_template = Some("centos-7-x86_64".into());
    e.abs_resource_name = Some("centos-7-x86_64".into());
    e.aws_ami = Some("ami-1".into());
    e.aws_instance_type = Some("t3.large".into());
    e.aws_key_name = Some("builder".into());
    platform
  }

  /// `platform` with `attribute` unset, or `None` when the attribute always
  /// has a default.
  fn without(platform: &Platform, attribute: &str) -> Option<Platform> {
    let mut platform = platform.clone();
    let e = &mut platform.engine;
    match attribute {
      "docker_image" => e.docker_image = None,
      "build_hosts" => e.build_hosts.clear(),
      "vmpooler_template" => e.vmpooler_template = None,
      "abs_resource_name" => e.abs_resource_name = None,
      "aws_ami" => e.aws_ami = None,
      "aws_instance_type" => e.aws_instance_type = None,
      "aws_key_name" => e.aws_key_name = None,
      "ssh_port" => return None,
      other => panic!("no way to unset {other}"),
    }
    Some(platform)
  }

  #[test]
  fn every_engine_names_exactly_the_missing_attribute() {
    let registry = EngineRegistry::with_defaults().unwrap();
    let full = fully_described_platform();

    for name in registry.names() {
      let (ctx, _runner) = context(full.clone());
      let engine = registry.create(name, ctx).unwrap();
      engine.validate_platform(&full).unwrap();

      for attribute in engine.required_attributes() {
        let Some(platform) = without(&full, attribute) else {
          assert!(full.attribute(attribute).is_some(), "{name}: {attribute}");
          continue;
        };
        match engine.validate_platform(&platform) {
          Err(EngineError::MissingPlatformAttribute { engine: reported, missing, .. }) => {
            assert_eq!(reported, name);
            assert_eq!(missing, vec![attribute.to_string()], "{name}");
          }
          other => panic!("{name} without {attribute}: {other:?}"),
        }
      }
    }
  }

  #[test]
  fn scheduler_accepts_either_template_attribute() {
    let registry = EngineRegistry::with_defaults().unwrap();
    let full = fully_described_platform();
    let (ctx, _runner) = context(full.clone());
    let engine = registry.create("always_be_scheduling", ctx).unwrap();

    let one = without(&full, "abs_resource_name").unwrap();
    engine.validate_platform(&one).unwrap();
    let neither = without(&one, "vmpooler_template").unwrap();
    match engine.validate_platform(&neither) {
      Err(EngineError::MissingPlatformAttribute { missing, .. }) => assert_eq!(missing, vec!["vmpooler_template"]),
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn default_engine_follows_platform_attributes() {
    let mut platform = Platform::from_name("el-7-x86_64").unwrap();
    assert_eq!(default_engine_for(&platform), "pooler");
    platform.engine.docker_image = Some("centos:7".into());
    assert_eq!(default_engine_for(&platform), "docker");
    platform.engine.aws_ami = Some("ami-1".into());
    assert_eq!(default_engine_for(&platform), "ec2");
    platform.engine.build_hosts = vec!["h1".into()];
    assert_eq!(default_engine_for(&platform), "hardware");
  }
}
