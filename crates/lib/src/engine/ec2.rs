//! Builds on a fresh EC2 instance launched with the `aws` CLI and terminated
//! after every build.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::process::{CommandRunner, Invocation, run_checked};

use super::base::remote_host;
use super::{Capabilities, Engine, EngineContext, EngineError, RemoteHost, RemoteSession, Step, prepare_host};

const NAME: &str = "ec2";

pub struct Ec2Engine {
  ctx: EngineContext,
  runner: Arc<dyn CommandRunner>,
  session: RemoteSession,
  instance: Option<String>,
}

impl Ec2Engine {
  pub fn new(ctx: EngineContext) -> Self {
    let runner = ctx.runner.clone();
    let session = RemoteSession::new(NAME, runner.clone());
    Self {
      ctx,
      runner,
      session,
      instance: None,
    }
  }

  fn region(&self) -> Option<String> {
    self
      .ctx
      .platform
      .attribute("aws_region")
      .or_else(|| self.ctx.config.ec2.region.clone())
  }

  fn attr(&self, key: &str) -> Result<String, EngineError> {
    self
      .ctx
      .platform
      .attribute(key)
      .ok_or_else(|| EngineError::MissingPlatformAttribute {
        engine: NAME,
        platform: self.ctx.platform.name.clone(),
        missing: vec![key.to_string()],
      })
  }

  /// `aws ec2 <args> [--region R]`.
  fn aws<I, S>(&self, args: I) -> Invocation
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let invocation = Invocation::new("aws").arg("ec2").args(args);
    match self.region() {
      Some(region) => invocation.args(["--region".to_string(), region]),
      None => invocation,
    }
  }

  async fn run(&self, step: Step, invocation: Invocation) -> Result<String, EngineError> {
    run_checked(self.runner.as_ref(), &invocation)
      .await
      .map(|out| out.stdout.trim().to_string())
      .map_err(|source| EngineError::Command {
        engine: NAME,
        step,
        source,
      })
  }

  async fn launch(&self) -> Result<String, EngineError> {
    let mut args = vec![
      "run-instances".to_string(),
      "--image-id".to_string(),
      self.attr("aws_ami")?,
      "--instance-type".to_string(),
      self.attr("aws_instance_type")?,
      "--key-name".to_string(),
      self.attr("aws_key_name")?,
      "--count".to_string(),
      "1".to_string(),
    ];
    if let Some(subnet) = self.ctx.platform.attribute("aws_subnet_id") {
      args.extend(["--subnet-id".to_string(), subnet]);
    }
    args.extend([
      "--tag-specifications".to_string(),
      format!(
        "ResourceType=instance,Tags=[{{Key=Name,Value={}-{}}}]",
        self.ctx.job_name, self.ctx.platform.name
      ),
      "--query".to_string(),
      "Instances[0].InstanceId".to_string(),
      "--output".to_string(),
      "text".to_string(),
    ]);

    let id = self.run(Step::SelectTarget, self.aws(args)).await?;
    if id.is_empty() || id == "None" {
      return Err(EngineError::NoTarget {
        engine: NAME,
        reason: "run-instances returned no instance id".to_string(),
      });
    }
    Ok(id)
  }

  fn connection(&self, host: &str) -> RemoteHost {
    let host = remote_host(&self.ctx, host, &self.ctx.platform);
    match &self.ctx.config.ec2.ssh_key {
      Some(key) => host.key(Some(key.clone())),
      None => host,
    }
  }
}

#[async_trait]
impl Engine for Ec2Engine {
  fn name(&self) -> &'static str {
    NAME
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      remote: true,
      teardown: true,
      ephemeral: true,
    }
  }

  fn required_attributes(&self) -> &'static [&'static str] {
    &["aws_ami", "aws_instance_type", "aws_key_name"]
  }

  fn target(&self) -> Option<&str> {
    self.session.host().map(|h| h.host.as_str())
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.session.workdir()
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    let id = self.launch().await?;
    info!(engine = NAME, instance = %id, "instance launched");
    // Recorded before waiting so teardown terminates it even if the wait fails.
    self.instance = Some(id.clone());

    self
      .run(
        Step::SelectTarget,
        self.aws(["wait", "instance-status-ok", "--instance-ids", id.as_str()]),
      )
      .await?;
    let host = self
      .run(
        Step::SelectTarget,
        self.aws([
          "describe-instances",
          "--instance-ids",
          id.as_str(),
          "--query",
          "Reservations[0].Instances[0].PublicDnsName",
          "--output",
          "text",
        ]),
      )
      .await?;
    if host.is_empty() || host == "None" {
      return Err(EngineError::NoTarget {
        engine: NAME,
        reason: format!("instance {id} has no public DNS name"),
      });
    }

    let connection = self.connection(&host);
    self.session.connect(connection);
    Ok(host)
  }

  async fn setup(&mut self) -> Result<(), EngineError> {
    let workdir = prepare_host(&*self, &self.ctx.platform, self.ctx.remote_workdir.as_deref()).await?;
    self.session.set_workdir(workdir);
    Ok(())
  }

  async fn dispatch(&self, command: &str, capture: bool) -> Result<Option<String>, EngineError> {
    self.session.dispatch(command, capture).await
  }

  async fn ship_workdir(&self, workdir: &Path) -> Result<(), EngineError> {
    self.session.ship(workdir).await
  }

  async fn retrieve_built_artifact(&self, paths: &[String], output_dir: &Path) -> Result<(), EngineError> {
    self.session.retrieve(paths, output_dir).await
  }

  async fn teardown(&mut self) -> Result<(), EngineError> {
    let Some(id) = self.instance.take() else {
      return Ok(());
    };
    info!(engine = NAME, instance = %id, "terminating instance");
    self
      .run(Step::Teardown, self.aws(["terminate-instances", "--instance-ids", id.as_str()]))
      .await?;
    Ok(())
  }
}
