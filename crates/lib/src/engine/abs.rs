//! Builds on a host scheduled by an always-be-scheduling (ABS) service.
//!
//! The same `POST <url>/request` is repeated until the service answers
//! `200` with the allocated hosts; `202` means the request is queued. Hosts
//! go back through `POST <url>/return`.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::error_chain;
use crate::platform::Platform;

use super::base::remote_host;
use super::{Capabilities, Engine, EngineContext, EngineError, RemoteSession, Step, prepare_host};

const NAME: &str = "always_be_scheduling";

/// One allocated host, echoed back verbatim on return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AllocatedHost {
  hostname: String,
  #[serde(rename = "type")]
  kind: String,
  engine: String,
}

pub struct AbsEngine {
  ctx: EngineContext,
  session: RemoteSession,
  job_id: String,
  allocated: Option<AllocatedHost>,
}

impl AbsEngine {
  pub fn new(ctx: EngineContext) -> Self {
    let stamp = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis())
      .unwrap_or_default();
    let job_id = format!("{}-{}-{stamp}", ctx.job_name, ctx.platform.name);
    let session = RemoteSession::new(NAME, ctx.runner.clone());
    Self {
      ctx,
      session,
      job_id,
      allocated: None,
    }
  }

  /// The ABS resource to request: `abs_resource_name` wins over the
  /// vmpooler template.
  fn resource(&self) -> Option<String> {
    self
      .ctx
      .platform
      .attribute("abs_resource_name")
      .or_else(|| self.ctx.platform.attribute("vmpooler_template"))
  }

  fn url(&self) -> Result<String, EngineError> {
    self
      .ctx
      .config
      .abs
      .url
      .as_deref()
      .map(|u| u.trim_end_matches('/').to_string())
      .ok_or(EngineError::MissingSetting {
        engine: NAME,
        setting: "abs.url",
      })
  }

  async fn post(&self, step: Step, url: &str, body: &serde_json::Value) -> Result<reqwest::Response, EngineError> {
    let mut request = self.ctx.client.post(url).json(body);
    if let Some(token) = &self.ctx.config.abs.token {
      request = request.header("X-AUTH-TOKEN", token);
    }
    request.send().await.map_err(|e| EngineError::Http {
      engine: NAME,
      step,
      message: error_chain(&e),
    })
  }
}

#[async_trait]
impl Engine for AbsEngine {
  fn name(&self) -> &'static str {
    NAME
  }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      remote: true,
      teardown: true,
      ephemeral: false,
    }
  }

  fn validate_platform(&self, platform: &Platform) -> Result<(), EngineError> {
    if platform.attribute("abs_resource_name").is_some() || platform.attribute("vmpooler_template").is_some() {
      return Ok(());
    }
    Err(EngineError::MissingPlatformAttribute {
      engine: NAME,
      platform: platform.name.clone(),
      missing: vec!["vmpooler_template".to_string()],
    })
  }

  fn target(&self) -> Option<&str> {
    self.session.host().map(|h| h.host.as_str())
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.session.workdir()
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    self.validate_platform(&self.ctx.platform)?;
    let resource = self.resource().unwrap_or_default();
    let url = format!("{}/request", self.url()?);
    let user = std::env::var("USER").unwrap_or_else(|_| crate::consts::APP_NAME.to_string());
    let mut resources = serde_json::Map::new();
    resources.insert(resource.clone(), json!(1));
    let body = json!({
      "resources": resources,
      "priority": 1,
      "job": {
        "id": self.job_id,
        "tags": { "jenkins_build_url": "", "project": self.ctx.job_name, "user": user },
      },
    });

    let settings = &self.ctx.config.abs;
    let poll = Duration::from_secs(settings.poll_interval_secs.max(1));
    let deadline = Instant::now() + Duration::from_secs(settings.timeout_secs);
    info!(engine = NAME, resource = %resource, job = %self.job_id, "requesting host");

    let hosts: Vec<AllocatedHost> = loop {
      let response = self.post(Step::SelectTarget, &url, &body).await?;
      match response.status() {
        StatusCode::OK => {
          break response.json().await.map_err(|e| EngineError::Http {
            engine: NAME,
            step: Step::SelectTarget,
            message: error_chain(&e),
          })?;
        }
        StatusCode::ACCEPTED => debug!(engine = NAME, job = %self.job_id, "request queued"),
        status => {
          return Err(EngineError::Http {
            engine: NAME,
            step: Step::SelectTarget,
            message: format!("POST {url}: HTTP {status}"),
          });
        }
      }
      if Instant::now() + poll > deadline {
        return Err(EngineError::NoTarget {
          engine: NAME,
          reason: format!(
            "no {resource} host allocated within {}",
            humantime::format_duration(Duration::from_secs(settings.timeout_secs))
          ),
        });
      }
      tokio::time::sleep(poll).await;
    };

    let allocated = hosts.into_iter().next().ok_or_else(|| EngineError::NoTarget {
      engine: NAME,
      reason: format!("request {} returned no hosts", self.job_id),
    })?;
    let host = allocated.hostname.clone();
    self.allocated = Some(allocated);
    self
      .session
      .connect(remote_host(&self.ctx, &host, &self.ctx.platform));
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
    let Some(allocated) = self.allocated.take() else {
      return Ok(());
    };
    let url = format!("{}/return", self.url()?);
    info!(engine = NAME, host = %allocated.hostname, "returning host");
    let body = json!({ "job_id": self.job_id, "hosts": [allocated] });
    let response = self.post(Step::Teardown, &url, &body).await?;
    if !response.status().is_success() {
      return Err(EngineError::Http {
        engine: NAME,
        step: Step::Teardown,
        message: format!("POST {url}: HTTP {}", response.status()),
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::test_support::context;
  use mockito::Matcher;

  fn engine(url: String) -> AbsEngine {
    let mut platform = Platform::from_name("el-7-x86_64").unwrap();
    platform.engine.vmpooler_template = Some("centos-7-x86_64".into());
    let (mut ctx, _runner) = context(platform);
    ctx.config.abs.url = Some(url);
    ctx.config.abs.token = Some("tok".into());
    ctx.config.abs.poll_interval_secs = 1;
    ctx.config.abs.timeout_secs = 0;
    AbsEngine::new(ctx)
  }

  #[tokio::test]
  async fn allocates_and_returns_host() {
    let mut server = mockito::Server::new_async().await;
    let request = server
      .mock("POST", "/request")
      .match_header("X-AUTH-TOKEN", "tok")
      .match_body(Matcher::PartialJson(json!({ "resources": { "centos-7-x86_64": 1 } })))
      .with_status(200)
      .with_body(r#"[{"hostname": "h1.example.net", "type": "centos-7-x86_64", "engine": "vmpooler"}]"#)
      .create_async()
      .await;
    let give_back = server
      .mock("POST", "/return")
      .match_body(Matcher::PartialJson(json!({ "hosts": [{ "hostname": "h1.example.net" }] })))
      .with_status(200)
      .create_async()
      .await;

    let mut engine = engine(server.url());
    assert_eq!(engine.select_target().await.unwrap(), "h1.example.net");
    engine.teardown().await.unwrap();

    request.assert_async().await;
    give_back.assert_async().await;
  }

  #[tokio::test]
  async fn queued_request_times_out() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/request").with_status(202).create_async().await;

    let mut engine = engine(server.url());
    let err = engine.select_target().await.unwrap_err();
    assert!(matches!(err, EngineError::NoTarget { .. }));
  }

  #[test]
  fn resource_name_satisfies_validation() {
    let mut platform = Platform::from_name("el-7-x86_64").unwrap();
    let (ctx, _runner) = context(platform.clone());
    let engine = AbsEngine::new(ctx);
    assert!(engine.validate_platform(&platform).is_err());

    platform.engine.abs_resource_name = Some("el7-large".into());
    assert!(engine.validate_platform(&platform).is_ok());
  }
}
