//! Builds on a VM checked out of a vmpooler instance.
//!
//! `POST <url>/vm/<template>` checks a VM out and `DELETE <url>/vm/<host>`
//! returns it. The token, when set, travels in `X-AUTH-TOKEN`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::error_chain;

use super::base::remote_host;
use super::{Capabilities, Engine, EngineContext, EngineError, RemoteSession, Step, prepare_host};

const NAME: &str = "pooler";

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
  ok: bool,
  #[serde(default)]
  domain: Option<String>,
  #[serde(flatten)]
  templates: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TemplateHost {
  hostname: serde_json::Value,
}

impl CheckoutResponse {
  /// Fully qualified hostname handed out for `template`.
  fn hostname(&self, template: &str) -> Option<String> {
    let entry: TemplateHost = serde_json::from_value(self.templates.get(template)?.clone()).ok()?;
    let short = match entry.hostname {
      serde_json::Value::String(s) => s,
      serde_json::Value::Array(list) => list.first()?.as_str()?.to_string(),
      _ => return None,
    };
    Some(match &self.domain {
      Some(domain) if !short.contains('.') => format!("{short}.{domain}"),
      _ => short,
    })
  }
}

pub struct PoolerEngine {
  ctx: EngineContext,
  session: RemoteSession,
  checked_out: Option<String>,
}

impl PoolerEngine {
  pub fn new(ctx: EngineContext) -> Self {
    let session = RemoteSession::new(NAME, ctx.runner.clone());
    Self {
      ctx,
      session,
      checked_out: None,
    }
  }

  fn url(&self) -> Result<String, EngineError> {
    self
      .ctx
      .config
      .pooler
      .url
      .as_deref()
      .map(|u| u.trim_end_matches('/').to_string())
      .ok_or(EngineError::MissingSetting {
        engine: NAME,
        setting: "pooler.url",
      })
  }

  fn request(&self, method: Method, url: &str) -> RequestBuilder {
    let request = self.ctx.client.request(method, url);
    match &self.ctx.config.pooler.token {
      Some(token) => request.header("X-AUTH-TOKEN", token),
      None => request,
    }
  }

  fn http_error(step: Step, err: &reqwest::Error) -> EngineError {
    EngineError::Http {
      engine: NAME,
      step,
      message: error_chain(err),
    }
  }
}

#[async_trait]
impl Engine for PoolerEngine {
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

  fn required_attributes(&self) -> &'static [&'static str] {
    &["vmpooler_template"]
  }

  fn target(&self) -> Option<&str> {
    self.session.host().map(|h| h.host.as_str())
  }

  fn remote_workdir(&self) -> Option<&str> {
    self.session.workdir()
  }

  async fn select_target(&mut self) -> Result<String, EngineError> {
    let template = self.ctx.platform.attribute("vmpooler_template").ok_or_else(|| {
      EngineError::MissingPlatformAttribute {
        engine: NAME,
        platform: self.ctx.platform.name.clone(),
        missing: vec!["vmpooler_template".to_string()],
      }
    })?;
    let url = format!("{}/vm/{template}", self.url()?);
    info!(engine = NAME, template = %template, "checking out VM");

    let response = self
      .request(Method::POST, &url)
      .send()
      .await
      .map_err(|e| Self::http_error(Step::SelectTarget, &e))?;
    let status = response.status();
    if !status.is_success() {
      return Err(EngineError::Http {
        engine: NAME,
        step: Step::SelectTarget,
        message: format!("POST {url}: HTTP {status}"),
      });
    }
    let body: CheckoutResponse = response
      .json()
      .await
      .map_err(|e| Self::http_error(Step::SelectTarget, &e))?;
    debug!(engine = NAME, ?body, "checkout response");

    let host = body
      .ok
      .then(|| body.hostname(&template))
      .flatten()
      .ok_or_else(|| EngineError::NoTarget {
        engine: NAME,
        reason: format!("vmpooler returned no host for template {template}"),
      })?;

    self.checked_out = Some(host.clone());
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
    let Some(host) = self.checked_out.take() else {
      return Ok(());
    };
    let short = host.split('.').next().unwrap_or(&host);
    let url = format!("{}/vm/{short}", self.url()?);
    info!(engine = NAME, host = %host, "returning VM");

    let response = self
      .request(Method::DELETE, &url)
      .send()
      .await
      .map_err(|e| Self::http_error(Step::Teardown, &e))?;
    if !response.status().is_success() {
      return Err(EngineError::Http {
        engine: NAME,
        step: Step::Teardown,
        message: format!("DELETE {url}: HTTP {}", response.status()),
      });
    }
    Ok(())
  }
}
