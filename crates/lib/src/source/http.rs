//! Http source: a downloaded file verified against a checksum.

use std::path::{Path, PathBuf};

use reqwest::Client;
use reqwest::redirect::Policy;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use super::checksum::{ChecksumAlgorithm, parse_checksum_file};
use super::{FetchContext, SourceError};
use crate::consts::MAX_REDIRECTS;
use crate::error::error_chain;
use crate::retry::retry_with_timeout;

/// HTTP client used for every download, following at most
/// [`MAX_REDIRECTS`] redirects.
pub fn build_client() -> Result<Client, SourceError> {
  Client::builder()
    .redirect(Policy::limited(MAX_REDIRECTS))
    .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
    .build()
    .map_err(|e| SourceError::Client(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Checksum {
  Literal(String),
  /// A detached checksum file still to be downloaded.
  Remote(String),
}

#[derive(Debug, Clone)]
pub struct HttpSource {
  url: String,
  file: String,
  sum: Checksum,
  algorithm: ChecksumAlgorithm,
  workdir: PathBuf,
}

impl HttpSource {
  pub fn new(url: &str, sum: &str, algorithm: ChecksumAlgorithm, workdir: &Path) -> Self {
    let sum = if sum.starts_with("http://") || sum.starts_with("https://") {
      Checksum::Remote(sum.to_string())
    } else {
      Checksum::Literal(sum.trim().to_ascii_lowercase())
    };
    Self {
      url: url.to_string(),
      file: file_name_from_url(url),
      sum,
      algorithm,
      workdir: workdir.to_path_buf(),
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn file(&self) -> &str {
    &self.file
  }

  fn path(&self) -> PathBuf {
    self.workdir.join(&self.file)
  }

  pub async fn fetch(&mut self, ctx: &FetchContext<'_>) -> Result<(), SourceError> {
    if let Checksum::Remote(sum_url) = &self.sum {
      let sum_url = sum_url.clone();
      let body = retry_with_timeout(&ctx.retry, "checksum download", || download_text(&ctx.client, &sum_url)).await?;
      let sum = parse_checksum_file(&body, &self.file).ok_or_else(|| SourceError::ChecksumNotListed {
        url: sum_url.clone(),
        file: self.file.clone(),
      })?;
      debug!(url = %sum_url, sum = %sum, "resolved detached checksum");
      self.sum = Checksum::Literal(sum.to_ascii_lowercase());
    }

    let path = self.path();
    if path.is_file() && self.verify().await.is_ok() {
      info!(path = ?path, "using existing download");
      return Ok(());
    }

    fs::create_dir_all(&self.workdir).await.map_err(|source| SourceError::Io {
      path: self.workdir.clone(),
      source,
    })?;

    let operation = format!("download {}", self.url);
    let url = &self.url;
    let dest = &path;
    retry_with_timeout(&ctx.retry, &operation, || download(&ctx.client, url, dest)).await?;
    Ok(())
  }

  pub async fn verify(&self) -> Result<(), SourceError> {
    let Checksum::Literal(expected) = &self.sum else {
      return Err(SourceError::MissingChecksum { url: self.url.clone() });
    };

    let path = self.path();
    let actual = self
      .algorithm
      .hash_file(&path)
      .await
      .map_err(|source| SourceError::Io { path: path.clone(), source })?;

    if actual != *expected {
      return Err(SourceError::ChecksumMismatch {
        file: self.file.clone(),
        expected: expected.clone(),
        actual,
      });
    }

    debug!(file = %self.file, algorithm = %self.algorithm, "checksum verified");
    Ok(())
  }
}

async fn get(client: &Client, url: &str) -> Result<reqwest::Response, SourceError> {
  let response = client.get(url).send().await.map_err(|e| SourceError::Download {
    url: url.to_string(),
    message: error_chain(&e),
  })?;

  if !response.status().is_success() {
    return Err(SourceError::Download {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }
  Ok(response)
}

async fn download(client: &Client, url: &str, dest: &Path) -> Result<u64, SourceError> {
  info!(url = %url, "downloading");
  let bytes = get(client, url).await?.bytes().await.map_err(|e| SourceError::Download {
    url: url.to_string(),
    message: error_chain(&e),
  })?;

  fs::write(dest, &bytes).await.map_err(|source| SourceError::Io {
    path: dest.to_path_buf(),
    source,
  })?;

  info!(path = ?dest, size = bytes.len(), "download complete");
  Ok(bytes.len() as u64)
}

async fn download_text(client: &Client, url: &str) -> Result<String, SourceError> {
  get(client, url).await?.text().await.map_err(|e| SourceError::Download {
    url: url.to_string(),
    message: error_chain(&e),
  })
}

/// File name a download of `url` is stored under.
///
/// Takes the last path segment without the query string. Falls back to a
/// hash of the URL if no usable name remains.
pub fn file_name_from_url(url: &str) -> String {
  let without_query = url.split(['?', '#']).next().unwrap_or(url);
  if let Some(name) = without_query.trim_end_matches('/').rsplit('/').next()
    && !name.contains(':')
  {
    let sanitized: String = name
      .chars()
      .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') { c } else { '_' })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &hex::encode(Sha256::digest(url.as_bytes()))[..16])
}
