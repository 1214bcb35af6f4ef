//! Component source acquisition.
//!
//! A component's source URL resolves to one of three variants by scheme:
//!
//! - [`GitSource`]: `git:`-prefixed URLs, `git://`, `git@host:`, `*.git`, or
//!   any URL declared together with a ref
//! - [`HttpSource`]: `http://` and `https://` archives verified by checksum
//! - [`LocalSource`]: `file://` files and directories
//!
//! Resolution is pure: it computes the file name, dirname, extraction and
//! cleanup commands without touching the network, so build files can be
//! rendered without fetching. [`acquire`] performs the fetch, trying mirrors
//! before the primary URL.

pub mod checksum;
mod git;
mod http;
mod local;
pub mod rewrite;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::consts::NOTHING_TO_EXTRACT;
use crate::process::CommandRunner;
use crate::retry::{RetryError, RetryPolicy};
use crate::vcs::VcsError;

pub use checksum::ChecksumAlgorithm;
pub use git::GitSource;
pub use http::{HttpSource, build_client, file_name_from_url};
pub use local::LocalSource;
pub use rewrite::{RewriteRule, RewriteRules};

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("unsupported source url '{0}'")]
  UnsupportedUrl(String),

  #[error("http source '{url}' declares no checksum")]
  MissingChecksum { url: String },

  #[error("git remote '{url}' is not reachable: {source}")]
  InvalidRepo {
    url: String,
    #[source]
    source: Box<RetryError<VcsError>>,
  },

  #[error("failed to check out '{rev}' from '{url}': {source}")]
  CheckoutFailed {
    url: String,
    rev: String,
    #[source]
    source: Box<RetryError<VcsError>>,
  },

  #[error("git {step} of '{url}' failed: {source}")]
  Git {
    url: String,
    step: &'static str,
    #[source]
    source: Box<RetryError<VcsError>>,
  },

  #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    file: String,
    expected: String,
    actual: String,
  },

  #[error("checksum file {url} has no entry for {file}")]
  ChecksumNotListed { url: String, file: String },

  #[error("failed to download {url}: {message}")]
  Download { url: String, message: String },

  #[error("failed to build http client: {0}")]
  Client(String),

  #[error("local source {0} does not exist")]
  LocalNotFound(PathBuf),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Retry(Box<RetryError<SourceError>>),
}

impl From<RetryError<SourceError>> for SourceError {
  fn from(err: RetryError<SourceError>) -> Self {
    SourceError::Retry(Box::new(err))
  }
}

/// Where a component's source comes from, as declared in its definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLocator {
  pub url: Option<String>,
  #[serde(rename = "ref")]
  pub git_ref: Option<String>,
  pub sum: Option<String>,
  pub sum_type: ChecksumAlgorithm,
  pub mirrors: Vec<String>,
}

/// Everything a fetch needs besides the locator itself.
pub struct FetchContext<'a> {
  pub runner: &'a dyn CommandRunner,
  pub client: reqwest::Client,
  pub retry: RetryPolicy,
  pub rewrite: &'a RewriteRules,
  pub use_mirrors: bool,
}

/// A resolved source.
#[derive(Debug, Clone)]
pub enum Source {
  Git(GitSource),
  Http(HttpSource),
  Local(LocalSource),
}

impl Source {
  /// Pick the variant for `url` and compute its layout in `workdir`.
  pub fn resolve(url: &str, locator: &SourceLocator, workdir: &Path) -> Result<Self, SourceError> {
    if let Some(git_url) = git_url(url, locator.git_ref.is_some()) {
      let rev = locator.git_ref.as_deref().unwrap_or("HEAD");
      return Ok(Source::Git(GitSource::new(git_url, rev, workdir)));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
      let sum = locator.sum.as_deref().ok_or_else(|| SourceError::MissingChecksum { url: url.to_string() })?;
      return Ok(Source::Http(HttpSource::new(url, sum, locator.sum_type, workdir)));
    }

    if url.starts_with("file://") {
      return Ok(Source::Local(LocalSource::new(
        url,
        locator.sum.as_deref(),
        locator.sum_type,
        workdir,
      )));
    }

    Err(SourceError::UnsupportedUrl(url.to_string()))
  }

  pub async fn fetch(&mut self, ctx: &FetchContext<'_>) -> Result<(), SourceError> {
    match self {
      Source::Git(s) => s.fetch(ctx).await,
      Source::Http(s) => s.fetch(ctx).await,
      Source::Local(s) => s.fetch().await,
    }
  }

  pub async fn verify(&self) -> Result<(), SourceError> {
    match self {
      Source::Git(_) => Ok(()),
      Source::Http(s) => s.verify().await,
      Source::Local(s) => s.verify().await,
    }
  }

  pub fn url(&self) -> &str {
    match self {
      Source::Git(s) => s.url(),
      Source::Http(s) => s.url(),
      Source::Local(s) => s.url(),
    }
  }

  /// Name of the fetched file in the workdir; `None` for git checkouts.
  pub fn file(&self) -> Option<&str> {
    match self {
      Source::Git(_) => None,
      Source::Http(s) => Some(s.file()),
      Source::Local(s) => Some(s.file()),
    }
  }

  /// Directory the source unpacks into, relative to the workdir.
  pub fn dirname(&self) -> String {
    match self {
      Source::Git(s) => s.dirname().to_string(),
      Source::Http(s) => archive_dirname(s.file()),
      Source::Local(s) => s.dirname(),
    }
  }

  pub fn extract_command(&self, tar: &str) -> String {
    match self {
      Source::Git(_) => NOTHING_TO_EXTRACT.to_string(),
      Source::Http(s) => archive_extract_command(s.file(), tar),
      Source::Local(s) if s.is_dir() => NOTHING_TO_EXTRACT.to_string(),
      Source::Local(s) => archive_extract_command(s.file(), tar),
    }
  }

  /// Shell command removing the fetched artifact and its expanded directory.
  pub fn cleanup_command(&self) -> String {
    match self {
      Source::Git(s) => format!("rm -rf {}", s.dirname()),
      Source::Local(s) if s.is_dir() => format!("rm -rf {}", s.dirname()),
      Source::Http(_) | Source::Local(_) => {
        let file = self.file().unwrap_or_default();
        match archive_extension(file) {
          Some(_) => format!("rm -f {file}; rm -rf {}", self.dirname()),
          None => format!("rm -f {file}"),
        }
      }
    }
  }

  /// Version reported by `git describe` after a fetch.
  pub fn version(&self) -> Option<&str> {
    match self {
      Source::Git(s) => s.version(),
      _ => None,
    }
  }

  pub fn commit(&self) -> Option<&str> {
    match self {
      Source::Git(s) => s.commit(),
      _ => None,
    }
  }
}

/// The URL to clone when `url` names a git source.
fn git_url(url: &str, has_ref: bool) -> Option<&str> {
  if let Some(rest) = url.strip_prefix("git:")
    && !rest.starts_with("//")
  {
    return Some(rest);
  }
  let is_git = url.starts_with("git://") || url.starts_with("git@") || url.trim_end_matches('/').ends_with(".git");
  (is_git || has_ref).then_some(url)
}

/// Resolve and fetch `locator` into `workdir`.
///
/// Mirrors are tried in order before the primary URL unless mirrors are
/// disabled. Each candidate is rewritten, fetched, and verified; the first
/// that succeeds wins and the primary URL's error is returned if all fail.
pub async fn acquire(locator: &SourceLocator, workdir: &Path, ctx: &FetchContext<'_>) -> Result<Source, SourceError> {
  let Some(url) = locator.url.as_deref() else {
    return Err(SourceError::UnsupportedUrl(String::new()));
  };

  let mut candidates: Vec<&str> = Vec::new();
  if ctx.use_mirrors {
    candidates.extend(locator.mirrors.iter().map(String::as_str));
  }
  candidates.push(url);

  let last = candidates.len() - 1;
  for (index, candidate) in candidates.into_iter().enumerate() {
    let rewritten = ctx.rewrite.rewrite(candidate);
    match fetch_and_verify(&rewritten, locator, workdir, ctx).await {
      Ok(source) => {
        info!(url = %rewritten, dirname = %source.dirname(), "source acquired");
        return Ok(source);
      }
      Err(err) if index < last => {
        warn!(url = %rewritten, error = %err, "mirror failed, trying next location");
      }
      Err(err) => return Err(err),
    }
  }

  Err(SourceError::UnsupportedUrl(url.to_string()))
}

async fn fetch_and_verify(
  url: &str,
  locator: &SourceLocator,
  workdir: &Path,
  ctx: &FetchContext<'_>,
) -> Result<Source, SourceError> {
  let mut source = Source::resolve(url, locator, workdir)?;
  source.fetch(ctx).await?;
  source.verify().await?;
  Ok(source)
}

const ARCHIVE_EXTENSIONS: [&str; 6] = [".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".tar", ".zip"];

/// The known archive extension `file` ends with, if any.
pub fn archive_extension(file: &str) -> Option<&'static str> {
  ARCHIVE_EXTENSIONS.into_iter().find(|ext| file.ends_with(ext))
}

/// Directory an archive unpacks into; `./` for non-archives.
pub fn archive_dirname(file: &str) -> String {
  match archive_extension(file) {
    Some(ext) => file[..file.len() - ext.len()].to_string(),
    None => "./".to_string(),
  }
}

/// Shell command that unpacks `file` in the current directory.
pub fn archive_extract_command(file: &str, tar: &str) -> String {
  match archive_extension(file) {
    Some(".tar.gz") | Some(".tgz") => format!("gunzip -c {file} | {tar} xf -"),
    Some(".tar.bz2") => format!("bunzip2 -c {file} | {tar} xf -"),
    Some(".tar.xz") => format!("unxz -d -c {file} | {tar} xf -"),
    Some(".tar") => format!("{tar} xf {file}"),
    Some(".zip") => format!("unzip -o {file}"),
    _ => NOTHING_TO_EXTRACT.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn locator(url: &str) -> SourceLocator {
    SourceLocator {
      url: Some(url.to_string()),
      sum: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
      ..Default::default()
    }
  }

  #[test]
  fn variant_selected_by_scheme() {
    let workdir = Path::new("/work");
    let cases = [
      ("git:https://github.com/org/facter", "git"),
      ("git://github.com/org/facter", "git"),
      ("git@github.com:org/facter.git", "git"),
      ("https://github.com/org/facter.git", "git"),
      ("https://example.com/zlib-1.3.tar.gz", "http"),
      ("file:///srv/src/app.tgz", "local"),
    ];
    for (url, expected) in cases {
      let source = Source::resolve(url, &locator(url), workdir).unwrap();
      let kind = match source {
        Source::Git(_) => "git",
        Source::Http(_) => "http",
        Source::Local(_) => "local",
      };
      assert_eq!(kind, expected, "{url}");
    }
  }

  #[test]
  fn git_prefix_is_stripped() {
    let url = "git:https://github.com/org/facter";
    let Source::Git(git) = Source::resolve(url, &locator(url), Path::new("/work")).unwrap() else {
      panic!("expected git source");
    };
    assert_eq!(git.url(), "https://github.com/org/facter");
    assert_eq!(git.dirname(), "facter");
  }

  #[test]
  fn a_ref_makes_any_url_git() {
    let mut loc = locator("https://example.com/org/repo");
    loc.git_ref = Some("v1.0".to_string());
    let source = Source::resolve("https://example.com/org/repo", &loc, Path::new("/work")).unwrap();
    assert!(matches!(source, Source::Git(_)));
  }

  #[test]
  fn http_without_checksum_is_rejected() {
    let loc = SourceLocator {
      url: Some("https://example.com/a.tar.gz".to_string()),
      ..Default::default()
    };
    let err = Source::resolve("https://example.com/a.tar.gz", &loc, Path::new("/work")).unwrap_err();
    assert!(matches!(err, SourceError::MissingChecksum { .. }));
  }

  #[test]
  fn unknown_scheme_is_unsupported() {
    let err = Source::resolve("ftp://example.com/a.tar.gz", &locator("ftp://x"), Path::new("/work")).unwrap_err();
    assert!(matches!(err, SourceError::UnsupportedUrl(_)));
  }

  #[test]
  fn archive_layout() {
    assert_eq!(archive_dirname("zlib-1.3.tar.gz"), "zlib-1.3");
    assert_eq!(archive_dirname("app.tgz"), "app");
    assert_eq!(archive_dirname("tool.zip"), "tool");
    assert_eq!(archive_dirname("install.sh"), "./");

    assert_eq!(archive_extract_command("zlib-1.3.tar.gz", "tar"), "gunzip -c zlib-1.3.tar.gz | tar xf -");
    assert_eq!(archive_extract_command("a.tar", "/usr/bin/gtar"), "/usr/bin/gtar xf a.tar");
    assert_eq!(archive_extract_command("install.sh", "tar"), NOTHING_TO_EXTRACT);
  }

  #[test]
  fn http_cleanup_removes_file_and_directory() {
    let url = "https://example.com/zlib-1.3.tar.gz";
    let source = Source::resolve(url, &locator(url), Path::new("/work")).unwrap();
    assert_eq!(source.cleanup_command(), "rm -f zlib-1.3.tar.gz; rm -rf zlib-1.3");
    assert_eq!(source.extract_command("tar"), "gunzip -c zlib-1.3.tar.gz | tar xf -");
  }
}
