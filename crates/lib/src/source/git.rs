//! Git source: a checkout of a ref, plus its submodules.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{FetchContext, SourceError};
use crate::retry::retry_with_timeout;
use crate::vcs::{Git, head_commit, repo_dirname};

#[derive(Debug, Clone)]
pub struct GitSource {
  url: String,
  rev: String,
  dirname: String,
  workdir: PathBuf,
  version: Option<String>,
  commit: Option<String>,
}

impl GitSource {
  pub fn new(url: &str, rev: &str, workdir: &Path) -> Self {
    Self {
      url: url.to_string(),
      rev: rev.to_string(),
      dirname: repo_dirname(url),
      workdir: workdir.to_path_buf(),
      version: None,
      commit: None,
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn rev(&self) -> &str {
    &self.rev
  }

  pub fn dirname(&self) -> &str {
    &self.dirname
  }

  pub fn version(&self) -> Option<&str> {
    self.version.as_deref()
  }

  pub fn commit(&self) -> Option<&str> {
    self.commit.as_deref()
  }

  /// Validate the remote, then clone (or fetch), check out the ref,
  /// describe it and update submodules. Each step runs under the retry
  /// policy on its own.
  pub async fn fetch(&mut self, ctx: &FetchContext<'_>) -> Result<(), SourceError> {
    let git = Git::new(ctx.runner);
    let url = self.url.as_str();
    let repo = self.workdir.join(&self.dirname);
    let repo = repo.as_path();

    retry_with_timeout(&ctx.retry, "git ls-remote", || git.ls_remote(url))
      .await
      .map_err(|e| SourceError::InvalidRepo {
        url: url.to_string(),
        source: Box::new(e),
      })?;

    if repo.join(".git").exists() {
      info!(url = %url, repo = ?repo, "updating existing clone");
      retry_with_timeout(&ctx.retry, "git fetch", || git.fetch(repo))
        .await
        .map_err(|e| git_error(url, "fetch", e))?;
    } else {
      info!(url = %url, repo = ?repo, "cloning");
      retry_with_timeout(&ctx.retry, "git clone", || git.clone_repo(url, repo))
        .await
        .map_err(|e| git_error(url, "clone", e))?;
    }

    let rev = self.rev.as_str();
    retry_with_timeout(&ctx.retry, "git checkout", || git.checkout(repo, rev))
      .await
      .map_err(|e| SourceError::CheckoutFailed {
        url: url.to_string(),
        rev: rev.to_string(),
        source: Box::new(e),
      })?;

    let version = retry_with_timeout(&ctx.retry, "git describe", || git.describe(repo))
      .await
      .map_err(|e| git_error(url, "describe", e))?;

    retry_with_timeout(&ctx.retry, "git submodule update", || git.update_submodules(repo))
      .await
      .map_err(|e| git_error(url, "submodule update", e))?;

    let commit = match head_commit(repo) {
      Ok(commit) => Some(commit),
      Err(e) => {
        warn!(repo = ?repo, error = %e, "could not read checked-out commit");
        None
      }
    };

    debug!(url = %url, rev = %rev, version = ?version, commit = ?commit, "git source ready");
    self.version = version;
    self.commit = commit;
    Ok(())
  }
}

fn git_error(url: &str, step: &'static str, err: crate::retry::RetryError<crate::vcs::VcsError>) -> SourceError {
  SourceError::Git {
    url: url.to_string(),
    step,
    source: Box::new(err),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::process::{CommandOutput, MockRunner};
  use crate::retry::RetryPolicy;
  use crate::source::{RewriteRules, build_client};
  use std::time::Duration;
  use tempfile::TempDir;

  fn context<'a>(runner: &'a MockRunner, rewrite: &'a RewriteRules, attempts: u32) -> FetchContext<'a> {
    FetchContext {
      runner,
      client: build_client().unwrap(),
      retry: RetryPolicy::new(attempts, Duration::from_secs(5)),
      rewrite,
      use_mirrors: false,
    }
  }

  #[tokio::test]
  async fn fetch_runs_steps_in_order() {
    let temp = TempDir::new().unwrap();
    let runner = MockRunner::new();
    runner.respond_ok("describe", "4.0.0\n");
    let rewrite = RewriteRules::new();

    let mut source = GitSource::new("https://github.com/org/facter.git", "refs/tags/4.0.0", temp.path());
    source.fetch(&context(&runner, &rewrite, 1)).await.unwrap();

    let ls = runner.position("ls-remote").unwrap();
    let clone = runner.position("clone").unwrap();
    let checkout = runner.position("checkout").unwrap();
    let describe = runner.position("describe").unwrap();
    let submodule = runner.position("submodule").unwrap();
    assert!(ls < clone && clone < checkout && checkout < describe && describe < submodule);

    assert_eq!(source.version(), Some("4.0.0"));
    // no real repository exists behind the mock runner
    assert_eq!(source.commit(), None);
  }

  #[tokio::test]
  async fn unreachable_remote_is_invalid_repo() {
    let temp = TempDir::new().unwrap();
    let runner = MockRunner::new();
    runner.respond("ls-remote", CommandOutput::failure(128, "fatal: repository not found"));
    let rewrite = RewriteRules::new();

    let mut source = GitSource::new("git@github.com:org/missing.git", "HEAD", temp.path());
    let err = source.fetch(&context(&runner, &rewrite, 2)).await.unwrap_err();

    assert!(matches!(err, SourceError::InvalidRepo { .. }));
    assert_eq!(runner.commands().iter().filter(|c| c.contains("ls-remote")).count(), 2);
    assert!(runner.position("clone").is_none());
  }

  #[tokio::test]
  async fn checkout_failure_is_distinct_from_clone_failure() {
    let temp = TempDir::new().unwrap();
    let runner = MockRunner::new();
    runner.fail_on("checkout", 1);
    let rewrite = RewriteRules::new();

    let mut source = GitSource::new("https://github.com/org/facter.git", "no-such-ref", temp.path());
    let err = source.fetch(&context(&runner, &rewrite, 1)).await.unwrap_err();

    match err {
      SourceError::CheckoutFailed { rev, .. } => assert_eq!(rev, "no-such-ref"),
      other => panic!("unexpected error: {other}"),
    }
    // The clone itself went through; nothing after checkout ran.
    let clone = runner.position("git clone").unwrap();
    assert!(clone < runner.position("checkout").unwrap());
    assert!(runner.position("describe").is_none());
    assert!(runner.position("submodule").is_none());
  }

  #[tokio::test]
  async fn existing_clone_is_fetched() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("facter/.git")).unwrap();
    let runner = MockRunner::new();
    let rewrite = RewriteRules::new();

    let mut source = GitSource::new("https://github.com/org/facter.git", "HEAD", temp.path());
    source.fetch(&context(&runner, &rewrite, 1)).await.unwrap();

    assert!(runner.position("fetch --tags").is_some());
    assert!(runner.position("clone").is_none());
  }
}
