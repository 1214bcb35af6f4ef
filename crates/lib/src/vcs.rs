//! Thin wrapper over git.
//!
//! Exposes exactly the operations source acquisition needs. Network and
//! worktree operations shell out to `git` through a [`CommandRunner`];
//! reading the checked-out commit uses `gix` directly.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::process::{CommandError, CommandRunner, Invocation, run_checked};

#[derive(Debug, Error)]
pub enum VcsError {
  #[error(transparent)]
  Command(#[from] CommandError),

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to resolve HEAD in '{path}': {message}")]
  ResolveHead { path: PathBuf, message: String },
}

pub struct Git<'a> {
  runner: &'a dyn CommandRunner,
}

impl<'a> Git<'a> {
  pub fn new(runner: &'a dyn CommandRunner) -> Self {
    Self { runner }
  }

  fn git(&self) -> Invocation {
    Invocation::new("git")
  }

  /// Succeeds when `url` answers `git ls-remote`.
  pub async fn ls_remote(&self, url: &str) -> Result<(), VcsError> {
    run_checked(self.runner, &self.git().args(["ls-remote", "--heads", url])).await?;
    Ok(())
  }

  pub async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError> {
    let dest = dest.to_string_lossy();
    run_checked(self.runner, &self.git().args(["clone", url, dest.as_ref()])).await?;
    Ok(())
  }

  /// Fetch branches and tags into an existing clone.
  pub async fn fetch(&self, repo: &Path) -> Result<(), VcsError> {
    run_checked(self.runner, &self.git().args(["fetch", "--tags", "origin"]).cwd(repo)).await?;
    Ok(())
  }

  pub async fn checkout(&self, repo: &Path, rev: &str) -> Result<(), VcsError> {
    run_checked(self.runner, &self.git().args(["checkout", "--force", rev]).cwd(repo)).await?;
    Ok(())
  }

  /// `git describe --tags`, or `None` when the history has no tags.
  pub async fn describe(&self, repo: &Path) -> Result<Option<String>, VcsError> {
    let invocation = self.git().args(["describe", "--tags"]).cwd(repo);
    match run_checked(self.runner, &invocation).await {
      Ok(output) => {
        let version = output.stdout.trim();
        Ok((!version.is_empty()).then(|| version.to_string()))
      }
      Err(CommandError::Failed { stderr, .. }) => {
        debug!(repo = ?repo, stderr = %stderr.trim(), "no tags to describe");
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }

  pub async fn update_submodules(&self, repo: &Path) -> Result<(), VcsError> {
    run_checked(
      self.runner,
      &self.git().args(["submodule", "update", "--init", "--recursive"]).cwd(repo),
    )
    .await?;
    Ok(())
  }
}

/// Commit id of HEAD in the repository at `repo`.
pub fn head_commit(repo: &Path) -> Result<String, VcsError> {
  let repository = gix::open(repo).map_err(|e| VcsError::Open {
    path: repo.to_path_buf(),
    source: Box::new(e),
  })?;

  let mut head = repository.head().map_err(|e| VcsError::ResolveHead {
    path: repo.to_path_buf(),
    message: e.to_string(),
  })?;

  let commit = head.peel_to_commit().map_err(|e| VcsError::ResolveHead {
    path: repo.to_path_buf(),
    message: e.to_string(),
  })?;

  Ok(commit.id.to_string())
}

/// Directory name a clone of `url` lands in: the last path segment without
/// a trailing `.git`.
pub fn repo_dirname(url: &str) -> String {
  let trimmed = url.trim_end_matches('/');
  let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
  last.strip_suffix(".git").unwrap_or(last).to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::process::{CommandOutput, MockRunner};

  #[test]
  fn dirname_strips_dot_git() {
    assert_eq!(repo_dirname("https://github.com/org/facter.git"), "facter");
    assert_eq!(repo_dirname("git@github.com:org/leatherman.git"), "leatherman");
    assert_eq!(repo_dirname("git://example.com/repo/"), "repo");
    assert_eq!(repo_dirname("https://example.com/plain"), "plain");
  }

  #[tokio::test]
  async fn describe_without_tags_is_none() {
    let runner = MockRunner::new();
    runner.respond("describe", CommandOutput::failure(128, "fatal: No names found"));

    let git = Git::new(&runner);
    assert_eq!(git.describe(Path::new("/src/repo")).await.unwrap(), None);
  }

  #[tokio::test]
  async fn describe_trims_output() {
    let runner = MockRunner::new();
    runner.respond_ok("describe", "1.2.3-4-gdeadbee\n");

    let git = Git::new(&runner);
    assert_eq!(
      git.describe(Path::new("/src/repo")).await.unwrap().as_deref(),
      Some("1.2.3-4-gdeadbee")
    );
  }

  #[tokio::test]
  async fn operations_run_in_repo() {
    let runner = MockRunner::new();
    let git = Git::new(&runner);
    let repo = Path::new("/work/facter");

    git.checkout(repo, "v4.0.0").await.unwrap();
    git.update_submodules(repo).await.unwrap();

    let calls = runner.invocations();
    assert_eq!(calls[0].args, vec!["checkout", "--force", "v4.0.0"]);
    assert_eq!(calls[0].cwd.as_deref(), Some(repo));
    assert_eq!(calls[1].args, vec!["submodule", "update", "--init", "--recursive"]);
  }

  #[test]
  fn head_commit_of_missing_repo_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    assert!(matches!(head_commit(temp.path()), Err(VcsError::Open { .. })));
  }
}
