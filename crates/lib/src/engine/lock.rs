//! Inter-process host locks for the hardware engine.
//!
//! A lock is a `<host>.lock` file created with `create_new`, so acquisition
//! is atomic on any filesystem that honours `O_EXCL`. The file holds the
//! owner as JSON; only the recorded owner may release it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
  #[error("lock I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("lock file {path} is corrupt: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("lock on {host} is held by {holder}, not by us")]
  NotOwner { host: String, holder: String },
}

/// Who holds a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
  pub user: String,
  pub pid: u32,
  /// What the host was locked for, usually `<project>-<platform>`.
  pub job: String,
  /// Seconds since the Unix epoch.
  pub acquired_at: u64,
}

impl LockOwner {
  pub fn current(user: impl Into<String>, job: impl Into<String>) -> Self {
    Self {
      user: user.into(),
      pid: std::process::id(),
      job: job.into(),
      acquired_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
    }
  }

  fn same_holder(&self, other: &LockOwner) -> bool {
    self.user == other.user && self.pid == other.pid && self.job == other.job
  }
}

pub trait LockService: Send + Sync {
  /// Take the lock on `host`; `false` when someone else holds it.
  fn try_lock(&self, host: &str, owner: &LockOwner) -> Result<bool, LockError>;

  /// Release `host`, which must be held by `owner`.
  fn unlock(&self, host: &str, owner: &LockOwner) -> Result<(), LockError>;

  fn holder(&self, host: &str) -> Result<Option<LockOwner>, LockError>;
}

/// Lock files in a shared directory.
#[derive(Debug, Clone)]
pub struct DirLockService {
  dir: PathBuf,
}

impl DirLockService {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn lock_path(&self, host: &str) -> PathBuf {
    let name: String = host
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
      .collect();
    self.dir.join(format!("{name}.lock"))
  }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LockError + '_ {
  move |source| LockError::Io {
    path: path.to_path_buf(),
    source,
  }
}

impl LockService for DirLockService {
  fn try_lock(&self, host: &str, owner: &LockOwner) -> Result<bool, LockError> {
    std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
    let path = self.lock_path(host);

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
      Ok(file) => file,
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
        debug!(host, path = ?path, "host already locked");
        return Ok(false);
      }
      Err(e) => return Err(io_err(&path)(e)),
    };

    let body = serde_json::to_vec_pretty(owner).map_err(|source| LockError::Corrupt {
      path: path.clone(),
      source,
    })?;
    if let Err(e) = file.write_all(&body) {
      // A half-written lock would block the host forever.
      let _ = std::fs::remove_file(&path);
      return Err(io_err(&path)(e));
    }
    debug!(host, user = %owner.user, "host locked");
    Ok(true)
  }

  fn unlock(&self, host: &str, owner: &LockOwner) -> Result<(), LockError> {
    let path = self.lock_path(host);
    match self.holder(host)? {
      None => {
        warn!(host, "unlock requested but host is not locked");
        Ok(())
      }
      Some(holder) if holder.same_holder(owner) => {
        std::fs::remove_file(&path).map_err(io_err(&path))?;
        debug!(host, "host unlocked");
        Ok(())
      }
      Some(holder) => Err(LockError::NotOwner {
        host: host.to_string(),
        holder: format!("{} (pid {})", holder.user, holder.pid),
      }),
    }
  }

  fn holder(&self, host: &str) -> Result<Option<LockOwner>, LockError> {
    let path = self.lock_path(host);
    let content = match std::fs::read(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_err(&path)(e)),
    };
    serde_json::from_slice(&content)
      .map(Some)
      .map_err(|source| LockError::Corrupt { path, source })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn second_lock_fails_until_released() {
    let temp = TempDir::new().unwrap();
    let locks = DirLockService::new(temp.path().join("locks"));
    let me = LockOwner::current("alice", "my-app-el-7-x86_64");
    let other = LockOwner {
      user: "bob".into(),
      ..me.clone()
    };

    assert!(locks.try_lock("host1", &me).unwrap());
    assert!(!locks.try_lock("host1", &other).unwrap());
    assert_eq!(locks.holder("host1").unwrap().unwrap().user, "alice");

    locks.unlock("host1", &me).unwrap();
    assert!(locks.holder("host1").unwrap().is_none());
    assert!(locks.try_lock("host1", &other).unwrap());
  }

  #[test]
  fn only_the_holder_may_unlock() {
    let temp = TempDir::new().unwrap();
    let locks = DirLockService::new(temp.path());
    let me = LockOwner::current("alice", "job");
    let other = LockOwner::current("bob", "job");

    assert!(locks.try_lock("host1", &me).unwrap());
    let err = locks.unlock("host1", &other).unwrap_err();
    assert!(matches!(err, LockError::NotOwner { .. }));
    assert!(locks.holder("host1").unwrap().is_some());
  }

  #[test]
  fn lock_file_is_json_owner() {
    let temp = TempDir::new().unwrap();
    let locks = DirLockService::new(temp.path());
    let me = LockOwner::current("alice", "job");
    locks.try_lock("build/01", &me).unwrap();

    let raw = std::fs::read_to_string(temp.path().join("build_01.lock")).unwrap();
    let parsed: LockOwner = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed, me);
  }
}
