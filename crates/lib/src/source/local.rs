//! Local source: a `file://` file or directory copied into the workdir.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::checksum::ChecksumAlgorithm;
use super::{SourceError, archive_dirname};
use crate::util::fs::copy_tree;

#[derive(Debug, Clone)]
pub struct LocalSource {
  url: String,
  path: PathBuf,
  file: String,
  is_dir: bool,
  sum: Option<String>,
  algorithm: ChecksumAlgorithm,
  workdir: PathBuf,
}

impl LocalSource {
  pub fn new(url: &str, sum: Option<&str>, algorithm: ChecksumAlgorithm, workdir: &Path) -> Self {
    let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
    let file = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    Self {
      url: url.to_string(),
      is_dir: path.is_dir(),
      path,
      file,
      sum: sum.map(|s| s.trim().to_ascii_lowercase()),
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

  pub fn is_dir(&self) -> bool {
    self.is_dir
  }

  /// Directories map to their basename, archives to their stem, and any
  /// other file to `./`.
  pub fn dirname(&self) -> String {
    if self.is_dir {
      self.file.clone()
    } else {
      archive_dirname(&self.file)
    }
  }

  pub async fn fetch(&self) -> Result<(), SourceError> {
    let src = dunce::canonicalize(&self.path).map_err(|_| SourceError::LocalNotFound(self.path.clone()))?;
    let dest = self.workdir.join(&self.file);

    info!(src = ?src, dest = ?dest, "copying local source");
    let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dest, true).map_err(|e| (dest, e)))
      .await
      .map_err(|e| SourceError::Io {
        path: self.path.clone(),
        source: std::io::Error::other(e),
      })?
      .map_err(|(path, source)| SourceError::Io { path, source })?;

    debug!(files = copied, "local source copied");
    Ok(())
  }

  /// Verify the copied file against the declared checksum, if any.
  pub async fn verify(&self) -> Result<(), SourceError> {
    let Some(expected) = &self.sum else {
      return Ok(());
    };
    if self.is_dir {
      return Ok(());
    }

    let path = self.workdir.join(&self.file);
    let actual = self
      .algorithm
      .hash_file(&path)
      .await
      .map_err(|source| SourceError::Io { path, source })?;

    if actual != *expected {
      return Err(SourceError::ChecksumMismatch {
        file: self.file.clone(),
        expected: expected.clone(),
        actual,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn copies_archive_and_verifies() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("app-1.0.tar.gz");
    std::fs::write(&archive, b"archive").unwrap();
    let workdir = temp.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();

    let sum = ChecksumAlgorithm::Md5.digest(b"archive");
    let url = format!("file://{}", archive.display());
    let source = LocalSource::new(&url, Some(&sum), ChecksumAlgorithm::Md5, &workdir);

    assert_eq!(source.dirname(), "app-1.0");
    source.fetch().await.unwrap();
    source.verify().await.unwrap();
    assert!(workdir.join("app-1.0.tar.gz").is_file());
  }

  #[tokio::test]
  async fn directory_maps_to_basename() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("vendored");
    std::fs::create_dir_all(tree.join("src")).unwrap();
    std::fs::write(tree.join("src/main.c"), "int main;").unwrap();
    let workdir = temp.path().join("work");

    let source = LocalSource::new(&format!("file://{}", tree.display()), None, ChecksumAlgorithm::Md5, &workdir);
    assert!(source.is_dir());
    assert_eq!(source.dirname(), "vendored");

    source.fetch().await.unwrap();
    assert!(workdir.join("vendored/src/main.c").is_file());
  }

  #[test]
  fn plain_file_maps_to_current_directory() {
    let source = LocalSource::new("file:///srv/files/install.sh", None, ChecksumAlgorithm::Md5, Path::new("/work"));
    assert_eq!(source.dirname(), "./");
  }

  #[tokio::test]
  async fn missing_path_is_reported() {
    let temp = TempDir::new().unwrap();
    let source = LocalSource::new("file:///nonexistent/kiln/app.tgz", None, ChecksumAlgorithm::Md5, temp.path());
    assert!(matches!(source.fetch().await, Err(SourceError::LocalNotFound(_))));
  }
}
