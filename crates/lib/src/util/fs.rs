//! Filesystem helpers for copying source trees and build artifacts.

use std::io;
use std::path::Path;

use tracing::trace;
use walkdir::WalkDir;

/// Copy `src` (a file or directory) to `dest`.
///
/// Directories are copied recursively. With `overwrite` false, files that
/// already exist at the destination are left untouched. Returns the number of
/// files copied.
pub fn copy_tree(src: &Path, dest: &Path, overwrite: bool) -> io::Result<u64> {
  if src.is_file() {
    return copy_file(src, dest, overwrite).map(u64::from);
  }

  let mut copied = 0;
  for entry in WalkDir::new(src).follow_links(false) {
    let entry = entry.map_err(io::Error::other)?;
    let relative = entry
      .path()
      .strip_prefix(src)
      .map_err(io::Error::other)?;
    let target = dest.join(relative);

    let file_type = entry.file_type();
    if file_type.is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target, overwrite)?;
    } else if copy_file(entry.path(), &target, overwrite)? {
      copied += 1;
    }
  }
  Ok(copied)
}

fn copy_file(src: &Path, dest: &Path, overwrite: bool) -> io::Result<bool> {
  if !overwrite && dest.exists() {
    trace!(path = ?dest, "keeping existing file");
    return Ok(false);
  }
  if let Some(parent) = dest.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::copy(src, dest)?;
  Ok(true)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path, overwrite: bool) -> io::Result<()> {
  if dest.symlink_metadata().is_ok() {
    if !overwrite {
      return Ok(());
    }
    std::fs::remove_file(dest)?;
  }
  let link = std::fs::read_link(src)?;
  std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path, overwrite: bool) -> io::Result<()> {
  copy_file(src, dest, overwrite).map(|_| ())
}
