//! Checksum algorithms for source verification.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
  #[default]
  Md5,
  Sha1,
  Sha256,
  Sha512,
}

impl ChecksumAlgorithm {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChecksumAlgorithm::Md5 => "md5",
      ChecksumAlgorithm::Sha1 => "sha1",
      ChecksumAlgorithm::Sha256 => "sha256",
      ChecksumAlgorithm::Sha512 => "sha512",
    }
  }

  /// Lowercase hex digest of `bytes`.
  pub fn digest(&self, bytes: &[u8]) -> String {
    match self {
      ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
      ChecksumAlgorithm::Sha1 => hex::encode(sha1_smol::Sha1::from(bytes).digest().bytes()),
      ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
      ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    }
  }

  /// Lowercase hex digest of the file at `path`.
  pub async fn hash_file(&self, path: &Path) -> Result<String, std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    Ok(self.digest(&bytes))
  }
}

impl FromStr for ChecksumAlgorithm {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "md5" => Ok(ChecksumAlgorithm::Md5),
      "sha1" => Ok(ChecksumAlgorithm::Sha1),
      "sha256" => Ok(ChecksumAlgorithm::Sha256),
      "sha512" => Ok(ChecksumAlgorithm::Sha512),
      _ => Err(ConfigError::InvalidChecksumType(s.to_string())),
    }
  }
}

impl fmt::Display for ChecksumAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Extract the checksum for `file_name` from a detached checksum file.
///
/// Accepts the common `<sum>  <file>` layout (one entry per line, `*` binary
/// marker allowed) as well as a file holding just the bare sum.
pub fn parse_checksum_file(content: &str, file_name: &str) -> Option<String> {
  let mut first = None;
  for line in content.lines() {
    let mut fields = line.split_whitespace();
    let Some(sum) = fields.next() else {
      continue;
    };
    match fields.next() {
      Some(name) if name.trim_start_matches('*') == file_name => return Some(sum.to_ascii_lowercase()),
      Some(_) => {}
      None => {
        first.get_or_insert_with(|| sum.to_ascii_lowercase());
      }
    }
  }
  first
}
