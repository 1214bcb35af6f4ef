//! Placeholder parsing and substitution for definition values.
//!
//! Component definitions are written once and evaluated against a project's
//! settings and the target platform. Placeholders let definition strings
//! refer to those values.
//!
//! # Placeholder Formats
//!
//! - `%{settings:<key>}` - a value from the project's settings map
//! - `%{platform:<attr>}` - a platform attribute (see `Platform::attribute`)
//!
//! # Make and Shell Variables
//!
//! `$` is never special here, so `$(workdir)`, `$$HOME` and friends pass
//! through untouched for make and the shell to expand.
//!
//! # Escaping
//!
//! `%%{` produces a literal `%{`.
//!
//! # Example
//!
//! ```
//! use kiln_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("./configure --prefix=%{settings:prefix}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("./configure --prefix=".to_string()),
//!     Segment::Placeholder(Placeholder::Setting("prefix".to_string())),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `%{settings:<key>}`
  Setting(String),

  /// `%{platform:<attr>}`
  Platform(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder type: {0}")]
  UnknownType(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("unknown setting '{0}'")]
  UnresolvedSetting(String),

  #[error("platform has no attribute '{0}'")]
  UnresolvedPlatform(String),
}

/// Source of placeholder values.
pub trait Resolver {
  fn resolve_setting(&self, key: &str) -> Result<String, PlaceholderError>;

  fn resolve_platform(&self, attr: &str) -> Result<String, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed, has an unknown type, or is
/// missing its `:` separator.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '%' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '%')) => {
        chars.next();
        if let Some((_, '{')) = chars.peek() {
          // Escaped: %%{ -> %{
          chars.next();
          literal.push_str("%{");
        } else {
          literal.push_str("%%");
        }
      }
      Some((_, '{')) => {
        chars.next();

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut content = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          content.push(c);
        }

        if !found_close {
          return Err(PlaceholderError::Unclosed(pos));
        }

        segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
      }
      // A lone % (printf formats, date strings) is literal.
      _ => literal.push('%'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content between `%{` and `}`.
fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  let (kind, rest) = content
    .split_once(':')
    .ok_or_else(|| PlaceholderError::Malformed(format!("missing colon in '{content}'")))?;

  let rest = rest.trim();
  if rest.is_empty() {
    return Err(PlaceholderError::Malformed(format!("empty name in '{content}'")));
  }

  match kind.trim() {
    "settings" | "setting" => Ok(Placeholder::Setting(rest.to_string())),
    "platform" => Ok(Placeholder::Platform(rest.to_string())),
    other => Err(PlaceholderError::UnknownType(other.to_string())),
  }
}

/// Whether `input` contains anything that would parse as a placeholder.
pub fn contains_placeholder(input: &str) -> bool {
  input.contains("%{")
}

/// Substitute all placeholders in a string using the provided resolver.
///
/// # Errors
///
/// Returns an error if parsing fails or if any placeholder cannot be resolved.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(Placeholder::Setting(key)) => result.push_str(&resolver.resolve_setting(key)?),
      Segment::Placeholder(Placeholder::Platform(attr)) => result.push_str(&resolver.resolve_platform(attr)?),
    }
  }

  Ok(result)
}
