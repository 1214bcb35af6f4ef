//! Per-protocol source URL rewriting.
//!
//! A rule either replaces the `<protocol>://<host>` prefix with a fixed
//! string or maps the whole URL through a function. Rules are held in an
//! explicit registry built once and passed to whoever resolves sources.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

type RewriteFn = Box<dyn Fn(&str) -> String + Send + Sync>;

pub enum RewriteRule {
  /// Replace `<protocol>://<host>` with this prefix.
  Prefix(String),
  /// Compute the new URL from the old one.
  Function(RewriteFn),
}

impl fmt::Debug for RewriteRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RewriteRule::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
      RewriteRule::Function(_) => f.write_str("Function(..)"),
    }
  }
}

#[derive(Debug, Default)]
pub struct RewriteRules {
  rules: BTreeMap<String, RewriteRule>,
}

impl RewriteRules {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a registry of prefix rules from `protocol -> prefix` pairs.
  pub fn from_prefixes<'a>(prefixes: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
    let mut rules = Self::new();
    for (protocol, prefix) in prefixes {
      rules.register(protocol, RewriteRule::Prefix(prefix.clone()));
    }
    rules
  }

  pub fn register(&mut self, protocol: &str, rule: RewriteRule) {
    warn!(protocol, "source URL rewrite rules are deprecated; prefer component mirrors");
    self.rules.insert(protocol.to_string(), rule);
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Apply the rule registered for `url`'s protocol, if any.
  pub fn rewrite(&self, url: &str) -> String {
    let Some((protocol, rest)) = url.split_once("://") else {
      return url.to_string();
    };
    let Some(rule) = self.rules.get(protocol) else {
      return url.to_string();
    };

    let rewritten = match rule {
      RewriteRule::Function(f) => f(url),
      RewriteRule::Prefix(prefix) => {
        let path = rest.find('/').map(|i| &rest[i..]).unwrap_or("");
        format!("{}{}", prefix.trim_end_matches('/'), path)
      }
    };
    debug!(from = %url, to = %rewritten, "rewrote source URL");
    rewritten
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefix_rule_replaces_scheme_and_host() {
    let mut rules = RewriteRules::new();
    rules.register("http", RewriteRule::Prefix("https://mirror.example.com/".to_string()));

    assert_eq!(
      rules.rewrite("http://downloads.example.org/zlib/zlib-1.3.tar.gz"),
      "https://mirror.example.com/zlib/zlib-1.3.tar.gz"
    );
  }

  #[test]
  fn other_protocols_are_untouched() {
    let mut rules = RewriteRules::new();
    rules.register("http", RewriteRule::Prefix("https://mirror".to_string()));

    assert_eq!(rules.rewrite("git://github.com/a/b.git"), "git://github.com/a/b.git");
    assert_eq!(rules.rewrite("not a url"), "not a url");
  }

  #[test]
  fn function_rule_sees_whole_url() {
    let mut rules = RewriteRules::new();
    rules.register(
      "git",
      RewriteRule::Function(Box::new(|url| url.replace("github.com", "git.internal"))),
    );

    assert_eq!(
      rules.rewrite("git://github.com/org/repo.git"),
      "git://git.internal/org/repo.git"
    );
  }
}
