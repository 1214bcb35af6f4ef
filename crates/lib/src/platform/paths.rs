//! Per-user locations for kiln's config file and host locks.
//!
//! Unix follows the XDG base directory layout; Windows uses `%APPDATA%` and
//! `%LOCALAPPDATA%`.

use std::path::PathBuf;

use crate::consts::APP_NAME;

fn env_dir(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn home_dir() -> PathBuf {
  let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
  env_dir(var).unwrap_or_else(|| PathBuf::from("."))
}

/// `$var/kiln`, or `<home>/<fallback>/kiln` when `var` is unset.
fn app_dir(var: &str, fallback: &[&str]) -> PathBuf {
  let base = env_dir(var).unwrap_or_else(|| fallback.iter().fold(home_dir(), |dir, part| dir.join(part)));
  base.join(APP_NAME)
}

/// Directory holding the user config file.
pub fn config_dir() -> PathBuf {
  if cfg!(windows) {
    app_dir("APPDATA", &[])
  } else {
    app_dir("XDG_CONFIG_HOME", &[".config"])
  }
}

/// Directory for state that outlives a build, such as hardware host locks.
pub fn state_dir() -> PathBuf {
  if cfg!(windows) {
    app_dir("LOCALAPPDATA", &[])
  } else {
    app_dir("XDG_STATE_HOME", &[".local", "state"])
  }
}

pub fn user_config_file() -> PathBuf {
  config_dir().join("config.toml")
}

#[cfg(all(test, not(windows)))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_variables_win_over_home() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", Some("/xdg/config")),
        ("XDG_STATE_HOME", Some("/xdg/state")),
        ("HOME", Some("/home/builder")),
      ],
      || {
        assert_eq!(user_config_file(), PathBuf::from("/xdg/config/kiln/config.toml"));
        assert_eq!(state_dir(), PathBuf::from("/xdg/state/kiln"));
      },
    );
  }

  #[test]
  #[serial]
  fn unset_or_empty_xdg_falls_back_to_home() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", Some("")),
        ("XDG_STATE_HOME", None::<&str>),
        ("HOME", Some("/home/builder")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/home/builder/.config/kiln"));
        assert_eq!(state_dir(), PathBuf::from("/home/builder/.local/state/kiln"));
      },
    );
  }
}
