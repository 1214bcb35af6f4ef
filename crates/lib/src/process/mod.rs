//! External command execution.
//!
//! Everything that shells out (git, ssh, rsync, docker, aws, recipe lines)
//! goes through [`CommandRunner`], so engines, sources, and the rule runner
//! can be exercised against [`MockRunner`] in tests.

mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub use mock::MockRunner;

/// One program invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: Option<PathBuf>,
  pub env: BTreeMap<String, String>,
  /// Stream output to the terminal instead of capturing it.
  pub inherit_output: bool,
}

impl Invocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      ..Default::default()
    }
  }

  /// `/bin/sh -c <script>`.
  pub fn shell(script: impl Into<String>) -> Self {
    Self::new("/bin/sh").arg("-c").arg(script)
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
    self.cwd = Some(dir.as_ref().to_path_buf());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn inherit_output(mut self, inherit: bool) -> Self {
    self.inherit_output = inherit;
    self
  }

  /// The invocation as a single shell-like line, for logs and errors.
  pub fn command_line(&self) -> String {
    let mut line = self.program.clone();
    for arg in &self.args {
      line.push(' ');
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        line.push_str(&format!("'{}'", arg.replace('\'', r"'\''")));
      } else {
        line.push_str(arg);
      }
    }
    line
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.command_line())
  }
}

/// Result of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
  /// Exit code; `None` when killed by a signal.
  pub status: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(stdout: impl Into<String>) -> Self {
    Self {
      status: Some(0),
      stdout: stdout.into(),
      stderr: String::new(),
    }
  }

  pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
    Self {
      status: Some(code),
      stdout: String::new(),
      stderr: stderr.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == Some(0)
  }
}

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("failed to spawn '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command failed with exit code {status:?}: {command}")]
  Failed {
    command: String,
    status: Option<i32>,
    stderr: String,
  },
}

/// Something that can run an [`Invocation`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<CommandOutput>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<CommandOutput> {
    debug!(command = %invocation, cwd = ?invocation.cwd, "spawning process");

    let mut command = Command::new(&invocation.program);
    // A timed-out or interrupted attempt must not leave its process running.
    command.args(&invocation.args).envs(&invocation.env).kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
      command.current_dir(cwd);
    }

    if invocation.inherit_output {
      let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;
      return Ok(CommandOutput {
        status: status.code(),
        ..Default::default()
      });
    }

    let output = command.stdin(Stdio::null()).output().await?;
    Ok(CommandOutput {
      status: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
  }
}

/// Run `invocation` and turn a non-zero exit into [`CommandError::Failed`].
pub async fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
  let output = runner.run(invocation).await.map_err(|source| CommandError::Spawn {
    program: invocation.program.clone(),
    source,
  })?;

  if !output.is_success() {
    if !output.stderr.is_empty() {
      debug!(stderr = %output.stderr, "command stderr");
    }
    if !output.stdout.is_empty() {
      debug!(stdout = %output.stdout, "command stdout");
    }
    return Err(CommandError::Failed {
      command: invocation.command_line(),
      status: output.status,
      stderr: output.stderr,
    });
  }

  Ok(output)
}

/// Wrap `value` in single quotes for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn command_line_quotes_arguments_with_spaces() {
    let inv = Invocation::shell("cd /tmp && make all");
    assert_eq!(inv.command_line(), "/bin/sh -c 'cd /tmp && make all'");
  }

  #[test]
  fn shell_quote_escapes_single_quotes() {
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn system_runner_captures_stdout() {
    let temp = TempDir::new().unwrap();
    let output = SystemRunner
      .run(&Invocation::shell("echo hello").cwd(temp.path()))
      .await
      .unwrap();

    assert!(output.is_success());
    assert_eq!(output.stdout.trim(), "hello");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn system_runner_passes_environment() {
    let output = SystemRunner
      .run(&Invocation::shell("echo $KILN_TEST_VAR").env("KILN_TEST_VAR", "value"))
      .await
      .unwrap();

    assert_eq!(output.stdout.trim(), "value");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn run_checked_reports_exit_code() {
    let err = run_checked(&SystemRunner, &Invocation::shell("exit 3")).await.unwrap_err();
    match err {
      CommandError::Failed { status, command, .. } => {
        assert_eq!(status, Some(3));
        assert!(command.contains("exit 3"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn run_checked_reports_spawn_failure() {
    let err = run_checked(&SystemRunner, &Invocation::new("/nonexistent/kiln-test-binary"))
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Spawn { .. }));
  }
}
