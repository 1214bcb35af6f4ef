use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandOutput, CommandRunner, Invocation};

/// A [`CommandRunner`] that records invocations and answers from canned
/// responses instead of spawning processes.
///
/// Responses are matched by substring against the invocation's command line;
/// the first matching rule wins. Unmatched invocations succeed with empty
/// output.
#[derive(Debug, Default)]
pub struct MockRunner {
  calls: Mutex<Vec<Invocation>>,
  responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl MockRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer invocations containing `pattern` with `output`.
  pub fn respond(&self, pattern: impl Into<String>, output: CommandOutput) -> &Self {
    if let Ok(mut responses) = self.responses.lock() {
      responses.push((pattern.into(), output));
    }
    self
  }

  /// Answer invocations containing `pattern` with a successful `stdout`.
  pub fn respond_ok(&self, pattern: impl Into<String>, stdout: impl Into<String>) -> &Self {
    self.respond(pattern, CommandOutput::success(stdout))
  }

  /// Fail invocations containing `pattern` with exit code `code`.
  pub fn fail_on(&self, pattern: impl Into<String>, code: i32) -> &Self {
    self.respond(pattern, CommandOutput::failure(code, "mock failure"))
  }

  pub fn invocations(&self) -> Vec<Invocation> {
    self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
  }

  /// Recorded invocations as command lines, in call order.
  pub fn commands(&self) -> Vec<String> {
    self.invocations().iter().map(Invocation::command_line).collect()
  }

  /// Index of the first recorded command line containing `pattern`.
  pub fn position(&self, pattern: &str) -> Option<usize> {
    self.commands().iter().position(|line| line.contains(pattern))
  }
}

#[async_trait]
impl CommandRunner for MockRunner {
  async fn run(&self, invocation: &Invocation) -> std::io::Result<CommandOutput> {
    let line = invocation.command_line();
    if let Ok(mut calls) = self.calls.lock() {
      calls.push(invocation.clone());
    }

    let responses = self.responses.lock().map_err(|_| std::io::Error::other("mock runner poisoned"))?;
    let output = responses
      .iter()
      .find(|(pattern, _)| line.contains(pattern.as_str()))
      .map(|(_, output)| output.clone())
      .unwrap_or_else(|| CommandOutput::success(""));
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn records_calls_and_matches_first_rule() {
    let runner = MockRunner::new();
    runner.respond_ok("git describe", "1.2.3\n").fail_on("git", 128);

    let out = runner
      .run(&Invocation::new("git").args(["describe", "--tags"]))
      .await
      .unwrap();
    assert_eq!(out.stdout, "1.2.3\n");

    let out = runner.run(&Invocation::new("git").arg("status")).await.unwrap();
    assert_eq!(out.status, Some(128));

    let out = runner.run(&Invocation::new("true")).await.unwrap();
    assert!(out.is_success());

    assert_eq!(runner.commands(), vec!["git describe --tags", "git status", "true"]);
    assert_eq!(runner.position("status"), Some(1));
  }
}
