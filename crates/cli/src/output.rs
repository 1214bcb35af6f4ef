//! Terminal output for kiln: status lines, labelled stats and JSON.
//!
//! Status lines go to stdout except errors, which go to stderr. Color is
//! used only when the stream supports it.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
  Success,
  Error,
  Info,
}

impl Status {
  fn symbol(self) -> &'static str {
    match self {
      Status::Success => "✓",
      Status::Error => "✗",
      Status::Info => "•",
    }
  }

  fn stream(self) -> Stream {
    match self {
      Status::Error => Stream::Stderr,
      Status::Success | Status::Info => Stream::Stdout,
    }
  }
}

fn status_line(status: Status, message: &str) {
  let glyph = status.symbol();
  let symbol = glyph.if_supports_color(status.stream(), |s| match status {
    Status::Success => s.green().to_string(),
    Status::Error => s.red().to_string(),
    Status::Info => s.blue().to_string(),
  });
  if status == Status::Error {
    eprintln!("{} {}", symbol, message.if_supports_color(Stream::Stderr, |m| m.red()));
  } else {
    println!("{} {}", symbol, message);
  }
}

pub fn print_success(message: &str) {
  status_line(Status::Success, message);
}

pub fn print_error(message: &str) {
  status_line(Status::Error, message);
}

pub fn print_info(message: &str) {
  status_line(Status::Info, message);
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |l| l.dimmed()), value);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

/// Wall-clock time of a build, coarsened to the two largest units.
pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    0 => format!("{}ms", duration.subsec_millis()),
    1..=59 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
    _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
  }
}
