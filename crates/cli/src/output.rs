//! Terminal output for dcc commands.
//!
//! Unit results print one per line as `<mark> <command> <unit> @ <host>`.
//! Summaries print as label/value fields aligned on one column.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// How a lifecycle command ended for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Done,
  Failed,
  Skipped,
}

impl Outcome {
  fn mark(self) -> &'static str {
    match self {
      Outcome::Done => "✓",
      Outcome::Failed => "✗",
      Outcome::Skipped => "↷",
    }
  }
}

const NOTE: &str = "•";
const WARNING: &str = "!";
const ARROW: &str = "→";
const FIELD_WIDTH: usize = 12;

/// `install app @ web01.example.com: detail`
pub fn unit_line(command: &str, unit: &str, host: Option<&str>, detail: Option<&str>) -> String {
  let mut line = format!("{command} {unit}");
  if let Some(host) = host {
    line.push_str(" @ ");
    line.push_str(host);
  }
  if let Some(detail) = detail {
    line.push_str(": ");
    line.push_str(detail);
  }
  line
}

pub fn print_unit(outcome: Outcome, command: &str, unit: &str, host: Option<&str>, detail: Option<&str>) {
  let line = unit_line(command, unit, host, detail);
  let mark = outcome.mark();
  match outcome {
    Outcome::Done => println!("{} {line}", mark.if_supports_color(Stream::Stdout, |s| s.green())),
    Outcome::Skipped => println!(
      "{} {}",
      mark.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      line.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    Outcome::Failed => eprintln!(
      "{} {}",
      mark.if_supports_color(Stream::Stderr, |s| s.red()),
      line.if_supports_color(Stream::Stderr, |s| s.red())
    ),
  }
}

pub fn print_done(message: &str) {
  println!("{} {message}", Outcome::Done.mark().if_supports_color(Stream::Stdout, |s| s.green()));
}

pub fn print_problem(message: &str) {
  eprintln!(
    "{} {}",
    Outcome::Failed.mark().if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!("{} {message}", WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()));
}

pub fn print_note(message: &str) {
  println!("{} {message}", NOTE.if_supports_color(Stream::Stdout, |s| s.blue()));
}

pub fn field_line(label: &str, value: &str) -> String {
  format!("  {label:<FIELD_WIDTH$}{value}")
}

pub fn print_field(label: &str, value: &str) {
  println!("{}", field_line(label, value));
}

/// One line of a `unit → host` table.
pub fn print_mapping(from: &str, to: &str) {
  println!("  {from} {} {to}", ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn print_wave(index: usize, units: &[String]) {
  println!("Wave {}: {}", index + 1, units.join(", "));
}

/// `850ms`, `12.3s`, `2m05s`.
pub fn format_elapsed(elapsed: Duration) -> String {
  let secs = elapsed.as_secs();
  if secs >= 60 {
    format!("{}m{:02}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{secs}.{}s", elapsed.subsec_millis() / 100)
  } else {
    format!("{}ms", elapsed.subsec_millis())
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn elapsed_time_is_compact() {
    assert_eq!(format_elapsed(Duration::from_millis(850)), "850ms");
    assert_eq!(format_elapsed(Duration::from_millis(12_345)), "12.3s");
    assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
  }

  #[test]
  fn unit_lines_name_the_host() {
    assert_eq!(unit_line("install", "app", Some("web01"), None), "install app @ web01");
    assert_eq!(
      unit_line("stop", "db", None, Some("after 'app' failed")),
      "stop db: after 'app' failed"
    );
  }

  #[test]
  fn fields_align_values() {
    assert_eq!(field_line("Executed", "3"), "  Executed    3");
    assert_eq!(field_line("Not hosted", "settings"), "  Not hosted  settings");
  }
}
