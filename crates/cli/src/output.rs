//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, module states, ages and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use modbuild_lib::state::{ComponentState, ModuleState};
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

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Wall-clock time of a command: milliseconds under a second, then seconds.
pub fn format_duration(duration: Duration) -> String {
  match duration.as_secs() {
    0 => format!("{}ms", duration.subsec_millis()),
    secs @ 1..60 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    secs => format!("{}m {}s", secs / 60, secs % 60),
  }
}

/// Time since `time`, to the second.
pub fn format_age(time: DateTime<Utc>) -> String {
  let elapsed = Utc::now().signed_duration_since(time).num_seconds().max(0);
  humantime::format_duration(Duration::from_secs(elapsed.unsigned_abs())).to_string()
}

pub fn module_state(state: ModuleState) -> String {
  let label = state.as_str();
  match state {
    ModuleState::Ready => label.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    ModuleState::Failed => label.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    ModuleState::Garbage => label.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
    _ => label.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
  }
}

pub fn component_state(state: ComponentState) -> String {
  let label = state.to_string();
  match state {
    ComponentState::Complete => label.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    ComponentState::Failed | ComponentState::Canceled => {
      label.if_supports_color(Stream::Stdout, |s| s.red()).to_string()
    }
    _ => label.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeDelta;

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(Duration::from_millis(40)), "40ms");
    assert_eq!(format_duration(Duration::from_millis(2250)), "2.25s");
    assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
  }

  #[test]
  fn test_format_age() {
    assert_eq!(format_age(Utc::now() - TimeDelta::seconds(90)), "1m 30s");
    assert_eq!(format_age(Utc::now() + TimeDelta::seconds(30)), "0s");
  }

  #[test]
  fn test_state_labels_keep_names() {
    assert!(module_state(ModuleState::Ready).contains("ready"));
    assert!(component_state(ComponentState::Canceled).contains("canceled"));
  }
}
