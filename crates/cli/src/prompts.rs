use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Result, bail};

/// Ask before a destructive command. `--force` answers yes without asking;
/// without a terminal there is nobody to ask, so the command refuses.
pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }
  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to ask for confirmation without a terminal; pass --force to proceed");
  }

  let mut stderr = io::stderr().lock();
  write!(stderr, "{} [y/N] ", message)?;
  stderr.flush()?;

  let mut answer = String::new();
  io::stdin().lock().read_line(&mut answer)?;
  Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
  let answer = answer.trim();
  answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_answers() {
    assert!(is_yes("y\n"));
    assert!(is_yes(" YES "));
    assert!(!is_yes("\n"));
    assert!(!is_yes("no"));
  }

  #[test]
  fn test_force_skips_prompt() {
    assert!(confirm("Retire module build 1?", true).unwrap());
  }
}
