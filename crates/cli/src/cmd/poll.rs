use std::time::Instant;

use anyhow::Result;

use crate::engine::Engine;
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success};

pub fn cmd_poll(engine: &Engine, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let report = engine.poller().poll();
  engine.pump();

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_success("Reconciliation pass complete");
    print_stat("Components reconciled", &report.reconciled.to_string());
    print_stat("Batches resumed", &report.resumed.to_string());
    print_stat("Regenerations checked", &report.regen_checked.to_string());
    print_stat("Targets retired", &report.targets_retired.to_string());
    print_stat("Modules re-driven", &report.redriven.to_string());
    print_stat("Garbage collected", &report.garbage_collected.to_string());
    for (state, count) in &report.states {
      print_stat(&format!("In {}", state), &count.to_string());
    }
    print_stat("Duration", &format_duration(start.elapsed()));
  }
  Ok(())
}
