//! Status command implementation.
//!
//! Lists module builds from the store, or shows one build with its components.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use modbuild_lib::state::ModuleState;
use modbuild_lib::store::ModuleFilter;

use crate::engine::Engine;
use crate::output::{
  OutputFormat, component_state, format_age, module_state, print_info, print_json, print_stat, print_success, symbols,
};

pub fn cmd_status(
  engine: &Engine,
  id: Option<u64>,
  state: Option<ModuleState>,
  name: Option<String>,
  older_than: Option<Duration>,
  output: OutputFormat,
) -> Result<()> {
  match id {
    Some(id) => show_module(engine, id, output),
    None => list_modules(engine, state, name, older_than, output),
  }
}

fn list_modules(
  engine: &Engine,
  state: Option<ModuleState>,
  name: Option<String>,
  older_than: Option<Duration>,
  output: OutputFormat,
) -> Result<()> {
  let filter = ModuleFilter {
    name,
    states: state.into_iter().collect(),
    ..ModuleFilter::default()
  };
  let mut modules = engine.ctx().store.modules(&filter).context("Failed to list module builds")?;

  if let Some(min_age) = older_than {
    let now = Utc::now();
    modules.retain(|m| now.signed_duration_since(m.time_modified).to_std().is_ok_and(|age| age >= min_age));
  }

  if output.is_json() {
    return print_json(&modules);
  }

  if modules.is_empty() {
    print_info("No module builds found");
    return Ok(());
  }

  for module in &modules {
    println!(
      "  {} {:>4}  {:<8} {}  ({} ago)",
      symbols::INFO,
      module.id,
      module_state(module.state),
      module.nsvc(),
      format_age(module.time_modified)
    );
  }
  println!();
  print_stat("Modules", &modules.len().to_string());
  Ok(())
}

fn show_module(engine: &Engine, id: u64, output: OutputFormat) -> Result<()> {
  let store = &engine.ctx().store;
  let module = store.module(id).with_context(|| format!("Failed to load module build {}", id))?;
  let components = store
    .components(id)
    .with_context(|| format!("Failed to load components of module build {}", id))?;

  if output.is_json() {
    return print_json(&json!({ "module": module, "components": components }));
  }

  print_success(&format!("Module build {}: {}", module.id, module.nsvc()));
  print_stat("State", &module_state(module.state));
  if let Some(reason) = &module.state_reason {
    print_stat("Reason", reason);
  }
  print_stat("Owner", &module.owner);
  print_stat("Batch", &module.batch.to_string());
  print_stat("Rebuild strategy", &module.rebuild_strategy.to_string());
  if let Some(tag) = &module.koji_tag {
    print_stat("Tag", tag);
  }
  if let Some(reused) = module.reused_module_id {
    print_stat("Reuses", &reused.to_string());
  }
  print_stat("Submitted", &format!("{} ago", format_age(module.time_submitted)));
  if let Some(completed) = module.time_completed {
    print_stat("Completed", &format!("{} ago", format_age(completed)));
  }

  if !components.is_empty() {
    println!();
    println!("Components:");
    for component in &components {
      let batch = component
        .batch
        .map_or_else(|| format!("({})", component.planned_batch), |b| b.to_string());
      let reused = if component.reused_component_id.is_some() { " reused" } else { "" };
      println!(
        "  {} {:<24} batch {:<4} {}{}",
        symbols::INFO,
        component.package,
        batch,
        component_state(component.state),
        reused
      );
      if let Some(reason) = component.state_reason.as_deref().filter(|_| !component.state.is_success()) {
        println!("      {}", reason);
      }
    }
  }
  Ok(())
}
