use anyhow::{Context, Result};

use modbuild_lib::state::ComponentState;

use crate::engine::Engine;
use crate::output::{OutputFormat, module_state, print_json, print_stat, print_success};

pub fn cmd_cancel(engine: &Engine, id: u64, actor: &str, output: OutputFormat) -> Result<()> {
  engine
    .dispatcher
    .cancel(id, actor)
    .with_context(|| format!("Failed to cancel module build {}", id))?;
  engine.pump();

  let store = &engine.ctx().store;
  let module = store.module(id).with_context(|| format!("Failed to load module build {}", id))?;

  if output.is_json() {
    return print_json(&module);
  }

  let canceled = store
    .components(id)
    .context("Failed to load components")?
    .iter()
    .filter(|c| c.state == ComponentState::Canceled)
    .count();
  print_success(&format!("Canceled module build {}: {}", module.id, module.nsvc()));
  print_stat("State", &module_state(module.state));
  print_stat("Components canceled", &canceled.to_string());
  Ok(())
}
