use anyhow::{Context, Result};

use crate::engine::Engine;
use crate::output::{OutputFormat, print_info, print_json, print_success};
use crate::prompts::confirm;

pub fn cmd_retire(engine: &Engine, id: u64, force: bool, output: OutputFormat) -> Result<()> {
  let module = engine
    .ctx()
    .store
    .module(id)
    .with_context(|| format!("Failed to load module build {}", id))?;

  if !confirm(&format!("Retire module build {} ({})?", module.id, module.nsvc()), force)? {
    print_info("Aborted");
    return Ok(());
  }

  engine
    .dispatcher
    .retire(id)
    .with_context(|| format!("Failed to retire module build {}", id))?;
  let module = engine.ctx().store.module(id)?;

  if output.is_json() {
    print_json(&module)?;
  } else {
    print_success(&format!("Retired module build {}: {}", module.id, module.nsvc()));
  }
  Ok(())
}
