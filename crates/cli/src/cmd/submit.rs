use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use modbuild_lib::state::{ModuleBuild, ModuleState, RebuildStrategy};
use modbuild_lib::submit::{SubmitOptions, submit_module};

use crate::engine::{Engine, load_definition};
use crate::output::{
  OutputFormat, format_duration, module_state, print_error, print_info, print_json, print_stat, print_success,
};

pub fn cmd_submit(
  engine: &Engine,
  path: &Path,
  owner: &str,
  rebuild_strategy: Option<RebuildStrategy>,
  no_wait: bool,
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();
  let definition = load_definition(path)?;

  let mut options = SubmitOptions::new(owner);
  if let Some(strategy) = rebuild_strategy {
    options = options.with_rebuild_strategy(strategy);
  }

  // Without waiting the builds stay in init: a backend task started here
  // would be forgotten when the process exits.
  let submitted = if no_wait {
    submit_module(engine.ctx(), &definition, &options)
  } else {
    engine.dispatcher.submit(&definition, &options)
  }
  .with_context(|| format!("Failed to submit {}:{}", definition.name, definition.stream))?;

  if !no_wait {
    let handled = engine.pump();
    info!(handled, "drove submitted builds");
  }

  let modules: Vec<ModuleBuild> = submitted
    .iter()
    .map(|m| engine.ctx().store.module(m.id))
    .collect::<Result<_, _>>()
    .context("Failed to reload submitted builds")?;
  let failed = modules.iter().filter(|m| m.state == ModuleState::Failed).count();

  if output.is_json() {
    print_json(&modules)?;
  } else {
    for module in &modules {
      if module.state == ModuleState::Failed {
        print_error(&format!("{} {}", module.id, module.nsvc()));
      } else {
        print_success(&format!("{} {}", module.id, module.nsvc()));
      }
      print_stat("State", &module_state(module.state));
      if let Some(reason) = &module.state_reason {
        print_stat("Reason", reason);
      }
      let streams: Vec<String> = module
        .buildrequires
        .iter()
        .map(|(name, stream)| format!("{}:{}", name, stream))
        .collect();
      print_stat("Buildrequires", &streams.join(", "));
    }
    println!();
    if no_wait {
      print_info("Builds recorded; run 'mbs poll' or 'mbs serve' to drive them");
    }
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if failed > 0 {
    bail!("{} of {} module build(s) failed", failed, modules.len());
  }
  Ok(())
}
