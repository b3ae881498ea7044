use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use modbuild_lib::metadata::gather_catalog;
use modbuild_lib::resolve::expand_streams;

use crate::engine::{Engine, load_definition};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_resolve(engine: &Engine, path: &Path, output: OutputFormat) -> Result<()> {
  let definition = load_definition(path)?;
  let catalog =
    gather_catalog(engine.ctx().resolver.as_ref(), &definition).context("Failed to gather module catalog")?;
  let expansions = expand_streams(&definition, &catalog)
    .with_context(|| format!("Failed to resolve {}:{}", definition.name, definition.stream))?;

  if output.is_json() {
    let items: Vec<_> = expansions
      .iter()
      .map(|e| {
        json!({
          "streams": e.streams,
          "combinations": e.combinations,
        })
      })
      .collect();
    print_json(&json!({ "module": definition.nsvc(), "expansions": items }))?;
    return Ok(());
  }

  print_success(&format!(
    "{}:{} expands to {} build(s)",
    definition.name,
    definition.stream,
    expansions.len()
  ));
  for (index, expansion) in expansions.iter().enumerate() {
    println!();
    print_info(&format!("Build {}", index + 1));
    for (name, stream) in &expansion.streams {
      print_stat(name, stream);
    }
    for combination in &expansion.combinations {
      let pinned: Vec<String> = combination.0.values().map(|nsvc| nsvc.to_string()).collect();
      println!("    {} {}", symbols::ARROW, pinned.join(", "));
    }
  }
  Ok(())
}
