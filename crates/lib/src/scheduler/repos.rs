use tracing::debug;

use crate::state::{ModuleBuild, ModuleState};

use super::batches::advance;
use super::context::{Context, HandlerError};
use super::events::Event;

/// The buildroot repository of `tag` was regenerated.
pub(crate) fn handle_repo_change(ctx: &Context, tag: &str) -> Result<Vec<Event>, HandlerError> {
  let Some(mut module) = ctx.store.module_by_tag(tag)? else {
    debug!(tag, "no module build for tag");
    return Ok(Vec::new());
  };
  if module.buildroot_tag().as_deref() != Some(tag) {
    debug!(module = module.id, tag, "not a buildroot tag, ignoring");
    return Ok(Vec::new());
  }
  if module.state != ModuleState::Build {
    debug!(module = module.id, state = %module.state, "module is not building, ignoring repository");
    return Ok(Vec::new());
  }
  if module.new_repo_requested_at.is_none() {
    debug!(module = module.id, tag, "no regeneration outstanding, ignoring repository");
    return Ok(Vec::new());
  }

  let builder = ctx.builder(&module)?;
  let artifacts = batch_artifacts(ctx, &module)?;
  if !ctx.with_retry(|| builder.buildroot_ready(&module, &artifacts))? {
    debug!(module = module.id, tag, "buildroot not ready yet");
    return Ok(Vec::new());
  }

  module.new_repo_requested_at = None;
  ctx.store.update_module(&module)?;
  advance(ctx, &mut module)
}

/// Artifacts of the current batch already tagged into the buildroot.
pub(crate) fn batch_artifacts(ctx: &Context, module: &ModuleBuild) -> Result<Vec<String>, HandlerError> {
  Ok(
    ctx
      .store
      .components(module.id)?
      .into_iter()
      .filter(|c| c.batch == Some(module.batch) && c.tagged)
      .filter_map(|c| c.nvr)
      .collect(),
  )
}
