use tracing::{debug, info};

use crate::state::ModuleState;

use super::batches::request_regen;
use super::context::{Context, HandlerError};
use super::events::Event;

/// An artifact was tagged into one of a module's tags.
pub(crate) fn handle_tag_change(
  ctx: &Context,
  tag: &str,
  artifact_name: &str,
  nvr: &str,
) -> Result<Vec<Event>, HandlerError> {
  let Some(mut module) = ctx.store.module_by_tag(tag)? else {
    debug!(tag, "no module build for tag");
    return Ok(Vec::new());
  };
  if module.state != ModuleState::Build {
    debug!(module = module.id, state = %module.state, "module is not building, ignoring tag");
    return Ok(Vec::new());
  }

  let into_buildroot = module.buildroot_tag().as_deref() == Some(tag);
  let mut components = ctx.store.components(module.id)?;
  let Some(component) = components
    .iter_mut()
    .find(|c| c.package == artifact_name && c.nvr.as_deref().is_none_or(|n| n == nvr))
  else {
    debug!(module = module.id, artifact_name, nvr, "no component for tagged artifact");
    return Ok(Vec::new());
  };

  if into_buildroot {
    component.tagged = true;
  } else {
    component.tagged_in_final = true;
  }
  ctx.store.update_component(component)?;
  debug!(module = module.id, package = artifact_name, tag, "artifact tagged");

  let batch_done = components
    .iter()
    .filter(|c| c.batch == Some(module.batch))
    .all(|c| c.state.is_terminal());
  if !batch_done || components.iter().any(|c| c.needs_tagging()) {
    return Ok(Vec::new());
  }

  info!(module = module.id, batch = module.batch, "every artifact tagged");
  let builder = ctx.builder(&module)?;
  request_regen(ctx, builder.as_ref(), &mut module)?;
  Ok(Vec::new())
}
