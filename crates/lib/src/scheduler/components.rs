use tracing::{debug, info};

use crate::state::{ComponentBuild, ComponentState, ModuleState};

use super::batches::continue_batch_build;
use super::context::{Context, HandlerError};
use super::events::{BuildChange, Event};

/// Components an event for `change` applies to.
///
/// Reused components share their task id with the build they alias, so
/// without an explicit module only components that were really built match.
pub(crate) fn components_for(ctx: &Context, change: &BuildChange) -> Result<Vec<ComponentBuild>, HandlerError> {
  Ok(
    ctx
      .store
      .components_by_task(change.task_id)?
      .into_iter()
      .filter(|c| match change.module_id {
        Some(id) => c.module_id == id,
        None => c.reused_component_id.is_none(),
      })
      .collect(),
  )
}

pub(crate) fn handle_build_change(ctx: &Context, change: &BuildChange) -> Result<Vec<Event>, HandlerError> {
  let components = components_for(ctx, change)?;
  if components.is_empty() {
    debug!(task_id = change.task_id, "no component build for task");
    return Ok(Vec::new());
  }

  let mut events = Vec::new();
  for mut component in components {
    if component.state.is_terminal() {
      debug!(
        task_id = change.task_id,
        package = %component.package,
        state = %component.state,
        "component already finished, ignoring"
      );
      continue;
    }
    if change.new_state == component.state || change.new_state == ComponentState::NotStarted {
      continue;
    }

    let mut module = ctx.store.module(component.module_id)?;
    if module.state != ModuleState::Build {
      debug!(
        module = module.id,
        state = %module.state,
        package = %component.package,
        "module is not building, ignoring component change"
      );
      continue;
    }

    component.state = change.new_state;
    if component.nvr.is_none() {
      component.nvr = Some(change.nvr());
    }
    if let Some(reason) = &change.reason {
      component.state_reason = Some(reason.clone());
    }
    ctx.store.update_component(&component)?;
    info!(
      module = module.id,
      package = %component.package,
      task_id = change.task_id,
      state = %component.state,
      "component build changed state"
    );

    if component.state.is_terminal() {
      events.extend(continue_batch_build(ctx, &mut module)?);
    }
  }
  Ok(events)
}
