//! Batch release, admission control and the end-of-batch sequence.
//!
//! A batch ends when every component released into it is terminal. Its
//! successful artifacts are then tagged into the buildroot (and, except for
//! the bootstrap component, into the module's final tag). Once every tag is
//! confirmed the buildroot repository is regenerated, and once that is
//! confirmed the next batch is released.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::builder::Builder;
use crate::consts::BOOTSTRAP_COMPONENT;
use crate::reuse::alias_component;
use crate::state::{ComponentBuild, ComponentState, ModuleBuild, ModuleState};

use super::context::{Context, HandlerError};
use super::events::{BuildChange, Event};
use super::modules::{fail_module, transition};

/// Completion event for a component aliased to an earlier build.
pub(crate) fn completion_event(component: &ComponentBuild) -> Event {
  let nvr = component.nvr.as_deref().unwrap_or(&component.package);
  Event::BuildChange(
    BuildChange::from_nvr(component.task_id.unwrap_or_default(), nvr, ComponentState::Complete)
      .for_module(component.module_id)
      .with_reason("Reused component from previous module build"),
  )
}

/// Release every unreleased component planned up to the module's current
/// batch, reusing what can be reused and submitting the rest.
pub(crate) fn release_batch(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  let builder = ctx.builder(module)?;
  let previous = ctx.reuse().get_reusable_module(module)?;
  let mut events = Vec::new();

  let unreleased: Vec<ComponentBuild> = ctx
    .store
    .components(module.id)?
    .into_iter()
    .filter(|c| c.batch.is_none() && c.planned_batch <= module.batch)
    .collect();

  for mut component in unreleased {
    component.batch = Some(module.batch);

    let reusable = match &previous {
      Some(previous) => ctx
        .reuse()
        .get_reusable_component(module, previous, &component.package)?,
      None => None,
    };
    if let Some(old) = reusable {
      alias_component(&mut component, &old, module.batch);
      info!(
        module = module.id,
        package = %component.package,
        reused_component = old.id,
        "reusing component"
      );
      events.push(completion_event(&component));
    }
    ctx.store.update_component(&component)?;
  }

  events.extend(submit_waiting(ctx, builder.as_ref(), module)?);
  Ok(events)
}

/// Submit the current batch's waiting components, within the global budget
/// of in-flight builds. Components over budget stay waiting.
pub(crate) fn submit_waiting(
  ctx: &Context,
  builder: &dyn Builder,
  module: &mut ModuleBuild,
) -> Result<Vec<Event>, HandlerError> {
  let mut events = Vec::new();
  let mut settled = false;

  {
    let _admission = ctx.admission();
    let limit = ctx.config.scheduler.num_concurrent_builds;
    let mut budget = limit.saturating_sub(ctx.store.in_flight_count()?);

    let waiting: Vec<ComponentBuild> = ctx
      .store
      .components(module.id)?
      .into_iter()
      .filter(|c| c.is_waiting() && c.batch == Some(module.batch))
      .collect();

    for (index, mut component) in waiting.iter().cloned().enumerate() {
      if budget == 0 {
        info!(
          module = module.id,
          deferred = waiting.len() - index,
          limit,
          "concurrency limit reached, deferring component builds"
        );
        break;
      }

      match ctx.with_retry(|| builder.build(module, &component)) {
        Ok(submission) => {
          component.task_id = submission.task_id;
          component.nvr = submission.nvr.or(component.nvr);
          component.state_reason = submission.reason;
          match (submission.state, component.task_id) {
            (ComponentState::Building, _) => {
              component.state = ComponentState::Building;
              budget -= 1;
            }
            (ComponentState::Complete, Some(task_id)) => {
              component.state = ComponentState::Building;
              let nvr = component.nvr.clone().unwrap_or_else(|| component.package.clone());
              events.push(Event::BuildChange(
                BuildChange::from_nvr(task_id, &nvr, ComponentState::Complete).for_module(module.id),
              ));
            }
            (ComponentState::Complete, None) => {
              component.state = ComponentState::Complete;
              settled = true;
            }
            (state, _) => {
              component.state = if state == ComponentState::Canceled {
                ComponentState::Canceled
              } else {
                ComponentState::Failed
              };
              settled = true;
            }
          }
          info!(
            module = module.id,
            package = %component.package,
            task_id = component.task_id,
            state = %component.state,
            "submitted component build"
          );
        }
        Err(e) => {
          warn!(module = module.id, package = %component.package, error = %e, "component submission failed");
          component.state = ComponentState::Failed;
          component.state_reason = Some(format!("Failed to submit build: {}", e));
          settled = true;
        }
      }
      ctx.store.update_component(&component)?;
    }
  }

  if settled {
    events.extend(continue_batch_build(ctx, module)?);
  }
  Ok(events)
}

/// Decide what happens after a component of the current batch changed state.
pub(crate) fn continue_batch_build(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  if module.state != ModuleState::Build {
    return Ok(Vec::new());
  }

  let components = ctx.store.components(module.id)?;

  if components
    .iter()
    .any(|c| c.is_bootstrap() && matches!(c.state, ComponentState::Failed | ComponentState::Canceled))
  {
    return fail_module(ctx, module, &format!("Failed to build {}", BOOTSTRAP_COMPONENT));
  }

  let current: Vec<&ComponentBuild> = components.iter().filter(|c| c.batch == Some(module.batch)).collect();
  if current.iter().any(|c| c.is_waiting()) {
    let builder = ctx.builder(module)?;
    return submit_waiting(ctx, builder.as_ref(), module);
  }
  if current.iter().any(|c| !c.state.is_terminal()) {
    debug!(module = module.id, batch = module.batch, "batch still building");
    return Ok(Vec::new());
  }
  if !current.is_empty() && !current.iter().any(|c| c.state.is_success()) {
    return fail_module(ctx, module, &format!("All components in batch {} failed", module.batch));
  }

  tag_completed(ctx, module, &components)
}

/// Tag every successful, untagged artifact; regenerate the buildroot when
/// nothing is left to tag.
fn tag_completed(ctx: &Context, module: &mut ModuleBuild, components: &[ComponentBuild]) -> Result<Vec<Event>, HandlerError> {
  if module.koji_tag.is_none() {
    return Err(HandlerError::Unprocessable("module has no backend tag".to_string()));
  }
  let builder = ctx.builder(module)?;

  let successful = || components.iter().filter(|c| c.state.is_success());
  let nvrs = |items: Vec<&ComponentBuild>| -> Vec<String> { items.iter().filter_map(|c| c.nvr.clone()).collect() };

  // The bootstrap build is installed into the buildroot, not just tagged.
  let install = nvrs(successful().filter(|c| c.is_bootstrap() && !c.tagged).collect());
  let to_buildroot = nvrs(successful().filter(|c| !c.is_bootstrap() && !c.tagged).collect());
  let to_final = nvrs(successful().filter(|c| !c.is_bootstrap() && !c.tagged_in_final).collect());

  if install.is_empty() && to_buildroot.is_empty() && to_final.is_empty() {
    request_regen(ctx, builder.as_ref(), module)?;
    return Ok(Vec::new());
  }

  if !install.is_empty() {
    ctx.with_retry(|| builder.add_artifacts(module, &install, true))?;
  }
  if !to_buildroot.is_empty() {
    ctx.with_retry(|| builder.tag_artifacts(module, &to_buildroot, false))?;
  }
  if !to_final.is_empty() {
    ctx.with_retry(|| builder.tag_artifacts(module, &to_final, true))?;
  }
  info!(
    module = module.id,
    batch = module.batch,
    buildroot = install.len() + to_buildroot.len(),
    final_tag = to_final.len(),
    "tagging batch artifacts"
  );
  Ok(Vec::new())
}

/// Ask the backend to regenerate the buildroot repository, once.
pub(crate) fn request_regen(ctx: &Context, builder: &dyn Builder, module: &mut ModuleBuild) -> Result<(), HandlerError> {
  if module.new_repo_requested_at.is_some() {
    debug!(module = module.id, "buildroot regeneration already requested");
    return Ok(());
  }
  let buildroot = module
    .buildroot_tag()
    .ok_or_else(|| HandlerError::Unprocessable("module has no backend tag".to_string()))?;

  ctx.with_retry(|| builder.regen_repo(&buildroot))?;
  module.new_repo_requested_at = Some(Utc::now());
  ctx.store.update_module(module)?;
  info!(module = module.id, tag = %buildroot, "requested buildroot regeneration");
  Ok(())
}

/// Leave the current batch: release the next one, or finish the module.
pub(crate) fn advance(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  let components = ctx.store.components(module.id)?;

  if let Some(next) = components
    .iter()
    .filter(|c| c.batch.is_none())
    .map(|c| c.planned_batch)
    .min()
  {
    module.batch = (module.batch + 1).max(next);
    ctx.store.update_module(module)?;
    info!(module = module.id, batch = module.batch, "starting batch");
    return release_batch(ctx, module);
  }

  if components
    .iter()
    .any(|c| matches!(c.state, ComponentState::Failed | ComponentState::Canceled))
  {
    return fail_module(ctx, module, "Some components failed to build");
  }

  Ok(vec![transition(ctx, module, ModuleState::Done, None)?])
}
