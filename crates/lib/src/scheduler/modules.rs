//! Module state handlers and administrative module actions.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::consts::{BOOTSTRAP_BATCH, BOOTSTRAP_COMPONENT};
use crate::metadata::gather_catalog;
use crate::module::ModuleDefinition;
use crate::resolve::{ResolveError, ResolvedCombination, Resolver};
use crate::state::{ComponentBuild, ComponentState, ModuleBuild, ModuleId, ModuleState, TransitionError};
use crate::store::StoreError;

use super::batches;
use super::context::{Context, HandlerError};
use super::events::Event;

/// Reason recorded when a module's build requirements cannot be resolved.
pub const UNSATISFIABLE_REASON: &str = "unsatisfiable build requirements";

/// Move `module` to `next`, persist it and return the matching state event.
pub(crate) fn transition(
  ctx: &Context,
  module: &mut ModuleBuild,
  next: ModuleState,
  reason: Option<&str>,
) -> Result<Event, HandlerError> {
  let previous = module.transition(next, reason.map(str::to_string))?;
  ctx.store.update_module(module)?;
  info!(
    module = module.id,
    nsvc = %module.nsvc(),
    from = %previous,
    to = %next,
    reason,
    "module state changed"
  );
  Ok(Event::module_state(module.id, next))
}

/// Fail `module` unless it already reached a terminal state.
pub(crate) fn fail_module(ctx: &Context, module: &mut ModuleBuild, reason: &str) -> Result<Vec<Event>, HandlerError> {
  if module.state.is_terminal() {
    debug!(module = module.id, state = %module.state, "module already finished, not failing it");
    return Ok(Vec::new());
  }
  Ok(vec![transition(ctx, module, ModuleState::Failed, Some(reason))?])
}

pub(crate) fn handle_state_change(ctx: &Context, module_id: ModuleId, state: ModuleState) -> Result<Vec<Event>, HandlerError> {
  let mut module = ctx.store.module(module_id)?;
  if module.state != state {
    debug!(
      module = module_id,
      event_state = %state,
      current = %module.state,
      "ignoring stale module state event"
    );
    return Ok(Vec::new());
  }

  match state {
    ModuleState::Init => init(ctx, &mut module),
    ModuleState::Wait => wait(ctx, &mut module),
    ModuleState::Done => done(ctx, &mut module),
    ModuleState::Failed => failed(ctx, &mut module),
    ModuleState::Build | ModuleState::Ready | ModuleState::Garbage => Ok(Vec::new()),
  }
}

/// The definition a module build was expanded to: one stream per buildrequire.
fn pinned_definition(module: &ModuleBuild) -> ModuleDefinition {
  let mut definition = ModuleDefinition::new(&module.name, &module.stream, module.version, &module.context);
  definition.requires = module.requires.clone();
  definition.buildrequires = module
    .buildrequires
    .iter()
    .map(|(name, stream)| (name.clone(), vec![stream.clone()]))
    .collect();
  definition
}

fn init(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  let definition = pinned_definition(module);
  let catalog = gather_catalog(ctx.resolver.as_ref(), &definition)?;

  let resolved = Resolver::new(&definition, &catalog).and_then(|resolver| {
    let baseline = resolver.solve(&BTreeSet::new())?;
    Ok::<ResolvedCombination, ResolveError>(resolver.combination(&baseline))
  });

  match resolved {
    Ok(combination) => {
      debug!(module = module.id, pinned = %combination, "pinned build requirements");
      module.resolved_buildrequires = combination.0;
      Ok(vec![transition(ctx, module, ModuleState::Wait, None)?])
    }
    Err(e) => {
      warn!(module = module.id, error = %e, "cannot resolve build requirements");
      fail_module(ctx, module, &format!("{}: {}", UNSATISFIABLE_REASON, e))
    }
  }
}

/// Backend tags of every pinned dependency.
fn dependency_tags(ctx: &Context, module: &ModuleBuild) -> Result<Vec<String>, HandlerError> {
  module
    .resolved_buildrequires
    .values()
    .map(|nsvc| {
      ctx
        .resolver
        .get_module(&nsvc.name, &nsvc.stream, Some(nsvc.version), Some(&nsvc.context))?
        .map(|metadata| metadata.tag())
        .ok_or_else(|| HandlerError::Unprocessable(format!("no metadata for dependency {}", nsvc)))
    })
    .collect()
}

/// Create the bootstrap component in batch 1 unless it already exists.
fn ensure_bootstrap(ctx: &Context, module: &ModuleBuild) -> Result<(), HandlerError> {
  let mut bootstrap = ComponentBuild::new(module.id, BOOTSTRAP_COMPONENT, None, BOOTSTRAP_BATCH);
  bootstrap.batch = Some(BOOTSTRAP_BATCH);
  match ctx.store.insert_component(bootstrap) {
    Ok(_) | Err(StoreError::AlreadyExists(_)) => Ok(()),
    Err(e) => Err(e.into()),
  }
}

fn wait(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  let builder = ctx.builder(module)?;

  let tag = ctx.with_retry(|| builder.connect_buildroot(module))?;
  module.koji_tag = Some(tag);
  let buildroot = module
    .buildroot_tag()
    .ok_or_else(|| HandlerError::Unprocessable("module has no backend tag".to_string()))?;

  let dependencies = dependency_tags(ctx, module)?;
  ctx.with_retry(|| builder.add_repos(&buildroot, &dependencies))?;
  ctx.store.update_module(module)?;
  info!(
    module = module.id,
    tag = %buildroot,
    dependencies = dependencies.len(),
    "buildroot prepared"
  );

  if let Some(reused) = ctx.reuse().attempt_to_reuse_all_components(module)? {
    let mut events = vec![transition(ctx, module, ModuleState::Build, None)?];
    events.extend(reused.iter().map(batches::completion_event));
    return Ok(events);
  }

  ensure_bootstrap(ctx, module)?;
  module.batch = module.batch.max(BOOTSTRAP_BATCH);
  let mut events = vec![transition(ctx, module, ModuleState::Build, None)?];
  events.extend(batches::submit_waiting(ctx, builder.as_ref(), module)?);
  Ok(events)
}

fn done(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  if let Err(e) = ctx.publisher.publish(module) {
    warn!(module = module.id, error = %e, "publication failed");
    return fail_module(ctx, module, &e.to_string());
  }

  if ctx.config.gating.enabled {
    info!(
      module = module.id,
      subject = %module.nsvc().nvr_string(),
      "waiting for gating decision"
    );
    return Ok(Vec::new());
  }

  Ok(vec![transition(ctx, module, ModuleState::Ready, None)?])
}

/// Stop whatever is still running for a failed module.
fn failed(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  let builder = ctx.builder(module)?;
  let reason = module
    .state_reason
    .clone()
    .unwrap_or_else(|| "module build failed".to_string());

  for mut component in ctx.store.components(module.id)? {
    if component.state.is_terminal() {
      continue;
    }
    if let (true, Some(task_id)) = (component.is_in_flight(), component.task_id)
      && let Err(e) = ctx.with_retry(|| builder.cancel(task_id))
    {
      warn!(module = module.id, task_id, error = %e, "failed to cancel component build");
    }
    component.state = ComponentState::Canceled;
    component.state_reason = Some(reason.clone());
    ctx.store.update_component(&component)?;
  }

  if module.new_repo_requested_at.take().is_some() {
    ctx.store.update_module(module)?;
  }
  Ok(Vec::new())
}

/// Cancel a module build on behalf of `actor`.
///
/// Every component that has not finished is failed, in-flight backend tasks
/// are canceled and the module fails with a reason naming the actor.
/// Finished components are left alone.
pub fn cancel_module(ctx: &Context, module: &mut ModuleBuild, actor: &str) -> Result<Vec<Event>, HandlerError> {
  if module.state.is_terminal() {
    return Err(
      TransitionError {
        module: module.id,
        from: module.state,
        to: ModuleState::Failed,
      }
      .into(),
    );
  }

  let reason = format!("Canceled by {}", actor);
  let builder = ctx.builder(module)?;

  for mut component in ctx.store.components(module.id)? {
    if component.state.is_terminal() {
      continue;
    }
    if let (true, Some(task_id)) = (component.is_in_flight(), component.task_id)
      && let Err(e) = ctx.with_retry(|| builder.cancel(task_id))
    {
      warn!(module = module.id, task_id, error = %e, "failed to cancel component build");
    }
    component.state = ComponentState::Failed;
    component.state_reason = Some(reason.clone());
    ctx.store.update_component(&component)?;
  }

  info!(module = module.id, actor, "module build canceled");
  Ok(vec![transition(ctx, module, ModuleState::Failed, Some(&reason))?])
}

/// Retire a `failed` or `ready` module build, removing its backend target.
pub fn retire_module(ctx: &Context, module: &mut ModuleBuild) -> Result<Vec<Event>, HandlerError> {
  if !module.state.can_transition_to(ModuleState::Garbage) {
    return Err(
      TransitionError {
        module: module.id,
        from: module.state,
        to: ModuleState::Garbage,
      }
      .into(),
    );
  }

  if let Some(tag) = module.koji_tag.clone().filter(|_| !module.target_retired) {
    let builder = ctx.builder(module)?;
    ctx.with_retry(|| builder.retire_target(&tag))?;
    module.target_retired = true;
  }
  Ok(vec![transition(ctx, module, ModuleState::Garbage, None)?])
}
