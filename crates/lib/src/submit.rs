//! Module submission.
//!
//! A submitted definition is validated, planned and expanded into one
//! module build per distinct buildrequire stream pinning. Each build starts
//! in `init` with its components recorded but not yet released.

use chrono::{Datelike, Timelike, Utc};
use thiserror::Error;
use tracing::info;

use crate::consts::FIRST_COMPONENT_BATCH;
use crate::metadata::{MetadataError, gather_catalog};
use crate::module::{ModuleDefinition, PlanError, plan_batches};
use crate::resolve::{ResolveError, expand_streams};
use crate::scheduler::Context;
use crate::state::{ComponentBuild, ModuleBuild, ModuleState, RebuildStrategy};
use crate::store::{ModuleFilter, StoreError};
use crate::util::hash::{HashError, ModuleContexts};

#[derive(Debug, Error)]
pub enum SubmitError {
  #[error("invalid module definition: {0}")]
  Invalid(String),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Metadata(#[from] MetadataError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to compute module context: {0}")]
  Context(#[from] HashError),
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
  pub owner: String,
  /// Falls back to the configured default strategy.
  pub rebuild_strategy: Option<RebuildStrategy>,
}

impl SubmitOptions {
  pub fn new(owner: &str) -> Self {
    Self {
      owner: owner.to_string(),
      rebuild_strategy: None,
    }
  }

  pub fn with_rebuild_strategy(mut self, strategy: RebuildStrategy) -> Self {
    self.rebuild_strategy = Some(strategy);
    self
  }
}

fn validate(definition: &ModuleDefinition) -> Result<(), SubmitError> {
  for (field, value) in [("name", &definition.name), ("stream", &definition.stream)] {
    if value.is_empty() {
      return Err(SubmitError::Invalid(format!("module {} is empty", field)));
    }
    if value.contains(':') {
      return Err(SubmitError::Invalid(format!("module {} '{}' contains ':'", field, value)));
    }
  }
  if definition.components.is_empty() {
    return Err(SubmitError::Invalid("module defines no components".to_string()));
  }
  if let Some(component) = definition.components.iter().find(|c| c.git_ref.is_empty()) {
    return Err(SubmitError::Invalid(format!("component '{}' has no ref", component.name)));
  }
  Ok(())
}

/// `YYYYMMDDhhmmss` of the current time.
fn timestamp_version() -> u64 {
  let now = Utc::now();
  let date = u64::from(now.year().unsigned_abs()) * 10_000 + u64::from(now.month()) * 100 + u64::from(now.day());
  let time = u64::from(now.hour()) * 10_000 + u64::from(now.minute()) * 100 + u64::from(now.second());
  date * 1_000_000 + time
}

/// Create the module builds for `definition`.
///
/// # Errors
///
/// Nothing is stored when validation, planning or resolution fails, or when
/// any expansion already exists as a live build.
pub fn submit_module(
  ctx: &Context,
  definition: &ModuleDefinition,
  options: &SubmitOptions,
) -> Result<Vec<ModuleBuild>, SubmitError> {
  validate(definition)?;
  let plan = plan_batches(&definition.components)?;
  let catalog = gather_catalog(ctx.resolver.as_ref(), definition)?;
  let expansions = expand_streams(definition, &catalog)?;

  let version = match definition.version {
    0 => timestamp_version(),
    v => v,
  };
  let strategy = options.rebuild_strategy.unwrap_or(ctx.config.reuse.default_strategy);

  let mut pending = Vec::with_capacity(expansions.len());
  for expansion in &expansions {
    let contexts = ModuleContexts::compute(
      &expansion.streams,
      &definition.requires,
      &ctx.config.reuse.base_module_names,
    )?;

    let mut module = ModuleBuild::new(
      &definition.name,
      &definition.stream,
      version,
      &contexts.context,
      &options.owner,
    );
    module.rebuild_strategy = strategy;
    module.scm_ref = definition.scm_ref.clone();
    module.rpm_macros = definition.rpm_macros.clone();
    module.buildrequires = expansion.streams.clone();
    module.requires = definition.requires.clone();
    module.build_context = Some(contexts.build_context);
    module.build_context_no_bms = Some(contexts.build_context_no_bms);
    module.runtime_context = Some(contexts.runtime_context);
    pending.push(module);
  }
  reject_existing(ctx, &pending)?;

  let mut modules = Vec::with_capacity(pending.len());
  for mut module in pending {
    module.id = ctx.store.insert_module(module.clone())?;

    for def in &definition.components {
      let planned = plan.get(&def.name).copied().unwrap_or(FIRST_COMPONENT_BATCH);
      let mut component = ComponentBuild::new(module.id, &def.name, Some(&def.git_ref), planned);
      component.repository = def.repository.clone();
      component.arches = def.arches.clone();
      ctx.store.insert_component(component)?;
    }

    info!(
      module = module.id,
      nsvc = %module.nsvc(),
      strategy = %strategy,
      components = definition.components.len(),
      "module build submitted"
    );
    modules.push(module);
  }
  Ok(modules)
}

/// Fail before the first insert if any expansion is already being built or
/// was built.
fn reject_existing(ctx: &Context, pending: &[ModuleBuild]) -> Result<(), SubmitError> {
  let Some(first) = pending.first() else {
    return Ok(());
  };
  let existing = ctx.store.modules(&ModuleFilter::name_stream(&first.name, &first.stream))?;
  for module in pending {
    let taken = existing.iter().any(|m| {
      m.version == module.version
        && m.context == module.context
        && !matches!(m.state, ModuleState::Failed | ModuleState::Garbage)
    });
    if taken {
      return Err(StoreError::AlreadyExists(format!("module build {}", module.nsvc())).into());
    }
  }
  Ok(())
}
