//! Component reuse.
//!
//! A rebuild of a module can take unchanged components from an earlier
//! `ready` build of the same name and stream instead of building them again.
//! Which components qualify depends on the module's rebuild strategy.

mod compat;

use std::cmp::Ordering;

use tracing::{debug, info};

use crate::config::ReuseConfig;
use crate::consts::FIRST_COMPONENT_BATCH;
use crate::state::{ComponentBuild, ComponentState, ModuleBuild, ModuleState, RebuildStrategy};
use crate::store::{BuildStore, ModuleFilter, StoreError};

pub use compat::{StreamCompatibility, VersionedStreams};

const REUSED_REASON: &str = "Reused component from previous module build";

/// Reuse decisions for one store.
pub struct ReuseEngine<'a> {
  store: &'a dyn BuildStore,
  config: &'a ReuseConfig,
  compatibility: &'a dyn StreamCompatibility,
}

impl<'a> ReuseEngine<'a> {
  pub fn new(store: &'a dyn BuildStore, config: &'a ReuseConfig, compatibility: &'a dyn StreamCompatibility) -> Self {
    Self {
      store,
      config,
      compatibility,
    }
  }

  /// The earlier build `module` may reuse components from.
  ///
  /// Picks the newest `ready` build of the same name and stream that has a
  /// source reference and the same build context. With compatible base
  /// modules enabled, falls back to builds whose base module streams are
  /// compatible, preferring the newest such stream. The answer is recorded
  /// on `module` so later calls agree with the first one.
  pub fn get_reusable_module(&self, module: &mut ModuleBuild) -> Result<Option<ModuleBuild>, StoreError> {
    if module.rebuild_strategy == RebuildStrategy::All {
      return Ok(None);
    }

    if let Some(id) = module.reused_module_id {
      let previous = self.store.module(id)?;
      return Ok((previous.state == ModuleState::Ready).then_some(previous));
    }

    let mut candidates: Vec<ModuleBuild> = self
      .store
      .modules(&ModuleFilter::name_stream(&module.name, &module.stream).with_state(ModuleState::Ready))?
      .into_iter()
      .filter(|c| c.id != module.id && c.scm_ref.is_some())
      .filter(|c| {
        module.rebuild_strategy != RebuildStrategy::ChangedAndAfter
          || matches!(c.rebuild_strategy, RebuildStrategy::All | RebuildStrategy::ChangedAndAfter)
      })
      .collect();
    candidates.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| b.id.cmp(&a.id)));

    let exact = candidates
      .iter()
      .find(|c| c.build_context.is_some() && c.build_context == module.build_context);

    let found = match exact {
      Some(found) => Some(found.clone()),
      None if self.config.compatible_base_modules => self.compatible_candidate(module, &candidates),
      None => None,
    };

    match &found {
      Some(previous) => {
        info!(
          module = module.id,
          reused_module = previous.id,
          nsvc = %previous.nsvc(),
          "found module build to reuse components from"
        );
        module.reused_module_id = Some(previous.id);
        self.store.update_module(module)?;
      }
      None => debug!(module = module.id, "no module build to reuse components from"),
    }
    Ok(found)
  }

  fn base_streams<'m>(&self, module: &'m ModuleBuild) -> Vec<(&'m str, &'m str)> {
    module
      .buildrequires
      .iter()
      .filter(|(name, _)| self.config.base_module_names.contains(name))
      .map(|(name, stream)| (name.as_str(), stream.as_str()))
      .collect()
  }

  fn compatible_candidate(&self, module: &ModuleBuild, candidates: &[ModuleBuild]) -> Option<ModuleBuild> {
    module.build_context_no_bms.as_ref()?;
    let wanted = self.base_streams(module);

    let mut compatible: Vec<&ModuleBuild> = candidates
      .iter()
      .filter(|c| c.build_context_no_bms == module.build_context_no_bms)
      .filter(|c| {
        wanted.iter().all(|(name, stream)| {
          c.buildrequires
            .get(*name)
            .is_some_and(|have| self.compatibility.is_compatible(name, stream, have))
        })
      })
      .collect();

    // Newest compatible base stream first, then newest version.
    compatible.sort_by(|a, b| {
      let by_stream = wanted.iter().fold(Ordering::Equal, |acc, (name, _)| {
        acc.then_with(|| {
          let a_stream = a.buildrequires.get(*name).map(String::as_str).unwrap_or_default();
          let b_stream = b.buildrequires.get(*name).map(String::as_str).unwrap_or_default();
          self.compatibility.cmp_streams(name, b_stream, a_stream)
        })
      });
      by_stream
        .then_with(|| b.version.cmp(&a.version))
        .then_with(|| b.id.cmp(&a.id))
    });

    compatible.first().map(|c| (*c).clone())
  }

  /// The component of `previous` that `package` of `module` can reuse.
  pub fn get_reusable_component(
    &self,
    module: &ModuleBuild,
    previous: &ModuleBuild,
    package: &str,
  ) -> Result<Option<ComponentBuild>, StoreError> {
    let new_components = self.store.components(module.id)?;
    let old_components = self.store.components(previous.id)?;
    Ok(reusable_component(module, previous, &new_components, &old_components, package))
  }

  /// Reuse every real component of `module`, or none of them.
  ///
  /// On success the components are aliased to the earlier build, the module's
  /// batch moves to the last planned batch and the aliased components are
  /// returned; a completion event has to be published for each.
  pub fn attempt_to_reuse_all_components(
    &self,
    module: &mut ModuleBuild,
  ) -> Result<Option<Vec<ComponentBuild>>, StoreError> {
    let Some(previous) = self.get_reusable_module(module)? else {
      return Ok(None);
    };

    let new_components = self.store.components(module.id)?;
    let old_components = self.store.components(previous.id)?;
    let real: Vec<&ComponentBuild> = new_components.iter().filter(|c| !c.is_bootstrap()).collect();
    if real.is_empty() {
      return Ok(None);
    }

    let mut pairs: Vec<(ComponentBuild, ComponentBuild)> = Vec::with_capacity(real.len());
    for component in real {
      match reusable_component(module, &previous, &new_components, &old_components, &component.package) {
        Some(old) => pairs.push((component.clone(), old)),
        None => {
          debug!(
            module = module.id,
            package = %component.package,
            "component cannot be reused, building everything"
          );
          return Ok(None);
        }
      }
    }

    let last_batch = pairs.iter().map(|(c, _)| c.planned_batch).max().unwrap_or(module.batch);
    let mut reused = Vec::with_capacity(pairs.len());
    for (mut component, old) in pairs {
      let batch = component.planned_batch;
      alias_component(&mut component, &old, batch);
      self.store.update_component(&component)?;
      reused.push(component);
    }
    module.batch = module.batch.max(last_batch);

    info!(
      module = module.id,
      reused_module = previous.id,
      components = reused.len(),
      "reusing every component"
    );
    Ok(Some(reused))
  }
}

/// Point `component` at the artifacts of `previous` and release it in `batch`.
pub fn alias_component(component: &mut ComponentBuild, previous: &ComponentBuild, batch: u32) {
  component.state = ComponentState::Building;
  component.state_reason = Some(REUSED_REASON.to_string());
  component.task_id = previous.task_id;
  component.nvr = previous.nvr.clone();
  component.reused_component_id = Some(previous.id);
  component.batch = Some(batch);
}

/// (package, ref) pairs planned for `batch`, sorted, bootstrap excluded.
fn batch_contents(components: &[ComponentBuild], batch: u32) -> Vec<(&str, Option<&str>)> {
  let mut pairs: Vec<(&str, Option<&str>)> = components
    .iter()
    .filter(|c| !c.is_bootstrap() && c.planned_batch == batch)
    .map(|c| (c.package.as_str(), c.git_ref.as_deref()))
    .collect();
  pairs.sort();
  pairs
}

fn sorted(arches: &[String]) -> Vec<&String> {
  let mut arches: Vec<&String> = arches.iter().collect();
  arches.sort();
  arches
}

/// Decide whether `package` can be taken from `previous`.
///
/// Pure over the two component lists, so the same store contents always give
/// the same answer.
pub fn reusable_component(
  module: &ModuleBuild,
  previous: &ModuleBuild,
  new_components: &[ComponentBuild],
  old_components: &[ComponentBuild],
  package: &str,
) -> Option<ComponentBuild> {
  if module.rebuild_strategy == RebuildStrategy::All || previous.state != ModuleState::Ready {
    return None;
  }

  let new = new_components.iter().find(|c| c.package == package)?;
  let old = old_components.iter().find(|c| c.package == package)?;

  let (Some(new_ref), Some(old_ref)) = (&new.git_ref, &old.git_ref) else {
    return None;
  };
  if new_ref != old_ref || old.state != ComponentState::Complete || old.task_id.is_none() {
    return None;
  }
  if sorted(&new.arches) != sorted(&old.arches) {
    return None;
  }

  if module.rebuild_strategy == RebuildStrategy::ChangedAndAfter {
    if new.planned_batch != old.planned_batch || module.rpm_macros != previous.rpm_macros {
      return None;
    }
    let poisoned = (FIRST_COMPONENT_BATCH..new.planned_batch)
      .any(|batch| batch_contents(new_components, batch) != batch_contents(old_components, batch));
    if poisoned {
      return None;
    }
  }

  Some(old.clone())
}
