//! Periodic reconciliation.
//!
//! The poller catches up with everything the message bus may have dropped:
//! finished backend tasks, lost repository notifications, modules stuck in
//! a state and builds deferred by the concurrency limit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::state::{ComponentBuild, ComponentState, ModuleBuild, ModuleState};
use crate::store::ModuleFilter;

use super::batches::{completion_event, continue_batch_build, request_regen, submit_waiting};
use super::context::HandlerError;
use super::dispatch::Dispatcher;
use super::events::{BuildChange, Event};
use super::repos::batch_artifacts;

/// What one polling pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
  pub reconciled: usize,
  pub resumed: usize,
  pub regen_checked: usize,
  pub targets_retired: usize,
  pub redriven: usize,
  pub garbage_collected: usize,
  /// Module count per state after the pass.
  pub states: BTreeMap<String, usize>,
}

#[derive(Clone)]
pub struct Poller {
  dispatcher: Arc<Dispatcher>,
}

fn older_than(time: DateTime<Utc>, secs: u64) -> bool {
  let age = i64::try_from(secs)
    .ok()
    .and_then(TimeDelta::try_seconds)
    .unwrap_or(TimeDelta::MAX);
  Utc::now().signed_duration_since(time) >= age
}

impl Poller {
  pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
    Self { dispatcher }
  }

  /// Run every reconciliation step once. A failing step is logged and the
  /// remaining steps still run.
  pub fn poll(&self) -> PollReport {
    let mut report = PollReport::default();

    match self.reconcile_components() {
      Ok(n) => report.reconciled = n,
      Err(e) => warn!(error = %e, "component reconciliation failed"),
    }
    match self.resume_builds() {
      Ok(n) => report.resumed = n,
      Err(e) => warn!(error = %e, "resuming module builds failed"),
    }
    match self.check_regenerations() {
      Ok(n) => report.regen_checked = n,
      Err(e) => warn!(error = %e, "checking buildroot regenerations failed"),
    }
    match self.retire_targets() {
      Ok(n) => report.targets_retired = n,
      Err(e) => warn!(error = %e, "retiring backend targets failed"),
    }
    match self.redrive_stuck() {
      Ok(n) => report.redriven = n,
      Err(e) => warn!(error = %e, "re-driving stuck modules failed"),
    }
    match self.collect_garbage() {
      Ok(n) => report.garbage_collected = n,
      Err(e) => warn!(error = %e, "garbage collection failed"),
    }

    match self.dispatcher.context().store.modules(&ModuleFilter::default()) {
      Ok(modules) => {
        for module in modules {
          *report.states.entry(module.state.to_string()).or_default() += 1;
        }
      }
      Err(e) => warn!(error = %e, "could not summarize module states"),
    }

    info!(
      reconciled = report.reconciled,
      resumed = report.resumed,
      regen_checked = report.regen_checked,
      targets_retired = report.targets_retired,
      redriven = report.redriven,
      garbage_collected = report.garbage_collected,
      states = ?report.states,
      "poll complete"
    );
    report
  }

  /// Ask the backend about every in-flight build and replay changes the bus
  /// never delivered.
  fn reconcile_components(&self) -> Result<usize, HandlerError> {
    let ctx = self.dispatcher.context();
    let mut events = Vec::new();

    for component in ctx.store.components_in_state(ComponentState::Building)? {
      if component.reused_component_id.is_some() {
        events.push(completion_event(&component));
        continue;
      }
      let Some(task_id) = component.task_id else {
        continue;
      };
      let module = ctx.store.module(component.module_id)?;
      if module.state != ModuleState::Build {
        continue;
      }

      let builder = ctx.builder(&module)?;
      let info = match ctx.with_retry(|| builder.task_info(task_id)) {
        Ok(Some(info)) => info,
        Ok(None) => continue,
        Err(e) => {
          warn!(module = module.id, task_id, error = %e, "could not query backend task");
          continue;
        }
      };
      if info.state == ComponentState::Building {
        continue;
      }

      let nvr = info
        .nvr
        .or_else(|| component.nvr.clone())
        .unwrap_or_else(|| component.package.clone());
      debug!(module = module.id, task_id, state = %info.state, "reconciling component build");
      events.push(Event::BuildChange(
        BuildChange::from_nvr(task_id, &nvr, info.state).for_module(module.id),
      ));
    }

    let found = events.len();
    self.dispatcher.dispatch_all(events);
    Ok(found)
  }

  /// Pick up `build` modules with nothing in flight: submit what the
  /// concurrency limit deferred, or re-evaluate a finished batch.
  fn resume_builds(&self) -> Result<usize, HandlerError> {
    let ctx = self.dispatcher.context();
    let mut resumed = 0;

    for module in ctx.store.modules(&ModuleFilter::in_state(ModuleState::Build))? {
      if module.new_repo_requested_at.is_some() {
        continue;
      }
      let components = ctx.store.components(module.id)?;
      if components.iter().any(ComponentBuild::is_in_flight) {
        continue;
      }
      let waiting = components
        .iter()
        .any(|c| c.is_waiting() && c.batch == Some(module.batch));

      let result = self.dispatcher.run_action(module.id, |ctx, module| {
        if module.state != ModuleState::Build {
          return Ok(Vec::new());
        }
        if waiting {
          let builder = ctx.builder(module)?;
          submit_waiting(ctx, builder.as_ref(), module)
        } else {
          continue_batch_build(ctx, module)
        }
      });
      match result {
        Ok(_) => resumed += 1,
        Err(e) => warn!(module = module.id, error = %e, "could not resume module build"),
      }
    }
    Ok(resumed)
  }

  /// Follow up on regenerations whose notification is overdue.
  fn check_regenerations(&self) -> Result<usize, HandlerError> {
    let ctx = self.dispatcher.context();
    let timeout = ctx.config.poller.regen_timeout_secs;
    let mut checked = 0;

    for module in ctx.store.modules(&ModuleFilter::in_state(ModuleState::Build))? {
      let (Some(requested), Some(tag)) = (module.new_repo_requested_at, module.buildroot_tag()) else {
        continue;
      };
      if !older_than(requested, timeout) {
        continue;
      }
      checked += 1;

      let builder = ctx.builder(&module)?;
      let artifacts = batch_artifacts(ctx, &module)?;
      if ctx.with_retry(|| builder.buildroot_ready(&module, &artifacts))? {
        info!(module = module.id, tag = %tag, "buildroot is ready, replaying repository event");
        self.dispatcher.dispatch(Event::RepoChange { tag });
        continue;
      }

      warn!(module = module.id, tag = %tag, "buildroot regeneration overdue, requesting again");
      let result = self.dispatcher.run_action(module.id, |ctx, module| {
        if module.new_repo_requested_at.is_none() {
          return Ok(Vec::new());
        }
        module.new_repo_requested_at = None;
        let builder = ctx.builder(module)?;
        request_regen(ctx, builder.as_ref(), module)?;
        Ok(Vec::new())
      });
      if let Err(e) = result {
        warn!(module = module.id, error = %e, "could not request regeneration");
      }
    }
    Ok(checked)
  }

  /// Retire backend targets of modules that finished long enough ago.
  fn retire_targets(&self) -> Result<usize, HandlerError> {
    let ctx = self.dispatcher.context();
    let age = ctx.config.poller.target_retire_age_secs;
    let filter = ModuleFilter::in_state(ModuleState::Ready).with_state(ModuleState::Failed);
    let mut retired = 0;

    for module in ctx.store.modules(&filter)? {
      if module.target_retired || module.koji_tag.is_none() {
        continue;
      }
      if !older_than(module.time_completed.unwrap_or(module.time_modified), age) {
        continue;
      }

      let result = self.dispatcher.run_action(module.id, |ctx, module: &mut ModuleBuild| {
        let Some(tag) = module.koji_tag.clone().filter(|_| !module.target_retired) else {
          return Ok(Vec::new());
        };
        let builder = ctx.builder(module)?;
        ctx.with_retry(|| builder.retire_target(&tag))?;
        module.target_retired = true;
        ctx.store.update_module(module)?;
        info!(module = module.id, tag = %tag, "retired backend target");
        Ok(Vec::new())
      });
      match result {
        Ok(_) => retired += 1,
        Err(e) => warn!(module = module.id, error = %e, "could not retire backend target"),
      }
    }
    Ok(retired)
  }

  /// Replay the state event of modules that have sat in `init` or `wait`
  /// for too long.
  fn redrive_stuck(&self) -> Result<usize, HandlerError> {
    let ctx = self.dispatcher.context();
    let timeout = ctx.config.poller.stuck_timeout_secs;
    let filter = ModuleFilter::in_state(ModuleState::Init).with_state(ModuleState::Wait);

    let stuck: Vec<Event> = ctx
      .store
      .modules(&filter)?
      .into_iter()
      .filter(|m| older_than(m.time_modified, timeout))
      .inspect(|m| info!(module = m.id, state = %m.state, "re-driving stuck module"))
      .map(|m| Event::module_state(m.id, m.state))
      .collect();

    let count = stuck.len();
    self.dispatcher.dispatch_all(stuck);
    Ok(count)
  }

  /// Move long-failed modules to `garbage`.
  fn collect_garbage(&self) -> Result<usize, HandlerError> {
    let ctx = self.dispatcher.context();
    let Some(age) = ctx.config.poller.garbage_age_secs else {
      return Ok(0);
    };
    let mut collected = 0;

    for module in ctx.store.modules(&ModuleFilter::in_state(ModuleState::Failed))? {
      if !older_than(module.time_completed.unwrap_or(module.time_modified), age) {
        continue;
      }
      match self.dispatcher.retire(module.id) {
        Ok(_) => collected += 1,
        Err(e) => warn!(module = module.id, error = %e, "could not collect failed module"),
      }
    }
    Ok(collected)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_age_is_always_old() {
    assert!(older_than(Utc::now(), 0));
  }

  #[test]
  fn recent_time_is_not_old() {
    assert!(!older_than(Utc::now(), 3600));
  }

  #[test]
  fn huge_age_never_expires() {
    assert!(!older_than(Utc::now() - TimeDelta::days(365), u64::MAX));
  }
}
