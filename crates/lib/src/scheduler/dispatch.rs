//! Event dispatch.
//!
//! Every event goes to exactly one handler. Follow-up events returned by a
//! handler are queued and drained in FIFO order before `dispatch` returns,
//! so handlers never call each other recursively. A failing handler never
//! stops the drain; when the failure can be attributed to a module, that
//! module is failed with the error as its reason.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};

use tracing::{debug, error, trace};

use crate::module::ModuleDefinition;
use crate::state::{ModuleBuild, ModuleId, ModuleState};
use crate::submit::{SubmitError, SubmitOptions, submit_module};

use super::components::{components_for, handle_build_change};
use super::context::{Context, HandlerError};
use super::events::{Event, RawMessage};
use super::gating::handle_decision_update;
use super::modules::{cancel_module, fail_module, handle_state_change, retire_module};
use super::repos::handle_repo_change;
use super::tags::handle_tag_change;

pub struct Dispatcher {
  ctx: Arc<Context>,
}

fn route(ctx: &Context, event: &Event) -> Result<Vec<Event>, HandlerError> {
  match event {
    Event::BuildChange(change) => handle_build_change(ctx, change),
    Event::RepoChange { tag } => handle_repo_change(ctx, tag),
    Event::TagChange {
      tag,
      artifact_name,
      nvr,
    } => handle_tag_change(ctx, tag, artifact_name, nvr),
    Event::ModuleStateChange { module_id, state } => handle_state_change(ctx, *module_id, *state),
    Event::GatingDecisionUpdate {
      decision_context,
      policies_satisfied,
      subject_identifier,
    } => handle_decision_update(ctx, decision_context, *policies_satisfied, subject_identifier),
  }
}

/// The module an event concerns, when one can be determined.
fn attribute(ctx: &Context, event: &Event) -> Option<ModuleId> {
  match event {
    Event::BuildChange(change) => change.module_id.or_else(|| {
      components_for(ctx, change)
        .ok()
        .and_then(|components| components.first().map(|c| c.module_id))
    }),
    Event::RepoChange { tag } | Event::TagChange { tag, .. } => {
      ctx.store.module_by_tag(tag).ok().flatten().map(|m| m.id)
    }
    Event::ModuleStateChange { module_id, .. } => Some(*module_id),
    Event::GatingDecisionUpdate { .. } => None,
  }
}

impl Dispatcher {
  pub fn new(ctx: Arc<Context>) -> Self {
    Self { ctx }
  }

  pub fn context(&self) -> &Arc<Context> {
    &self.ctx
  }

  /// Handle `event` and everything it triggers. Returns the number of
  /// events handled.
  pub fn dispatch(&self, event: Event) -> usize {
    self.drain(VecDeque::from([event]))
  }

  pub fn dispatch_all(&self, events: impl IntoIterator<Item = Event>) -> usize {
    self.drain(events.into_iter().collect())
  }

  /// Route a raw bus message; unknown topics are dropped.
  pub fn dispatch_raw(&self, message: &RawMessage) -> usize {
    match message.parse() {
      Some(event) => self.dispatch(event),
      None => 0,
    }
  }

  /// Submit a module definition and start every resulting module build.
  pub fn submit(&self, definition: &ModuleDefinition, options: &SubmitOptions) -> Result<Vec<ModuleBuild>, SubmitError> {
    let modules = submit_module(&self.ctx, definition, options)?;
    self.dispatch_all(
      modules
        .iter()
        .map(|m| Event::module_state(m.id, ModuleState::Init)),
    );
    Ok(modules)
  }

  pub fn cancel(&self, module_id: ModuleId, actor: &str) -> Result<usize, HandlerError> {
    self.run_action(module_id, |ctx, module| cancel_module(ctx, module, actor))
  }

  pub fn retire(&self, module_id: ModuleId) -> Result<usize, HandlerError> {
    self.run_action(module_id, retire_module)
  }

  /// Run `action` on one module under its lock, then drain the events it
  /// produced.
  ///
  /// An error fails the module (when it is not already finished) and is
  /// returned to the caller.
  pub fn run_action<F>(&self, module_id: ModuleId, action: F) -> Result<usize, HandlerError>
  where
    F: FnOnce(&Context, &mut ModuleBuild) -> Result<Vec<Event>, HandlerError>,
  {
    let outcome = {
      let lock = self.ctx.module_lock(module_id);
      let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
      let mut module = self.ctx.store.module(module_id)?;
      match action(&self.ctx, &mut module) {
        Ok(events) => Ok(events),
        Err(e) => {
          error!(module = module_id, error = %e, "module action failed");
          let follow_up = self.fail_after_error(module_id, &e);
          Err((e, follow_up))
        }
      }
    };

    self.ctx.release_module_lock(module_id);

    match outcome {
      Ok(events) => Ok(self.dispatch_all(events)),
      Err((e, follow_up)) => {
        self.dispatch_all(follow_up);
        Err(e)
      }
    }
  }

  fn fail_after_error(&self, module_id: ModuleId, cause: &HandlerError) -> Vec<Event> {
    let result = self
      .ctx
      .store
      .module(module_id)
      .map_err(HandlerError::from)
      .and_then(|mut module| fail_module(&self.ctx, &mut module, &cause.to_string()));
    match result {
      Ok(events) => events,
      Err(e) => {
        error!(module = module_id, error = %e, "could not record module failure");
        Vec::new()
      }
    }
  }

  fn drain(&self, mut queue: VecDeque<Event>) -> usize {
    let mut handled = 0;
    while let Some(event) = queue.pop_front() {
      handled += 1;
      trace!(kind = event.kind(), ?event, "dispatching event");

      let module = attribute(&self.ctx, &event);
      let lock = module.map(|id| self.ctx.module_lock(id));
      let guard = lock.as_ref().map(|l| l.lock().unwrap_or_else(PoisonError::into_inner));

      match route(&self.ctx, &event) {
        Ok(follow_up) => {
          if !follow_up.is_empty() {
            debug!(kind = event.kind(), queued = follow_up.len(), "queued follow-up events");
          }
          queue.extend(follow_up);
        }
        Err(e) => {
          error!(kind = event.kind(), module, error = %e, "event handler failed");
          if let Some(id) = module {
            queue.extend(self.fail_after_error(id, &e));
          }
        }
      }
      drop(guard);
      drop(lock);
      if let Some(id) = module {
        self.ctx.release_module_lock(id);
      }
    }
    handled
  }
}

#[cfg(test)]
mod tests {
  use tracing_test::traced_test;

  use super::*;
  use crate::scheduler::BuildChange;
  use crate::state::ComponentState;
  use crate::submit::SubmitOptions;
  use crate::util::testutil::{Harness, simple_definition};

  #[test]
  #[traced_test]
  fn unknown_task_is_dropped() {
    let harness = Harness::auto();
    let change = BuildChange::from_nvr(4242, "ghost-1.0-1", ComponentState::Complete);

    assert_eq!(harness.dispatcher.dispatch(Event::BuildChange(change)), 1);
    assert!(logs_contain("no component build for task"));
  }

  #[test]
  fn follow_up_events_are_drained_in_one_call() {
    let harness = Harness::auto();
    let modules = harness
      .dispatcher
      .submit(&simple_definition(), &SubmitOptions::new("alice"))
      .unwrap();
    let module = harness.ctx().store.module(modules[0].id).unwrap();

    // init -> wait -> build all happen before submit returns
    assert_eq!(module.state, ModuleState::Build);
    assert_eq!(module.batch, 1);
  }

  #[test]
  fn finished_modules_release_their_locks() {
    let harness = Harness::auto();
    let modules = harness
      .dispatcher
      .submit(&simple_definition(), &SubmitOptions::new("alice"))
      .unwrap();
    assert_eq!(harness.ctx().tracked_locks(), 1);

    harness.pump();
    let module = harness.ctx().store.module(modules[0].id).unwrap();
    assert_eq!(module.state, ModuleState::Ready);
    assert_eq!(harness.ctx().tracked_locks(), 0);
  }

  #[test]
  fn held_lock_survives_release() {
    let harness = Harness::auto();
    let modules = harness
      .dispatcher
      .submit(&simple_definition(), &SubmitOptions::new("alice"))
      .unwrap();
    let id = modules[0].id;
    harness.dispatcher.cancel(id, "alice").unwrap();
    assert_eq!(harness.ctx().tracked_locks(), 0);

    let held = harness.ctx().module_lock(id);
    harness.ctx().release_module_lock(id);
    assert_eq!(harness.ctx().tracked_locks(), 1);

    drop(held);
    harness.ctx().release_module_lock(id);
    assert_eq!(harness.ctx().tracked_locks(), 0);
  }

  #[test]
  #[traced_test]
  fn failed_action_fails_the_module() {
    let harness = Harness::auto();
    let modules = crate::submit::submit_module(harness.ctx(), &simple_definition(), &SubmitOptions::new("alice")).unwrap();
    let id = modules[0].id;

    let handled = harness.dispatcher.dispatch_all([
      Event::module_state(id, ModuleState::Wait),
      Event::module_state(id, ModuleState::Init),
    ]);

    // The wait event is stale and ignored; init then drives the module on.
    assert_eq!(handled, 4);
    assert_eq!(harness.ctx().store.module(id).unwrap().state, ModuleState::Build);

    let err = harness
      .dispatcher
      .run_action(id, |_, _| Err(HandlerError::Unprocessable("broken metadata".to_string())))
      .unwrap_err();
    assert!(matches!(err, HandlerError::Unprocessable(_)));
    let module = harness.ctx().store.module(id).unwrap();
    assert_eq!(module.state, ModuleState::Failed);
    assert_eq!(module.state_reason.as_deref(), Some("unprocessable: broken metadata"));
    assert!(logs_contain("module action failed"));
  }
}
