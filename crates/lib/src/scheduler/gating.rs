use tracing::{debug, info};

use crate::state::ModuleState;
use crate::store::ModuleFilter;

use super::context::{Context, HandlerError};
use super::events::Event;
use super::modules::transition;

/// A gating decision about `subject_identifier` changed.
///
/// Only consulted when gating is enabled; a satisfied decision for a `done`
/// module moves it to `ready`.
pub(crate) fn handle_decision_update(
  ctx: &Context,
  decision_context: &str,
  policies_satisfied: bool,
  subject_identifier: &str,
) -> Result<Vec<Event>, HandlerError> {
  let gating = &ctx.config.gating;
  if !gating.enabled || decision_context != gating.decision_context {
    debug!(decision_context, "gating decision not relevant");
    return Ok(Vec::new());
  }

  let mut events = Vec::new();
  for candidate in ctx.store.modules(&ModuleFilter::in_state(ModuleState::Done))? {
    if candidate.nsvc().nvr_string() != subject_identifier {
      continue;
    }

    {
      let lock = ctx.module_lock(candidate.id);
      let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
      let mut module = ctx.store.module(candidate.id)?;
      if module.state != ModuleState::Done {
        continue;
      }

      if policies_satisfied {
        events.push(transition(ctx, &mut module, ModuleState::Ready, None)?);
      } else {
        info!(module = module.id, subject = subject_identifier, "gating policies not satisfied");
      }
    }
    ctx.release_module_lock(candidate.id);
  }
  Ok(events)
}
