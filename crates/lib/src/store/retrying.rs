//! Retry wrapper around any [`BuildStore`].
//!
//! Calls failing with [`StoreError::Unavailable`] are repeated under a
//! [`RetryPolicy`]; every other error is returned at once.

use std::sync::Arc;

use crate::state::{ComponentBuild, ComponentId, ComponentState, ModuleBuild, ModuleId, TaskId};
use crate::util::retry::{RetryError, RetryPolicy, retry};

use super::{BuildStore, ModuleFilter, StoreError};

pub struct RetryingStore {
  inner: Arc<dyn BuildStore>,
  policy: RetryPolicy,
}

impl RetryingStore {
  pub fn new(inner: Arc<dyn BuildStore>, policy: RetryPolicy) -> Self {
    Self { inner, policy }
  }

  fn call<T>(&self, op: impl FnMut(&dyn BuildStore) -> Result<T, StoreError>) -> Result<T, StoreError> {
    let mut op = op;
    let inner = self.inner.as_ref();
    retry(&self.policy, || op(inner), StoreError::is_transient).map_err(RetryError::into_inner)
  }
}

impl BuildStore for RetryingStore {
  fn insert_module(&self, module: ModuleBuild) -> Result<ModuleId, StoreError> {
    self.call(|s| s.insert_module(module.clone()))
  }

  fn module(&self, id: ModuleId) -> Result<ModuleBuild, StoreError> {
    self.call(|s| s.module(id))
  }

  fn update_module(&self, module: &ModuleBuild) -> Result<(), StoreError> {
    self.call(|s| s.update_module(module))
  }

  fn modules(&self, filter: &ModuleFilter) -> Result<Vec<ModuleBuild>, StoreError> {
    self.call(|s| s.modules(filter))
  }

  fn module_by_tag(&self, tag: &str) -> Result<Option<ModuleBuild>, StoreError> {
    self.call(|s| s.module_by_tag(tag))
  }

  fn insert_component(&self, component: ComponentBuild) -> Result<ComponentId, StoreError> {
    self.call(|s| s.insert_component(component.clone()))
  }

  fn component(&self, id: ComponentId) -> Result<ComponentBuild, StoreError> {
    self.call(|s| s.component(id))
  }

  fn update_component(&self, component: &ComponentBuild) -> Result<(), StoreError> {
    self.call(|s| s.update_component(component))
  }

  fn components(&self, module_id: ModuleId) -> Result<Vec<ComponentBuild>, StoreError> {
    self.call(|s| s.components(module_id))
  }

  fn components_by_task(&self, task_id: TaskId) -> Result<Vec<ComponentBuild>, StoreError> {
    self.call(|s| s.components_by_task(task_id))
  }

  fn components_in_state(&self, state: ComponentState) -> Result<Vec<ComponentBuild>, StoreError> {
    self.call(|s| s.components_in_state(state))
  }

  fn in_flight_count(&self) -> Result<usize, StoreError> {
    self.call(|s| s.in_flight_count())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  use super::*;
  use crate::state::ModuleState;
  use crate::store::MemoryStore;

  /// Fails the first `failures` module lookups, then delegates.
  struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
    not_found: bool,
  }

  impl FlakyStore {
    fn new(failures: u32) -> Self {
      Self {
        inner: MemoryStore::new(),
        failures: AtomicU32::new(failures),
        not_found: false,
      }
    }

    fn trip(&self) -> Result<(), StoreError> {
      if self.not_found {
        return Err(StoreError::NotFound { kind: "module", id: 0 });
      }
      let left = self.failures.load(Ordering::SeqCst);
      if left > 0 {
        self.failures.store(left - 1, Ordering::SeqCst);
        return Err(StoreError::Unavailable("connection reset".to_string()));
      }
      Ok(())
    }
  }

  impl BuildStore for FlakyStore {
    fn insert_module(&self, module: ModuleBuild) -> Result<ModuleId, StoreError> {
      self.inner.insert_module(module)
    }
    fn module(&self, id: ModuleId) -> Result<ModuleBuild, StoreError> {
      self.trip()?;
      self.inner.module(id)
    }
    fn update_module(&self, module: &ModuleBuild) -> Result<(), StoreError> {
      self.inner.update_module(module)
    }
    fn modules(&self, filter: &ModuleFilter) -> Result<Vec<ModuleBuild>, StoreError> {
      self.inner.modules(filter)
    }
    fn module_by_tag(&self, tag: &str) -> Result<Option<ModuleBuild>, StoreError> {
      self.inner.module_by_tag(tag)
    }
    fn insert_component(&self, component: ComponentBuild) -> Result<ComponentId, StoreError> {
      self.inner.insert_component(component)
    }
    fn component(&self, id: ComponentId) -> Result<ComponentBuild, StoreError> {
      self.inner.component(id)
    }
    fn update_component(&self, component: &ComponentBuild) -> Result<(), StoreError> {
      self.inner.update_component(component)
    }
    fn components(&self, module_id: ModuleId) -> Result<Vec<ComponentBuild>, StoreError> {
      self.inner.components(module_id)
    }
    fn components_by_task(&self, task_id: TaskId) -> Result<Vec<ComponentBuild>, StoreError> {
      self.inner.components_by_task(task_id)
    }
    fn components_in_state(&self, state: ComponentState) -> Result<Vec<ComponentBuild>, StoreError> {
      self.inner.components_in_state(state)
    }
  }

  fn quick() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(500), Duration::from_millis(1))
  }

  fn insert(store: &FlakyStore) -> ModuleId {
    store
      .inner
      .insert_module(ModuleBuild::new("testmodule", "master", 1, "c1", "alice"))
      .unwrap()
  }

  #[test]
  fn transient_failures_are_retried() {
    let flaky = Arc::new(FlakyStore::new(2));
    let id = insert(&flaky);
    let store = RetryingStore::new(flaky.clone(), quick());

    let module = store.module(id).unwrap();
    assert_eq!(module.state, ModuleState::Init);
    assert_eq!(flaky.failures.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn single_attempt_policy_surfaces_unavailable() {
    let flaky = Arc::new(FlakyStore::new(1));
    let id = insert(&flaky);
    let store = RetryingStore::new(flaky, RetryPolicy::once());

    assert!(matches!(store.module(id), Err(StoreError::Unavailable(_))));
  }

  #[test]
  fn permanent_errors_are_not_retried() {
    let mut flaky = FlakyStore::new(0);
    flaky.not_found = true;
    let store = RetryingStore::new(Arc::new(flaky), quick());

    assert!(matches!(store.module(1), Err(StoreError::NotFound { .. })));
  }
}
