//! Durable store for module and component build records.
//!
//! The engine only talks to the [`BuildStore`] trait. Records are keyed by
//! surrogate ids; a component points at its module by id and never embeds it.

pub mod memory;
pub mod retrying;

use std::io;

use thiserror::Error;

use crate::state::{ComponentBuild, ComponentId, ComponentState, ModuleBuild, ModuleId, ModuleState, TaskId};

pub use memory::MemoryStore;
pub use retrying::RetryingStore;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{kind} {id} not found")]
  NotFound { kind: &'static str, id: u64 },

  /// A record with the same identity already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// An update was made against a stale or inconsistent record.
  #[error("conflict: {0}")]
  Conflict(String),

  /// A writer panicked while holding the store lock.
  #[error("store lock poisoned")]
  Poisoned,

  /// The store could not be reached; worth retrying.
  #[error("store unavailable: {0}")]
  Unavailable(String),

  #[error("failed to read store file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write store file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse store file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize store: {0}")]
  Serialize(#[source] serde_json::Error),
}

impl StoreError {
  /// Whether the call is worth repeating; see [`RetryingStore`].
  pub fn is_transient(&self) -> bool {
    matches!(self, StoreError::Unavailable(_))
  }
}

/// Query over module builds. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFilter {
  pub name: Option<String>,
  pub stream: Option<String>,
  pub states: Vec<ModuleState>,
}

impl ModuleFilter {
  pub fn in_state(state: ModuleState) -> Self {
    Self {
      states: vec![state],
      ..Self::default()
    }
  }

  pub fn name_stream(name: &str, stream: &str) -> Self {
    Self {
      name: Some(name.to_string()),
      stream: Some(stream.to_string()),
      ..Self::default()
    }
  }

  pub fn with_state(mut self, state: ModuleState) -> Self {
    self.states.push(state);
    self
  }

  pub fn matches(&self, module: &ModuleBuild) -> bool {
    self.name.as_ref().is_none_or(|n| *n == module.name)
      && self.stream.as_ref().is_none_or(|s| *s == module.stream)
      && (self.states.is_empty() || self.states.contains(&module.state))
  }
}

pub trait BuildStore: Send + Sync {
  /// Insert a module build and return its id.
  ///
  /// # Errors
  ///
  /// `AlreadyExists` if a build with the same name, stream, version and
  /// context exists and has not failed.
  fn insert_module(&self, module: ModuleBuild) -> Result<ModuleId, StoreError>;

  fn module(&self, id: ModuleId) -> Result<ModuleBuild, StoreError>;

  fn update_module(&self, module: &ModuleBuild) -> Result<(), StoreError>;

  /// Matching modules, newest first.
  fn modules(&self, filter: &ModuleFilter) -> Result<Vec<ModuleBuild>, StoreError>;

  /// The module whose final or buildroot tag is `tag`.
  fn module_by_tag(&self, tag: &str) -> Result<Option<ModuleBuild>, StoreError>;

  /// Insert a component build and return its id.
  ///
  /// # Errors
  ///
  /// `AlreadyExists` if the module already has a component with that package name.
  fn insert_component(&self, component: ComponentBuild) -> Result<ComponentId, StoreError>;

  fn component(&self, id: ComponentId) -> Result<ComponentBuild, StoreError>;

  fn update_component(&self, component: &ComponentBuild) -> Result<(), StoreError>;

  /// Components of a module ordered by planned batch, then package name.
  fn components(&self, module_id: ModuleId) -> Result<Vec<ComponentBuild>, StoreError>;

  fn components_by_task(&self, task_id: TaskId) -> Result<Vec<ComponentBuild>, StoreError>;

  fn components_in_state(&self, state: ComponentState) -> Result<Vec<ComponentBuild>, StoreError>;

  /// Number of component builds currently running on a backend, across all modules.
  fn in_flight_count(&self) -> Result<usize, StoreError> {
    Ok(
      self
        .components_in_state(ComponentState::Building)?
        .iter()
        .filter(|c| c.is_in_flight())
        .count(),
    )
  }
}
