//! Build backend abstraction.
//!
//! A [`Builder`] drives one backend on behalf of a module build: it owns the
//! module's buildroot, submits component builds and tags their artifacts.
//! Backends are looked up by name through a [`BuilderRegistry`].

pub mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{ComponentBuild, ComponentState, ModuleBuild, TaskId};

pub use mock::MockBackend;

#[derive(Debug, Error)]
pub enum BuilderError {
  /// The backend could not be reached or timed out; worth retrying.
  #[error("transient backend error: {0}")]
  Transient(String),

  #[error("backend error: {0}")]
  Fatal(String),

  #[error("unknown build backend '{0}'")]
  UnknownBackend(String),
}

impl BuilderError {
  pub fn is_transient(&self) -> bool {
    matches!(self, BuilderError::Transient(_))
  }
}

/// Outcome of handing a component to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSubmission {
  pub task_id: Option<TaskId>,
  /// Usually `Building`; `Complete` when the backend already has the
  /// artifact, `Failed` when it refused the build.
  pub state: ComponentState,
  pub reason: Option<String>,
  pub nvr: Option<String>,
}

impl BuildSubmission {
  pub fn building(task_id: TaskId) -> Self {
    Self {
      task_id: Some(task_id),
      state: ComponentState::Building,
      reason: None,
      nvr: None,
    }
  }

  pub fn failed(reason: &str) -> Self {
    Self {
      task_id: None,
      state: ComponentState::Failed,
      reason: Some(reason.to_string()),
      nvr: None,
    }
  }
}

/// Backend view of a task, as returned by [`Builder::task_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
  pub task_id: TaskId,
  pub state: ComponentState,
  pub nvr: Option<String>,
}

pub trait Builder: Send + Sync {
  /// Create or reuse the module's tags and build target; returns the final tag.
  fn connect_buildroot(&self, module: &ModuleBuild) -> Result<String, BuilderError>;

  /// Whether the module's buildroot repository already carries `artifacts`.
  fn buildroot_ready(&self, module: &ModuleBuild, artifacts: &[String]) -> Result<bool, BuilderError>;

  /// Make the artifacts of `dependency_tags` available in the buildroot.
  fn add_repos(&self, tag: &str, dependency_tags: &[String]) -> Result<(), BuilderError>;

  /// Tag `nvrs` into the module's buildroot. With `install` they also join
  /// the buildroot's default package group.
  fn add_artifacts(&self, module: &ModuleBuild, nvrs: &[String], install: bool) -> Result<(), BuilderError>;

  fn build(&self, module: &ModuleBuild, component: &ComponentBuild) -> Result<BuildSubmission, BuilderError>;

  fn cancel(&self, task_id: TaskId) -> Result<(), BuilderError>;

  /// Tag `nvrs` into the module's final tag, or its buildroot tag when
  /// `final_tag` is false. The backend reports each tagging separately.
  fn tag_artifacts(&self, module: &ModuleBuild, nvrs: &[String], final_tag: bool) -> Result<(), BuilderError>;

  /// Ask for the buildroot repository of `tag` to be regenerated.
  ///
  /// Backends that regenerate on their own after tagging keep the default.
  fn regen_repo(&self, _tag: &str) -> Result<(), BuilderError> {
    Ok(())
  }

  /// Current state of a task, if the backend can report it.
  fn task_info(&self, _task_id: TaskId) -> Result<Option<TaskInfo>, BuilderError> {
    Ok(None)
  }

  /// Remove the build target for `tag` once nothing builds against it.
  fn retire_target(&self, _tag: &str) -> Result<(), BuilderError> {
    Ok(())
  }
}

pub type BuilderFactory = Arc<dyn Fn(&ModuleBuild) -> Result<Arc<dyn Builder>, BuilderError> + Send + Sync>;

/// Name-keyed table of backend constructors.
#[derive(Clone, Default)]
pub struct BuilderRegistry {
  factories: BTreeMap<String, BuilderFactory>,
}

impl std::fmt::Debug for BuilderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuilderRegistry")
      .field("backends", &self.factories.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl BuilderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(&mut self, name: &str, factory: F)
  where
    F: Fn(&ModuleBuild) -> Result<Arc<dyn Builder>, BuilderError> + Send + Sync + 'static,
  {
    self.factories.insert(name.to_string(), Arc::new(factory));
  }

  /// Register a backend whose single instance serves every module.
  pub fn register_shared(&mut self, name: &str, builder: Arc<dyn Builder>) {
    self.register(name, move |_| Ok(Arc::clone(&builder)));
  }

  pub fn create(&self, backend: &str, module: &ModuleBuild) -> Result<Arc<dyn Builder>, BuilderError> {
    let factory = self
      .factories
      .get(backend)
      .ok_or_else(|| BuilderError::UnknownBackend(backend.to_string()))?;
    factory(module)
  }

  pub fn backends(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }
}
