use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::trace;

use crate::builder::{Builder, BuilderError, BuilderRegistry};
use crate::config::Config;
use crate::metadata::{MetadataError, ModuleResolver};
use crate::publish::{LogPublisher, PublishError, Publisher};
use crate::reuse::{ReuseEngine, StreamCompatibility, VersionedStreams};
use crate::state::{ModuleBuild, ModuleId, TransitionError};
use crate::store::{BuildStore, RetryingStore, StoreError};
use crate::util::retry::{RetryError, retry};

/// Errors raised while handling an event or running a module action.
#[derive(Debug, Error)]
pub enum HandlerError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Builder(#[from] BuilderError),

  #[error(transparent)]
  Metadata(#[from] MetadataError),

  #[error(transparent)]
  Transition(#[from] TransitionError),

  #[error(transparent)]
  Publish(#[from] PublishError),

  /// The module is missing data it needs to make progress.
  #[error("unprocessable: {0}")]
  Unprocessable(String),
}

/// Everything handlers need, constructed once and shared.
pub struct Context {
  pub config: Config,
  pub store: Arc<dyn BuildStore>,
  pub builders: BuilderRegistry,
  pub resolver: Arc<dyn ModuleResolver>,
  pub publisher: Arc<dyn Publisher>,
  pub compatibility: Arc<dyn StreamCompatibility>,
  locks: Mutex<BTreeMap<ModuleId, Arc<Mutex<()>>>>,
  admission: Mutex<()>,
}

impl Context {
  pub fn new(
    config: Config,
    store: Arc<dyn BuildStore>,
    builders: BuilderRegistry,
    resolver: Arc<dyn ModuleResolver>,
  ) -> Self {
    // Store calls share the backend retry policy.
    let store: Arc<dyn BuildStore> = Arc::new(RetryingStore::new(store, config.builder.retry_policy()));
    Self {
      config,
      store,
      builders,
      resolver,
      publisher: Arc::new(LogPublisher),
      compatibility: Arc::new(VersionedStreams),
      locks: Mutex::new(BTreeMap::new()),
      admission: Mutex::new(()),
    }
  }

  pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
    self.publisher = publisher;
    self
  }

  pub fn with_compatibility(mut self, compatibility: Arc<dyn StreamCompatibility>) -> Self {
    self.compatibility = compatibility;
    self
  }

  /// The configured backend for `module`.
  pub fn builder(&self, module: &ModuleBuild) -> Result<Arc<dyn Builder>, BuilderError> {
    self.builders.create(&self.config.builder.backend, module)
  }

  pub fn reuse(&self) -> ReuseEngine<'_> {
    ReuseEngine::new(self.store.as_ref(), &self.config.reuse, self.compatibility.as_ref())
  }

  /// Run a backend call under the configured retry policy.
  pub fn with_retry<T, F>(&self, op: F) -> Result<T, BuilderError>
  where
    F: FnMut() -> Result<T, BuilderError>,
  {
    retry(&self.config.builder.retry_policy(), op, BuilderError::is_transient).map_err(RetryError::into_inner)
  }

  /// Lock serializing every mutation of one module build.
  pub fn module_lock(&self, id: ModuleId) -> Arc<Mutex<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(locks.entry(id).or_default())
  }

  /// Drop the lock entry of a finished module nobody is holding.
  ///
  /// A finished module that later changes again (ready to garbage) simply
  /// gets a fresh entry.
  pub(crate) fn release_module_lock(&self, id: ModuleId) {
    let finished = self.store.module(id).is_ok_and(|m| m.state.is_terminal());
    if !finished {
      return;
    }
    let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
      locks.remove(&id);
      trace!(module = id, "released module lock");
    }
  }

  #[cfg(test)]
  pub(crate) fn tracked_locks(&self) -> usize {
    self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
  }

  /// Held while counting in-flight builds and submitting new ones.
  pub(crate) fn admission(&self) -> MutexGuard<'_, ()> {
    self.admission.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
