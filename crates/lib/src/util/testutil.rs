//! Test fixtures for modbuild-lib.
//!
//! A [`Harness`] wires an in-memory store, a catalog resolver and a shared
//! mock backend into a dispatcher, and pumps the backend's published events
//! back into it the way the message bus would.

use std::sync::Arc;

use crate::builder::{BuilderRegistry, MockBackend};
use crate::config::Config;
use crate::metadata::{CatalogResolver, ModuleMetadata};
use crate::module::{ComponentDef, ModuleDefinition};
use crate::scheduler::{Context, Dispatcher};
use crate::store::MemoryStore;

/// A ready platform module at `stream`, tagged `platform-<stream>`.
pub fn platform(stream: &str) -> ModuleMetadata {
  ModuleMetadata {
    koji_tag: Some(format!("platform-{}", stream)),
    ..ModuleMetadata::new(ModuleDefinition::new("platform", stream, 1, "00000000"))
  }
}

/// A module with components `A` and `B` in one batch, built against `platform:f29`.
pub fn simple_definition() -> ModuleDefinition {
  ModuleDefinition::new("testmodule", "master", 0, "")
    .with_buildrequires("platform", &["f29"])
    .with_requires("platform", &["f29"])
    .with_component(ComponentDef::new("A", "aaa111"))
    .with_component(ComponentDef::new("B", "bbb222"))
}

pub struct Harness {
  pub dispatcher: Arc<Dispatcher>,
  pub backend: MockBackend,
}

impl Harness {
  pub fn new(catalog: Vec<ModuleMetadata>, config: Config, backend: MockBackend) -> Self {
    let mut builders = BuilderRegistry::new();
    builders.register_shared("mock", Arc::new(backend.clone()));
    let ctx = Context::new(
      config,
      Arc::new(MemoryStore::new()),
      builders,
      Arc::new(CatalogResolver::new(catalog)),
    );
    Self {
      dispatcher: Arc::new(Dispatcher::new(Arc::new(ctx))),
      backend,
    }
  }

  /// Auto-completing backend, default config, `platform:f29` in the catalog.
  pub fn auto() -> Self {
    Self::new(vec![platform("f29")], Config::default(), MockBackend::new().with_auto_complete())
  }

  pub fn ctx(&self) -> &Context {
    self.dispatcher.context()
  }

  /// Deliver every published backend event until the backend goes quiet.
  pub fn pump(&self) -> usize {
    let mut handled = 0;
    loop {
      let events = self.backend.take_events();
      if events.is_empty() {
        return handled;
      }
      handled += self.dispatcher.dispatch_all(events);
    }
  }
}
