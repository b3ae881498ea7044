//! Shared helpers for orchestration tests.

#![allow(dead_code)]

use std::sync::Arc;

use modbuild_lib::builder::{BuilderRegistry, MockBackend};
use modbuild_lib::config::Config;
use modbuild_lib::consts::BOOTSTRAP_COMPONENT;
use modbuild_lib::metadata::{CatalogResolver, ModuleMetadata};
use modbuild_lib::module::{ComponentDef, ModuleDefinition};
use modbuild_lib::scheduler::{Context, Dispatcher, Poller};
use modbuild_lib::state::{ComponentBuild, ModuleBuild};
use modbuild_lib::store::MemoryStore;
use modbuild_lib::submit::SubmitOptions;

pub fn platform(stream: &str) -> ModuleMetadata {
  ModuleMetadata {
    koji_tag: Some(format!("platform-{}", stream)),
    ..ModuleMetadata::new(ModuleDefinition::new("platform", stream, 1, "00000000"))
  }
}

/// `A` and `B` in one batch against `platform:f29`.
pub fn definition(version: u64) -> ModuleDefinition {
  let mut definition = ModuleDefinition::new("testmodule", "master", version, "")
    .with_buildrequires("platform", &["f29"])
    .with_requires("platform", &["f29"])
    .with_component(ComponentDef::new("A", "aaa111"))
    .with_component(ComponentDef::new("B", "bbb222"));
  definition.scm_ref = Some("https://src.example.com/modules/testmodule#abc123".to_string());
  definition
}

/// A config whose retries never sleep.
pub fn config() -> Config {
  let mut config = Config::default();
  config.builder.retry_timeout_secs = 0;
  config.builder.retry_interval_secs = 0;
  config
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

  /// Backend that finishes builds as soon as they are submitted.
  pub fn auto() -> Self {
    Self::with_config(config(), MockBackend::new().with_auto_complete())
  }

  /// Backend whose builds stay running until the test finishes them.
  pub fn manual() -> Self {
    Self::with_config(config(), MockBackend::new())
  }

  pub fn with_config(config: Config, backend: MockBackend) -> Self {
    Self::new(vec![platform("f28"), platform("f29")], config, backend)
  }

  pub fn ctx(&self) -> &Context {
    self.dispatcher.context()
  }

  pub fn poller(&self) -> Poller {
    Poller::new(Arc::clone(&self.dispatcher))
  }

  pub fn submit(&self, definition: &ModuleDefinition) -> ModuleBuild {
    let mut modules = self
      .dispatcher
      .submit(definition, &SubmitOptions::new("alice"))
      .expect("submission failed");
    assert_eq!(modules.len(), 1, "expected a single stream expansion");
    modules.remove(0)
  }

  /// Deliver published backend events until the backend goes quiet.
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

  /// Finish the running build of `package` successfully and deliver the fallout.
  pub fn complete(&self, package: &str) {
    let task = self.backend.task_for(package).expect("package was never submitted");
    self.backend.complete(task);
    self.pump();
  }

  pub fn complete_bootstrap(&self) {
    self.complete(BOOTSTRAP_COMPONENT);
  }

  pub fn module(&self, id: u64) -> ModuleBuild {
    self.ctx().store.module(id).expect("module is stored")
  }

  pub fn component(&self, module_id: u64, package: &str) -> ComponentBuild {
    self
      .ctx()
      .store
      .components(module_id)
      .expect("components are stored")
      .into_iter()
      .find(|c| c.package == package)
      .expect("component exists")
  }
}
