//! Wiring of the engine for a single CLI invocation.
//!
//! Every command loads the configuration, opens the build store and builds a
//! dispatcher around an in-process mock backend. Records survive between
//! invocations only when `store.path` is configured.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use modbuild_lib::builder::{BuilderRegistry, MockBackend};
use modbuild_lib::config::Config;
use modbuild_lib::metadata::create_resolver;
use modbuild_lib::module::ModuleDefinition;
use modbuild_lib::scheduler::{Context, Dispatcher, Poller};
use modbuild_lib::store::{BuildStore, MemoryStore, ModuleFilter};
use tracing::debug;

pub struct Engine {
  pub dispatcher: Arc<Dispatcher>,
  pub backend: MockBackend,
}

impl Engine {
  pub fn load(config_path: Option<&Path>) -> Result<Self> {
    let config = Config::load(config_path).context("Failed to load configuration")?;

    let store: Arc<dyn BuildStore> = match &config.store.path {
      Some(path) => Arc::new(
        MemoryStore::open(path).with_context(|| format!("Failed to open build store {}", path.display()))?,
      ),
      None => Arc::new(MemoryStore::new()),
    };

    let resolver = create_resolver(
      &config.resolver.backend,
      Arc::clone(&store),
      config.resolver.catalog_path.as_deref(),
    )
    .context("Failed to create module resolver")?;

    let backend = MockBackend::new()
      .with_auto_complete()
      .with_tasks_after(last_task_id(store.as_ref())?);
    let mut builders = BuilderRegistry::new();
    builders.register_shared("mock", Arc::new(backend.clone()));

    let ctx = Context::new(config, store, builders, resolver);
    Ok(Self {
      dispatcher: Arc::new(Dispatcher::new(Arc::new(ctx))),
      backend,
    })
  }

  pub fn ctx(&self) -> &Context {
    self.dispatcher.context()
  }

  pub fn poller(&self) -> Poller {
    Poller::new(Arc::clone(&self.dispatcher))
  }

  /// Deliver backend events until the backend goes quiet.
  pub fn pump(&self) -> usize {
    let mut handled = 0;
    loop {
      let events = self.backend.take_events();
      if events.is_empty() {
        debug!(handled, "backend is quiet");
        return handled;
      }
      handled += self.dispatcher.dispatch_all(events);
    }
  }
}

/// Highest backend task id recorded in the store.
fn last_task_id(store: &dyn BuildStore) -> Result<u64> {
  let mut last = 0;
  for module in store.modules(&ModuleFilter::default()).context("Failed to list module builds")? {
    let components = store.components(module.id).context("Failed to list component builds")?;
    last = components.iter().filter_map(|c| c.task_id).fold(last, u64::max);
  }
  Ok(last)
}

/// Read a module definition. `.toml` files are parsed as TOML, anything else
/// as JSON.
pub fn load_definition(path: &Path) -> Result<ModuleDefinition> {
  let content =
    std::fs::read_to_string(path).with_context(|| format!("Failed to read module definition {}", path.display()))?;

  let definition = if path.extension().is_some_and(|ext| ext == "toml") {
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?
  } else {
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?
  };
  Ok(definition)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn definition_from_toml() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("testmodule.toml");
    std::fs::write(
      &path,
      r#"
name = "testmodule"
stream = "master"

[buildrequires]
platform = ["f29"]

[[components]]
name = "perl-Tangerine"
ref = "abc123"
"#,
    )
    .unwrap();

    let definition = load_definition(&path).unwrap();
    assert_eq!(definition.name, "testmodule");
    assert_eq!(definition.version, 0);
    assert_eq!(definition.components[0].git_ref, "abc123");
  }

  #[test]
  fn definition_parse_error_names_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.json");
    std::fs::write(&path, "{ \"name\": ").unwrap();

    let err = load_definition(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.json"));
  }
}
