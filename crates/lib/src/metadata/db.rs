use std::sync::Arc;

use crate::module::ModuleDefinition;
use crate::state::{ModuleBuild, ModuleState};
use crate::store::{BuildStore, ModuleFilter};

use super::{MetadataError, ModuleMetadata, ModuleResolver};

/// Resolver backed by the engine's own store: every `ready` module build is
/// a known module version.
pub struct DbResolver {
  store: Arc<dyn BuildStore>,
}

impl DbResolver {
  pub fn new(store: Arc<dyn BuildStore>) -> Self {
    Self { store }
  }
}

fn to_metadata(module: ModuleBuild) -> ModuleMetadata {
  let mut definition = ModuleDefinition::new(&module.name, &module.stream, module.version, &module.context);
  definition.requires = module.requires;
  definition.buildrequires = module
    .buildrequires
    .into_iter()
    .map(|(name, stream)| (name, vec![stream]))
    .collect();
  definition.rpm_macros = module.rpm_macros;
  definition.scm_ref = module.scm_ref;
  ModuleMetadata {
    definition,
    koji_tag: module.koji_tag,
  }
}

impl ModuleResolver for DbResolver {
  fn modules_named(&self, name: &str) -> Result<Vec<ModuleMetadata>, MetadataError> {
    let filter = ModuleFilter {
      name: Some(name.to_string()),
      ..ModuleFilter::in_state(ModuleState::Ready)
    };
    Ok(self.store.modules(&filter)?.into_iter().map(to_metadata).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;

  #[test]
  fn only_ready_builds_are_visible() {
    let store = Arc::new(MemoryStore::new());
    let mut ready = ModuleBuild::new("platform", "f28", 1, "00000000", "alice");
    ready.state = ModuleState::Ready;
    ready.koji_tag = Some("module-platform".to_string());
    store.insert_module(ready).unwrap();
    store
      .insert_module(ModuleBuild::new("platform", "f28", 2, "00000000", "alice"))
      .unwrap();

    let resolver = DbResolver::new(store);
    let found = resolver.modules_named("platform").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].definition.version, 1);
    assert_eq!(found[0].tag(), "module-platform");
  }
}
