use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::info;

use super::{MetadataError, ModuleMetadata, ModuleResolver};

/// Resolver over a fixed list of modules, usually loaded from a JSON file
/// holding an array of module entries.
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
  by_name: BTreeMap<String, Vec<ModuleMetadata>>,
}

impl CatalogResolver {
  pub fn new(modules: Vec<ModuleMetadata>) -> Self {
    let mut by_name: BTreeMap<String, Vec<ModuleMetadata>> = BTreeMap::new();
    for module in modules {
      by_name.entry(module.definition.name.clone()).or_default().push(module);
    }
    Self { by_name }
  }

  pub fn load(path: &Path) -> Result<Self, MetadataError> {
    let content = fs::read_to_string(path).map_err(|source| MetadataError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let modules: Vec<ModuleMetadata> = serde_json::from_str(&content).map_err(|source| MetadataError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    info!(path = %path.display(), modules = modules.len(), "loaded module catalog");
    Ok(Self::new(modules))
  }

  pub fn len(&self) -> usize {
    self.by_name.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.by_name.is_empty()
  }
}

impl ModuleResolver for CatalogResolver {
  fn modules_named(&self, name: &str) -> Result<Vec<ModuleMetadata>, MetadataError> {
    Ok(self.by_name.get(name).cloned().unwrap_or_default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn loads_json_catalog() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("catalog.json");
    fs::write(
      &path,
      r#"[
        { "name": "platform", "stream": "f28", "version": 3, "context": "00000000", "koji_tag": "module-f28-build" },
        { "name": "perl", "stream": "5.30", "version": 1, "context": "abc", "requires": { "platform": ["f28"] } }
      ]"#,
    )
    .unwrap();

    let resolver = CatalogResolver::load(&path).unwrap();
    assert_eq!(resolver.len(), 2);
    let platform = resolver.get_module("platform", "f28", None, None).unwrap().unwrap();
    assert_eq!(platform.tag(), "module-f28-build");
  }

  #[test]
  fn missing_file_reports_path() {
    let err = CatalogResolver::load(Path::new("/nonexistent/catalog.json")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/catalog.json"));
  }
}
