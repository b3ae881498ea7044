//! Module metadata lookups.
//!
//! The resolver needs a catalog of module versions and the wait handler needs
//! the backend tag of every pinned dependency. Both come from a
//! [`ModuleResolver`], selected by name: `db` reads ready builds from the
//! store, `catalog` reads a static JSON catalog.

mod catalog;
mod db;

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::module::{ModuleDefinition, Nsvc};
use crate::store::{BuildStore, StoreError};

pub use catalog::CatalogResolver;
pub use db::DbResolver;

#[derive(Debug, Error)]
pub enum MetadataError {
  #[error("unknown metadata resolver '{0}'")]
  UnknownResolver(String),

  /// Metadata required to build the module is missing or inconsistent.
  #[error("unprocessable: {0}")]
  Unprocessable(String),

  #[error("failed to read catalog {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse catalog {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// A known module version together with where its artifacts live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
  #[serde(flatten)]
  pub definition: ModuleDefinition,
  /// Backend tag holding the module's artifacts.
  #[serde(default)]
  pub koji_tag: Option<String>,
}

impl ModuleMetadata {
  pub fn new(definition: ModuleDefinition) -> Self {
    Self {
      definition,
      koji_tag: None,
    }
  }

  pub fn nsvc(&self) -> Nsvc {
    self.definition.nsvc()
  }

  /// The module's tag, falling back to the conventional name.
  pub fn tag(&self) -> String {
    self.koji_tag.clone().unwrap_or_else(|| {
      let d = &self.definition;
      format!("module-{}-{}-{}-{}", d.name, d.stream, d.version, d.context)
    })
  }
}

pub trait ModuleResolver: Send + Sync {
  /// Every known version of `name`, any stream.
  fn modules_named(&self, name: &str) -> Result<Vec<ModuleMetadata>, MetadataError>;

  /// Look up one module version. Unset version or context picks the latest.
  fn get_module(
    &self,
    name: &str,
    stream: &str,
    version: Option<u64>,
    context: Option<&str>,
  ) -> Result<Option<ModuleMetadata>, MetadataError> {
    let mut matching: Vec<ModuleMetadata> = self
      .modules_named(name)?
      .into_iter()
      .filter(|m| m.definition.stream == stream)
      .filter(|m| version.is_none_or(|v| m.definition.version == v))
      .filter(|m| context.is_none_or(|c| m.definition.context == c))
      .collect();
    matching.sort_by(|a, b| {
      b.definition
        .version
        .cmp(&a.definition.version)
        .then_with(|| a.definition.context.cmp(&b.definition.context))
    });
    Ok(matching.into_iter().next())
  }

  /// Every context of the latest version of `name:stream`.
  fn latest(&self, name: &str, stream: &str) -> Result<Vec<ModuleMetadata>, MetadataError> {
    let in_stream: Vec<ModuleMetadata> = self
      .modules_named(name)?
      .into_iter()
      .filter(|m| m.definition.stream == stream)
      .collect();
    let Some(newest) = in_stream.iter().map(|m| m.definition.version).max() else {
      return Ok(Vec::new());
    };
    Ok(in_stream.into_iter().filter(|m| m.definition.version == newest).collect())
  }
}

/// Construct the resolver configured under `name`.
pub fn create_resolver(
  name: &str,
  store: Arc<dyn BuildStore>,
  catalog_path: Option<&std::path::Path>,
) -> Result<Arc<dyn ModuleResolver>, MetadataError> {
  match name {
    "db" => Ok(Arc::new(DbResolver::new(store))),
    "catalog" => {
      let path = catalog_path
        .ok_or_else(|| MetadataError::Unprocessable("the catalog resolver needs a catalog path".to_string()))?;
      Ok(Arc::new(CatalogResolver::load(path)?))
    }
    other => Err(MetadataError::UnknownResolver(other.to_string())),
  }
}

/// Collect every version of every module `target` depends on, transitively.
///
/// Names with no known version are logged and left out; the solver reports
/// them as unknown modules.
pub fn gather_catalog(
  resolver: &dyn ModuleResolver,
  target: &ModuleDefinition,
) -> Result<Vec<ModuleDefinition>, MetadataError> {
  let mut seen: BTreeSet<String> = BTreeSet::new();
  let mut queue: VecDeque<String> = target
    .buildrequires
    .keys()
    .chain(target.requires.keys())
    .cloned()
    .collect();
  let mut catalog: Vec<ModuleDefinition> = Vec::new();
  let mut missing: Vec<String> = Vec::new();

  while let Some(name) = queue.pop_front() {
    if !seen.insert(name.clone()) {
      continue;
    }
    let versions = resolver.modules_named(&name)?;
    if versions.is_empty() {
      missing.push(name);
      continue;
    }
    for metadata in versions {
      queue.extend(metadata.definition.requires.keys().cloned());
      catalog.push(metadata.definition);
    }
  }

  if !missing.is_empty() {
    warn!(module = %target.nsvc(), missing = ?missing, "no versions known for required modules");
  }
  debug!(
    module = %target.nsvc(),
    names = seen.len(),
    versions = catalog.len(),
    "gathered module catalog"
  );
  Ok(catalog)
}

#[cfg(test)]
mod tests {
  use tracing_test::traced_test;

  use super::*;

  fn catalog() -> CatalogResolver {
    CatalogResolver::new(vec![
      ModuleMetadata::new(ModuleDefinition::new("platform", "f28", 3, "00000000")),
      ModuleMetadata::new(ModuleDefinition::new("platform", "f28", 5, "00000000")),
      ModuleMetadata::new(ModuleDefinition::new("platform", "f29", 1, "00000000")),
      ModuleMetadata::new(ModuleDefinition::new("base", "1", 1, "aaa").with_requires("platform", &["f28"])),
      ModuleMetadata::new(ModuleDefinition::new("base", "1", 1, "bbb").with_requires("platform", &["f29"])),
      ModuleMetadata::new(ModuleDefinition::new("unrelated", "1", 1, "c")),
    ])
  }

  #[test]
  fn get_module_without_version_picks_latest() {
    let found = catalog().get_module("platform", "f28", None, None).unwrap().unwrap();
    assert_eq!(found.definition.version, 5);
  }

  #[test]
  fn get_module_with_full_identity() {
    let resolver = catalog();
    let found = resolver.get_module("base", "1", Some(1), Some("bbb")).unwrap().unwrap();
    assert_eq!(found.definition.requires["platform"], vec!["f29".to_string()]);
    assert!(resolver.get_module("base", "1", Some(2), None).unwrap().is_none());
  }

  #[test]
  fn latest_returns_every_context() {
    let latest = catalog().latest("base", "1").unwrap();
    assert_eq!(latest.len(), 2);
  }

  #[test]
  fn gather_walks_requires_transitively() {
    let target = ModuleDefinition::new("app", "master", 1, "").with_buildrequires("base", &["1"]);
    let gathered = gather_catalog(&catalog(), &target).unwrap();

    let names: BTreeSet<&str> = gathered.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, BTreeSet::from(["base", "platform"]));
    assert_eq!(gathered.len(), 5);
  }

  #[test]
  #[traced_test]
  fn gather_reports_modules_without_versions() {
    let resolver = CatalogResolver::new(vec![ModuleMetadata::new(
      ModuleDefinition::new("gtk", "1", 1, "c").with_requires("ghost", &["1"]),
    )]);
    let target = ModuleDefinition::new("app", "master", 1, "").with_buildrequires("gtk", &["1"]);

    let gathered = gather_catalog(&resolver, &target).unwrap();
    assert_eq!(gathered.len(), 1);
    assert!(logs_contain("no versions known for required modules"));
    assert!(logs_contain("ghost"));
  }

  #[test]
  fn default_tag_is_derived_from_identity() {
    let metadata = ModuleMetadata::new(ModuleDefinition::new("platform", "f28", 3, "00000000"));
    assert_eq!(metadata.tag(), "module-platform-f28-3-00000000");
  }

  #[test]
  fn unknown_resolver_name() {
    let store: Arc<dyn BuildStore> = Arc::new(crate::store::MemoryStore::new());
    assert!(matches!(
      create_resolver("pdc", store, None),
      Err(MetadataError::UnknownResolver(_))
    ));
  }
}
