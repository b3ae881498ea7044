use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::Nsvc;

/// Errors produced while resolving module dependencies.
///
/// Both variants are fatal for the module being resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
  /// A constraint names a module the catalog has never heard of.
  #[error("module '{name}' is not known (required by {required_by})")]
  UnknownModule { name: String, required_by: String },

  /// No assignment of module versions satisfies every constraint.
  #[error("unsatisfiable requirements for {target}: {reason}")]
  Unsatisfiable { target: String, reason: String },
}

/// One self-consistent choice of exactly one module version per name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResolvedCombination(pub BTreeMap<String, Nsvc>);

impl ResolvedCombination {
  pub fn get(&self, name: &str) -> Option<&Nsvc> {
    self.0.get(name)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Name → stream projection.
  pub fn streams(&self) -> BTreeMap<String, String> {
    self
      .0
      .iter()
      .map(|(name, nsvc)| (name.clone(), nsvc.stream.clone()))
      .collect()
  }

  /// Keep only the given module names.
  pub fn restrict<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Self {
    Self(
      names
        .into_iter()
        .filter_map(|name| self.0.get(name).map(|nsvc| (name.clone(), nsvc.clone())))
        .collect(),
    )
  }
}

impl std::fmt::Display for ResolvedCombination {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let parts: Vec<String> = self.0.values().map(|nsvc| nsvc.to_string()).collect();
    write!(f, "{{{}}}", parts.join(", "))
  }
}
