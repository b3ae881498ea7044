//! Stream expansion.
//!
//! A module may buildrequire several streams of a dependency. Expansion
//! enumerates every valid combination and projects them onto the target's
//! buildrequire names; each distinct projection becomes one module build with
//! exactly one stream pinned per dependency.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::module::ModuleDefinition;

use super::solver::Resolver;
use super::types::{ResolveError, ResolvedCombination};

/// One way of building the target: a single stream per buildrequire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
  /// Buildrequire name → pinned stream.
  pub streams: BTreeMap<String, String>,
  /// Every full combination that agrees with `streams`.
  pub combinations: Vec<ResolvedCombination>,
}

impl Expansion {
  /// The target definition narrowed to this expansion's streams.
  pub fn apply_to(&self, target: &ModuleDefinition) -> ModuleDefinition {
    let mut narrowed = target.clone();
    for (name, stream) in &self.streams {
      narrowed.buildrequires.insert(name.clone(), vec![stream.clone()]);
    }
    narrowed
  }
}

/// Resolve every valid combination for `target`.
pub fn resolve_all(
  target: &ModuleDefinition,
  catalog: &[ModuleDefinition],
) -> Result<BTreeSet<ResolvedCombination>, ResolveError> {
  let resolver = Resolver::new(target, catalog)?;
  let combinations = resolver.solve_all()?;
  debug!(
    module = %target.nsvc(),
    count = combinations.len(),
    "resolved dependency combinations"
  );
  Ok(combinations)
}

/// Expand `target` into one [`Expansion`] per distinct stream pinning.
///
/// # Errors
///
/// Propagates `UnknownModule` and `Unsatisfiable` from the resolver.
pub fn expand_streams(target: &ModuleDefinition, catalog: &[ModuleDefinition]) -> Result<Vec<Expansion>, ResolveError> {
  let combinations = resolve_all(target, catalog)?;
  let names: Vec<&String> = target.buildrequires.keys().collect();

  let mut grouped: BTreeMap<BTreeMap<String, String>, Vec<ResolvedCombination>> = BTreeMap::new();
  for combination in combinations {
    let streams = combination.restrict(names.iter().copied()).streams();
    grouped.entry(streams).or_default().push(combination);
  }

  info!(
    module = %target.nsvc(),
    expansions = grouped.len(),
    "expanded module streams"
  );

  Ok(
    grouped
      .into_iter()
      .map(|(streams, combinations)| Expansion { streams, combinations })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn module(name: &str, stream: &str, context: &str) -> ModuleDefinition {
    ModuleDefinition::new(name, stream, 1, context)
  }

  fn label(combination: &ResolvedCombination) -> BTreeSet<String> {
    combination
      .0
      .values()
      .map(|n| format!("{}:{}", n.name, n.stream))
      .collect()
  }

  fn expected(items: &[&[&str]]) -> BTreeSet<BTreeSet<String>> {
    items
      .iter()
      .map(|set| set.iter().map(|s| s.to_string()).collect())
      .collect()
  }

  /// gtk:1 and gtk:2 each accept font:[a,b] and platform:[f28,f29]; only
  /// font:b exists, once per platform.
  fn gtk_catalog() -> Vec<ModuleDefinition> {
    vec![
      module("platform", "f28", "c0"),
      module("platform", "f29", "c0"),
      module("font", "b", "c28").with_requires("platform", &["f28"]),
      module("font", "b", "c29").with_requires("platform", &["f29"]),
      module("gtk", "1", "c0")
        .with_requires("font", &["a", "b"])
        .with_requires("platform", &["f28", "f29"]),
      module("gtk", "2", "c0")
        .with_requires("font", &["a", "b"])
        .with_requires("platform", &["f28", "f29"]),
    ]
  }

  #[test]
  fn enumerates_every_gtk_platform_combination() {
    let target = ModuleDefinition::new("app", "master", 1, "")
      .with_buildrequires("gtk", &["1", "2"])
      .with_buildrequires("platform", &["f28", "f29"]);

    let combinations = resolve_all(&target, &gtk_catalog()).unwrap();
    let labels: BTreeSet<BTreeSet<String>> = combinations.iter().map(label).collect();

    assert_eq!(combinations.len(), 4);
    assert_eq!(
      labels,
      expected(&[
        &["gtk:1", "platform:f28", "font:b"],
        &["gtk:1", "platform:f29", "font:b"],
        &["gtk:2", "platform:f28", "font:b"],
        &["gtk:2", "platform:f29", "font:b"],
      ])
    );
  }

  #[test]
  fn font_context_follows_platform() {
    let target = ModuleDefinition::new("app", "master", 1, "")
      .with_buildrequires("gtk", &["1", "2"])
      .with_buildrequires("platform", &["f28", "f29"]);

    for combination in resolve_all(&target, &gtk_catalog()).unwrap() {
      let platform = &combination.get("platform").unwrap().stream;
      let font = &combination.get("font").unwrap().context;
      assert_eq!(font, &format!("c{}", &platform[1..]));
    }
  }

  #[test]
  fn per_platform_contexts_branch_through_the_buildrequired_name() {
    // Each gtk stream is built once per platform; only gtk is buildrequired.
    let catalog = vec![
      module("platform", "f28", "c0"),
      module("platform", "f29", "c0"),
      module("gtk", "1", "c28").with_requires("platform", &["f28"]),
      module("gtk", "1", "c29").with_requires("platform", &["f29"]),
      module("gtk", "2", "c28").with_requires("platform", &["f28"]),
      module("gtk", "2", "c29").with_requires("platform", &["f29"]),
    ];
    let target = ModuleDefinition::new("app", "master", 1, "").with_buildrequires("gtk", &["1", "2"]);

    assert_eq!(resolve_all(&target, &catalog).unwrap().len(), 4);
  }

  #[test]
  fn missing_stream_is_unsatisfiable_not_empty() {
    let target = ModuleDefinition::new("app", "master", 1, "").with_buildrequires("gtk", &["3"]);

    let result = resolve_all(&target, &gtk_catalog());
    assert!(matches!(result, Err(ResolveError::Unsatisfiable { .. })));
  }

  #[test]
  fn expansion_groups_by_buildrequired_streams() {
    let target = ModuleDefinition::new("app", "master", 1, "")
      .with_buildrequires("gtk", &["1", "2"])
      .with_buildrequires("platform", &["f28", "f29"]);

    let expansions = expand_streams(&target, &gtk_catalog()).unwrap();
    assert_eq!(expansions.len(), 4);
    for expansion in &expansions {
      assert_eq!(expansion.streams.len(), 2);
      assert_eq!(expansion.combinations.len(), 1);
      let narrowed = expansion.apply_to(&target);
      assert_eq!(narrowed.buildrequires["gtk"].len(), 1);
    }
  }

  #[test]
  fn expansion_collapses_non_buildrequired_choices() {
    // Only gtk is buildrequired: the platform choice is not a separate build.
    let target = ModuleDefinition::new("app", "master", 1, "").with_buildrequires("gtk", &["1", "2"]);

    let expansions = expand_streams(&target, &gtk_catalog()).unwrap();
    let streams: Vec<&String> = expansions.iter().map(|e| &e.streams["gtk"]).collect();
    assert_eq!(streams, vec!["1", "2"]);
  }
}
