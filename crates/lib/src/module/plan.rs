//! Build plan computation.
//!
//! Components are grouped into batches: either by their `buildorder` hint
//! (one batch per distinct value, ascending) or, when any component declares
//! `buildafter`, by dependency level in a DAG. Batch numbering starts at
//! [`FIRST_COMPONENT_BATCH`]; batch 1 belongs to the bootstrap component.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::consts::{BOOTSTRAP_COMPONENT, FIRST_COMPONENT_BATCH};

use super::types::ComponentDef;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
  #[error("component '{0}' is declared more than once")]
  DuplicateComponent(String),

  #[error("component name '{0}' is reserved for the bootstrap component")]
  ReservedName(String),

  #[error("component '{component}' builds after unknown component '{dependency}'")]
  UnknownBuildafter { component: String, dependency: String },

  #[error("component '{0}' mixes buildorder and buildafter")]
  MixedOrdering(String),

  #[error("buildafter dependency cycle detected")]
  CycleDetected,
}

/// Component name → planned batch number.
pub type BatchPlan = BTreeMap<String, u32>;

/// Assign every component a planned batch.
pub fn plan_batches(components: &[ComponentDef]) -> Result<BatchPlan, PlanError> {
  let mut seen = BTreeSet::new();
  for component in components {
    if component.name == BOOTSTRAP_COMPONENT {
      return Err(PlanError::ReservedName(component.name.clone()));
    }
    if !seen.insert(component.name.as_str()) {
      return Err(PlanError::DuplicateComponent(component.name.clone()));
    }
  }

  if components.iter().any(|c| !c.buildafter.is_empty()) {
    if let Some(mixed) = components.iter().find(|c| c.buildorder != 0) {
      return Err(PlanError::MixedOrdering(mixed.name.clone()));
    }
    plan_by_buildafter(components)
  } else {
    Ok(plan_by_buildorder(components))
  }
}

fn plan_by_buildorder(components: &[ComponentDef]) -> BatchPlan {
  let orders: BTreeSet<u32> = components.iter().map(|c| c.buildorder).collect();
  let batch_of: HashMap<u32, u32> = orders
    .into_iter()
    .zip(FIRST_COMPONENT_BATCH..)
    .collect();

  components
    .iter()
    .map(|c| (c.name.clone(), batch_of[&c.buildorder]))
    .collect()
}

fn plan_by_buildafter(components: &[ComponentDef]) -> Result<BatchPlan, PlanError> {
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

  for component in components {
    nodes.insert(component.name.as_str(), graph.add_node(component.name.as_str()));
  }

  for component in components {
    let dependent = nodes[component.name.as_str()];
    for dep in &component.buildafter {
      let Some(&dep_idx) = nodes.get(dep.as_str()) else {
        return Err(PlanError::UnknownBuildafter {
          component: component.name.clone(),
          dependency: dep.clone(),
        });
      };
      // Edge from dependency to dependent
      graph.add_edge(dep_idx, dependent, ());
    }
  }

  let sorted = toposort(&graph, None).map_err(|_| PlanError::CycleDetected)?;

  // Level of a node is one past the deepest of its dependencies
  let mut level: HashMap<NodeIndex, u32> = HashMap::new();
  for idx in sorted {
    let depth = graph
      .neighbors_directed(idx, Direction::Incoming)
      .filter_map(|dep| level.get(&dep).map(|l| l + 1))
      .max()
      .unwrap_or(0);
    level.insert(idx, depth);
  }

  Ok(
    nodes
      .into_iter()
      .map(|(name, idx)| (name.to_string(), FIRST_COMPONENT_BATCH + level[&idx]))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buildorder_groups_into_consecutive_batches() {
    let components = vec![
      ComponentDef::new("c", "r").with_buildorder(20),
      ComponentDef::new("a", "r"),
      ComponentDef::new("b", "r"),
      ComponentDef::new("d", "r").with_buildorder(7),
    ];
    let plan = plan_batches(&components).unwrap();
    assert_eq!(plan["a"], 2);
    assert_eq!(plan["b"], 2);
    assert_eq!(plan["d"], 3);
    assert_eq!(plan["c"], 4);
  }

  #[test]
  fn buildafter_uses_dependency_levels() {
    //     a
    //    / \
    //   b   c
    //    \ /
    //     d
    let components = vec![
      ComponentDef::new("a", "r"),
      ComponentDef::new("b", "r").with_buildafter(&["a"]),
      ComponentDef::new("c", "r").with_buildafter(&["a"]),
      ComponentDef::new("d", "r").with_buildafter(&["b", "c"]),
    ];
    let plan = plan_batches(&components).unwrap();
    assert_eq!(plan["a"], 2);
    assert_eq!(plan["b"], 3);
    assert_eq!(plan["c"], 3);
    assert_eq!(plan["d"], 4);
  }

  #[test]
  fn buildafter_cycle_is_rejected() {
    let components = vec![
      ComponentDef::new("a", "r").with_buildafter(&["b"]),
      ComponentDef::new("b", "r").with_buildafter(&["a"]),
    ];
    assert_eq!(plan_batches(&components), Err(PlanError::CycleDetected));
  }

  #[test]
  fn unknown_buildafter_is_rejected() {
    let components = vec![ComponentDef::new("a", "r").with_buildafter(&["ghost"])];
    assert!(matches!(
      plan_batches(&components),
      Err(PlanError::UnknownBuildafter { .. })
    ));
  }

  #[test]
  fn mixing_orderings_is_rejected() {
    let components = vec![
      ComponentDef::new("a", "r").with_buildorder(1),
      ComponentDef::new("b", "r").with_buildafter(&["a"]),
    ];
    assert_eq!(plan_batches(&components), Err(PlanError::MixedOrdering("a".to_string())));
  }

  #[test]
  fn bootstrap_name_is_reserved() {
    let components = vec![ComponentDef::new(BOOTSTRAP_COMPONENT, "r")];
    assert!(matches!(plan_batches(&components), Err(PlanError::ReservedName(_))));
  }
}
