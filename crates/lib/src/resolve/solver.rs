//! Constraint solver over module versions.
//!
//! Every known module version becomes a node. A node's `requires` turn into
//! clauses: one per dependency name, satisfied by any candidate node of that
//! name whose stream is accepted. Clauses are ANDed; candidates within a
//! clause are ORed. At most one node per module name may be selected.
//!
//! The target module is node 0. Besides its `requires` it carries its
//! `buildrequires`; those names are the only ones worth branching on when
//! enumerating alternatives.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::trace;

use crate::module::{ModuleDefinition, Nsvc, stream_matches};

use super::types::{ResolveError, ResolvedCombination};

pub type NodeId = usize;

const TARGET: NodeId = 0;

#[derive(Debug, Clone)]
struct Clause {
  name: String,
  /// Candidate nodes in solver priority order.
  candidates: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Node {
  nsvc: Nsvc,
  clauses: Vec<Clause>,
}

/// A decision point where more than one node could satisfy a clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
  pub name: String,
  pub chosen: NodeId,
  pub others: Vec<NodeId>,
}

/// Result of a single solver run.
#[derive(Debug, Clone)]
pub struct Solution {
  /// Module name → selected node (the target is not included).
  pub selected: BTreeMap<String, NodeId>,
  pub alternatives: Vec<Alternative>,
}

/// Resolver for one target module against a fixed catalog.
///
/// Holds no mutable state; `solve` and `solve_all` may be called
/// concurrently from several threads.
#[derive(Debug, Clone)]
pub struct Resolver {
  nodes: Vec<Node>,
  branch_names: BTreeSet<String>,
}

/// Highest version first, then stream, then context.
fn priority(a: &Nsvc, b: &Nsvc) -> Ordering {
  b.version
    .cmp(&a.version)
    .then_with(|| b.stream.cmp(&a.stream))
    .then_with(|| a.context.cmp(&b.context))
}

/// Clauses for a catalog entry's runtime requirements.
///
/// A requirement on a module absent from the catalog is reported as unknown
/// rather than left as an empty clause.
fn clauses_of(
  def: &ModuleDefinition,
  candidates_for: &impl Fn(&str, &[String]) -> Option<Vec<NodeId>>,
) -> Result<Vec<Clause>, ResolveError> {
  let mut clauses = Vec::with_capacity(def.requires.len());
  for (name, streams) in &def.requires {
    let Some(candidates) = candidates_for(name, streams) else {
      return Err(ResolveError::UnknownModule {
        name: name.clone(),
        required_by: def.nsvc().to_string(),
      });
    };
    clauses.push(Clause {
      name: name.clone(),
      candidates,
    });
  }
  Ok(clauses)
}

impl Resolver {
  /// Build the constraint graph for `target`.
  ///
  /// # Errors
  ///
  /// `UnknownModule` if the target or any catalog entry requires a module
  /// absent from the catalog, `Unsatisfiable` if one of the target's
  /// constraints matches no stream.
  pub fn new(target: &ModuleDefinition, catalog: &[ModuleDefinition]) -> Result<Self, ResolveError> {
    let mut known: Vec<&ModuleDefinition> = Vec::new();
    let mut seen = BTreeSet::new();
    for def in catalog {
      if seen.insert(def.nsvc()) {
        known.push(def);
      }
    }
    known.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| priority(&a.nsvc(), &b.nsvc())));

    // Node 0 is the target; catalog entries follow.
    let mut by_name: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
    for (idx, def) in known.iter().enumerate() {
      by_name.entry(def.name.as_str()).or_default().push(idx + 1);
    }

    let candidates_for = |name: &str, streams: &[String]| -> Option<Vec<NodeId>> {
      by_name.get(name).map(|ids| {
        ids
          .iter()
          .copied()
          .filter(|&id| stream_matches(streams, &known[id - 1].stream))
          .collect()
      })
    };

    let target_label = target.nsvc().to_string();
    let mut target_clauses = Vec::new();
    for deps in [&target.buildrequires, &target.requires] {
      for (name, streams) in deps {
        let Some(candidates) = candidates_for(name, streams) else {
          return Err(ResolveError::UnknownModule {
            name: name.clone(),
            required_by: target_label,
          });
        };
        if candidates.is_empty() {
          return Err(ResolveError::Unsatisfiable {
            target: target_label,
            reason: format!("no available stream of '{}' matches {:?}", name, streams),
          });
        }
        target_clauses.push(Clause {
          name: name.clone(),
          candidates,
        });
      }
    }

    let mut nodes = Vec::with_capacity(known.len() + 1);
    nodes.push(Node {
      nsvc: target.nsvc(),
      clauses: target_clauses,
    });
    for def in &known {
      nodes.push(Node {
        nsvc: def.nsvc(),
        clauses: clauses_of(def, &candidates_for)?,
      });
    }

    Ok(Self {
      nodes,
      branch_names: target.buildrequires.keys().cloned().collect(),
    })
  }

  pub fn nsvc(&self, id: NodeId) -> Option<&Nsvc> {
    self.nodes.get(id).map(|n| &n.nsvc)
  }

  /// Find the catalog node for a module version.
  pub fn node_id(&self, nsvc: &Nsvc) -> Option<NodeId> {
    self.nodes.iter().skip(1).position(|n| &n.nsvc == nsvc).map(|p| p + 1)
  }

  /// Run the solver once.
  ///
  /// Nodes in `bias` are selected before anything else is decided. A bias
  /// that cannot be extended into a full solution is unsatisfiable.
  pub fn solve(&self, bias: &BTreeSet<NodeId>) -> Result<Solution, ResolveError> {
    let mut selected: BTreeMap<String, NodeId> = BTreeMap::new();
    let mut agenda: VecDeque<(NodeId, usize)> = VecDeque::new();

    for &id in bias {
      let Some(node) = self.nodes.get(id).filter(|_| id != TARGET) else {
        return Err(self.unsatisfiable(format!("bias references unknown node {}", id)));
      };
      if selected.insert(node.nsvc.name.clone(), id).is_some() {
        return Err(self.unsatisfiable(format!("bias selects '{}' twice", node.nsvc.name)));
      }
      agenda.extend((0..node.clauses.len()).map(|ci| (id, ci)));
    }
    for &id in bias {
      if !self.consistent(id, &selected) {
        return Err(self.unsatisfiable(format!("favored {} conflicts with the selection", self.nodes[id].nsvc)));
      }
    }

    // Target clauses go first so that branch decisions are made before any
    // transitive dependency narrows them.
    let target_clauses: Vec<(NodeId, usize)> = (0..self.nodes[TARGET].clauses.len()).map(|ci| (TARGET, ci)).collect();
    for entry in target_clauses.into_iter().rev() {
      agenda.push_front(entry);
    }

    match self.search(&mut selected, agenda) {
      Some(mut alternatives) => {
        alternatives.reverse();
        trace!(selected = selected.len(), alternatives = alternatives.len(), "solved");
        Ok(Solution { selected, alternatives })
      }
      None => Err(self.unsatisfiable("no combination satisfies every constraint".to_string())),
    }
  }

  /// Enumerate every valid combination of the target's dependencies.
  ///
  /// Starts from an unbiased solution and re-solves biased toward every
  /// untried alternative at the target's buildrequire names until no new
  /// combination appears.
  pub fn solve_all(&self) -> Result<BTreeSet<ResolvedCombination>, ResolveError> {
    let baseline = self.solve(&BTreeSet::new())?;

    let mut combinations = BTreeSet::new();
    let mut tried: BTreeSet<BTreeSet<NodeId>> = BTreeSet::new();
    tried.insert(BTreeSet::new());

    let mut queue: VecDeque<(BTreeSet<NodeId>, Solution)> = VecDeque::new();
    queue.push_back((BTreeSet::new(), baseline));

    while let Some((bias, solution)) = queue.pop_front() {
      combinations.insert(self.combination(&solution));

      for alternative in &solution.alternatives {
        for &other in &alternative.others {
          let mut next: BTreeSet<NodeId> = bias
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].nsvc.name != alternative.name)
            .collect();
          next.insert(other);

          if !tried.insert(next.clone()) {
            continue;
          }

          match self.solve(&next) {
            Ok(found) => queue.push_back((next, found)),
            Err(ResolveError::Unsatisfiable { reason, .. }) => {
              trace!(favored = %self.nodes[other].nsvc, reason = %reason, "alternative is a dead end");
            }
            Err(e) => return Err(e),
          }
        }
      }
    }

    Ok(combinations)
  }

  pub fn combination(&self, solution: &Solution) -> ResolvedCombination {
    ResolvedCombination(
      solution
        .selected
        .iter()
        .map(|(name, &id)| (name.clone(), self.nodes[id].nsvc.clone()))
        .collect(),
    )
  }

  fn unsatisfiable(&self, reason: String) -> ResolveError {
    ResolveError::Unsatisfiable {
      target: self.nodes[TARGET].nsvc.to_string(),
      reason,
    }
  }

  /// Whether selecting `id` is compatible with what is already selected.
  fn consistent(&self, id: NodeId, selected: &BTreeMap<String, NodeId>) -> bool {
    self.nodes[id].clauses.iter().all(|clause| {
      !clause.candidates.is_empty()
        && selected
          .get(&clause.name)
          .is_none_or(|chosen| clause.candidates.contains(chosen))
    })
  }

  /// Depth-first search over pending clauses.
  ///
  /// Returns the alternatives met on the successful path, innermost first.
  fn search(
    &self,
    selected: &mut BTreeMap<String, NodeId>,
    mut agenda: VecDeque<(NodeId, usize)>,
  ) -> Option<Vec<Alternative>> {
    while let Some((node, ci)) = agenda.pop_front() {
      let clause = &self.nodes[node].clauses[ci];

      if let Some(chosen) = selected.get(&clause.name) {
        if clause.candidates.contains(chosen) {
          continue;
        }
        return None;
      }

      let options: Vec<NodeId> = clause
        .candidates
        .iter()
        .copied()
        .filter(|&c| self.consistent(c, selected))
        .collect();

      for &option in &options {
        let mut trial = selected.clone();
        trial.insert(clause.name.clone(), option);

        let mut next = agenda.clone();
        next.extend((0..self.nodes[option].clauses.len()).map(|i| (option, i)));

        if let Some(mut alternatives) = self.search(&mut trial, next) {
          if options.len() > 1 && self.branch_names.contains(&clause.name) {
            alternatives.push(Alternative {
              name: clause.name.clone(),
              chosen: option,
              others: options.iter().copied().filter(|&o| o != option).collect(),
            });
          }
          *selected = trial;
          return Some(alternatives);
        }
      }

      return None;
    }

    Some(Vec::new())
  }
}
