use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{BOOTSTRAP_COMPONENT, BUILDROOT_TAG_SUFFIX};
use crate::module::Nsvc;

pub type ModuleId = u64;
pub type ComponentId = u64;
pub type TaskId = u64;

/// Lifecycle of a module build.
///
/// ```text
/// init -> wait -> build -> done -> ready
///   \------\--------\-------\---> failed
/// failed, ready -> garbage
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
  Init,
  Wait,
  Build,
  Done,
  Failed,
  Ready,
  Garbage,
}

impl ModuleState {
  pub const ALL: [ModuleState; 7] = [
    ModuleState::Init,
    ModuleState::Wait,
    ModuleState::Build,
    ModuleState::Done,
    ModuleState::Failed,
    ModuleState::Ready,
    ModuleState::Garbage,
  ];

  pub fn is_terminal(self) -> bool {
    matches!(self, ModuleState::Ready | ModuleState::Failed | ModuleState::Garbage)
  }

  pub fn can_transition_to(self, next: ModuleState) -> bool {
    use ModuleState::*;
    match (self, next) {
      (Init, Wait) | (Wait, Build) | (Build, Done) | (Done, Ready) => true,
      (Failed | Ready, Garbage) => true,
      (from, Failed) => !from.is_terminal(),
      _ => false,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ModuleState::Init => "init",
      ModuleState::Wait => "wait",
      ModuleState::Build => "build",
      ModuleState::Done => "done",
      ModuleState::Failed => "failed",
      ModuleState::Ready => "ready",
      ModuleState::Garbage => "garbage",
    }
  }
}

impl std::fmt::Display for ModuleState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for ModuleState {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ModuleState::ALL
      .into_iter()
      .find(|state| state.as_str() == s)
      .ok_or_else(|| format!("unknown module state '{}'", s))
  }
}

/// Mirrors the backend's view of a component build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
  NotStarted,
  Building,
  Complete,
  Failed,
  Canceled,
}

impl ComponentState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      ComponentState::Complete | ComponentState::Failed | ComponentState::Canceled
    )
  }

  pub fn is_success(self) -> bool {
    self == ComponentState::Complete
  }
}

impl std::fmt::Display for ComponentState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ComponentState::NotStarted => "not-started",
      ComponentState::Building => "building",
      ComponentState::Complete => "complete",
      ComponentState::Failed => "failed",
      ComponentState::Canceled => "canceled",
    };
    f.write_str(s)
  }
}

/// Which components of a rebuild may be taken from an earlier build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebuildStrategy {
  /// Rebuild everything.
  All,
  /// Rebuild only components whose ref changed.
  OnlyChanged,
  /// Rebuild changed components and everything in later batches.
  #[default]
  ChangedAndAfter,
}

impl std::str::FromStr for RebuildStrategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "all" => Ok(RebuildStrategy::All),
      "only-changed" => Ok(RebuildStrategy::OnlyChanged),
      "changed-and-after" => Ok(RebuildStrategy::ChangedAndAfter),
      other => Err(format!("unknown rebuild strategy '{}'", other)),
    }
  }
}

impl std::fmt::Display for RebuildStrategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RebuildStrategy::All => "all",
      RebuildStrategy::OnlyChanged => "only-changed",
      RebuildStrategy::ChangedAndAfter => "changed-and-after",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("module {module} cannot move from {from} to {to}")]
pub struct TransitionError {
  pub module: ModuleId,
  pub from: ModuleState,
  pub to: ModuleState,
}

/// A module build record.
///
/// Components are stored separately and reference the module by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleBuild {
  pub id: ModuleId,
  pub name: String,
  pub stream: String,
  pub version: u64,
  pub context: String,
  pub state: ModuleState,
  pub state_reason: Option<String>,
  /// Current batch; never decreases.
  pub batch: u32,
  pub rebuild_strategy: RebuildStrategy,
  pub owner: String,
  pub scm_ref: Option<String>,
  pub rpm_macros: String,
  /// Buildrequire name → the single stream this build was expanded for.
  pub buildrequires: BTreeMap<String, String>,
  pub requires: BTreeMap<String, Vec<String>>,
  /// Concrete versions pinned by the init handler.
  pub resolved_buildrequires: BTreeMap<String, Nsvc>,
  pub build_context: Option<String>,
  pub build_context_no_bms: Option<String>,
  pub runtime_context: Option<String>,
  pub reused_module_id: Option<ModuleId>,
  /// Backend tag holding the module's final artifacts.
  pub koji_tag: Option<String>,
  /// Set while a buildroot repository regeneration is outstanding.
  pub new_repo_requested_at: Option<DateTime<Utc>>,
  pub target_retired: bool,
  pub time_submitted: DateTime<Utc>,
  pub time_modified: DateTime<Utc>,
  pub time_completed: Option<DateTime<Utc>>,
}

impl ModuleBuild {
  /// A fresh record in `init`. The id is assigned by the store.
  pub fn new(name: &str, stream: &str, version: u64, context: &str, owner: &str) -> Self {
    let now = Utc::now();
    Self {
      id: 0,
      name: name.to_string(),
      stream: stream.to_string(),
      version,
      context: context.to_string(),
      state: ModuleState::Init,
      state_reason: None,
      batch: 0,
      rebuild_strategy: RebuildStrategy::default(),
      owner: owner.to_string(),
      scm_ref: None,
      rpm_macros: String::new(),
      buildrequires: BTreeMap::new(),
      requires: BTreeMap::new(),
      resolved_buildrequires: BTreeMap::new(),
      build_context: None,
      build_context_no_bms: None,
      runtime_context: None,
      reused_module_id: None,
      koji_tag: None,
      new_repo_requested_at: None,
      target_retired: false,
      time_submitted: now,
      time_modified: now,
      time_completed: None,
    }
  }

  pub fn nsvc(&self) -> Nsvc {
    Nsvc::new(&self.name, &self.stream, self.version, &self.context)
  }

  /// Tag components are tagged into between batches.
  pub fn buildroot_tag(&self) -> Option<String> {
    self.koji_tag.as_ref().map(|tag| format!("{}{}", tag, BUILDROOT_TAG_SUFFIX))
  }

  /// Default tag name for this module.
  pub fn default_tag(&self) -> String {
    format!("module-{}-{}-{}-{}", self.name, self.stream, self.version, self.context)
  }

  /// Move to `next`, recording `reason` and timestamps.
  pub fn transition(&mut self, next: ModuleState, reason: Option<String>) -> Result<ModuleState, TransitionError> {
    if !self.state.can_transition_to(next) {
      return Err(TransitionError {
        module: self.id,
        from: self.state,
        to: next,
      });
    }

    let previous = self.state;
    let now = Utc::now();
    self.state = next;
    if reason.is_some() {
      self.state_reason = reason;
    }
    self.time_modified = now;
    if matches!(next, ModuleState::Done | ModuleState::Failed | ModuleState::Ready) && self.time_completed.is_none() {
      self.time_completed = Some(now);
    }
    Ok(previous)
  }
}

/// A single component build within a module build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentBuild {
  pub id: ComponentId,
  pub module_id: ModuleId,
  pub package: String,
  pub repository: Option<String>,
  /// Commit the component is built from.
  pub git_ref: Option<String>,
  /// Batch the build plan assigns.
  pub planned_batch: u32,
  /// Batch the component was released in; `None` until released.
  pub batch: Option<u32>,
  pub arches: Vec<String>,
  pub state: ComponentState,
  pub state_reason: Option<String>,
  pub task_id: Option<TaskId>,
  pub nvr: Option<String>,
  pub reused_component_id: Option<ComponentId>,
  pub tagged: bool,
  pub tagged_in_final: bool,
}

impl ComponentBuild {
  pub fn new(module_id: ModuleId, package: &str, git_ref: Option<&str>, planned_batch: u32) -> Self {
    Self {
      id: 0,
      module_id,
      package: package.to_string(),
      repository: None,
      git_ref: git_ref.map(str::to_string),
      planned_batch,
      batch: None,
      arches: Vec::new(),
      state: ComponentState::NotStarted,
      state_reason: None,
      task_id: None,
      nvr: None,
      reused_component_id: None,
      tagged: false,
      tagged_in_final: false,
    }
  }

  pub fn is_bootstrap(&self) -> bool {
    self.package == BOOTSTRAP_COMPONENT
  }

  /// Released to the backend but not yet finished.
  pub fn is_in_flight(&self) -> bool {
    self.state == ComponentState::Building && self.reused_component_id.is_none()
  }

  /// Released into a batch but not yet handed to the backend.
  pub fn is_waiting(&self) -> bool {
    self.batch.is_some() && self.state == ComponentState::NotStarted
  }

  /// Tagging this component still has to happen before the next batch.
  pub fn needs_tagging(&self) -> bool {
    self.state.is_success() && (!self.tagged || (!self.is_bootstrap() && !self.tagged_in_final))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn legal_transitions() {
    use ModuleState::*;
    assert!(Init.can_transition_to(Wait));
    assert!(Wait.can_transition_to(Build));
    assert!(Build.can_transition_to(Done));
    assert!(Done.can_transition_to(Ready));
    assert!(Failed.can_transition_to(Garbage));
    assert!(Ready.can_transition_to(Garbage));
    for from in [Init, Wait, Build, Done] {
      assert!(from.can_transition_to(Failed), "{} -> failed", from);
    }
  }

  #[test]
  fn illegal_transitions() {
    use ModuleState::*;
    assert!(!Init.can_transition_to(Build));
    assert!(!Build.can_transition_to(Wait));
    assert!(!Ready.can_transition_to(Failed));
    assert!(!Failed.can_transition_to(Failed));
    assert!(!Garbage.can_transition_to(Garbage));
    assert!(!Done.can_transition_to(Garbage));
  }

  #[test]
  fn transition_records_reason_and_completion() {
    let mut module = ModuleBuild::new("testmodule", "master", 1, "c0", "alice");
    module.transition(ModuleState::Failed, Some("boom".to_string())).unwrap();
    assert_eq!(module.state_reason.as_deref(), Some("boom"));
    assert!(module.time_completed.is_some());

    let err = module.transition(ModuleState::Build, None).unwrap_err();
    assert_eq!(err.from, ModuleState::Failed);
  }

  #[test]
  fn state_round_trips_through_strings() {
    for state in ModuleState::ALL {
      assert_eq!(state.as_str().parse::<ModuleState>().unwrap(), state);
    }
    assert_eq!(
      "changed-and-after".parse::<RebuildStrategy>().unwrap(),
      RebuildStrategy::ChangedAndAfter
    );
  }

  #[test]
  fn bootstrap_only_needs_buildroot_tag() {
    let mut macros = ComponentBuild::new(1, BOOTSTRAP_COMPONENT, None, 1);
    macros.state = ComponentState::Complete;
    assert!(macros.needs_tagging());
    macros.tagged = true;
    assert!(!macros.needs_tagging());

    let mut real = ComponentBuild::new(1, "perl", Some("abc"), 2);
    real.state = ComponentState::Complete;
    real.tagged = true;
    assert!(real.needs_tagging());
  }
}
