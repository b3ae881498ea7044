//! In-process build backend.
//!
//! Records every call and emits the events a real backend would publish on
//! the bus into an outbox the caller drains. Clones share state, so a test
//! or the CLI can keep a handle while the registry hands out others.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::scheduler::{BuildChange, Event};
use crate::state::{ComponentBuild, ComponentState, ModuleBuild, TaskId};

use super::{BuildSubmission, Builder, BuilderError, TaskInfo};

const FIRST_TASK_ID: TaskId = 1000;

#[derive(Debug, Clone)]
struct MockTask {
  nvr: String,
  state: ComponentState,
}

#[derive(Debug, Default)]
struct MockState {
  next_task_id: TaskId,
  tasks: BTreeMap<TaskId, MockTask>,
  outbox: VecDeque<Event>,
  auto_complete: bool,
  failing_packages: BTreeSet<String>,
  unready_tags: BTreeSet<String>,
  transient_failures: u32,
  submitted: Vec<String>,
  regen_requests: Vec<String>,
  canceled: Vec<TaskId>,
  tagged: BTreeMap<String, Vec<String>>,
  repos: BTreeMap<String, Vec<String>>,
  artifacts: BTreeMap<String, Vec<String>>,
  retired_targets: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockBackend {
  state: Arc<Mutex<MockState>>,
}

impl MockBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Finish every build as soon as it is submitted.
  pub fn with_auto_complete(self) -> Self {
    self.lock().auto_complete = true;
    self
  }

  /// Number new tasks after `task_id`, so ids already recorded in a
  /// persisted store are never handed out again.
  pub fn with_tasks_after(self, task_id: TaskId) -> Self {
    self.lock().next_task_id = task_id.max(FIRST_TASK_ID - 1) + 1;
    self
  }

  /// Builds of `package` fail instead of completing.
  pub fn fail_package(&self, package: &str) {
    self.lock().failing_packages.insert(package.to_string());
  }

  pub fn set_buildroot_ready(&self, tag: &str, ready: bool) {
    let mut state = self.lock();
    if ready {
      state.unready_tags.remove(tag);
    } else {
      state.unready_tags.insert(tag.to_string());
    }
  }

  /// Make the next `count` builder calls fail with a transient error.
  pub fn fail_transiently(&self, count: u32) {
    self.lock().transient_failures = count;
  }

  /// Drain the events published since the last call.
  pub fn take_events(&self) -> Vec<Event> {
    self.lock().outbox.drain(..).collect()
  }

  /// Finish `task_id` successfully and publish the change.
  pub fn complete(&self, task_id: TaskId) {
    self.finish(task_id, ComponentState::Complete, true);
  }

  pub fn fail(&self, task_id: TaskId) {
    self.finish(task_id, ComponentState::Failed, true);
  }

  /// Change a task's state without publishing anything, as if the message was lost.
  pub fn finish_silently(&self, task_id: TaskId, state: ComponentState) {
    self.finish(task_id, state, false);
  }

  /// Task id of the most recent build of `package`.
  pub fn task_for(&self, package: &str) -> Option<TaskId> {
    let state = self.lock();
    state
      .tasks
      .iter()
      .rev()
      .find(|(_, task)| BuildChange::from_nvr(0, &task.nvr, task.state).name == package)
      .map(|(&id, _)| id)
  }

  pub fn submitted(&self) -> Vec<String> {
    self.lock().submitted.clone()
  }

  pub fn regen_requests(&self) -> Vec<String> {
    self.lock().regen_requests.clone()
  }

  pub fn canceled(&self) -> Vec<TaskId> {
    self.lock().canceled.clone()
  }

  pub fn tagged(&self, tag: &str) -> Vec<String> {
    self.lock().tagged.get(tag).cloned().unwrap_or_default()
  }

  pub fn repos(&self, tag: &str) -> Vec<String> {
    self.lock().repos.get(tag).cloned().unwrap_or_default()
  }

  pub fn artifacts(&self, tag: &str) -> Vec<String> {
    self.lock().artifacts.get(tag).cloned().unwrap_or_default()
  }

  pub fn retired_targets(&self) -> Vec<String> {
    self.lock().retired_targets.clone()
  }

  fn lock(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn check_transient(state: &mut MockState) -> Result<(), BuilderError> {
    if state.transient_failures > 0 {
      state.transient_failures -= 1;
      return Err(BuilderError::Transient("mock backend unavailable".to_string()));
    }
    Ok(())
  }

  /// Record the tagging and publish one tag change per artifact.
  fn tag_into(state: &mut MockState, tag: &str, nvrs: &[String]) {
    for nvr in nvrs {
      state.tagged.entry(tag.to_string()).or_default().push(nvr.clone());
      let artifact_name = BuildChange::from_nvr(0, nvr, ComponentState::Complete).name;
      state.outbox.push_back(Event::TagChange {
        tag: tag.to_string(),
        artifact_name,
        nvr: nvr.clone(),
      });
    }
  }

  fn finish(&self, task_id: TaskId, new_state: ComponentState, publish: bool) {
    let mut state = self.lock();
    let Some(task) = state.tasks.get_mut(&task_id) else {
      return;
    };
    task.state = new_state;
    let nvr = task.nvr.clone();
    if publish {
      state
        .outbox
        .push_back(Event::BuildChange(BuildChange::from_nvr(task_id, &nvr, new_state)));
    }
  }
}

fn buildroot_tag(module: &ModuleBuild) -> Result<String, BuilderError> {
  module
    .buildroot_tag()
    .ok_or_else(|| BuilderError::Fatal(format!("module {} has no buildroot tag", module.id)))
}

impl Builder for MockBackend {
  fn connect_buildroot(&self, module: &ModuleBuild) -> Result<String, BuilderError> {
    let mut state = self.lock();
    Self::check_transient(&mut state)?;
    Ok(module.koji_tag.clone().unwrap_or_else(|| module.default_tag()))
  }

  fn buildroot_ready(&self, module: &ModuleBuild, artifacts: &[String]) -> Result<bool, BuilderError> {
    let tag = buildroot_tag(module)?;
    // Readiness is driven by `set_buildroot_ready`; tasks from another
    // process never reached this mock's tag.
    debug!(tag = %tag, artifacts = artifacts.len(), "mock buildroot readiness checked");
    Ok(!self.lock().unready_tags.contains(&tag))
  }

  fn add_repos(&self, tag: &str, dependency_tags: &[String]) -> Result<(), BuilderError> {
    let mut state = self.lock();
    Self::check_transient(&mut state)?;
    let repos = state.repos.entry(tag.to_string()).or_default();
    for dep in dependency_tags {
      if !repos.contains(dep) {
        repos.push(dep.clone());
      }
    }
    Ok(())
  }

  fn add_artifacts(&self, module: &ModuleBuild, nvrs: &[String], install: bool) -> Result<(), BuilderError> {
    let tag = buildroot_tag(module)?;
    let mut state = self.lock();
    Self::check_transient(&mut state)?;
    if install {
      state.artifacts.entry(tag.clone()).or_default().extend(nvrs.iter().cloned());
    }
    Self::tag_into(&mut state, &tag, nvrs);
    Ok(())
  }

  fn build(&self, module: &ModuleBuild, component: &ComponentBuild) -> Result<BuildSubmission, BuilderError> {
    let mut state = self.lock();
    Self::check_transient(&mut state)?;

    if state.next_task_id == 0 {
      state.next_task_id = FIRST_TASK_ID;
    }
    let task_id = state.next_task_id;
    state.next_task_id += 1;

    let nvr = format!("{}-1.0-1.module+{}+{}", component.package, module.version, module.context);
    state.tasks.insert(
      task_id,
      MockTask {
        nvr: nvr.clone(),
        state: ComponentState::Building,
      },
    );
    state.submitted.push(component.package.clone());
    debug!(package = %component.package, task_id, "mock build submitted");

    if state.auto_complete {
      let outcome = if state.failing_packages.contains(&component.package) {
        ComponentState::Failed
      } else {
        ComponentState::Complete
      };
      if let Some(task) = state.tasks.get_mut(&task_id) {
        task.state = outcome;
      }
      state
        .outbox
        .push_back(Event::BuildChange(BuildChange::from_nvr(task_id, &nvr, outcome)));
    }

    Ok(BuildSubmission {
      nvr: Some(nvr),
      ..BuildSubmission::building(task_id)
    })
  }

  fn cancel(&self, task_id: TaskId) -> Result<(), BuilderError> {
    let mut state = self.lock();
    if let Some(task) = state.tasks.get_mut(&task_id) {
      task.state = ComponentState::Canceled;
    }
    state.canceled.push(task_id);
    Ok(())
  }

  fn tag_artifacts(&self, module: &ModuleBuild, nvrs: &[String], final_tag: bool) -> Result<(), BuilderError> {
    let tag = if final_tag {
      module
        .koji_tag
        .clone()
        .ok_or_else(|| BuilderError::Fatal(format!("module {} has no tag", module.id)))?
    } else {
      buildroot_tag(module)?
    };
    let mut state = self.lock();
    Self::check_transient(&mut state)?;
    Self::tag_into(&mut state, &tag, nvrs);
    Ok(())
  }

  fn regen_repo(&self, tag: &str) -> Result<(), BuilderError> {
    let mut state = self.lock();
    Self::check_transient(&mut state)?;
    state.regen_requests.push(tag.to_string());
    if !state.unready_tags.contains(tag) {
      state.outbox.push_back(Event::RepoChange { tag: tag.to_string() });
    }
    Ok(())
  }

  fn task_info(&self, task_id: TaskId) -> Result<Option<TaskInfo>, BuilderError> {
    Ok(self.lock().tasks.get(&task_id).map(|task| TaskInfo {
      task_id,
      state: task.state,
      nvr: Some(task.nvr.clone()),
    }))
  }

  fn retire_target(&self, tag: &str) -> Result<(), BuilderError> {
    self.lock().retired_targets.push(tag.to_string());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn module() -> ModuleBuild {
    ModuleBuild::new("testmodule", "master", 20180205135154, "c2c572ec", "alice")
  }

  #[test]
  fn manual_completion_publishes_build_change() {
    let mock = MockBackend::new();
    let component = ComponentBuild::new(1, "perl-List-Compare", Some("abc"), 2);
    let submission = mock.build(&module(), &component).unwrap();
    let task_id = submission.task_id.unwrap();

    assert!(mock.take_events().is_empty());
    mock.complete(task_id);

    let events = mock.take_events();
    let [Event::BuildChange(change)] = events.as_slice() else {
      panic!("expected one build change, got {:?}", events);
    };
    assert_eq!(change.name, "perl-List-Compare");
    assert_eq!(change.new_state, ComponentState::Complete);
    assert_eq!(Some(change.nvr()), submission.nvr);
  }

  #[test]
  fn auto_complete_honors_failing_packages() {
    let mock = MockBackend::new().with_auto_complete();
    mock.fail_package("tangerine");
    mock.build(&module(), &ComponentBuild::new(1, "tangerine", Some("r"), 2)).unwrap();

    let events = mock.take_events();
    assert!(matches!(
      events.as_slice(),
      [Event::BuildChange(BuildChange { new_state: ComponentState::Failed, .. })]
    ));
  }

  fn tagged_module() -> ModuleBuild {
    ModuleBuild {
      koji_tag: Some("module-x".to_string()),
      ..module()
    }
  }

  #[test]
  fn tagging_publishes_one_event_per_artifact() {
    let mock = MockBackend::new();
    let nvrs = ["a-1-1".to_string(), "b-1-1".to_string()];
    mock.tag_artifacts(&tagged_module(), &nvrs, false).unwrap();
    assert_eq!(mock.take_events().len(), 2);
    assert_eq!(mock.tagged("module-x-build").len(), 2);

    mock.tag_artifacts(&tagged_module(), &nvrs[..1], true).unwrap();
    assert_eq!(mock.tagged("module-x"), vec!["a-1-1".to_string()]);
  }

  #[test]
  fn only_installed_artifacts_join_the_group() {
    let mock = MockBackend::new();
    let module = tagged_module();
    mock.add_artifacts(&module, &["module-build-macros-1-1".to_string()], true).unwrap();
    mock.add_artifacts(&module, &["a-1-1".to_string()], false).unwrap();

    assert_eq!(mock.tagged("module-x-build").len(), 2);
    assert_eq!(mock.artifacts("module-x-build"), vec!["module-build-macros-1-1".to_string()]);
    assert_eq!(mock.take_events().len(), 2);
  }

  #[test]
  fn untagged_module_cannot_be_tagged() {
    let mock = MockBackend::new();
    let err = mock.tag_artifacts(&module(), &["a-1-1".to_string()], true).unwrap_err();
    assert!(!err.is_transient());
    assert!(mock.buildroot_ready(&module(), &[]).is_err());
  }

  #[test]
  fn unready_tag_withholds_repo_event() {
    let mock = MockBackend::new();
    let module = tagged_module();
    mock.set_buildroot_ready("module-x-build", false);
    mock.regen_repo("module-x-build").unwrap();
    assert!(mock.take_events().is_empty());
    assert_eq!(mock.regen_requests(), vec!["module-x-build".to_string()]);
    assert!(!mock.buildroot_ready(&module, &[]).unwrap());

    mock.set_buildroot_ready("module-x-build", true);
    assert!(mock.buildroot_ready(&module, &["a-1-1".to_string()]).unwrap());
  }

  #[test]
  fn transient_failures_are_consumed() {
    let mock = MockBackend::new();
    mock.fail_transiently(1);
    assert!(mock.connect_buildroot(&module()).unwrap_err().is_transient());
    assert!(mock.connect_buildroot(&module()).is_ok());
  }

  #[test]
  fn task_ids_continue_after_recorded_ones() {
    let component = ComponentBuild::new(1, "A", Some("abc"), 2);
    let fresh = MockBackend::new().with_tasks_after(0);
    assert_eq!(fresh.build(&module(), &component).unwrap().task_id, Some(FIRST_TASK_ID));

    let resumed = MockBackend::new().with_tasks_after(1041);
    assert_eq!(resumed.build(&module(), &component).unwrap().task_id, Some(1042));
  }
}
