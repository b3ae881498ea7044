//! Events consumed by the scheduler and parsing of raw bus messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::state::{ComponentState, ModuleId, ModuleState, TaskId};

/// A backend build changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildChange {
  pub task_id: TaskId,
  #[serde(default)]
  pub build_id: Option<u64>,
  pub new_state: ComponentState,
  pub name: String,
  pub version: String,
  pub release: String,
  /// Restricts the event to one module; set on events synthesized for
  /// reused components, which share their task id with the original build.
  #[serde(default)]
  pub module_id: Option<ModuleId>,
  #[serde(default)]
  pub reason: Option<String>,
}

impl BuildChange {
  pub fn nvr(&self) -> String {
    format!("{}-{}-{}", self.name, self.version, self.release)
  }

  /// Build a completion event for a component whose artifact is `nvr`.
  ///
  /// Splits `nvr` on its last two dashes; a malformed nvr keeps the whole
  /// string as the name.
  pub fn from_nvr(task_id: TaskId, nvr: &str, new_state: ComponentState) -> Self {
    let mut parts = nvr.rsplitn(3, '-');
    let (release, version, name) = match (parts.next(), parts.next(), parts.next()) {
      (Some(r), Some(v), Some(n)) => (r, v, n),
      _ => ("", "", nvr),
    };
    Self {
      task_id,
      build_id: None,
      new_state,
      name: name.to_string(),
      version: version.to_string(),
      release: release.to_string(),
      module_id: None,
      reason: None,
    }
  }

  pub fn for_module(mut self, module_id: ModuleId) -> Self {
    self.module_id = Some(module_id);
    self
  }

  pub fn with_reason(mut self, reason: &str) -> Self {
    self.reason = Some(reason.to_string());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
  BuildChange(BuildChange),
  RepoChange {
    tag: String,
  },
  TagChange {
    tag: String,
    artifact_name: String,
    nvr: String,
  },
  ModuleStateChange {
    module_id: ModuleId,
    state: ModuleState,
  },
  GatingDecisionUpdate {
    decision_context: String,
    policies_satisfied: bool,
    subject_identifier: String,
  },
}

impl Event {
  pub fn module_state(module_id: ModuleId, state: ModuleState) -> Self {
    Event::ModuleStateChange { module_id, state }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Event::BuildChange(_) => "build_change",
      Event::RepoChange { .. } => "repo_change",
      Event::TagChange { .. } => "tag_change",
      Event::ModuleStateChange { .. } => "module_state_change",
      Event::GatingDecisionUpdate { .. } => "gating_decision_update",
    }
  }

  /// Key used to route related events to the same worker.
  pub fn shard_key(&self) -> String {
    match self {
      Event::BuildChange(change) => match change.module_id {
        Some(id) => format!("module:{}", id),
        None => format!("task:{}", change.task_id),
      },
      Event::RepoChange { tag } | Event::TagChange { tag, .. } => {
        format!("tag:{}", tag.trim_end_matches(crate::consts::BUILDROOT_TAG_SUFFIX))
      }
      Event::ModuleStateChange { module_id, .. } => format!("module:{}", module_id),
      Event::GatingDecisionUpdate { subject_identifier, .. } => format!("subject:{}", subject_identifier),
    }
  }
}

/// A message as delivered by the bus, before routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
  /// `<category>.<object>.<action>`, optionally behind an environment prefix.
  pub topic: String,
  pub body: Value,
}

type Parser = fn(&Value) -> Option<Event>;

const ROUTES: &[(&str, Parser)] = &[
  ("buildsys.build.state.change", parse_build_change),
  ("buildsys.repo.done", parse_repo_change),
  ("buildsys.tag", parse_tag_change),
  ("mbs.module.state.change", parse_module_state_change),
  ("greenwave.decision.update", parse_gating_update),
];

impl RawMessage {
  pub fn new(topic: &str, body: Value) -> Self {
    Self {
      topic: topic.to_string(),
      body,
    }
  }

  /// Route the message to an [`Event`].
  ///
  /// Returns `None` for topics nobody handles and for bodies missing
  /// required fields.
  pub fn parse(&self) -> Option<Event> {
    let Some((route, parser)) = ROUTES
      .iter()
      .find(|(route, _)| self.topic == *route || self.topic.ends_with(&format!(".{}", route)))
    else {
      debug!(topic = %self.topic, "no handler for topic, dropping message");
      return None;
    };

    let event = parser(&self.body);
    if event.is_none() {
      warn!(topic = %self.topic, route, "malformed message body, dropping message");
    }
    event
  }
}

fn str_field(body: &Value, key: &str) -> Option<String> {
  body.get(key)?.as_str().map(str::to_string)
}

/// Backend build states arrive either as names or as the numeric codes
/// build systems commonly use (0 building, 1 complete, 2 deleted,
/// 3 failed, 4 canceled).
fn component_state(value: &Value) -> Option<ComponentState> {
  if let Some(code) = value.as_u64() {
    return match code {
      0 => Some(ComponentState::Building),
      1 => Some(ComponentState::Complete),
      2 | 3 => Some(ComponentState::Failed),
      4 => Some(ComponentState::Canceled),
      _ => None,
    };
  }
  match value.as_str()?.to_ascii_lowercase().as_str() {
    "building" => Some(ComponentState::Building),
    "complete" => Some(ComponentState::Complete),
    "failed" | "deleted" => Some(ComponentState::Failed),
    "canceled" => Some(ComponentState::Canceled),
    _ => None,
  }
}

fn parse_build_change(body: &Value) -> Option<Event> {
  Some(Event::BuildChange(BuildChange {
    task_id: body.get("task_id")?.as_u64()?,
    build_id: body.get("build_id").and_then(Value::as_u64),
    new_state: component_state(body.get("new")?)?,
    name: str_field(body, "name")?,
    version: str_field(body, "version")?,
    release: str_field(body, "release")?,
    module_id: body.get("module_id").and_then(Value::as_u64),
    reason: str_field(body, "reason"),
  }))
}

fn parse_repo_change(body: &Value) -> Option<Event> {
  Some(Event::RepoChange {
    tag: str_field(body, "tag")?,
  })
}

fn parse_tag_change(body: &Value) -> Option<Event> {
  let name = str_field(body, "name")?;
  let nvr = format!("{}-{}-{}", name, str_field(body, "version")?, str_field(body, "release")?);
  Some(Event::TagChange {
    tag: str_field(body, "tag")?,
    artifact_name: name,
    nvr,
  })
}

fn parse_module_state_change(body: &Value) -> Option<Event> {
  Some(Event::ModuleStateChange {
    module_id: body.get("id")?.as_u64()?,
    state: str_field(body, "state_name")?.parse().ok()?,
  })
}

fn parse_gating_update(body: &Value) -> Option<Event> {
  Some(Event::GatingDecisionUpdate {
    decision_context: str_field(body, "decision_context")?,
    policies_satisfied: body.get("policies_satisfied")?.as_bool()?,
    subject_identifier: str_field(body, "subject_identifier")?,
  })
}
