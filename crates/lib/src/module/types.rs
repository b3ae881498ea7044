use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Module name → acceptable streams.
///
/// An empty list accepts every stream. Entries prefixed with `-` exclude a
/// stream; a list made only of exclusions accepts everything else.
pub type Dependencies = BTreeMap<String, Vec<String>>;

/// Fully qualified module identity: name, stream, version, context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nsvc {
  pub name: String,
  pub stream: String,
  pub version: u64,
  pub context: String,
}

impl Nsvc {
  pub fn new(name: &str, stream: &str, version: u64, context: &str) -> Self {
    Self {
      name: name.to_string(),
      stream: stream.to_string(),
      version,
      context: context.to_string(),
    }
  }

  /// The `name-stream-version.context` form used as a gating subject.
  pub fn nvr_string(&self) -> String {
    format!("{}-{}-{}.{}", self.name, self.stream, self.version, self.context)
  }
}

impl std::fmt::Display for Nsvc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}:{}", self.name, self.stream, self.version, self.context)
  }
}

/// Check whether `stream` is accepted by a stream list.
pub fn stream_matches(accepted: &[String], stream: &str) -> bool {
  if accepted.is_empty() {
    return true;
  }

  let mut has_positive = false;
  for entry in accepted {
    match entry.strip_prefix('-') {
      Some(excluded) if excluded == stream => return false,
      Some(_) => {}
      None => {
        has_positive = true;
        if entry == stream {
          return true;
        }
      }
    }
  }

  !has_positive
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDef {
  pub name: String,
  /// Where the component's sources live.
  #[serde(default)]
  pub repository: Option<String>,
  /// Commit the component is built from.
  #[serde(rename = "ref")]
  pub git_ref: String,
  #[serde(default)]
  pub buildorder: u32,
  #[serde(default)]
  pub buildafter: Vec<String>,
  #[serde(default)]
  pub arches: Vec<String>,
}

impl ComponentDef {
  pub fn new(name: &str, git_ref: &str) -> Self {
    Self {
      name: name.to_string(),
      repository: None,
      git_ref: git_ref.to_string(),
      buildorder: 0,
      buildafter: Vec::new(),
      arches: Vec::new(),
    }
  }

  pub fn with_buildorder(mut self, buildorder: u32) -> Self {
    self.buildorder = buildorder;
    self
  }

  pub fn with_buildafter(mut self, deps: &[&str]) -> Self {
    self.buildafter = deps.iter().map(|d| d.to_string()).collect();
    self
  }
}

/// Immutable description of a module, either submitted for build or known
/// to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
  pub name: String,
  pub stream: String,
  #[serde(default)]
  pub version: u64,
  #[serde(default)]
  pub context: String,
  #[serde(default)]
  pub components: Vec<ComponentDef>,
  #[serde(default)]
  pub requires: Dependencies,
  #[serde(default)]
  pub buildrequires: Dependencies,
  /// Extra rpm macros passed to every component build.
  #[serde(default)]
  pub rpm_macros: String,
  /// Source reference of the definition itself.
  #[serde(default)]
  pub scm_ref: Option<String>,
}

impl ModuleDefinition {
  pub fn new(name: &str, stream: &str, version: u64, context: &str) -> Self {
    Self {
      name: name.to_string(),
      stream: stream.to_string(),
      version,
      context: context.to_string(),
      components: Vec::new(),
      requires: Dependencies::new(),
      buildrequires: Dependencies::new(),
      rpm_macros: String::new(),
      scm_ref: None,
    }
  }

  pub fn nsvc(&self) -> Nsvc {
    Nsvc::new(&self.name, &self.stream, self.version, &self.context)
  }

  pub fn with_requires(mut self, name: &str, streams: &[&str]) -> Self {
    self
      .requires
      .insert(name.to_string(), streams.iter().map(|s| s.to_string()).collect());
    self
  }

  pub fn with_buildrequires(mut self, name: &str, streams: &[&str]) -> Self {
    self
      .buildrequires
      .insert(name.to_string(), streams.iter().map(|s| s.to_string()).collect());
    self
  }

  pub fn with_component(mut self, component: ComponentDef) -> Self {
    self.components.push(component);
    self
  }
}
