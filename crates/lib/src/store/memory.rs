//! In-memory build store with optional JSON file persistence.
//!
//! # Storage Layout
//!
//! ```text
//! {path}          # StoreState: every module and component record
//! {path}.tmp      # written first, then renamed over {path}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state::{ComponentBuild, ComponentId, ComponentState, ModuleBuild, ModuleId, ModuleState, TaskId};

use super::{BuildStore, ModuleFilter, StoreError};

/// Current on-disk format version.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
  version: u32,
  next_module_id: ModuleId,
  next_component_id: ComponentId,
  modules: BTreeMap<ModuleId, ModuleBuild>,
  components: BTreeMap<ComponentId, ComponentBuild>,
}

/// Build store kept in memory.
///
/// When opened with a path, every mutation is flushed to disk with an atomic
/// write (temp file, then rename) so a crash never leaves a torn file.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: RwLock<StoreState>,
  path: Option<PathBuf>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Open a store backed by `path`, loading it if it exists.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    let state = match fs::read_to_string(path) {
      Ok(content) => {
        let state: StoreState = serde_json::from_str(&content).map_err(StoreError::Parse)?;
        info!(
          path = %path.display(),
          modules = state.modules.len(),
          components = state.components.len(),
          "loaded build store"
        );
        state
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => StoreState::default(),
      Err(e) => return Err(StoreError::Read(e)),
    };

    Ok(Self {
      state: RwLock::new(state),
      path: Some(path.to_path_buf()),
    })
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
    self
      .state
      .read()
      .map_err(|_| StoreError::Poisoned)
  }

  fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
    self
      .state
      .write()
      .map_err(|_| StoreError::Poisoned)
  }

  fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent).map_err(StoreError::Write)?;
    }

    let mut temp_path = path.clone().into_os_string();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let content = serde_json::to_string_pretty(state).map_err(StoreError::Serialize)?;
    fs::write(&temp_path, &content).map_err(StoreError::Write)?;
    fs::rename(&temp_path, path).map_err(StoreError::Write)?;

    debug!(path = %path.display(), "persisted build store");
    Ok(())
  }
}

impl BuildStore for MemoryStore {
  fn insert_module(&self, mut module: ModuleBuild) -> Result<ModuleId, StoreError> {
    let mut state = self.write()?;

    let duplicate = state.modules.values().any(|m| {
      m.name == module.name
        && m.stream == module.stream
        && m.version == module.version
        && m.context == module.context
        && !matches!(m.state, ModuleState::Failed | ModuleState::Garbage)
    });
    if duplicate {
      return Err(StoreError::AlreadyExists(format!("module build {}", module.nsvc())));
    }

    state.version = STORE_VERSION;
    state.next_module_id += 1;
    module.id = state.next_module_id;
    let id = module.id;
    state.modules.insert(id, module);
    self.persist(&state)?;
    Ok(id)
  }

  fn module(&self, id: ModuleId) -> Result<ModuleBuild, StoreError> {
    self
      .read()?
      .modules
      .get(&id)
      .cloned()
      .ok_or(StoreError::NotFound { kind: "module", id })
  }

  fn update_module(&self, module: &ModuleBuild) -> Result<(), StoreError> {
    let mut state = self.write()?;
    let Some(slot) = state.modules.get_mut(&module.id) else {
      return Err(StoreError::NotFound {
        kind: "module",
        id: module.id,
      });
    };
    if module.batch < slot.batch {
      return Err(StoreError::Conflict(format!(
        "module {} batch would move backwards from {} to {}",
        module.id, slot.batch, module.batch
      )));
    }
    *slot = module.clone();
    self.persist(&state)
  }

  fn modules(&self, filter: &ModuleFilter) -> Result<Vec<ModuleBuild>, StoreError> {
    Ok(
      self
        .read()?
        .modules
        .values()
        .rev()
        .filter(|m| filter.matches(m))
        .cloned()
        .collect(),
    )
  }

  fn module_by_tag(&self, tag: &str) -> Result<Option<ModuleBuild>, StoreError> {
    Ok(
      self
        .read()?
        .modules
        .values()
        .rev()
        .find(|m| m.koji_tag.as_deref() == Some(tag) || m.buildroot_tag().as_deref() == Some(tag))
        .cloned(),
    )
  }

  fn insert_component(&self, mut component: ComponentBuild) -> Result<ComponentId, StoreError> {
    let mut state = self.write()?;

    if !state.modules.contains_key(&component.module_id) {
      return Err(StoreError::NotFound {
        kind: "module",
        id: component.module_id,
      });
    }
    let duplicate = state
      .components
      .values()
      .any(|c| c.module_id == component.module_id && c.package == component.package);
    if duplicate {
      return Err(StoreError::AlreadyExists(format!(
        "component {} of module {}",
        component.package, component.module_id
      )));
    }

    state.next_component_id += 1;
    component.id = state.next_component_id;
    let id = component.id;
    state.components.insert(id, component);
    self.persist(&state)?;
    Ok(id)
  }

  fn component(&self, id: ComponentId) -> Result<ComponentBuild, StoreError> {
    self
      .read()?
      .components
      .get(&id)
      .cloned()
      .ok_or(StoreError::NotFound { kind: "component", id })
  }

  fn update_component(&self, component: &ComponentBuild) -> Result<(), StoreError> {
    let mut state = self.write()?;
    let Some(slot) = state.components.get_mut(&component.id) else {
      return Err(StoreError::NotFound {
        kind: "component",
        id: component.id,
      });
    };
    *slot = component.clone();
    self.persist(&state)
  }

  fn components(&self, module_id: ModuleId) -> Result<Vec<ComponentBuild>, StoreError> {
    let mut components: Vec<ComponentBuild> = self
      .read()?
      .components
      .values()
      .filter(|c| c.module_id == module_id)
      .cloned()
      .collect();
    components.sort_by(|a, b| a.planned_batch.cmp(&b.planned_batch).then_with(|| a.package.cmp(&b.package)));
    Ok(components)
  }

  fn components_by_task(&self, task_id: TaskId) -> Result<Vec<ComponentBuild>, StoreError> {
    Ok(
      self
        .read()?
        .components
        .values()
        .filter(|c| c.task_id == Some(task_id))
        .cloned()
        .collect(),
    )
  }

  fn components_in_state(&self, state: ComponentState) -> Result<Vec<ComponentBuild>, StoreError> {
    Ok(
      self
        .read()?
        .components
        .values()
        .filter(|c| c.state == state)
        .cloned()
        .collect(),
    )
  }
}
