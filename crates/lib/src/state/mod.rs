//! Module and component build records and the module state machine.

pub mod types;

pub use types::{
  ComponentBuild, ComponentId, ComponentState, ModuleBuild, ModuleId, ModuleState, RebuildStrategy, TaskId,
  TransitionError,
};
