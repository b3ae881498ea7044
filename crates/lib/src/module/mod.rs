//! Module definitions and build plans.
//!
//! A [`ModuleDefinition`] is the immutable input to the engine: identity,
//! components and the two dependency maps. [`plan::plan_batches`] turns its
//! components into batch numbers.

pub mod plan;
pub mod types;

pub use plan::{BatchPlan, PlanError, plan_batches};
pub use types::{ComponentDef, Dependencies, ModuleDefinition, Nsvc, stream_matches};
