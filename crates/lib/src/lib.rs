//! modbuild-lib: Core types and logic for the module build orchestrator
//!
//! This crate turns a submitted module definition into ordered component
//! builds on a pluggable backend:
//! - `resolve`: stream expansion of build requirements
//! - `module`: definitions and batch planning
//! - `state` / `store`: module and component build records
//! - `reuse`: taking unchanged components from earlier builds
//! - `scheduler`: event handlers, the dispatcher and the poller
//! - `service`: the tokio runtime that feeds events to the dispatcher

pub mod builder;
pub mod config;
pub mod consts;
pub mod metadata;
pub mod module;
pub mod publish;
pub mod resolve;
pub mod reuse;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod submit;
pub mod util;
