//! Dependency resolution (stream expansion).
//!
//! Pure functions over a target module and a catalog of known modules. No
//! I/O happens here; callers gather the catalog first (see
//! [`crate::metadata::gather_catalog`]).

pub mod expand;
pub mod solver;
pub mod types;

pub use expand::{Expansion, expand_streams, resolve_all};
pub use solver::{Alternative, NodeId, Resolver, Solution};
pub use types::{ResolveError, ResolvedCombination};
