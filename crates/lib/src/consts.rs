//! Crate-wide constants.

/// Length of the truncated hex digest used for [`crate::util::hash::ObjectHash`].
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Length of a module context derived from its build and runtime contexts.
pub const CONTEXT_LEN: usize = 8;

/// Name of the implicit platform-bootstrap component built in batch 1.
pub const BOOTSTRAP_COMPONENT: &str = "module-build-macros";

/// Batch reserved for the bootstrap component.
pub const BOOTSTRAP_BATCH: u32 = 1;

/// First batch available to real components.
pub const FIRST_COMPONENT_BATCH: u32 = 2;

/// Suffix appended to a module tag to form its buildroot tag.
pub const BUILDROOT_TAG_SUFFIX: &str = "-build";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MODBUILD_CONFIG";
