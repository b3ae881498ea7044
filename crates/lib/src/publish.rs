//! Publication of finished module builds.

use thiserror::Error;
use tracing::info;

use crate::state::ModuleBuild;

#[derive(Debug, Error)]
pub enum PublishError {
  #[error("failed to publish module: {0}")]
  Failed(String),
}

/// Makes a `done` module available to consumers before it becomes `ready`.
pub trait Publisher: Send + Sync {
  fn publish(&self, module: &ModuleBuild) -> Result<(), PublishError>;
}

/// Publisher that only records the publication in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
  fn publish(&self, module: &ModuleBuild) -> Result<(), PublishError> {
    info!(
      module = module.id,
      nsvc = %module.nsvc(),
      tag = module.koji_tag.as_deref().unwrap_or_default(),
      "published module"
    );
    Ok(())
  }
}
