//! Hashing utilities for module contexts.
//!
//! This module provides:
//! - `ObjectHash`: a truncated 20-character hash of a serialized value
//! - `Hashable`: blanket hashing for anything serializable
//! - `ModuleContexts`: the build/runtime context triple of a module build

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::{CONTEXT_LEN, OBJ_HASH_PREFIX_LEN};

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a unique object.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value.
/// Maps are serialized in key order (callers use `BTreeMap`), so equal
/// dependency sets always hash equally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(ObjectHash(digest_hex(serialized.as_bytes())[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

impl<K: Serialize, V: Serialize> Hashable for BTreeMap<K, V> {}

fn digest_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  format!("{:x}", hasher.finalize())
}

/// Contexts identifying which dependency set a module build was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContexts {
  /// Hash of the pinned buildrequire streams.
  pub build_context: String,
  /// Hash of the pinned buildrequire streams, base modules excluded.
  pub build_context_no_bms: String,
  /// Hash of the runtime requires.
  pub runtime_context: String,
  /// Short context derived from the two above.
  pub context: String,
}

impl ModuleContexts {
  /// Compute contexts from pinned buildrequire streams and runtime requires.
  pub fn compute(
    buildrequires: &BTreeMap<String, String>,
    requires: &BTreeMap<String, Vec<String>>,
    base_modules: &[String],
  ) -> Result<Self, HashError> {
    let build_context = buildrequires.compute_hash()?.0;

    let no_bms: BTreeMap<&String, &String> = buildrequires
      .iter()
      .filter(|(name, _)| !base_modules.contains(name))
      .collect();
    let build_context_no_bms = no_bms.compute_hash()?.0;

    let normalized: BTreeMap<&String, Vec<&String>> = requires
      .iter()
      .map(|(name, streams)| {
        let mut streams: Vec<&String> = streams.iter().collect();
        streams.sort();
        (name, streams)
      })
      .collect();
    let runtime_context = normalized.compute_hash()?.0;

    let combined = format!("{}:{}", build_context, runtime_context);
    let context = digest_hex(combined.as_bytes())[..CONTEXT_LEN].to_string();

    Ok(Self {
      build_context,
      build_context_no_bms,
      runtime_context,
      context,
    })
  }
}
