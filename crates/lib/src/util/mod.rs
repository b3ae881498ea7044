//! Shared utilities.
//!
//! Common utilities used across the crate: context hashing, the retry helper
//! and test fixtures.

pub mod hash;
pub mod retry;

#[cfg(test)]
pub mod testutil;
