use std::cmp::Ordering;

/// Decides which base module streams may stand in for each other when
/// reusing components.
pub trait StreamCompatibility: Send + Sync {
  /// Whether a build made against `candidate` of `base_module` may be reused
  /// by a build against `stream`.
  fn is_compatible(&self, base_module: &str, stream: &str, candidate: &str) -> bool;

  /// Order two streams of `base_module`; the greater one is preferred.
  fn cmp_streams(&self, _base_module: &str, a: &str, b: &str) -> Ordering {
    a.cmp(b)
  }
}

/// Streams named `<prefix><major>[.<minor>...]`, such as `f28` or `el8.2.0`.
///
/// A candidate is compatible when it shares the prefix and major version
/// and is not newer than the requested stream. Streams without a numeric
/// part are only compatible with themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionedStreams;

fn parse(stream: &str) -> Option<(&str, Vec<u64>)> {
  let split = stream.find(|c: char| c.is_ascii_digit())?;
  let (prefix, version) = stream.split_at(split);
  let parts = version
    .split('.')
    .map(str::parse)
    .collect::<Result<Vec<u64>, _>>()
    .ok()?;
  Some((prefix, parts))
}

impl StreamCompatibility for VersionedStreams {
  fn is_compatible(&self, _base_module: &str, stream: &str, candidate: &str) -> bool {
    if stream == candidate {
      return true;
    }
    match (parse(stream), parse(candidate)) {
      (Some((prefix, wanted)), Some((candidate_prefix, have))) => {
        prefix == candidate_prefix && wanted.first() == have.first() && have <= wanted
      }
      _ => false,
    }
  }

  fn cmp_streams(&self, _base_module: &str, a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
      (Some((_, a_parts)), Some((_, b_parts))) => a_parts.cmp(&b_parts),
      _ => a.cmp(b),
    }
  }
}
