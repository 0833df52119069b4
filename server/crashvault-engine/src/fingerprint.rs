//! Stable fingerprint computation and grouping of events into issues.

use chrono::{DateTime, Utc};

use crate::store::Dataset;
use crate::types::{Fingerprint, Issue, Status};

/// Hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Compute a stable fingerprint from an event message.
///
/// The message is trimmed (and case-folded when `ignore_case` is set), then
/// hashed with blake3. Exact text only; no similarity matching.
pub fn compute(message: &str, ignore_case: bool) -> Fingerprint {
  let trimmed = message.trim();
  let mut hasher = blake3::Hasher::new();
  if ignore_case {
    hasher.update(trimmed.to_lowercase().as_bytes());
  } else {
    hasher.update(trimmed.as_bytes());
  }
  let hex = hasher.finalize().to_hex();
  Fingerprint(hex[..FINGERPRINT_LEN].to_string())
}

/// Case-sensitive fingerprint of a message.
pub fn fingerprint_of(message: &str) -> Fingerprint {
  compute(message, false)
}

/// Find the issue owning `fingerprint`, or create it.
///
/// An existing issue has `updated_at` bumped to `ts`. A new issue is titled
/// after the (trimmed) message and gets a fresh id. Returns the issue's
/// index in `dataset.issues` and whether it was created.
pub fn resolve_or_create_issue(
  dataset: &mut Dataset,
  fingerprint: &Fingerprint,
  message: &str,
  ts: DateTime<Utc>,
) -> (usize, bool) {
  if let Some(idx) = dataset.issues.iter().position(|i| &i.fingerprint == fingerprint) {
    dataset.issues[idx].touch(ts);
    return (idx, false);
  }

  let issue = Issue {
    id: dataset.next_issue_id(),
    fingerprint: fingerprint.clone(),
    title: message.trim().to_string(),
    status: Status::Open,
    created_at: ts,
    updated_at: ts,
    event_count: 0,
  };
  dataset.issues.push(issue);
  (dataset.issues.len() - 1, true)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn ts(min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, min, 0).unwrap()
  }

  #[test]
  fn same_input_same_fingerprint() {
    assert_eq!(fingerprint_of("Database timeout"), fingerprint_of("Database timeout"));
  }

  #[test]
  fn known_digest_is_stable_across_runs() {
    let expected = blake3::hash(b"Database timeout").to_hex();
    assert_eq!(fingerprint_of("Database timeout").0, &expected[..FINGERPRINT_LEN]);
  }

  #[test]
  fn different_message_different_fingerprint() {
    assert_ne!(fingerprint_of("Database timeout"), fingerprint_of("Disk full"));
  }

  #[test]
  fn surrounding_whitespace_ignored() {
    assert_eq!(fingerprint_of("  Disk full\n"), fingerprint_of("Disk full"));
  }

  #[test]
  fn case_matters_unless_folded() {
    assert_ne!(fingerprint_of("Disk full"), fingerprint_of("DISK FULL"));
    assert_eq!(compute("Disk full", true), compute("DISK FULL", true));
  }

  #[test]
  fn fingerprint_is_fixed_width_hex() {
    let fp = fingerprint_of("boom");
    assert_eq!(fp.0.len(), FINGERPRINT_LEN);
    assert!(fp.0.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn resolve_creates_then_reuses() {
    let mut dataset = Dataset::default();
    let fp = fingerprint_of("Database timeout");

    let (idx, created) = resolve_or_create_issue(&mut dataset, &fp, "Database timeout", ts(0));
    assert!(created);
    assert_eq!(dataset.issues[idx].id, 1);
    assert_eq!(dataset.issues[idx].title, "Database timeout");
    assert_eq!(dataset.issues[idx].status, Status::Open);

    let (again, created) = resolve_or_create_issue(&mut dataset, &fp, "Database timeout", ts(5));
    assert!(!created);
    assert_eq!(again, idx);
    assert_eq!(dataset.issues.len(), 1);
    assert_eq!(dataset.issues[idx].updated_at, ts(5));
    assert_eq!(dataset.issues[idx].created_at, ts(0));
  }

  #[test]
  fn resolve_allocates_distinct_ids() {
    let mut dataset = Dataset::default();
    let a = fingerprint_of("Database timeout");
    let b = fingerprint_of("Disk full");
    resolve_or_create_issue(&mut dataset, &a, "Database timeout", ts(0));
    let (idx, created) = resolve_or_create_issue(&mut dataset, &b, "Disk full", ts(1));
    assert!(created);
    assert_eq!(dataset.issues[idx].id, 2);
  }
}
