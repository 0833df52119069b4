//! Whole-dataset export and replace/merge import.
//!
//! Imports are validated and computed fully in memory before anything is
//! written, so a rejected snapshot leaves the store untouched.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use crate::error::VaultError;
use crate::store::{Collection, Dataset, Store};
use crate::types::*;

pub struct TransferEngine<'a> {
  store: &'a Store,
}

impl<'a> TransferEngine<'a> {
  pub fn new(store: &'a Store) -> Self {
    Self { store }
  }

  /// Snapshot of every issue and event.
  pub fn export(&self) -> Result<Snapshot, VaultError> {
    let dataset = self.store.load_dataset()?;
    Ok(Snapshot {
      version: SNAPSHOT_VERSION,
      exported_at: Some(Utc::now()),
      issues: dataset.issues,
      events: dataset.events,
    })
  }

  pub fn import(&self, snapshot: &Snapshot, mode: ImportMode) -> Result<ImportSummary, VaultError> {
    let (dataset, summary) = match mode {
      ImportMode::Replace => replace(snapshot)?,
      ImportMode::Merge => merge(self.store.load_dataset()?, snapshot)?,
    };

    self.store.save(Collection::Issues, &dataset.issues)?;
    self.store.save(Collection::Events, &dataset.events)?;
    tracing::info!(
      mode = ?mode,
      issues_added = summary.issues_added,
      issues_merged = summary.issues_merged,
      issues_rekeyed = summary.issues_rekeyed,
      events_imported = summary.events_imported,
      "snapshot imported"
    );
    Ok(summary)
  }
}

/// Adopt a snapshot wholesale after checking every store invariant.
pub fn replace(snapshot: &Snapshot) -> Result<(Dataset, ImportSummary), VaultError> {
  validate(snapshot)?;

  let mut fingerprints = HashSet::new();
  for issue in &snapshot.issues {
    if !fingerprints.insert(&issue.fingerprint) {
      return Err(VaultError::validation(
        "issues[].fingerprint",
        &format!("duplicate fingerprint {}", issue.fingerprint),
      ));
    }
  }

  let mut event_ids = HashSet::new();
  for ev in &snapshot.events {
    if !event_ids.insert(ev.id) {
      return Err(VaultError::validation(
        "events[].id",
        &format!("duplicate event id {}", ev.id),
      ));
    }
  }

  let mut dataset = Dataset {
    issues: snapshot.issues.clone(),
    events: snapshot.events.clone(),
  };
  dataset.refresh_counts();

  let summary = ImportSummary {
    issues_added: dataset.issues.len(),
    events_imported: dataset.events.len(),
    ..ImportSummary::default()
  };
  Ok((dataset, summary))
}

/// Reconcile a snapshot into `local` without breaking fingerprint
/// uniqueness or referential integrity.
///
/// Incoming issues whose fingerprint exists locally are folded into the
/// local issue. Others keep their id unless it is already taken locally, in
/// which case they get a fresh one outside both local and incoming ids.
/// Every incoming event gets a fresh id.
pub fn merge(mut local: Dataset, snapshot: &Snapshot) -> Result<(Dataset, ImportSummary), VaultError> {
  validate(snapshot)?;

  let mut summary = ImportSummary::default();
  let mut by_fingerprint: HashMap<Fingerprint, usize> = local
    .issues
    .iter()
    .enumerate()
    .map(|(idx, i)| (i.fingerprint.clone(), idx))
    .collect();
  let mut taken: HashSet<u64> = local.issues.iter().map(|i| i.id).collect();
  taken.extend(local.events.iter().map(|e| e.issue_id));
  // Fresh ids never land on an id the snapshot itself still carries.
  let reserved: HashSet<u64> = snapshot.issues.iter().map(|i| i.id).collect();
  let mut next_id = local.next_issue_id();

  // Incoming issue id -> index of the owning issue in `local.issues`.
  let mut owner: HashMap<u64, usize> = HashMap::new();

  for incoming in &snapshot.issues {
    if let Some(&idx) = by_fingerprint.get(&incoming.fingerprint) {
      local.issues[idx].touch(incoming.updated_at);
      owner.insert(incoming.id, idx);
      summary.issues_merged += 1;
      continue;
    }

    let id = if taken.contains(&incoming.id) {
      while taken.contains(&next_id) || reserved.contains(&next_id) {
        next_id += 1;
      }
      summary.issues_rekeyed += 1;
      next_id
    } else {
      incoming.id
    };
    taken.insert(id);

    local.issues.push(Issue {
      id,
      event_count: 0,
      ..incoming.clone()
    });
    let idx = local.issues.len() - 1;
    by_fingerprint.insert(incoming.fingerprint.clone(), idx);
    owner.insert(incoming.id, idx);
    summary.issues_added += 1;
  }

  for ev in &snapshot.events {
    // Presence guaranteed by validate().
    let Some(&idx) = owner.get(&ev.issue_id) else {
      continue;
    };
    let issue = &mut local.issues[idx];
    issue.touch(ev.timestamp);
    local.events.push(Event {
      id: Uuid::new_v4(),
      issue_id: issue.id,
      ..ev.clone()
    });
    summary.events_imported += 1;
  }

  local.refresh_counts();
  Ok((local, summary))
}

/// Checks shared by both modes.
fn validate(snapshot: &Snapshot) -> Result<(), VaultError> {
  if snapshot.version != SNAPSHOT_VERSION {
    return Err(VaultError::validation(
      "version",
      &format!("unsupported snapshot version {}", snapshot.version),
    ));
  }

  let mut ids = HashSet::new();
  for issue in &snapshot.issues {
    if !ids.insert(issue.id) {
      return Err(VaultError::validation(
        "issues[].id",
        &format!("duplicate issue id {}", issue.id),
      ));
    }
    if issue.fingerprint.0.is_empty() {
      return Err(VaultError::validation(
        "issues[].fingerprint",
        &format!("issue {} has an empty fingerprint", issue.id),
      ));
    }
    if issue.updated_at < issue.created_at {
      return Err(VaultError::validation(
        "issues[].updated_at",
        &format!("issue {} was updated before it was created", issue.id),
      ));
    }
  }

  for ev in &snapshot.events {
    if ev.message.trim().is_empty() {
      return Err(VaultError::validation(
        "events[].message",
        &format!("event {} has an empty message", ev.id),
      ));
    }
    if !ids.contains(&ev.issue_id) {
      return Err(VaultError::validation(
        "events[].issue_id",
        &format!("event {} references unknown issue {}", ev.id, ev.issue_id),
      ));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fingerprint::fingerprint_of;
  use chrono::{DateTime, TimeZone};

  fn ts(min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, min, 0).unwrap()
  }

  fn issue(id: u64, message: &str, min: u32) -> Issue {
    Issue {
      id,
      fingerprint: fingerprint_of(message),
      title: message.into(),
      status: Status::Open,
      created_at: ts(min),
      updated_at: ts(min),
      event_count: 0,
    }
  }

  fn event(issue_id: u64, message: &str, min: u32) -> Event {
    Event {
      id: Uuid::new_v4(),
      issue_id,
      message: message.into(),
      level: Level::Error,
      tags: Default::default(),
      context: Default::default(),
      stacktrace: String::new(),
      host: None,
      timestamp: ts(min),
    }
  }

  fn snapshot(issues: Vec<Issue>, events: Vec<Event>) -> Snapshot {
    Snapshot {
      version: SNAPSHOT_VERSION,
      exported_at: None,
      issues,
      events,
    }
  }

  fn assert_invariants(dataset: &Dataset) {
    let fps: HashSet<_> = dataset.issues.iter().map(|i| &i.fingerprint).collect();
    assert_eq!(fps.len(), dataset.issues.len(), "fingerprints must be unique");
    let ids: HashSet<_> = dataset.issues.iter().map(|i| i.id).collect();
    assert_eq!(ids.len(), dataset.issues.len(), "issue ids must be unique");
    assert!(dataset.events.iter().all(|e| ids.contains(&e.issue_id)));
    let eids: HashSet<_> = dataset.events.iter().map(|e| e.id).collect();
    assert_eq!(eids.len(), dataset.events.len());
  }

  #[test]
  fn replace_rejects_dangling_event() {
    let snap = snapshot(vec![issue(1, "a", 0)], vec![event(2, "b", 0)]);
    let err = replace(&snap).unwrap_err();
    assert!(err.to_string().contains("unknown issue 2"));
  }

  #[test]
  fn replace_rejects_duplicate_fingerprints() {
    let snap = snapshot(vec![issue(1, "a", 0), issue(2, "a", 1)], vec![]);
    assert!(matches!(replace(&snap), Err(VaultError::Validation { .. })));
  }

  #[test]
  fn replace_rejects_unknown_version() {
    let mut snap = snapshot(vec![], vec![]);
    snap.version = 9;
    assert!(replace(&snap).unwrap_err().to_string().contains("version"));
  }

  #[test]
  fn replace_recounts_events() {
    let snap = snapshot(
      vec![issue(1, "a", 0)],
      vec![event(1, "a", 0), event(1, "a", 1)],
    );
    let (dataset, summary) = replace(&snap).unwrap();
    assert_eq!(dataset.issues[0].event_count, 2);
    assert_eq!(summary.events_imported, 2);
  }

  #[test]
  fn merge_folds_matching_fingerprints() {
    let local = Dataset {
      issues: vec![issue(1, "Database timeout", 0)],
      events: vec![event(1, "Database timeout", 0)],
    };
    let incoming = snapshot(
      vec![issue(5, "Database timeout", 3)],
      vec![event(5, "Database timeout", 4)],
    );

    let (merged, summary) = merge(local, &incoming).unwrap();
    assert_eq!(summary.issues_merged, 1);
    assert_eq!(summary.issues_added, 0);
    assert_eq!(merged.issues.len(), 1);
    assert_eq!(merged.issues[0].event_count, 2);
    assert_eq!(merged.issues[0].updated_at, ts(4));
    assert!(merged.events.iter().all(|e| e.issue_id == 1));
    assert_invariants(&merged);
  }

  #[test]
  fn merge_rekeys_colliding_ids() {
    let local = Dataset {
      issues: vec![issue(1, "Database timeout", 0)],
      events: vec![event(1, "Database timeout", 0)],
    };
    let incoming = snapshot(
      vec![issue(1, "Disk full", 1), issue(3, "Cache miss", 2)],
      vec![event(1, "Disk full", 1), event(3, "Cache miss", 2)],
    );

    let (merged, summary) = merge(local, &incoming).unwrap();
    assert_eq!(summary.issues_added, 2);
    assert_eq!(summary.issues_rekeyed, 1);
    assert_invariants(&merged);

    let disk = merged
      .issues
      .iter()
      .find(|i| i.fingerprint == fingerprint_of("Disk full"))
      .unwrap();
    assert_eq!(disk.id, 2);
    let cache = merged
      .issues
      .iter()
      .find(|i| i.fingerprint == fingerprint_of("Cache miss"))
      .unwrap();
    assert_eq!(cache.id, 3);
    assert_eq!(disk.event_count, 1);
  }

  #[test]
  fn merge_rekey_does_not_steal_later_incoming_id() {
    let local = Dataset {
      issues: vec![issue(1, "local", 0)],
      events: vec![event(1, "local", 0)],
    };
    let incoming = snapshot(
      vec![issue(1, "A", 1), issue(2, "B", 2)],
      vec![event(1, "A", 1), event(2, "B", 2)],
    );

    let (merged, summary) = merge(local, &incoming).unwrap();
    assert_eq!(summary.issues_rekeyed, 1);
    assert_eq!(summary.issues_added, 2);
    assert_invariants(&merged);

    let id_of = |message: &str| {
      merged
        .issues
        .iter()
        .find(|i| i.fingerprint == fingerprint_of(message))
        .map(|i| i.id)
        .unwrap()
    };
    assert_eq!(id_of("A"), 3);
    assert_eq!(id_of("B"), 2);
    assert!(merged
      .events
      .iter()
      .filter(|e| e.message == "B")
      .all(|e| e.issue_id == 2));
  }

  #[test]
  fn merge_assigns_fresh_event_ids() {
    let ev = event(1, "Disk full", 0);
    let local = Dataset {
      issues: vec![issue(1, "Disk full", 0)],
      events: vec![ev.clone()],
    };
    let incoming = snapshot(vec![issue(1, "Disk full", 0)], vec![ev.clone()]);

    let (merged, _) = merge(local, &incoming).unwrap();
    assert_eq!(merged.events.len(), 2);
    assert_ne!(merged.events[0].id, merged.events[1].id);
    assert_invariants(&merged);
  }

  #[test]
  fn merge_collapses_duplicate_incoming_fingerprints() {
    let incoming = snapshot(
      vec![issue(1, "Disk full", 0), issue(2, "Disk full", 1)],
      vec![event(1, "Disk full", 0), event(2, "Disk full", 1)],
    );
    let (merged, summary) = merge(Dataset::default(), &incoming).unwrap();
    assert_eq!(merged.issues.len(), 1);
    assert_eq!(merged.issues[0].event_count, 2);
    assert_eq!(summary.issues_merged, 1);
    assert_invariants(&merged);
  }

  #[test]
  fn merge_avoids_ids_held_by_orphans() {
    let local = Dataset {
      issues: vec![],
      events: vec![event(4, "orphan", 0)],
    };
    let incoming = snapshot(vec![issue(4, "Disk full", 0)], vec![]);
    let (merged, summary) = merge(local, &incoming).unwrap();
    assert_eq!(summary.issues_rekeyed, 1);
    assert_eq!(merged.issues[0].id, 5);
  }

  #[test]
  fn merge_rejects_invalid_snapshot() {
    let local = Dataset {
      issues: vec![issue(1, "a", 0)],
      events: vec![],
    };
    let incoming = snapshot(vec![issue(2, "b", 0)], vec![event(3, "b", 0)]);
    assert!(matches!(merge(local, &incoming), Err(VaultError::Validation { .. })));
  }
}
