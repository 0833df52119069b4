//! Status transitions, renames, and cascade/repair deletions.
//!
//! Deletions write the issues collection before the events collection, so a
//! crash in between can only leave orphaned events behind, which `gc`
//! removes.

use chrono::{DateTime, Utc};

use crate::error::VaultError;
use crate::store::{Collection, Dataset, Store};
use crate::types::Status;

pub struct LifecycleManager<'a> {
  store: &'a Store,
  title_max_chars: usize,
}

impl<'a> LifecycleManager<'a> {
  pub fn new(store: &'a Store, title_max_chars: usize) -> Self {
    Self {
      store,
      title_max_chars,
    }
  }

  /// Set an issue's status. Setting the current status writes nothing.
  pub fn set_status(&self, issue_id: u64, status: Status) -> Result<(), VaultError> {
    let mut dataset = self.store.load_dataset()?;
    let issue = dataset
      .issue_mut(issue_id)
      .ok_or_else(|| VaultError::issue_not_found(issue_id))?;
    if issue.status == status {
      return Ok(());
    }
    let previous = issue.status;
    issue.status = status;
    issue.touch(Utc::now());
    self.store.save(Collection::Issues, &dataset.issues)?;
    tracing::info!(issue_id, from = %previous, to = %status, "issue status changed");
    Ok(())
  }

  pub fn reopen(&self, issue_id: u64) -> Result<(), VaultError> {
    self.set_status(issue_id, Status::Open)
  }

  pub fn resolve(&self, issue_id: u64) -> Result<(), VaultError> {
    self.set_status(issue_id, Status::Resolved)
  }

  /// Rename an issue. Fingerprint and grouping are untouched.
  pub fn set_title(&self, issue_id: u64, title: &str) -> Result<(), VaultError> {
    let title = title.trim();
    if title.is_empty() {
      return Err(VaultError::validation("title", "must not be empty"));
    }
    let title: String = title.chars().take(self.title_max_chars).collect();

    let mut dataset = self.store.load_dataset()?;
    let issue = dataset
      .issue_mut(issue_id)
      .ok_or_else(|| VaultError::issue_not_found(issue_id))?;
    issue.title = title;
    self.store.save(Collection::Issues, &dataset.issues)?;
    tracing::info!(issue_id, "issue renamed");
    Ok(())
  }

  /// Delete an issue and every event it owns. Returns the events removed.
  pub fn purge(&self, issue_id: u64) -> Result<usize, VaultError> {
    let mut dataset = self.store.load_dataset()?;
    if dataset.issue(issue_id).is_none() {
      return Err(VaultError::issue_not_found(issue_id));
    }
    dataset.issues.retain(|i| i.id != issue_id);
    let before = dataset.events.len();
    dataset.events.retain(|e| e.issue_id != issue_id);
    let removed = before - dataset.events.len();

    self.commit_deletion(dataset)?;
    tracing::info!(issue_id, events_removed = removed, "issue purged");
    Ok(removed)
  }

  /// Delete events whose owning issue no longer exists.
  pub fn gc(&self) -> Result<usize, VaultError> {
    let mut dataset = self.store.load_dataset()?;
    let removed = remove_orphans(&mut dataset);
    if removed > 0 {
      self.store.save(Collection::Events, &dataset.events)?;
    }
    tracing::info!(events_removed = removed, "garbage collection finished");
    Ok(removed)
  }

  /// Delete events recorded before `cutoff`. Issues are kept.
  pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, VaultError> {
    let mut dataset = self.store.load_dataset()?;
    let before = dataset.events.len();
    dataset.events.retain(|e| e.timestamp >= cutoff);
    let removed = before - dataset.events.len();
    if removed > 0 {
      self.store.save(Collection::Events, &dataset.events)?;
    }
    tracing::info!(events_removed = removed, cutoff = %cutoff, "old events pruned");
    Ok(removed)
  }

  /// Delete every issue and event.
  pub fn wipe(&self) -> Result<(), VaultError> {
    self.commit_deletion(Dataset::default())?;
    tracing::warn!("all issues and events deleted");
    Ok(())
  }

  fn commit_deletion(&self, mut dataset: Dataset) -> Result<(), VaultError> {
    dataset.refresh_counts();
    self.store.save(Collection::Issues, &dataset.issues)?;
    self.store.save(Collection::Events, &dataset.events)
  }
}

/// Drop events without an owning issue. Returns how many were dropped.
pub fn remove_orphans(dataset: &mut Dataset) -> usize {
  let valid: std::collections::HashSet<u64> = dataset.issues.iter().map(|i| i.id).collect();
  let before = dataset.events.len();
  dataset.events.retain(|e| valid.contains(&e.issue_id));
  before - dataset.events.len()
}
