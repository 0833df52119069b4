//! Durable collections with crash-safe, whole-file replacement.
//!
//! Each collection is one JSON array on disk. `save` writes a temporary
//! sibling, syncs it, then renames it over the target, so a reader sees
//! either the previous or the new complete file. No locking is done: one
//! writer process at a time, last writer wins.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::VaultError;
use crate::types::{Event, Issue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Issues,
  Events,
}

impl Collection {
  pub fn file_name(self) -> &'static str {
    match self {
      Self::Issues => "issues.json",
      Self::Events => "events.json",
    }
  }
}

/// File-backed store rooted at one data directory.
#[derive(Debug, Clone)]
pub struct Store {
  root: PathBuf,
}

impl Store {
  /// Does no I/O; the root is created on first save.
  pub fn open(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn path_of(&self, collection: Collection) -> PathBuf {
    self.root.join(collection.file_name())
  }

  /// Create the data root if missing. Idempotent.
  pub fn ensure_root(&self) -> Result<(), VaultError> {
    fs::create_dir_all(&self.root).map_err(|e| VaultError::io(&self.root, e))
  }

  /// Load a collection. A collection that was never written is empty.
  pub fn load<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, VaultError> {
    let path = self.path_of(collection);
    let bytes = match fs::read(&path) {
      Ok(b) => b,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(VaultError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|source| VaultError::CorruptData { path, source })
  }

  /// Replace a collection atomically.
  pub fn save<T: Serialize>(&self, collection: Collection, records: &[T]) -> Result<(), VaultError> {
    self.ensure_root()?;
    let bytes = serde_json::to_vec_pretty(records)?;
    write_atomic(&self.path_of(collection), &bytes)?;
    tracing::debug!(
      collection = collection.file_name(),
      records = records.len(),
      "collection saved"
    );
    Ok(())
  }

  pub fn load_dataset(&self) -> Result<Dataset, VaultError> {
    let issues = self.load(Collection::Issues)?;
    let events = self.load(Collection::Events)?;
    let mut dataset = Dataset { issues, events };
    dataset.refresh_counts();
    Ok(dataset)
  }
}

/// Path of the temporary sibling used while replacing `path`.
pub fn tmp_path_for(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

/// Write `bytes` to a temporary sibling, sync, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
  let tmp = tmp_path_for(path);

  let result = (|| -> std::io::Result<()> {
    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.write_all(b"\n")?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    fs::rename(&tmp, path)
  })();

  if let Err(e) = result {
    let _ = fs::remove_file(&tmp);
    return Err(VaultError::io(path, e));
  }

  // Persist the rename itself; not every platform can open a directory.
  if let Some(dir) = path.parent() {
    if let Ok(d) = File::open(dir) {
      let _ = d.sync_all();
    }
  }
  Ok(())
}

/// Both collections, loaded together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
  pub issues: Vec<Issue>,
  pub events: Vec<Event>,
}

impl Dataset {
  /// Recompute every issue's `event_count` from the events.
  pub fn refresh_counts(&mut self) {
    let mut counts: HashMap<u64, u64> = HashMap::new();
    for ev in &self.events {
      *counts.entry(ev.issue_id).or_insert(0) += 1;
    }
    for issue in &mut self.issues {
      issue.event_count = counts.get(&issue.id).copied().unwrap_or(0);
    }
  }

  pub fn issue(&self, id: u64) -> Option<&Issue> {
    self.issues.iter().find(|i| i.id == id)
  }

  pub fn issue_mut(&mut self, id: u64) -> Option<&mut Issue> {
    self.issues.iter_mut().find(|i| i.id == id)
  }

  /// One past the highest issue id referenced anywhere, so a fresh id can
  /// never adopt events left behind by an earlier issue.
  pub fn next_issue_id(&self) -> u64 {
    let max_issue = self.issues.iter().map(|i| i.id).max().unwrap_or(0);
    let max_owner = self.events.iter().map(|e| e.issue_id).max().unwrap_or(0);
    max_issue.max(max_owner) + 1
  }
}
