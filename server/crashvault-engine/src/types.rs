//! Core types for the vault (persisted records + JSON contracts).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the caller sends)
// ---------------------------------------------------------------------------

/// One inbound event line. Unknown fields are silently ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEvent {
  pub message: String,
  #[serde(default)]
  pub level: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  /// Scalars other than strings are stringified during normalization.
  #[serde(default)]
  pub context: BTreeMap<String, serde_json::Value>,
  #[serde(default, alias = "stack")]
  pub stacktrace: Option<String>,
  #[serde(default)]
  pub host: Option<String>,
}

// ---------------------------------------------------------------------------
// Level / status enums (normalized)
// ---------------------------------------------------------------------------

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  Debug,
  Info,
  Warning,
  #[default]
  Error,
  Critical,
}

impl Level {
  pub const ALL: [Level; 5] = [
    Self::Debug,
    Self::Info,
    Self::Warning,
    Self::Error,
    Self::Critical,
  ];

  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "debug" => Some(Self::Debug),
      "info" => Some(Self::Info),
      "warning" | "warn" => Some(Self::Warning),
      "error" | "err" => Some(Self::Error),
      "critical" | "fatal" | "crit" => Some(Self::Critical),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Debug => "debug",
      Self::Info => "info",
      Self::Warning => "warning",
      Self::Error => "error",
      Self::Critical => "critical",
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  #[default]
  Open,
  Resolved,
  Ignored,
}

impl Status {
  pub const ALL: [Status; 3] = [Self::Open, Self::Resolved, Self::Ignored];

  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "open" | "reopen" => Some(Self::Open),
      "resolved" | "resolve" => Some(Self::Resolved),
      "ignored" | "ignore" => Some(Self::Ignored),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Open => "open",
      Self::Resolved => "resolved",
      Self::Ignored => "ignored",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// A stable hex string identifying a unique issue group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// One recorded occurrence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  pub id: Uuid,
  pub issue_id: u64,
  pub message: String,
  #[serde(default)]
  pub level: Level,
  #[serde(default)]
  pub tags: BTreeSet<String>,
  #[serde(default)]
  pub context: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub stacktrace: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub host: Option<String>,
  pub timestamp: DateTime<Utc>,
}

impl Event {
  pub fn has_tags(&self, wanted: &BTreeSet<String>) -> bool {
    wanted.is_subset(&self.tags)
  }
}

/// A group of events sharing a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
  pub id: u64,
  pub fingerprint: Fingerprint,
  pub title: String,
  #[serde(default)]
  pub status: Status,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Derived from the events collection; refreshed on every write.
  #[serde(default)]
  pub event_count: u64,
}

impl Issue {
  /// Advance `updated_at`, never moving it backwards.
  pub fn touch(&mut self, ts: DateTime<Utc>) {
    if ts > self.updated_at {
      self.updated_at = ts;
    }
  }
}

/// Canonical event contents after normalization + validation, before an
/// id, owner and timestamp are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
  pub message: String,
  pub level: Level,
  pub tags: BTreeSet<String>,
  pub context: BTreeMap<String, String>,
  pub stacktrace: String,
  pub host: Option<String>,
}

impl NewEvent {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      level: Level::default(),
      tags: BTreeSet::new(),
      context: BTreeMap::new(),
      stacktrace: String::new(),
      host: None,
    }
  }

  pub fn with_level(mut self, level: Level) -> Self {
    self.level = level;
    self
  }

  pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }

  pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.context.insert(key.into(), value.into());
    self
  }
}

// ---------------------------------------------------------------------------
// Snapshot interchange
// ---------------------------------------------------------------------------

pub const SNAPSHOT_VERSION: u32 = 1;

/// Self-contained export of every issue and event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  #[serde(default = "snapshot_version")]
  pub version: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exported_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub issues: Vec<Issue>,
  #[serde(default)]
  pub events: Vec<Event>,
}

fn snapshot_version() -> u32 {
  SNAPSHOT_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
  Replace,
  Merge,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
  pub issues_added: usize,
  pub issues_merged: usize,
  pub issues_rekeyed: usize,
  pub events_imported: usize,
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Output line for a successfully recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutput {
  pub event_id: Uuid,
  pub issue_id: u64,
  pub issue_created: bool,
}

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
