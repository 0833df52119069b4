//! Read-only filtering, sorting and tailing over issues and events.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VaultError;
use crate::stats::{self, Stats};
use crate::store::Store;
use crate::types::{Event, Issue, Level, Status};

// ---------------------------------------------------------------------------
// Event filters
// ---------------------------------------------------------------------------

/// Conjunction of optional constraints. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
  pub level: Option<Level>,
  /// Event must carry every one of these tags.
  pub tags: BTreeSet<String>,
  /// Case-insensitive substring of the message.
  pub text: Option<String>,
  /// Inclusive lower bound.
  pub since: Option<DateTime<Utc>>,
  /// Exclusive upper bound.
  pub until: Option<DateTime<Utc>>,
  pub issue_id: Option<u64>,
}

impl EventFilter {
  pub fn level(mut self, level: Level) -> Self {
    self.level = Some(level);
    self
  }

  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }

  pub fn text(mut self, text: impl Into<String>) -> Self {
    self.text = Some(text.into());
    self
  }

  pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
    self.since = since;
    self.until = until;
    self
  }

  pub fn issue(mut self, issue_id: u64) -> Self {
    self.issue_id = Some(issue_id);
    self
  }

  pub fn matches(&self, ev: &Event) -> bool {
    if let Some(level) = self.level {
      if ev.level != level {
        return false;
      }
    }
    if let Some(id) = self.issue_id {
      if ev.issue_id != id {
        return false;
      }
    }
    if !ev.has_tags(&self.tags) {
      return false;
    }
    if let Some(since) = self.since {
      if ev.timestamp < since {
        return false;
      }
    }
    if let Some(until) = self.until {
      if ev.timestamp >= until {
        return false;
      }
    }
    match &self.text {
      Some(text) if !text.is_empty() => ev.message.to_lowercase().contains(&text.to_lowercase()),
      _ => true,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventOrder {
  /// Arrival order in the collection.
  #[default]
  Inserted,
  NewestFirst,
}

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
  pub filter: EventFilter,
  pub order: EventOrder,
  pub offset: usize,
  pub limit: Option<usize>,
}

impl From<EventFilter> for EventQuery {
  fn from(filter: EventFilter) -> Self {
    Self {
      filter,
      ..Self::default()
    }
  }
}

/// Events matching `query.filter`, ordered and paginated.
pub fn search_events(events: &[Event], query: &EventQuery) -> Vec<Event> {
  let mut matched: Vec<&Event> = events.iter().filter(|ev| query.filter.matches(ev)).collect();

  if query.order == EventOrder::NewestFirst {
    // Stable: equal timestamps keep the later arrival first.
    matched.reverse();
    matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
  }

  matched
    .into_iter()
    .skip(query.offset)
    .take(query.limit.unwrap_or(usize::MAX))
    .cloned()
    .collect()
}

// ---------------------------------------------------------------------------
// Issue listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSort {
  #[default]
  Id,
  CreatedAt,
  UpdatedAt,
  EventCount,
}

impl IssueSort {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
      "id" => Some(Self::Id),
      "created_at" | "created" => Some(Self::CreatedAt),
      "updated_at" | "updated" => Some(Self::UpdatedAt),
      "event_count" | "events" | "count" => Some(Self::EventCount),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
  pub status: Option<Status>,
  pub sort: IssueSort,
  pub descending: bool,
}

/// Issues with the requested status, sorted. Ties always break on id
/// ascending; `descending` flips only the primary key.
pub fn list_issues(issues: &[Issue], query: &IssueQuery) -> Vec<Issue> {
  let mut out: Vec<Issue> = issues
    .iter()
    .filter(|i| query.status.map_or(true, |s| i.status == s))
    .cloned()
    .collect();

  out.sort_by(|a, b| {
    let primary = match query.sort {
      IssueSort::Id => a.id.cmp(&b.id),
      IssueSort::CreatedAt => a.created_at.cmp(&b.created_at),
      IssueSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
      IssueSort::EventCount => a.event_count.cmp(&b.event_count),
    };
    let primary = if query.descending { primary.reverse() } else { primary };
    primary.then_with(|| a.id.cmp(&b.id))
  });
  out
}

// ---------------------------------------------------------------------------
// Tail
// ---------------------------------------------------------------------------

/// Position in the arrival order of events. Pass the cursor from one
/// `tail` batch into the next call to resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailCursor {
  pub last_id: Option<Uuid>,
  pub last_timestamp: Option<DateTime<Utc>>,
}

impl TailCursor {
  /// Cursor before the first event.
  pub fn start() -> Self {
    Self::default()
  }

  fn after(ev: &Event) -> Self {
    Self {
      last_id: Some(ev.id),
      last_timestamp: Some(ev.timestamp),
    }
  }
}

#[derive(Debug, Clone)]
pub struct TailBatch {
  pub events: Vec<Event>,
  pub cursor: TailCursor,
}

/// Cursor positioned after the last existing event.
pub fn cursor_at_end(events: &[Event]) -> TailCursor {
  events.last().map(TailCursor::after).unwrap_or_default()
}

/// Matching events that arrived strictly after `cursor`.
///
/// The cursor advances past every scanned event, matching or not. If the
/// cursor's event is gone (purged, collected), resumes with events at or
/// after its timestamp, so events sharing that timestamp may be repeated
/// but are never skipped.
pub fn tail(events: &[Event], filter: &EventFilter, cursor: &TailCursor) -> TailBatch {
  let fresh: Vec<&Event> = match cursor.last_id {
    None => events.iter().collect(),
    Some(id) => match events.iter().position(|ev| ev.id == id) {
      Some(pos) => events[pos + 1..].iter().collect(),
      None => {
        let after = cursor.last_timestamp;
        events
          .iter()
          .filter(|ev| ev.id != id && after.map_or(true, |t| ev.timestamp >= t))
          .collect()
      }
    },
  };

  let next = fresh
    .last()
    .map(|ev| TailCursor::after(ev))
    .unwrap_or_else(|| cursor.clone());

  TailBatch {
    events: fresh.into_iter().filter(|ev| filter.matches(ev)).cloned().collect(),
    cursor: next,
  }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Query engine over a store. Never writes.
pub struct QueryEngine<'a> {
  store: &'a Store,
}

impl<'a> QueryEngine<'a> {
  pub fn new(store: &'a Store) -> Self {
    Self { store }
  }

  pub fn search_events(&self, query: &EventQuery) -> Result<Vec<Event>, VaultError> {
    let dataset = self.store.load_dataset()?;
    Ok(search_events(&dataset.events, query))
  }

  pub fn list_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>, VaultError> {
    let dataset = self.store.load_dataset()?;
    Ok(list_issues(&dataset.issues, query))
  }

  pub fn compute_stats(&self) -> Result<Stats, VaultError> {
    let dataset = self.store.load_dataset()?;
    Ok(stats::compute(&dataset.issues, &dataset.events))
  }

  pub fn tail(&self, filter: &EventFilter, cursor: &TailCursor) -> Result<TailBatch, VaultError> {
    let dataset = self.store.load_dataset()?;
    Ok(tail(&dataset.events, filter, cursor))
  }

  pub fn cursor_at_end(&self) -> Result<TailCursor, VaultError> {
    let dataset = self.store.load_dataset()?;
    Ok(cursor_at_end(&dataset.events))
  }

  pub fn issue(&self, issue_id: u64) -> Result<Issue, VaultError> {
    let dataset = self.store.load_dataset()?;
    dataset
      .issue(issue_id)
      .cloned()
      .ok_or_else(|| VaultError::issue_not_found(issue_id))
  }

  /// An issue with all of its events in arrival order.
  pub fn show(&self, issue_id: u64) -> Result<(Issue, Vec<Event>), VaultError> {
    let dataset = self.store.load_dataset()?;
    let issue = dataset
      .issue(issue_id)
      .cloned()
      .ok_or_else(|| VaultError::issue_not_found(issue_id))?;
    let events = dataset
      .events
      .iter()
      .filter(|ev| ev.issue_id == issue_id)
      .cloned()
      .collect();
    Ok((issue, events))
  }
}
