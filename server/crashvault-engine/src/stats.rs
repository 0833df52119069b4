//! Aggregate counts over the current issues and events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Event, Issue, Level, Status};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
  pub total_issues: u64,
  pub total_events: u64,
  /// Every status is present, zero or not.
  pub by_status: BTreeMap<Status, u64>,
  /// Every level is present, zero or not.
  pub by_level: BTreeMap<Level, u64>,
  pub by_tag: BTreeMap<String, u64>,
  /// Event counts keyed by UTC day ("YYYY-MM-DD").
  pub by_day: BTreeMap<String, u64>,
}

/// Format a timestamp into a day bucket key: "YYYY-MM-DD".
pub fn day_bucket(ts: &DateTime<Utc>) -> String {
  ts.format("%Y-%m-%d").to_string()
}

/// Pure reduction over both collections.
pub fn compute(issues: &[Issue], events: &[Event]) -> Stats {
  let mut stats = Stats {
    total_issues: issues.len() as u64,
    total_events: events.len() as u64,
    by_status: Status::ALL.iter().map(|s| (*s, 0)).collect(),
    by_level: Level::ALL.iter().map(|l| (*l, 0)).collect(),
    ..Stats::default()
  };

  for issue in issues {
    *stats.by_status.entry(issue.status).or_insert(0) += 1;
  }

  for ev in events {
    *stats.by_level.entry(ev.level).or_insert(0) += 1;
    for tag in &ev.tags {
      *stats.by_tag.entry(tag.clone()).or_insert(0) += 1;
    }
    *stats.by_day.entry(day_bucket(&ev.timestamp)).or_insert(0) += 1;
  }

  stats
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Fingerprint;
  use chrono::TimeZone;
  use uuid::Uuid;

  fn event(level: Level, tags: &[&str], day: u32) -> Event {
    Event {
      id: Uuid::new_v4(),
      issue_id: 1,
      message: "boom".into(),
      level,
      tags: tags.iter().map(|t| t.to_string()).collect(),
      context: Default::default(),
      stacktrace: String::new(),
      host: None,
      timestamp: Utc.with_ymd_and_hms(2025, 1, day, 12, 0, 0).unwrap(),
    }
  }

  fn issue(id: u64, status: Status) -> Issue {
    let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Issue {
      id,
      fingerprint: Fingerprint(format!("fp{}", id)),
      title: "t".into(),
      status,
      created_at: ts,
      updated_at: ts,
      event_count: 0,
    }
  }

  #[test]
  fn day_bucket_format() {
    let t = Utc.with_ymd_and_hms(2025, 6, 1, 14, 5, 30).unwrap();
    assert_eq!(day_bucket(&t), "2025-06-01");
  }

  #[test]
  fn empty_store_reports_zeroes() {
    let stats = compute(&[], &[]);
    assert_eq!(stats.total_events, 0);
    assert_eq!(stats.by_level.len(), Level::ALL.len());
    assert!(stats.by_level.values().all(|v| *v == 0));
    assert_eq!(stats.by_status[&Status::Open], 0);
    assert!(stats.by_tag.is_empty());
  }

  #[test]
  fn counts_levels_tags_statuses_and_days() {
    let issues = vec![
      issue(1, Status::Open),
      issue(2, Status::Resolved),
      issue(3, Status::Open),
    ];
    let events = vec![
      event(Level::Error, &["db", "prod"], 1),
      event(Level::Error, &["db"], 1),
      event(Level::Critical, &[], 2),
    ];

    let stats = compute(&issues, &events);
    assert_eq!(stats.total_issues, 3);
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.by_status[&Status::Open], 2);
    assert_eq!(stats.by_status[&Status::Resolved], 1);
    assert_eq!(stats.by_status[&Status::Ignored], 0);
    assert_eq!(stats.by_level[&Level::Error], 2);
    assert_eq!(stats.by_level[&Level::Critical], 1);
    assert_eq!(stats.by_tag["db"], 2);
    assert_eq!(stats.by_tag["prod"], 1);
    assert_eq!(stats.by_day["2025-01-01"], 2);
    assert_eq!(stats.by_day["2025-01-02"], 1);
  }

  #[test]
  fn serializes_enum_keys_as_strings() {
    let stats = compute(&[issue(1, Status::Open)], &[event(Level::Warning, &[], 3)]);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["by_level"]["warning"], 1);
    assert_eq!(json["by_status"]["open"], 1);
  }
}
