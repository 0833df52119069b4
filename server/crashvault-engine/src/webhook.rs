//! Best-effort webhook notification of newly recorded events.
//!
//! Delivery is fire-and-forget: at most once, no retry, no acknowledgment
//! tracking. Every provider attempt runs in its own task under a timeout;
//! failures are logged and reported, never propagated.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use uuid::Uuid;

use crate::error::{DeliveryError, VaultError};
use crate::fingerprint;
use crate::providers;
use crate::types::{Event, Issue, Level, Status};

/// One configured webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
  pub id: String,
  /// Provider variant: "slack", "discord" or "http".
  #[serde(rename = "type", alias = "kind")]
  pub kind: String,
  pub url: String,
  #[serde(default)]
  pub name: Option<String>,
  /// HMAC-SHA256 signing key (http provider only).
  #[serde(default)]
  pub secret: Option<String>,
  /// Only these levels are delivered; empty means all.
  #[serde(default, alias = "events")]
  pub levels: Vec<String>,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

fn default_enabled() -> bool {
  true
}

impl WebhookConfig {
  pub fn new(id: impl Into<String>, kind: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      kind: kind.into(),
      url: url.into(),
      name: None,
      secret: None,
      levels: Vec::new(),
      enabled: true,
    }
  }

  /// Enabled and, when a level filter is set, listed in it.
  pub fn accepts(&self, level: Level) -> bool {
    if !self.enabled {
      return false;
    }
    self.levels.is_empty()
      || self
        .levels
        .iter()
        .any(|l| l.trim().eq_ignore_ascii_case(level.as_str()))
  }
}

/// Capability every provider variant implements. Variants differ only in
/// payload shape and target.
pub trait WebhookProvider: Send + Sync {
  fn config(&self) -> &WebhookConfig;

  fn format_payload(&self, event: &Event, issue: &Issue) -> serde_json::Value;

  fn send<'a>(&'a self, payload: serde_json::Value) -> BoxFuture<'a, Result<(), DeliveryError>>;

  fn id(&self) -> &str {
    &self.config().id
  }

  fn accepts(&self, level: Level) -> bool {
    self.config().accepts(level)
  }
}

/// Per-provider outcome of one dispatch: provider id -> delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
  pub results: BTreeMap<String, bool>,
}

impl DispatchReport {
  pub fn delivered(&self) -> usize {
    self.results.values().filter(|ok| **ok).count()
  }

  pub fn failed(&self) -> usize {
    self.results.values().filter(|ok| !**ok).count()
  }
}

/// Fans one event out to every accepting provider.
#[derive(Clone)]
pub struct Dispatcher {
  providers: Arc<Vec<Arc<dyn WebhookProvider>>>,
  timeout: Duration,
}

impl Dispatcher {
  pub fn new(providers: Vec<Arc<dyn WebhookProvider>>, timeout: Duration) -> Self {
    Self {
      providers: Arc::new(providers),
      timeout,
    }
  }

  /// No providers; every dispatch is an empty report.
  pub fn disabled() -> Self {
    Self::new(Vec::new(), Duration::from_secs(10))
  }

  /// Build providers from configuration. Entries that cannot be turned into
  /// a provider (unknown kind, bad URL) are logged and skipped.
  pub fn from_config(configs: &[WebhookConfig], timeout: Duration) -> Self {
    if configs.is_empty() {
      return Self::new(Vec::new(), timeout);
    }

    let client = match reqwest::Client::builder().timeout(timeout).build() {
      Ok(c) => c,
      Err(e) => {
        tracing::error!(error = %e, "webhook http client unavailable; webhooks disabled");
        return Self::new(Vec::new(), timeout);
      }
    };

    let providers = configs
      .iter()
      .filter_map(|cfg| match providers::build(cfg, &client) {
        Ok(p) => Some(p),
        Err(e) => {
          tracing::warn!(webhook_id = %cfg.id, kind = %cfg.kind, error = %e, "webhook skipped");
          None
        }
      })
      .collect();
    Self::new(providers, timeout)
  }

  pub fn is_empty(&self) -> bool {
    self.providers.is_empty()
  }

  pub fn len(&self) -> usize {
    self.providers.len()
  }

  /// Deliver to every accepting provider concurrently and wait for all
  /// attempts. Never fails; see the report for per-provider results.
  pub async fn dispatch(&self, event: &Event, issue: &Issue) -> DispatchReport {
    let event = Arc::new(event.clone());
    let issue = Arc::new(issue.clone());

    let attempts = self
      .providers
      .iter()
      .filter(|p| p.accepts(event.level))
      .map(|provider| {
        let provider = Arc::clone(provider);
        let id = provider.id().to_string();
        let event = Arc::clone(&event);
        let issue = Arc::clone(&issue);
        let timeout = self.timeout;
        let handle = tokio::spawn(async move { attempt(provider.as_ref(), &event, &issue, timeout).await });
        async move {
          let result = match handle.await {
            Ok(r) => r,
            Err(e) => Err(DeliveryError::Config(format!("delivery task failed: {}", e))),
          };
          (id, result)
        }
      });

    let mut report = DispatchReport::default();
    for (id, result) in join_all(attempts).await {
      match &result {
        Ok(()) => tracing::info!(webhook_id = %id, event_id = %event.id, "webhook sent"),
        Err(e) => tracing::warn!(webhook_id = %id, event_id = %event.id, error = %e, "webhook failed"),
      }
      report.results.insert(id, result.is_ok());
    }
    report
  }

  /// Start a dispatch without waiting for it.
  ///
  /// Inside a tokio runtime the dispatch is spawned there and its handle
  /// returned. Outside one, it runs on a background thread with a private
  /// runtime and `None` is returned.
  pub fn notify(&self, event: &Event, issue: &Issue) -> Option<JoinHandle<DispatchReport>> {
    if self.is_empty() {
      return None;
    }
    let this = self.clone();
    let event = event.clone();
    let issue = issue.clone();

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => Some(handle.spawn(async move { this.dispatch(&event, &issue).await })),
      Err(_) => {
        std::thread::spawn(move || {
          match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => {
              rt.block_on(this.dispatch(&event, &issue));
            }
            Err(e) => tracing::error!(error = %e, "webhook runtime unavailable; notification dropped"),
          }
        });
        None
      }
    }
  }

  /// Send a synthetic info-level event to one provider, ignoring its level
  /// filter. Returns whether it was delivered.
  pub async fn test(&self, provider_id: &str) -> Result<bool, VaultError> {
    let provider = self
      .providers
      .iter()
      .find(|p| p.id() == provider_id)
      .ok_or_else(|| VaultError::webhook_not_found(provider_id))?;

    let (event, issue) = test_event();
    let result = attempt(provider.as_ref(), &event, &issue, self.timeout).await;
    if let Err(e) = &result {
      tracing::warn!(webhook_id = %provider_id, error = %e, "webhook test failed");
    }
    Ok(result.is_ok())
  }
}

/// Owns in-flight fan-outs started by `notify` for a long-running caller.
/// Finished fan-outs are dropped on `reap`, so memory tracks only what is
/// still pending.
#[derive(Default)]
pub struct DeliveryTracker {
  tasks: JoinSet<Result<DispatchReport, JoinError>>,
}

impl DeliveryTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take ownership of a pending fan-out. Must be called within a runtime.
  pub fn track(&mut self, handle: JoinHandle<DispatchReport>) {
    self.tasks.spawn(handle);
  }

  pub fn pending(&self) -> usize {
    self.tasks.len()
  }

  /// Collect fan-outs that already finished without waiting. Returns how
  /// many were collected.
  pub fn reap(&mut self) -> usize {
    let mut reaped = 0;
    while let Some(done) = self.tasks.try_join_next() {
      log_finished(done);
      reaped += 1;
    }
    reaped
  }

  /// Wait for every remaining fan-out.
  pub async fn drain(&mut self) {
    while let Some(done) = self.tasks.join_next().await {
      log_finished(done);
    }
  }
}

fn log_finished(done: Result<Result<DispatchReport, JoinError>, JoinError>) {
  match done.and_then(|inner| inner) {
    Ok(report) => tracing::debug!(
      delivered = report.delivered(),
      failed = report.failed(),
      "webhook fan-out finished"
    ),
    Err(e) => tracing::warn!(error = %e, "webhook delivery task aborted"),
  }
}

async fn attempt(
  provider: &dyn WebhookProvider,
  event: &Event,
  issue: &Issue,
  timeout: Duration,
) -> Result<(), DeliveryError> {
  let payload = provider.format_payload(event, issue);
  match tokio::time::timeout(timeout, provider.send(payload)).await {
    Ok(result) => result,
    Err(_) => Err(DeliveryError::Timeout(timeout)),
  }
}

fn test_event() -> (Event, Issue) {
  let message = "This is a test notification from Crashvault";
  let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
  let event = Event {
    id: Uuid::new_v4(),
    issue_id: 0,
    message: message.into(),
    level: Level::Info,
    tags: std::iter::once("test".to_string()).collect(),
    context: BTreeMap::new(),
    stacktrace: String::new(),
    host: Some("crashvault-test".into()),
    timestamp: ts,
  };
  let issue = Issue {
    id: 0,
    fingerprint: fingerprint::fingerprint_of(message),
    title: message.into(),
    status: Status::Open,
    created_at: ts,
    updated_at: ts,
    event_count: 1,
  };
  (event, issue)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Provider that never touches the network.
  struct Fake {
    config: WebhookConfig,
    outcome: fn() -> Result<(), DeliveryError>,
    delay: Duration,
    sends: AtomicUsize,
  }

  impl Fake {
    fn new(id: &str, outcome: fn() -> Result<(), DeliveryError>) -> Self {
      Self {
        config: WebhookConfig::new(id, "fake", "http://unused.invalid"),
        outcome,
        delay: Duration::ZERO,
        sends: AtomicUsize::new(0),
      }
    }
  }

  impl WebhookProvider for Fake {
    fn config(&self) -> &WebhookConfig {
      &self.config
    }

    fn format_payload(&self, event: &Event, _issue: &Issue) -> serde_json::Value {
      serde_json::json!({ "message": event.message })
    }

    fn send<'a>(&'a self, _payload: serde_json::Value) -> BoxFuture<'a, Result<(), DeliveryError>> {
      Box::pin(async move {
        self.sends.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        (self.outcome)()
      })
    }
  }

  fn dyns(list: &[&Arc<Fake>]) -> Vec<Arc<dyn WebhookProvider>> {
    list
      .iter()
      .map(|p| {
        let p: Arc<Fake> = Arc::clone(*p);
        p as Arc<dyn WebhookProvider>
      })
      .collect()
  }

  fn sample() -> (Event, Issue) {
    let (mut event, issue) = test_event();
    event.level = Level::Error;
    (event, issue)
  }

  #[test]
  fn config_level_filter() {
    let mut cfg = WebhookConfig::new("w1", "slack", "https://hooks.slack.com/x");
    assert!(cfg.accepts(Level::Debug));
    cfg.levels = vec!["ERROR".into(), "critical".into()];
    assert!(cfg.accepts(Level::Error));
    assert!(!cfg.accepts(Level::Warning));
    cfg.enabled = false;
    assert!(!cfg.accepts(Level::Error));
  }

  #[test]
  fn config_accepts_alias_field_names() {
    let cfg: WebhookConfig = serde_json::from_str(
      r#"{"id":"a1","type":"discord","url":"https://discord.test/hook","events":["error"]}"#,
    )
    .unwrap();
    assert_eq!(cfg.kind, "discord");
    assert_eq!(cfg.levels, vec!["error".to_string()]);
    assert!(cfg.enabled);
  }

  #[tokio::test]
  async fn failure_does_not_stop_siblings() {
    let ok = Arc::new(Fake::new("ok", || Ok(())));
    let bad = Arc::new(Fake::new("bad", || Err(DeliveryError::Status(500))));
    let dispatcher = Dispatcher::new(dyns(&[&bad, &ok]), Duration::from_secs(1));

    let (event, issue) = sample();
    let report = dispatcher.dispatch(&event, &issue).await;
    assert!(report.results["ok"]);
    assert!(!report.results["bad"]);
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(ok.sends.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn slow_provider_times_out() {
    let mut slow = Fake::new("slow", || Ok(()));
    slow.delay = Duration::from_secs(5);
    let dispatcher = Dispatcher::new(dyns(&[&Arc::new(slow)]), Duration::from_millis(50));

    let (event, issue) = sample();
    let report = dispatcher.dispatch(&event, &issue).await;
    assert!(!report.results["slow"]);
  }

  #[tokio::test]
  async fn level_filter_skips_provider() {
    let mut picky = Fake::new("picky", || Ok(()));
    picky.config.levels = vec!["critical".into()];
    let picky = Arc::new(picky);
    let dispatcher = Dispatcher::new(dyns(&[&picky]), Duration::from_secs(1));

    let (event, issue) = sample();
    let report = dispatcher.dispatch(&event, &issue).await;
    assert!(report.results.is_empty());
    assert_eq!(picky.sends.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn notify_spawns_on_current_runtime() {
    let ok = Arc::new(Fake::new("ok", || Ok(())));
    let dispatcher = Dispatcher::new(dyns(&[&ok]), Duration::from_secs(1));
    let (event, issue) = sample();

    let handle = dispatcher.notify(&event, &issue).expect("spawned");
    let report = handle.await.unwrap();
    assert_eq!(report.delivered(), 1);
  }

  #[test]
  fn notify_without_runtime_runs_in_background() {
    let ok = Arc::new(Fake::new("ok", || Ok(())));
    let dispatcher = Dispatcher::new(dyns(&[&ok]), Duration::from_secs(1));
    let (event, issue) = sample();

    assert!(dispatcher.notify(&event, &issue).is_none());
    for _ in 0..100 {
      if ok.sends.load(Ordering::SeqCst) == 1 {
        return;
      }
      std::thread::sleep(Duration::from_millis(20));
    }
    panic!("background delivery never ran");
  }

  #[tokio::test]
  async fn test_send_unknown_provider_is_not_found() {
    let dispatcher = Dispatcher::disabled();
    assert!(matches!(
      dispatcher.test("missing").await,
      Err(VaultError::NotFound { .. })
    ));
  }

  #[tokio::test]
  async fn test_send_ignores_level_filter() {
    let mut picky = Fake::new("picky", || Ok(()));
    picky.config.levels = vec!["critical".into()];
    let dispatcher = Dispatcher::new(dyns(&[&Arc::new(picky)]), Duration::from_secs(1));
    assert!(dispatcher.test("picky").await.unwrap());
  }

  #[tokio::test]
  async fn tracker_releases_finished_fan_outs() {
    let ok = Arc::new(Fake::new("ok", || Ok(())));
    let dispatcher = Dispatcher::new(dyns(&[&ok]), Duration::from_secs(1));
    let (event, issue) = sample();

    let mut tracker = DeliveryTracker::new();
    for _ in 0..3 {
      tracker.track(dispatcher.notify(&event, &issue).expect("spawned"));
    }
    assert_eq!(tracker.pending(), 3);

    let mut reaped = 0;
    for _ in 0..100 {
      reaped += tracker.reap();
      if tracker.pending() == 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(reaped, 3);
    assert_eq!(tracker.pending(), 0);
    assert_eq!(ok.sends.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn tracker_drain_waits_for_pending() {
    let mut slow = Fake::new("slow", || Ok(()));
    slow.delay = Duration::from_millis(50);
    let slow = Arc::new(slow);
    let dispatcher = Dispatcher::new(dyns(&[&slow]), Duration::from_secs(1));
    let (event, issue) = sample();

    let mut tracker = DeliveryTracker::new();
    tracker.track(dispatcher.notify(&event, &issue).expect("spawned"));
    tracker.drain().await;
    assert_eq!(tracker.pending(), 0);
    assert_eq!(slow.sends.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn unknown_kinds_are_skipped() {
    let configs = vec![
      WebhookConfig::new("a", "teams", "https://example.test/hook"),
      WebhookConfig::new("b", "slack", "not a url"),
      WebhookConfig::new("c", "http", "https://example.test/hook"),
    ];
    let dispatcher = Dispatcher::from_config(&configs, Duration::from_secs(1));
    assert_eq!(dispatcher.len(), 1);
  }
}
