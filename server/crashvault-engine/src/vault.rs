//! The vault: one data root, its store, and the webhook dispatcher.
//!
//! Recording is a read-modify-write over both collections. Issues are
//! written before events, so an interrupted record leaves at worst an issue
//! without its first event, never an event without its issue.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::error::VaultError;
use crate::fingerprint;
use crate::lifecycle::LifecycleManager;
use crate::normalize;
use crate::query::QueryEngine;
use crate::store::{Collection, Store};
use crate::transfer::TransferEngine;
use crate::types::{Event, InboundEvent, Issue, NewEvent, RecordOutput};
use crate::webhook::{DispatchReport, Dispatcher};

/// Result of recording one event.
#[derive(Debug)]
pub struct RecordOutcome {
  pub event: Event,
  /// The owning issue as persisted after this event.
  pub issue: Issue,
  pub issue_created: bool,
  /// Pending webhook fan-out, when started on the caller's runtime.
  pub delivery: Option<JoinHandle<DispatchReport>>,
}

impl From<&RecordOutcome> for RecordOutput {
  fn from(outcome: &RecordOutcome) -> Self {
    Self {
      event_id: outcome.event.id,
      issue_id: outcome.issue.id,
      issue_created: outcome.issue_created,
    }
  }
}

pub struct Vault {
  config: Config,
  store: Store,
  dispatcher: Dispatcher,
}

impl Vault {
  /// Open the vault at `config.root`, creating the directory if needed.
  pub fn open(config: Config) -> Result<Self, VaultError> {
    let dispatcher = Dispatcher::from_config(&config.webhooks, config.webhook_timeout);
    Self::with_dispatcher(config, dispatcher)
  }

  pub fn with_dispatcher(config: Config, dispatcher: Dispatcher) -> Result<Self, VaultError> {
    let store = Store::open(config.root.clone());
    store.ensure_root()?;
    tracing::debug!(root = %store.root().display(), webhooks = dispatcher.len(), "vault opened");
    Ok(Self {
      config,
      store,
      dispatcher,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn dispatcher(&self) -> &Dispatcher {
    &self.dispatcher
  }

  pub fn query(&self) -> QueryEngine<'_> {
    QueryEngine::new(&self.store)
  }

  pub fn lifecycle(&self) -> LifecycleManager<'_> {
    LifecycleManager::new(&self.store, self.config.title_max_chars)
  }

  pub fn transfer(&self) -> TransferEngine<'_> {
    TransferEngine::new(&self.store)
  }

  /// Normalize a raw event and record it.
  pub fn record_inbound(&self, raw: &InboundEvent) -> Result<RecordOutcome, VaultError> {
    let event = normalize::normalize(raw)?;
    self.record(event)
  }

  /// Record an event stamped with the current time.
  pub fn record(&self, event: NewEvent) -> Result<RecordOutcome, VaultError> {
    self.record_at(event, Utc::now())
  }

  /// Record an event with an explicit timestamp.
  ///
  /// Persistence completes before any webhook is attempted; delivery
  /// failures never surface here.
  pub fn record_at(&self, event: NewEvent, ts: DateTime<Utc>) -> Result<RecordOutcome, VaultError> {
    let message = event.message.trim();
    if message.is_empty() {
      return Err(VaultError::validation("message", "must not be empty"));
    }

    let fp = fingerprint::compute(message, self.config.fingerprint_ignore_case);
    let mut dataset = self.store.load_dataset()?;
    let (idx, issue_created) = fingerprint::resolve_or_create_issue(&mut dataset, &fp, message, ts);
    let issue_id = dataset.issues[idx].id;

    let event = Event {
      id: Uuid::new_v4(),
      issue_id,
      message: message.to_string(),
      level: event.level,
      tags: event.tags,
      context: event.context,
      stacktrace: event.stacktrace,
      host: event.host,
      timestamp: ts,
    };
    dataset.events.push(event.clone());
    dataset.refresh_counts();

    self.store.save(Collection::Issues, &dataset.issues)?;
    self.store.save(Collection::Events, &dataset.events)?;

    let issue = dataset.issues[idx].clone();
    tracing::info!(
      issue_id,
      event_id = %event.id,
      level = %event.level,
      issue_created,
      "event recorded"
    );

    let delivery = self.dispatcher.notify(&event, &issue);
    Ok(RecordOutcome {
      event,
      issue,
      issue_created,
      delivery,
    })
  }
}
