//! Crashvault engine: a local-first vault for error events.
//!
//! Records discrete error events, groups them into issues by a stable
//! message fingerprint, and persists both as JSON collections under one
//! data root. Issues can be searched, tailed, triaged, exported and
//! imported. Newly recorded events fan out to configured webhooks on a
//! best-effort basis.
//!
//! No database and no server; every operation is a read-modify-write of
//! the on-disk collections.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod normalize;
pub mod providers;
pub mod query;
pub mod stats;
pub mod store;
pub mod transfer;
pub mod types;
pub mod vault;
pub mod webhook;

pub use config::Config;
pub use error::{DeliveryError, VaultError};
pub use query::{EventFilter, EventOrder, EventQuery, IssueQuery, IssueSort, TailCursor};
pub use stats::Stats;
pub use types::{Event, ImportMode, InboundEvent, Issue, Level, NewEvent, Snapshot, Status};
pub use vault::{RecordOutcome, Vault};
pub use webhook::{DeliveryTracker, DispatchReport, Dispatcher, WebhookConfig, WebhookProvider};
