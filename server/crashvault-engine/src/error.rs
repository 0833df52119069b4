//! Structured error types for the vault.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
  #[error("not found: {kind} {id}")]
  NotFound { kind: &'static str, id: String },

  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("corrupt data in {}: {source}", path.display())]
  CorruptData {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("io: {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl VaultError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn issue_not_found(id: u64) -> Self {
    Self::NotFound {
      kind: "issue",
      id: id.to_string(),
    }
  }

  pub fn webhook_not_found(id: &str) -> Self {
    Self::NotFound {
      kind: "webhook",
      id: id.to_string(),
    }
  }

  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Failure of a single webhook delivery. Never leaves the dispatcher.
#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("transport: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("unexpected status {0}")]
  Status(u16),

  #[error("timed out after {0:?}")]
  Timeout(std::time::Duration),

  #[error("config: {0}")]
  Config(String),
}
