//! Vault configuration, resolved once at startup and immutable thereafter.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::VaultError;
use crate::webhook::WebhookConfig;

/// Everything the vault needs from the outside world.
#[derive(Debug, Clone)]
pub struct Config {
  /// Data root holding the issue and event collections.
  pub root: PathBuf,
  /// Webhook providers notified on every recorded event.
  pub webhooks: Vec<WebhookConfig>,
  /// Upper bound for a single webhook delivery attempt.
  pub webhook_timeout: Duration,
  /// Fold message case before fingerprinting.
  pub fingerprint_ignore_case: bool,
  /// Titles set through rename are cut to this many characters.
  pub title_max_chars: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      root: default_root(),
      webhooks: Vec::new(),
      webhook_timeout: Duration::from_secs(10),
      fingerprint_ignore_case: false,
      title_max_chars: 200,
    }
  }
}

impl Config {
  /// Defaults rooted at `root`.
  pub fn with_root(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      ..Self::default()
    }
  }

  /// Reads `CRASHVAULT_HOME`, `CRASHVAULT_WEBHOOKS` (JSON array) and
  /// `CRASHVAULT_WEBHOOK_TIMEOUT_SECS`. Unset variables keep their defaults.
  pub fn from_env() -> Result<Self, VaultError> {
    let mut config = Self::default();

    if let Ok(home) = std::env::var("CRASHVAULT_HOME") {
      if !home.trim().is_empty() {
        config.root = PathBuf::from(home);
      }
    }

    if let Ok(raw) = std::env::var("CRASHVAULT_WEBHOOKS") {
      config.webhooks = serde_json::from_str(&raw).map_err(|e| {
        VaultError::validation("CRASHVAULT_WEBHOOKS", &format!("invalid JSON: {}", e))
      })?;
    }

    if let Ok(raw) = std::env::var("CRASHVAULT_WEBHOOK_TIMEOUT_SECS") {
      let secs: u64 = raw.trim().parse().map_err(|_| {
        VaultError::validation("CRASHVAULT_WEBHOOK_TIMEOUT_SECS", "expected whole seconds")
      })?;
      if secs == 0 {
        return Err(VaultError::validation(
          "CRASHVAULT_WEBHOOK_TIMEOUT_SECS",
          "must be greater than zero",
        ));
      }
      config.webhook_timeout = Duration::from_secs(secs);
    }

    Ok(config)
  }
}

fn default_root() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
    .join(".crashvault")
}
