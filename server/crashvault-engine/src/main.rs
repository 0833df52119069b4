//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an InboundEvent. Output lines are either:
//! - A RecordOutput (event recorded)
//! - An ErrorOutput (invalid line or failed write)
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default "info"). Webhook
//! deliveries are reaped as they finish; the rest are awaited before exit.

use std::io::{self, BufRead, Write};

use crashvault_engine::types::{ErrorOutput, RecordOutput};
use crashvault_engine::{Config, DeliveryTracker, InboundEvent, Vault, VaultError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let vault = match Config::from_env().and_then(Vault::open) {
    Ok(v) => v,
    Err(e) => {
      tracing::error!(error = %e, "crashvault-engine: startup failed");
      std::process::exit(1);
    }
  };

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());
  let mut deliveries = DeliveryTracker::new();

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        tracing::error!(error = %e, "crashvault-engine: read error");
        std::process::exit(1);
      }
    };

    deliveries.reap();

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let raw: InboundEvent = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        emit(&mut out, &ErrorOutput::new(format!("json parse: {}", e)));
        continue;
      }
    };

    match vault.record_inbound(&raw) {
      Ok(mut outcome) => {
        emit(&mut out, &RecordOutput::from(&outcome));
        if let Some(handle) = outcome.delivery.take() {
          deliveries.track(handle);
        }
      }
      Err(VaultError::Validation { field, reason }) => {
        emit(&mut out, &ErrorOutput::new(reason).with_field(field));
      }
      Err(e) => emit(&mut out, &ErrorOutput::new(e.to_string())),
    }
  }

  let _ = out.flush();

  deliveries.drain().await;
}

fn emit<W: Write, T: serde::Serialize>(out: &mut W, value: &T) {
  let _ = serde_json::to_writer(&mut *out, value);
  let _ = writeln!(out);
}
