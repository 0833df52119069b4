//! Normalize inbound events into canonical NewEvent values.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::VaultError;
use crate::types::*;

/// Parse and normalize an InboundEvent into a NewEvent.
pub fn normalize(raw: &InboundEvent) -> Result<NewEvent, VaultError> {
  // Validate required message
  if raw.message.trim().is_empty() {
    return Err(VaultError::validation("message", "must not be empty"));
  }

  // Validate level (absent means error)
  let level = match &raw.level {
    Some(l) if !l.trim().is_empty() => Level::from_str_loose(l).ok_or_else(|| {
      VaultError::validation("level", "expected debug|info|warning|error|critical")
    })?,
    _ => Level::default(),
  };

  // Trim + dedup tags, dropping blanks
  let tags: BTreeSet<String> = raw
    .tags
    .iter()
    .map(|t| t.trim())
    .filter(|t| !t.is_empty())
    .map(str::to_string)
    .collect();

  let context = normalize_context(&raw.context)?;

  Ok(NewEvent {
    message: raw.message.clone(),
    level,
    tags,
    context,
    stacktrace: raw.stacktrace.clone().unwrap_or_default(),
    host: raw
      .host
      .as_ref()
      .map(|h| h.trim().to_string())
      .filter(|h| !h.is_empty()),
  })
}

/// Context values are strings; scalars are stringified, nested values rejected.
fn normalize_context(
  raw: &BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, String>, VaultError> {
  let mut out = BTreeMap::new();
  for (key, value) in raw {
    let key = key.trim();
    if key.is_empty() {
      return Err(VaultError::validation("context", "keys must not be empty"));
    }
    let value = match value {
      serde_json::Value::String(s) => s.clone(),
      serde_json::Value::Number(n) => n.to_string(),
      serde_json::Value::Bool(b) => b.to_string(),
      serde_json::Value::Null => String::new(),
      _ => {
        return Err(VaultError::validation(
          &format!("context.{}", key),
          "nested values are not supported",
        ))
      }
    };
    out.insert(key.to_string(), value);
  }
  Ok(out)
}
