//! Concrete webhook providers: Slack, Discord and generic HTTP.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::DeliveryError;
use crate::types::{Event, Issue, Level};
use crate::webhook::{WebhookConfig, WebhookProvider};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "x-crashvault-event";
pub const SIGNATURE_HEADER: &str = "x-crashvault-signature";

/// Build the provider for `config.kind`.
pub fn build(config: &WebhookConfig, client: &Client) -> Result<Arc<dyn WebhookProvider>, DeliveryError> {
  Url::parse(&config.url)
    .map_err(|e| DeliveryError::Config(format!("invalid url {:?}: {}", config.url, e)))?;

  let config = config.clone();
  let client = client.clone();
  match config.kind.trim().to_ascii_lowercase().as_str() {
    "slack" => Ok(Arc::new(SlackWebhook { config, client })),
    "discord" => Ok(Arc::new(DiscordWebhook { config, client })),
    "http" | "generic" => Ok(Arc::new(HttpWebhook { config, client })),
    other => Err(DeliveryError::Config(format!("unknown provider kind {:?}", other))),
  }
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// Provider-neutral view of an event, used as the generic HTTP body.
#[derive(Debug, Clone, Serialize)]
pub struct AlertData<'a> {
  pub event_id: String,
  pub issue_id: u64,
  pub issue_title: &'a str,
  pub fingerprint: &'a str,
  pub message: &'a str,
  pub level: Level,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stacktrace: Option<&'a str>,
  pub timestamp: String,
  pub tags: Vec<&'a str>,
  pub context: &'a std::collections::BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub host: Option<&'a str>,
}

impl<'a> AlertData<'a> {
  pub fn new(event: &'a Event, issue: &'a Issue) -> Self {
    Self {
      event_id: event.id.to_string(),
      issue_id: issue.id,
      issue_title: &issue.title,
      fingerprint: &issue.fingerprint.0,
      message: &event.message,
      level: event.level,
      stacktrace: Some(event.stacktrace.as_str()).filter(|s| !s.is_empty()),
      timestamp: event.timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
      tags: event.tags.iter().map(String::as_str).collect(),
      context: &event.context,
      host: event.host.as_deref(),
    }
  }
}

/// Cut `s` to at most `max` characters, marking the cut.
fn truncate(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    Some((idx, _)) => format!("{}\n...", &s[..idx]),
    None => s.to_string(),
  }
}

async fn post(client: &Client, url: &str, body: Vec<u8>, headers: HeaderMap) -> Result<(), DeliveryError> {
  let resp = client
    .post(url)
    .header(CONTENT_TYPE, "application/json")
    .header(USER_AGENT, concat!("crashvault/", env!("CARGO_PKG_VERSION")))
    .headers(headers)
    .body(body)
    .send()
    .await?;

  let status = resp.status();
  if status.is_success() {
    Ok(())
  } else {
    Err(DeliveryError::Status(status.as_u16()))
  }
}

fn encode(payload: &Value) -> Result<Vec<u8>, DeliveryError> {
  serde_json::to_vec(payload).map_err(|e| DeliveryError::Config(format!("payload encoding: {}", e)))
}

// ---------------------------------------------------------------------------
// Slack (Block Kit)
// ---------------------------------------------------------------------------

pub struct SlackWebhook {
  config: WebhookConfig,
  client: Client,
}

fn slack_emoji(level: Level) -> &'static str {
  match level {
    Level::Debug => ":mag:",
    Level::Info => ":information_source:",
    Level::Warning => ":warning:",
    Level::Error => ":x:",
    Level::Critical => ":fire:",
  }
}

impl WebhookProvider for SlackWebhook {
  fn config(&self) -> &WebhookConfig {
    &self.config
  }

  fn format_payload(&self, event: &Event, issue: &Issue) -> Value {
    let mut blocks = vec![
      json!({
        "type": "header",
        "text": {
          "type": "plain_text",
          "text": format!("{} Crashvault Alert", slack_emoji(event.level)),
          "emoji": true,
        },
      }),
      json!({
        "type": "section",
        "fields": [
          {"type": "mrkdwn", "text": format!("*Level:*\n{}", event.level.as_str().to_uppercase())},
          {"type": "mrkdwn", "text": format!("*Issue:*\n#{} {}", issue.id, issue.title)},
        ],
      }),
      json!({
        "type": "section",
        "text": {"type": "mrkdwn", "text": format!("*Message:*\n{}", truncate(&event.message, 500))},
      }),
    ];

    if let Some(host) = &event.host {
      blocks.push(json!({
        "type": "context",
        "elements": [{"type": "mrkdwn", "text": format!("Host: `{}`", host)}],
      }));
    }

    if !event.tags.is_empty() {
      let tags: Vec<String> = event.tags.iter().map(|t| format!("`{}`", t)).collect();
      blocks.push(json!({
        "type": "context",
        "elements": [{"type": "mrkdwn", "text": format!("Tags: {}", tags.join(" "))}],
      }));
    }

    if !event.stacktrace.is_empty() {
      blocks.push(json!({
        "type": "section",
        "text": {"type": "mrkdwn", "text": format!("```{}```", truncate(&event.stacktrace, 1500))},
      }));
    }

    blocks.push(json!({
      "type": "context",
      "elements": [{
        "type": "mrkdwn",
        "text": format!("Event: `{}` | {}", event.id, AlertData::new(event, issue).timestamp),
      }],
    }));

    json!({ "blocks": blocks })
  }

  fn send<'a>(&'a self, payload: Value) -> BoxFuture<'a, Result<(), DeliveryError>> {
    Box::pin(async move {
      let body = encode(&payload)?;
      post(&self.client, &self.config.url, body, HeaderMap::new()).await
    })
  }
}

// ---------------------------------------------------------------------------
// Discord (embed)
// ---------------------------------------------------------------------------

pub struct DiscordWebhook {
  config: WebhookConfig,
  client: Client,
}

fn discord_color(level: Level) -> u32 {
  match level {
    Level::Debug => 0x6B7280,
    Level::Info => 0x3B82F6,
    Level::Warning => 0xF59E0B,
    Level::Error => 0xEF4444,
    Level::Critical => 0x7C2D12,
  }
}

impl WebhookProvider for DiscordWebhook {
  fn config(&self) -> &WebhookConfig {
    &self.config
  }

  fn format_payload(&self, event: &Event, issue: &Issue) -> Value {
    let data = AlertData::new(event, issue);
    let mut fields = vec![
      json!({"name": "Level", "value": event.level.as_str().to_uppercase(), "inline": true}),
      json!({"name": "Issue", "value": format!("#{}", issue.id), "inline": true}),
    ];
    if let Some(host) = &event.host {
      fields.push(json!({"name": "Host", "value": format!("`{}`", host), "inline": true}));
    }
    if !event.tags.is_empty() {
      let tags: Vec<String> = event.tags.iter().map(|t| format!("`{}`", t)).collect();
      fields.push(json!({"name": "Tags", "value": tags.join(", "), "inline": false}));
    }
    if !event.stacktrace.is_empty() {
      fields.push(json!({
        "name": "Stacktrace",
        "value": format!("```\n{}\n```", truncate(&event.stacktrace, 1000)),
        "inline": false,
      }));
    }

    json!({
      "username": "Crashvault",
      "embeds": [{
        "title": format!("Crashvault Alert: {}", truncate(&issue.title, 200)),
        "description": truncate(&event.message, 2000),
        "color": discord_color(event.level),
        "fields": fields,
        "footer": {"text": format!("Event: {}", event.id)},
        "timestamp": data.timestamp,
      }],
    })
  }

  fn send<'a>(&'a self, payload: Value) -> BoxFuture<'a, Result<(), DeliveryError>> {
    Box::pin(async move {
      let body = encode(&payload)?;
      post(&self.client, &self.config.url, body, HeaderMap::new()).await
    })
  }
}

// ---------------------------------------------------------------------------
// Generic HTTP (optionally signed)
// ---------------------------------------------------------------------------

pub struct HttpWebhook {
  config: WebhookConfig,
  client: Client,
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .map_err(|_| DeliveryError::Config("invalid signing secret".into()))?;
  mac.update(body);
  Ok(hex::encode(mac.finalize().into_bytes()))
}

impl WebhookProvider for HttpWebhook {
  fn config(&self) -> &WebhookConfig {
    &self.config
  }

  fn format_payload(&self, event: &Event, issue: &Issue) -> Value {
    json!({
      "type": "crashvault.event",
      "data": AlertData::new(event, issue),
    })
  }

  fn send<'a>(&'a self, payload: Value) -> BoxFuture<'a, Result<(), DeliveryError>> {
    Box::pin(async move {
      let body = encode(&payload)?;
      let mut headers = HeaderMap::new();

      if let Some(event_id) = payload.pointer("/data/event_id").and_then(Value::as_str) {
        if let Ok(v) = HeaderValue::from_str(event_id) {
          headers.insert(HeaderName::from_static(EVENT_HEADER), v);
        }
      }

      if let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) {
        let signature = format!("sha256={}", sign(secret, &body)?);
        let value = HeaderValue::from_str(&signature)
          .map_err(|e| DeliveryError::Config(format!("signature header: {}", e)))?;
        headers.insert(HeaderName::from_static(SIGNATURE_HEADER), value);
      }

      post(&self.client, &self.config.url, body, headers).await
    })
  }
}
