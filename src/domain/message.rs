use std::collections::HashMap;

use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Scheduling hint, not a preemption mechanism — see spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i16)]
pub enum Priority {
    Immediate = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub fn from_i16(v: i16) -> Self {
        match v {
            v if v <= 0 => Self::Immediate,
            1 => Self::High,
            2 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_i16(self) -> i16 { self as i16 }

    /// Accepts `0..=3` or the case-insensitive names from spec.md §6. An
    /// unparsable string falls back to `default_priority`; an out-of-range
    /// integer is clamped rather than rejected.
    pub fn parse(value: &serde_json::Value, default_priority: Priority) -> Self {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(|v| Self::from_i16(v.clamp(i16::MIN as i64, i16::MAX as i64) as i16))
                .unwrap_or(default_priority),
            serde_json::Value::String(s) => match s.to_lowercase().as_str() {
                "immediate" => Self::Immediate,
                "high" => Self::High,
                "medium" => Self::Medium,
                "low" => Self::Low,
                _ => default_priority,
            },
            _ => default_priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Plain,
    Html,
}

/// How an attachment's bytes should be fetched. Fetch backends themselves
/// (HTTP, object storage, filesystem) are external collaborators per
/// spec.md §1; this enum is the contract between the core and them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fetch_mode", rename_all = "snake_case")]
pub enum FetchMode {
    Base64,
    HttpUrl { url: String },
    Endpoint,
    Filesystem { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentAuth {
    pub bearer_token: Option<Secret<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub storage_path: String,
    #[serde(flatten)]
    pub fetch_mode: FetchMode,
    pub mime_type: Option<String>,
    pub content_md5: Option<String>,
    pub auth: Option<AttachmentAuth>,
}

/// The serialized email submission carried by a `Message` row. Separate from
/// the row's own bookkeeping fields (`priority`, `deferred_ts`, `smtp_ts`,
/// ...) because it round-trips through `update_message_payload` untouched
/// except for `retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub return_path: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub retry_count: i32,
}

/// One email in the durable queue.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub pk: Uuid,
    pub tenant_id: String,
    pub id: String,
    pub account_id: Option<String>,
    pub priority: Priority,
    pub payload: Payload,
    pub batch_code: Option<String>,
    pub deferred_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub smtp_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub is_pec: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    /// Invariant I2: pending iff never attempted.
    pub fn is_pending(&self) -> bool { self.smtp_ts.is_none() }

    /// Invariant I2: ready iff pending, not deferred into the future, and
    /// (checked separately) not suspended.
    pub fn is_ready(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_pending() && self.deferred_ts.map_or(true, |ts| ts <= now)
    }
}

/// What callers of `addMessages` submit (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedMessage {
    pub id: Option<String>,
    pub account_id: Option<String>,
    pub priority: Option<serde_json::Value>,
    pub from: Option<String>,
    pub to: Option<Vec<String>>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub return_path: Option<String>,
    pub reply_to: Option<String>,
    pub batch_code: Option<String>,
    pub deferred_ts: Option<i64>,
}
