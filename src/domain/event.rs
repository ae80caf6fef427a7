use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Append-only outcome log entry type, spec.md §3. Never mutated or deleted
/// except by retention (invariant I3). Stored as plain `TEXT` in Postgres;
/// `Store` converts at the boundary (see `store::events`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Pending,
    Deferred,
    Sent,
    Error,
    Bounce,
    PecAcceptance,
    PecDelivery,
    PecError,
}

impl EventType {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Sent | Self::Error) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deferred => "deferred",
            Self::Sent => "sent",
            Self::Error => "error",
            Self::Bounce => "bounce",
            Self::PecAcceptance => "pec_acceptance",
            Self::PecDelivery => "pec_delivery",
            Self::PecError => "pec_error",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "deferred" => Self::Deferred,
            "sent" => Self::Sent,
            "error" => Self::Error,
            "bounce" => Self::Bounce,
            "pec_acceptance" => Self::PecAcceptance,
            "pec_delivery" => Self::PecDelivery,
            "pec_error" => Self::PecError,
            other => anyhow::bail!("unknown event_type: {other}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub event_id: i64,
    pub message_pk: Uuid,
    pub event_type: EventType,
    pub event_ts: chrono::DateTime<chrono::Utc>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub reported_ts: Option<chrono::DateTime<chrono::Utc>>,
}
