use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;

/// One logical owner of mail flow, with its own callback endpoints, rate
/// policy defaults, and suspension state.
///
/// `suspended_batches` follows the wire format described in spec.md §3: `None`
/// means nothing is suspended, `Some("*")` pauses all outgoing mail for the
/// tenant, anything else is a comma-joined set of batch codes to skip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub active: bool,

    pub client_base_url: Option<String>,
    pub client_sync_path: Option<String>,
    pub client_attachment_path: Option<String>,
    pub client_auth: ClientAuth,

    pub default_limit_per_hour: Option<i64>,
    pub default_limit_per_day: Option<i64>,

    pub suspended_batches: Option<String>,

    pub api_key_hash: Option<String>,
    pub api_key_expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Tenant {
    /// `'*'` pauses every outgoing message for this tenant, regardless of
    /// `batch_code`.
    pub fn is_fully_suspended(&self) -> bool {
        self.suspended_batches.as_deref() == Some("*")
    }

    /// A message with no `batch_code` is only ever suspended by the wildcard.
    pub fn is_batch_suspended(&self, batch_code: Option<&str>) -> bool {
        match (&self.suspended_batches, batch_code) {
            (None, _) => false,
            (Some(s), _) if s == "*" => true,
            (Some(_), None) => false,
            (Some(list), Some(code)) => list.split(',').any(|b| b == code),
        }
    }

    pub fn sync_url(&self) -> Option<String> {
        let base = self.client_base_url.as_deref()?;
        let path = self.client_sync_path.as_deref().unwrap_or("/mail-proxy/sync");
        Some(format!("{base}{path}"))
    }

    pub fn attachment_url(&self, base_query: &str) -> Option<String> {
        let base = self.client_base_url.as_deref()?;
        let path = self
            .client_attachment_path
            .as_deref()
            .unwrap_or("/mail-proxy/attachment");
        Some(format!("{base}{path}?{base_query}"))
    }
}

/// How a tenant's callback endpoints are authenticated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClientAuth {
    None,
    Bearer { token: Secret<String> },
    Basic { user: String, password: Secret<String> },
}
