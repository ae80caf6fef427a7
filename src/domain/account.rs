use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;

/// What happens when an account's rate limit is exceeded and the message
/// cannot be admitted right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitBehavior {
    /// Push the message back to the next window boundary.
    Defer,
    /// Fail the message immediately with `rate_limit_exceeded`.
    Reject,
}

impl Default for LimitBehavior {
    fn default() -> Self { Self::Defer }
}

/// One SMTP relay configuration bound to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub tenant_id: String,

    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<Secret<String>>,
    /// `None` = auto (TLS iff `port == 465`), `Some(true)` = force TLS,
    /// `Some(false)` = plaintext.
    pub use_tls: Option<bool>,

    /// Seconds a pooled connection for this account may be reused.
    pub ttl: i64,

    pub limit_per_minute: Option<i64>,
    pub limit_per_hour: Option<i64>,
    pub limit_per_day: Option<i64>,
    pub limit_behavior: LimitBehavior,

    /// Overrides the global `batch_size_per_account` for this account.
    pub batch_size: Option<i64>,

    pub is_pec_account: bool,

    pub imap_last_uid: Option<i64>,
    pub imap_uidvalidity: Option<i64>,
    pub imap_last_sync: Option<chrono::DateTime<chrono::Utc>>,
}

/// The three ways the SMTP pool can open a connection, resolved from
/// `Account::use_tls` and `Account::port` per spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Implicit,
    StartTls,
    Plaintext,
}

impl Account {
    /// `None` auto-derives from the port (465 implies TLS); `Some` is taken
    /// literally.
    pub fn tls_mode(&self) -> TlsMode {
        let wants_tls = self.use_tls.unwrap_or(self.port == 465);
        if !wants_tls {
            TlsMode::Plaintext
        } else if self.port == 465 {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }
}
