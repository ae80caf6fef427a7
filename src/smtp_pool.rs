use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::Tls;
use lettre::transport::smtp::client::TlsParameters;
use lettre::AsyncSmtpTransport;
use lettre::AsyncTransport;
use lettre::Tokio1Executor;
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use crate::domain::Account;
use crate::domain::TlsMode;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_LOGIN_BUDGET: Duration = Duration::from_secs(15);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifies the dispatch worker a pool entry is held for — spec.md §4.3's
/// "worker identity", assigned round-robin rather than derived from an OS
/// thread or task id (REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u32);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("smtp connection timed out")]
    Timeout,
}

/// The key a pool entry is validated against on reacquisition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    tls_mode: TlsMode,
}

impl PoolKey {
    fn from_account(account: &Account) -> Self {
        Self {
            host: account.host.clone(),
            port: account.port,
            user: account.user.clone(),
            password: account
                .password
                .as_ref()
                .map(|p| p.expose_secret().clone()),
            tls_mode: account.tls_mode(),
        }
    }
}

struct PoolEntry {
    key: PoolKey,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    last_used: DateTime<Utc>,
    ttl: i64,
}

/// Caches open, authenticated SMTP connections keyed by worker identity and
/// validated against `(host, port, user, password, use_tls)` on every
/// acquisition (spec.md §4.3). The dictionary is guarded by a single mutex
/// held only during mutation, never during network I/O.
pub struct SmtpPool {
    entries: Mutex<HashMap<WorkerId, PoolEntry>>,
}

impl Default for SmtpPool {
    fn default() -> Self { Self::new() }
}

impl SmtpPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up (or open) a transport for `worker` bound to `account`.
    pub async fn acquire(
        &self,
        worker: WorkerId,
        account: &Account,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, PoolError> {
        let key = PoolKey::from_account(account);
        let now = Utc::now();

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&worker) {
                let fresh = entry.key == key
                    && (now - entry.last_used).num_seconds() < entry.ttl
                    && probe(&entry.transport).await;
                if fresh {
                    entry.last_used = now;
                    return Ok(entry.transport.clone());
                }
                entries.remove(&worker);
            }
        }

        let transport = open_transport(account).await?;

        let mut entries = self.entries.lock().await;
        entries.insert(
            worker,
            PoolEntry {
                key,
                transport: transport.clone(),
                last_used: now,
                ttl: account.ttl,
            },
        );
        Ok(transport)
    }

    /// Periodic sweep: evict entries that are stale or fail a health probe.
    /// Snapshot under the lock, probe/close outside it (spec.md §4.3).
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let stale_workers: Vec<WorkerId> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| (now - e.last_used).num_seconds() > e.ttl)
                .map(|(w, _)| *w)
                .collect()
        };

        let mut dead_workers = Vec::new();
        {
            let entries = self.entries.lock().await;
            for (worker, entry) in entries.iter() {
                if !stale_workers.contains(worker) && !probe(&entry.transport).await {
                    dead_workers.push(*worker);
                }
            }
        }

        let mut entries = self.entries.lock().await;
        for worker in stale_workers.into_iter().chain(dead_workers) {
            entries.remove(&worker);
        }
    }
}

async fn probe(transport: &AsyncSmtpTransport<Tokio1Executor>) -> bool {
    transport.test_connection().await.unwrap_or(false)
}

async fn open_transport(
    account: &Account,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, PoolError> {
    let mut builder = match account.tls_mode() {
        TlsMode::Implicit => {
            let params = TlsParameters::new(account.host.clone())
                .map_err(lettre::transport::smtp::Error::from)?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&account.host)
                .map_err(lettre::transport::smtp::Error::from)?
                .port(account.port)
                .tls(Tls::Wrapper(params))
        }
        TlsMode::StartTls => {
            let params = TlsParameters::new(account.host.clone())
                .map_err(lettre::transport::smtp::Error::from)?;
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.host)
                .map_err(lettre::transport::smtp::Error::from)?
                .port(account.port)
                .tls(Tls::Required(params))
        }
        TlsMode::Plaintext => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&account.host)
                .port(account.port)
        }
    };

    builder = builder
        .timeout(Some(CONNECT_LOGIN_BUDGET.min(CONNECT_TIMEOUT + Duration::from_secs(5))));

    if let (Some(user), Some(password)) = (&account.user, &account.password) {
        builder = builder.credentials(Credentials::new(
            user.clone(),
            password.expose_secret().clone(),
        ));
    }

    Ok(builder.build())
}

pub async fn send(
    transport: &AsyncSmtpTransport<Tokio1Executor>,
    message: &lettre::Message,
) -> Result<(), PoolError> {
    tokio::time::timeout(SEND_TIMEOUT, transport.send(message))
        .await
        .map_err(|_| PoolError::Timeout)?
        .map_err(PoolError::from)?;
    Ok(())
}
