mod accounts;
mod errors;
mod events;
mod instance;
mod messages;
mod send_log;
mod tenants;

pub use errors::StoreError;
pub use events::UnreportedEvent as StoreUnreportedEvent;
pub use instance::Instance;
pub use messages::InsertedMessage;
pub use messages::MessageRecord;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Durable state: tenants, accounts, messages, events, send-log. Single
/// writer semantics come from Postgres's own transactional guarantees — the
/// core never holds a transaction open across network I/O (spec.md §5).
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.into()))
    }
}
