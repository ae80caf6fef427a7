use chrono::DateTime;
use chrono::Utc;

use crate::store::errors::StoreError;
use crate::store::Store;

impl Store {
    /// Appends one send-log row. Called by the dispatcher right after a
    /// successful SMTP transaction, backing `RateLimiter`'s sliding-window
    /// counts (spec.md §4.4).
    pub async fn log_send(&self, account_id: &str, sent_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query!(
            "INSERT INTO send_log (account_id, sent_at) VALUES ($1, $2)",
            account_id,
            sent_at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_sends_since(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query!(
            r#"SELECT count(*) AS "count!" FROM send_log WHERE account_id = $1 AND sent_at >= $2"#,
            account_id,
            since,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.count)
    }

    /// Retention for the rate-limit window bookkeeping — rows older than the
    /// widest configured window (a day, by default) are never read again.
    pub async fn prune_send_log_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query!("DELETE FROM send_log WHERE sent_at < $1", cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
