use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::EventType;
use crate::domain::MessageEvent;
use crate::store::errors::StoreError;
use crate::store::Store;

/// `MessageEvent` joined with the owning message/tenant, as handed to the
/// reporter loop (spec.md §4.6). `client_message_id` is the tenant-facing
/// `messages.id`, distinct from the internal `pk`.
#[derive(Debug, Clone)]
pub struct UnreportedEvent {
    pub event: MessageEvent,
    pub tenant_id: String,
    pub client_message_id: String,
    pub batch_code: Option<String>,
}

impl Store {
    /// Used by `record_external_event` (bounce/PEC ingestion, SPEC_FULL.md
    /// §4.1) to append events the dispatcher itself didn't generate.
    pub async fn append_event(
        &self,
        message_pk: Uuid,
        event_type: EventType,
        description: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        sqlx::query!(
            r#"
            INSERT INTO message_events (message_pk, event_type, description, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
            message_pk,
            event_type.as_str(),
            description,
            metadata,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Oldest-first, ordered by `(event_ts, event_id)` to give the reporter
    /// a stable cursor even when two events share a timestamp.
    pub async fn fetch_unreported_events(
        &self,
        limit: i64,
    ) -> Result<Vec<UnreportedEvent>, StoreError> {
        let rows = sqlx::query!(
            r#"
            SELECT
                e.event_id, e.message_pk, e.event_type, e.event_ts,
                e.description, e.metadata, e.reported_ts,
                m.tenant_id, m.id AS client_message_id, m.batch_code
            FROM message_events e
            JOIN messages m ON m.pk = e.message_pk
            WHERE e.reported_ts IS NULL
            ORDER BY e.event_ts ASC, e.event_id ASC
            LIMIT $1
            "#,
            limit,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let event_type: EventType = row.event_type.parse().map_err(StoreError::Other)?;
                Ok(UnreportedEvent {
                    event: MessageEvent {
                        event_id: row.event_id,
                        message_pk: row.message_pk,
                        event_type,
                        event_ts: row.event_ts,
                        description: row.description,
                        metadata: row.metadata,
                        reported_ts: row.reported_ts,
                    },
                    tenant_id: row.tenant_id,
                    client_message_id: row.client_message_id,
                    batch_code: row.batch_code,
                })
            })
            .collect()
    }

    pub async fn mark_events_reported(
        &self,
        event_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query!(
            "UPDATE message_events SET reported_ts = $2 WHERE event_id = ANY($1)",
            event_ids,
            now,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hygiene sweep distinct from `Store::remove_reported_before` (which
    /// deletes whole messages per spec.md I4): drops individually-reported
    /// event rows belonging to messages that are not yet eligible for full
    /// deletion (e.g. a `deferred` event acknowledged long ago on a message
    /// still awaiting its terminal `sent`/`error`), so that table doesn't
    /// grow unbounded on long-lived messages.
    pub async fn purge_reported_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query!(
            "DELETE FROM message_events WHERE reported_ts IS NOT NULL AND reported_ts < $1",
            cutoff,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
