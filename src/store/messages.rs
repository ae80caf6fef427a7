use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::Message;
use crate::domain::Payload;
use crate::domain::Priority;
use crate::domain::SubmittedMessage;
use crate::store::errors::StoreError;
use crate::store::Store;

/// One accepted `addMessages` entry, echoed back to the submitter with the
/// id the core assigned (spec.md §6).
#[derive(Debug, Clone)]
pub struct InsertedMessage {
    pub pk: Uuid,
    pub id: String,
    pub account_id: Option<String>,
}

/// Result of `insert_messages`: the rows that were inserted-or-replaced, and
/// the client ids that were rejected because the existing row already has a
/// non-null `smtp_ts` (spec.md I5, P9).
#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    pub inserted: Vec<InsertedMessage>,
    pub already_sent: Vec<String>,
}

struct MessageRow {
    pk: Uuid,
    tenant_id: String,
    id: String,
    account_id: Option<String>,
    priority: i16,
    payload: serde_json::Value,
    batch_code: Option<String>,
    deferred_ts: Option<DateTime<Utc>>,
    smtp_ts: Option<DateTime<Utc>>,
    is_pec: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(r: MessageRow) -> Result<Self, Self::Error> {
        let payload: Payload =
            serde_json::from_value(r.payload).map_err(|e| StoreError::Other(e.into()))?;
        Ok(Message {
            pk: r.pk,
            tenant_id: r.tenant_id,
            id: r.id,
            account_id: r.account_id,
            priority: Priority::from_i16(r.priority),
            payload,
            batch_code: r.batch_code,
            deferred_ts: r.deferred_ts,
            smtp_ts: r.smtp_ts,
            is_pec: r.is_pec,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// A `Message` row alongside the account it's bound for, as needed by the
/// dispatcher (which must know host/credentials to send) and by
/// `fetch_ready_messages`'s account-aware batching (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message: Message,
}

impl Store {
    /// Validates nothing beyond storage — field-level validation happens
    /// before this is called. `default_priority` and `default_account_id`
    /// fill in submissions that omit them. `pec_account_ids` is the set of
    /// this tenant's certified-mail accounts, used to stamp `is_pec`
    /// (spec.md §3 "Sets is_pec = 1 iff account_id ∈ pec_account_ids").
    ///
    /// Implements I5: a new `(tenant_id, id)` pair inserts; an existing one
    /// with `smtp_ts IS NULL` is replaced in place (same `pk`, fresh
    /// payload/priority/deferred_ts); an existing one with `smtp_ts` already
    /// set is left untouched and its id is returned in `already_sent`.
    pub async fn insert_messages(
        &self,
        tenant_id: &str,
        entries: &[SubmittedMessage],
        default_priority: Priority,
        default_account_id: Option<&str>,
        pec_account_ids: &std::collections::HashSet<String>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = InsertOutcome::default();

        for entry in entries {
            let pk = Uuid::new_v4();
            let id = entry.id.clone().unwrap_or_else(|| pk.to_string());
            let account_id = entry
                .account_id
                .clone()
                .or_else(|| default_account_id.map(str::to_string));
            let is_pec = account_id
                .as_deref()
                .is_some_and(|a| pec_account_ids.contains(a));
            let priority = entry
                .priority
                .as_ref()
                .map(|v| Priority::parse(v, default_priority))
                .unwrap_or(default_priority);
            let deferred_ts = entry
                .deferred_ts
                .and_then(|secs| DateTime::from_timestamp(secs, 0));

            let payload = Payload {
                from: entry.from.clone().unwrap_or_default(),
                to: entry.to.clone().unwrap_or_default(),
                cc: entry.cc.clone(),
                bcc: entry.bcc.clone(),
                subject: entry.subject.clone().unwrap_or_default(),
                body: entry.body.clone().unwrap_or_default(),
                content_type: entry.content_type.unwrap_or(crate::domain::ContentType::Plain),
                headers: entry.headers.clone(),
                attachments: entry.attachments.clone(),
                return_path: entry.return_path.clone(),
                reply_to: entry.reply_to.clone(),
                retry_count: 0,
            };
            let payload_json =
                serde_json::to_value(&payload).map_err(|e| StoreError::Other(e.into()))?;

            // `DO UPDATE ... WHERE messages.smtp_ts IS NULL` degrades to a
            // no-op (no row returned) when the existing row is terminal,
            // which is exactly the "reject, never overwrite sent" rule.
            let row = sqlx::query!(
                r#"
                INSERT INTO messages (
                    pk, tenant_id, id, account_id, priority, payload,
                    batch_code, deferred_ts, is_pec
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (tenant_id, id) DO UPDATE SET
                    account_id = EXCLUDED.account_id,
                    priority = EXCLUDED.priority,
                    payload = EXCLUDED.payload,
                    batch_code = EXCLUDED.batch_code,
                    deferred_ts = EXCLUDED.deferred_ts,
                    is_pec = EXCLUDED.is_pec,
                    updated_at = now()
                WHERE messages.smtp_ts IS NULL
                RETURNING pk
                "#,
                pk,
                tenant_id,
                id,
                account_id,
                priority.as_i16(),
                payload_json,
                entry.batch_code,
                deferred_ts,
                is_pec,
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                outcome.already_sent.push(id);
                continue;
            };

            sqlx::query!(
                r#"
                INSERT INTO message_events (message_pk, event_type)
                VALUES ($1, 'pending')
                "#,
                row.pk,
            )
            .execute(&mut *tx)
            .await?;

            outcome.inserted.push(InsertedMessage {
                pk: row.pk,
                id,
                account_id,
            });
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Persists a validation-rejected submission as a terminal row with an
    /// `error` event, so the tenant still learns about it via the normal
    /// reporting path (spec.md §6 "Rejected messages with an id are
    /// persisted..."). A no-op if the entry carries no client id. The
    /// `account_id` is always stored as NULL here — the submission already
    /// failed validation, so it may reference an account that doesn't exist,
    /// and the column has a foreign key into `accounts`.
    pub async fn insert_rejected_message(
        &self,
        tenant_id: &str,
        entry: &SubmittedMessage,
        reason: &str,
    ) -> Result<(), StoreError> {
        let Some(id) = entry.id.clone() else {
            return Ok(());
        };
        let pk = Uuid::new_v4();
        let now = Utc::now();
        let priority = entry
            .priority
            .as_ref()
            .map(|v| Priority::parse(v, Priority::Medium))
            .unwrap_or(Priority::Medium);
        let payload = Payload {
            from: entry.from.clone().unwrap_or_default(),
            to: entry.to.clone().unwrap_or_default(),
            cc: entry.cc.clone(),
            bcc: entry.bcc.clone(),
            subject: entry.subject.clone().unwrap_or_default(),
            body: entry.body.clone().unwrap_or_default(),
            content_type: entry.content_type.unwrap_or(crate::domain::ContentType::Plain),
            headers: entry.headers.clone(),
            attachments: entry.attachments.clone(),
            return_path: entry.return_path.clone(),
            reply_to: entry.reply_to.clone(),
            retry_count: 0,
        };
        let payload_json = serde_json::to_value(&payload).map_err(|e| StoreError::Other(e.into()))?;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query!(
            r#"
            INSERT INTO messages (
                pk, tenant_id, id, account_id, priority, payload,
                batch_code, smtp_ts, is_pec
            )
            VALUES ($1, $2, $3, NULL, $4, $5, $6, $7, FALSE)
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                priority = EXCLUDED.priority,
                payload = EXCLUDED.payload,
                batch_code = EXCLUDED.batch_code,
                smtp_ts = EXCLUDED.smtp_ts,
                updated_at = now()
            WHERE messages.smtp_ts IS NULL
            RETURNING pk
            "#,
            pk,
            tenant_id,
            id,
            priority.as_i16(),
            payload_json,
            entry.batch_code,
            now,
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = row {
            sqlx::query!(
                r#"
                INSERT INTO message_events (message_pk, event_type, event_ts, description)
                VALUES ($1, 'error', $2, $3)
                "#,
                row.pk,
                now,
                reason,
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns up to `limit` pending, not-yet-due, non-suspended messages
    /// ordered by `priority ASC, created_at ASC, pk ASC` (spec.md §4.1,
    /// §4.5). Suspension is one of this query's own exclusion criteria
    /// (spec.md §4.1, P5) — applying it after the `LIMIT` instead would let
    /// a fully-suspended tenant's old pending messages monopolize every
    /// batch forever, so it's joined against `tenants` and filtered here,
    /// not by the caller.
    pub async fn fetch_ready_messages(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as!(
            MessageRow,
            r#"
            SELECT m.pk, m.tenant_id, m.id, m.account_id, m.priority, m.payload,
                   m.batch_code, m.deferred_ts, m.smtp_ts, m.is_pec, m.created_at, m.updated_at
            FROM messages m
            JOIN tenants t ON t.id = m.tenant_id
            WHERE m.smtp_ts IS NULL
              AND (m.deferred_ts IS NULL OR m.deferred_ts <= $2)
              AND t.suspended_batches IS DISTINCT FROM '*'
              AND NOT (
                  m.batch_code IS NOT NULL
                  AND t.suspended_batches IS NOT NULL
                  AND m.batch_code = ANY(string_to_array(t.suspended_batches, ','))
              )
            ORDER BY m.priority ASC, m.created_at ASC, m.pk ASC
            LIMIT $1
            "#,
            limit,
            now,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    pub async fn get_message(&self, pk: Uuid) -> Result<Message, StoreError> {
        let row = sqlx::query_as!(
            MessageRow,
            r#"
            SELECT pk, tenant_id, id, account_id, priority, payload,
                   batch_code, deferred_ts, smtp_ts, is_pec, created_at, updated_at
            FROM messages WHERE pk = $1
            "#,
            pk,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        row.try_into()
    }

    pub async fn list_messages(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as!(
            MessageRow,
            r#"
            SELECT pk, tenant_id, id, account_id, priority, payload,
                   batch_code, deferred_ts, smtp_ts, is_pec, created_at, updated_at
            FROM messages
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            tenant_id,
            limit,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    pub async fn delete_message(&self, tenant_id: &str, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query!(
            "DELETE FROM messages WHERE tenant_id = $1 AND id = $2 AND smtp_ts IS NULL",
            tenant_id,
            id,
        )
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Marks a message as delivered and appends a terminal `sent` event in
    /// one transaction (invariant I2: a message is attempted at most once
    /// per dispatch cycle — `smtp_ts` is what makes it non-ready again).
    pub async fn mark_sent(&self, pk: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query!(
            "UPDATE messages SET smtp_ts = $2, updated_at = $2 WHERE pk = $1",
            pk,
            now,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query!(
            "INSERT INTO message_events (message_pk, event_type, event_ts) VALUES ($1, 'sent', $2)",
            pk,
            now,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Permanent failure: terminal, `smtp_ts` set so the message leaves the
    /// ready set, `error` event recorded with the SMTP diagnostic.
    pub async fn mark_error(
        &self,
        pk: Uuid,
        now: DateTime<Utc>,
        description: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query!(
            "UPDATE messages SET smtp_ts = $2, updated_at = $2 WHERE pk = $1",
            pk,
            now,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query!(
            r#"
            INSERT INTO message_events (message_pk, event_type, event_ts, description)
            VALUES ($1, 'error', $2, $3)
            "#,
            pk,
            now,
            description,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Temporary failure or rate-limit defer: `smtp_ts` stays null (still
    /// pending), `deferred_ts` pushed to `retry_at`, and a non-terminal
    /// `deferred` event recorded. `retry_count` is NOT touched here — the
    /// rate-limit-defer call site must not bump it, so the dispatcher
    /// persists it itself via `update_message_payload` before calling this
    /// for the retry-schedule path (spec.md §4.5 step 7).
    pub async fn set_deferred(
        &self,
        pk: Uuid,
        retry_at: DateTime<Utc>,
        description: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query!(
            r#"
            UPDATE messages
            SET deferred_ts = $2,
                updated_at = now()
            WHERE pk = $1
            "#,
            pk,
            retry_at,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query!(
            r#"
            INSERT INTO message_events (message_pk, event_type, description)
            VALUES ($1, 'deferred', $2)
            "#,
            pk,
            description,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persists transient payload fields (chiefly `retry_count`) across
    /// attempts without disturbing the rest of the row (spec.md §4.1).
    pub async fn update_message_payload(
        &self,
        pk: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query!(
            "UPDATE messages SET payload = $2, updated_at = now() WHERE pk = $1",
            pk,
            payload,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Manual, tenant-scoped retention behind the `cleanupMessages` command
    /// (spec.md §6): deletes this tenant's terminal messages whose
    /// `smtp_ts` predates `cutoff` and whose events are all reported.
    pub async fn cleanup_messages(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query!(
            r#"
            DELETE FROM messages
            WHERE tenant_id = $1
              AND smtp_ts IS NOT NULL
              AND smtp_ts < $2
              AND NOT EXISTS (
                  SELECT 1 FROM message_events
                  WHERE message_events.message_pk = messages.pk
                    AND message_events.reported_ts IS NULL
              )
            "#,
            tenant_id,
            cutoff,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Automatic global retention behind the Reporter's report cycle
    /// (spec.md §4.1 `remove_reported_before`, invariant I4): a message is
    /// eligible once it has at least one event and every one of its events
    /// has a `reported_ts` no later than `threshold_ts`. Deletes cascade to
    /// `message_events` via the FK.
    pub async fn remove_reported_before(&self, threshold_ts: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query!(
            r#"
            DELETE FROM messages
            WHERE smtp_ts IS NOT NULL
              AND EXISTS (
                  SELECT 1 FROM message_events
                  WHERE message_events.message_pk = messages.pk
              )
              AND NOT EXISTS (
                  SELECT 1 FROM message_events
                  WHERE message_events.message_pk = messages.pk
                    AND (message_events.reported_ts IS NULL OR message_events.reported_ts > $1)
              )
            "#,
            threshold_ts,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
