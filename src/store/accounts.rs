use secrecy::Secret;

use crate::domain::Account;
use crate::domain::LimitBehavior;
use crate::store::errors::StoreError;
use crate::store::Store;

struct AccountRow {
    id: String,
    tenant_id: String,
    host: String,
    port: i32,
    user: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    ttl: i64,
    limit_per_minute: Option<i64>,
    limit_per_hour: Option<i64>,
    limit_per_day: Option<i64>,
    limit_behavior: String,
    batch_size: Option<i64>,
    is_pec_account: bool,
    imap_last_uid: Option<i64>,
    imap_uidvalidity: Option<i64>,
    imap_last_sync: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<AccountRow> for Account {
    fn from(r: AccountRow) -> Self {
        Account {
            id: r.id,
            tenant_id: r.tenant_id,
            host: r.host,
            port: r.port as u16,
            user: r.user,
            password: r.password.map(Secret::new),
            use_tls: r.use_tls,
            ttl: r.ttl,
            limit_per_minute: r.limit_per_minute,
            limit_per_hour: r.limit_per_hour,
            limit_per_day: r.limit_per_day,
            limit_behavior: if r.limit_behavior == "reject" {
                LimitBehavior::Reject
            } else {
                LimitBehavior::Defer
            },
            batch_size: r.batch_size,
            is_pec_account: r.is_pec_account,
            imap_last_uid: r.imap_last_uid,
            imap_uidvalidity: r.imap_uidvalidity,
            imap_last_sync: r.imap_last_sync,
        }
    }
}

impl Store {
    pub async fn add_account(&self, account: &Account) -> Result<Account, StoreError> {
        use secrecy::ExposeSecret;
        let password = account.password.as_ref().map(|p| p.expose_secret().clone());
        let limit_behavior = match account.limit_behavior {
            LimitBehavior::Defer => "defer",
            LimitBehavior::Reject => "reject",
        };
        let row = sqlx::query_as!(
            AccountRow,
            r#"
            INSERT INTO accounts (
                id, tenant_id, host, port, "user", password, use_tls, ttl,
                limit_per_minute, limit_per_hour, limit_per_day, limit_behavior,
                batch_size, is_pec_account, imap_last_uid, imap_uidvalidity, imap_last_sync
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING
                id, tenant_id, host, port, "user", password, use_tls, ttl,
                limit_per_minute, limit_per_hour, limit_per_day, limit_behavior,
                batch_size, is_pec_account, imap_last_uid, imap_uidvalidity, imap_last_sync
            "#,
            account.id,
            account.tenant_id,
            account.host,
            account.port as i32,
            account.user,
            password,
            account.use_tls,
            account.ttl,
            account.limit_per_minute,
            account.limit_per_hour,
            account.limit_per_day,
            limit_behavior,
            account.batch_size,
            account.is_pec_account,
            account.imap_last_uid,
            account.imap_uidvalidity,
            account.imap_last_sync,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Account, StoreError> {
        let row = sqlx::query_as!(
            AccountRow,
            r#"SELECT id, tenant_id, host, port, "user", password, use_tls, ttl,
                      limit_per_minute, limit_per_hour, limit_per_day, limit_behavior,
                      batch_size, is_pec_account, imap_last_uid, imap_uidvalidity, imap_last_sync
               FROM accounts WHERE id = $1"#,
            account_id,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    pub async fn list_accounts(&self, tenant_id: &str) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as!(
            AccountRow,
            r#"SELECT id, tenant_id, host, port, "user", password, use_tls, ttl,
                      limit_per_minute, limit_per_hour, limit_per_day, limit_behavior,
                      batch_size, is_pec_account, imap_last_uid, imap_uidvalidity, imap_last_sync
               FROM accounts WHERE tenant_id = $1 ORDER BY id"#,
            tenant_id,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_all_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as!(
            AccountRow,
            r#"SELECT id, tenant_id, host, port, "user", password, use_tls, ttl,
                      limit_per_minute, limit_per_hour, limit_per_day, limit_behavior,
                      batch_size, is_pec_account, imap_last_uid, imap_uidvalidity, imap_last_sync
               FROM accounts ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Cascades to the account's messages and send-log rows via `ON DELETE
    /// CASCADE` — no separate cleanup needed here.
    pub async fn delete_account(&self, account_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query!("DELETE FROM accounts WHERE id = $1", account_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn update_imap_cursor(
        &self,
        account_id: &str,
        last_uid: i64,
        uidvalidity: i64,
    ) -> Result<(), StoreError> {
        sqlx::query!(
            r#"
            UPDATE accounts
            SET imap_last_uid = $2, imap_uidvalidity = $3, imap_last_sync = now(), updated_at = now()
            WHERE id = $1
            "#,
            account_id,
            last_uid,
            uidvalidity,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
