use secrecy::Secret;

use crate::domain::ClientAuth;
use crate::domain::Tenant;
use crate::store::errors::StoreError;
use crate::store::Store;

struct TenantRow {
    id: String,
    name: String,
    active: bool,
    client_base_url: Option<String>,
    client_sync_path: Option<String>,
    client_attachment_path: Option<String>,
    client_auth_method: String,
    client_auth_token: Option<String>,
    client_auth_user: Option<String>,
    client_auth_password: Option<String>,
    default_limit_per_hour: Option<i64>,
    default_limit_per_day: Option<i64>,
    suspended_batches: Option<String>,
    api_key_hash: Option<String>,
    api_key_expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<TenantRow> for Tenant {
    fn from(r: TenantRow) -> Self {
        let client_auth = match r.client_auth_method.as_str() {
            "bearer" => ClientAuth::Bearer {
                token: Secret::new(r.client_auth_token.unwrap_or_default()),
            },
            "basic" => ClientAuth::Basic {
                user: r.client_auth_user.unwrap_or_default(),
                password: Secret::new(r.client_auth_password.unwrap_or_default()),
            },
            _ => ClientAuth::None,
        };
        Tenant {
            id: r.id,
            name: r.name,
            active: r.active,
            client_base_url: r.client_base_url,
            client_sync_path: r.client_sync_path,
            client_attachment_path: r.client_attachment_path,
            client_auth,
            default_limit_per_hour: r.default_limit_per_hour,
            default_limit_per_day: r.default_limit_per_day,
            suspended_batches: r.suspended_batches,
            api_key_hash: r.api_key_hash,
            api_key_expires_at: r.api_key_expires_at,
        }
    }
}

impl Store {
    pub async fn add_tenant(&self, tenant: &Tenant) -> Result<Tenant, StoreError> {
        let (method, token, user, password) = split_client_auth(&tenant.client_auth);
        let row = sqlx::query_as!(
            TenantRow,
            r#"
            INSERT INTO tenants (
                id, name, active, client_base_url, client_sync_path,
                client_attachment_path, client_auth_method, client_auth_token,
                client_auth_user, client_auth_password, default_limit_per_hour,
                default_limit_per_day, suspended_batches, api_key_hash, api_key_expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING
                id, name, active, client_base_url, client_sync_path,
                client_attachment_path, client_auth_method, client_auth_token,
                client_auth_user, client_auth_password, default_limit_per_hour,
                default_limit_per_day, suspended_batches, api_key_hash, api_key_expires_at
            "#,
            tenant.id,
            tenant.name,
            tenant.active,
            tenant.client_base_url,
            tenant.client_sync_path,
            tenant.client_attachment_path,
            method,
            token,
            user,
            password,
            tenant.default_limit_per_hour,
            tenant.default_limit_per_day,
            tenant.suspended_batches,
            tenant.api_key_hash,
            tenant.api_key_expires_at,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Tenant, StoreError> {
        let row = sqlx::query_as!(
            TenantRow,
            r#"
            SELECT
                id, name, active, client_base_url, client_sync_path,
                client_attachment_path, client_auth_method, client_auth_token,
                client_auth_user, client_auth_password, default_limit_per_hour,
                default_limit_per_day, suspended_batches, api_key_hash, api_key_expires_at
            FROM tenants WHERE id = $1
            "#,
            tenant_id,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(row.into())
    }

    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let rows = sqlx::query_as!(
            TenantRow,
            r#"
            SELECT
                id, name, active, client_base_url, client_sync_path,
                client_attachment_path, client_auth_method, client_auth_token,
                client_auth_user, client_auth_password, default_limit_per_hour,
                default_limit_per_day, suspended_batches, api_key_hash, api_key_expires_at
            FROM tenants ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<(), StoreError> {
        sqlx::query!("DELETE FROM tenants WHERE id = $1", tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `batch_code = None` sets the full wildcard suspension; otherwise adds
    /// the code to the comma-list (idempotent set semantics). Already-`"*"`
    /// is a no-op success per spec.md §4.1.
    pub async fn suspend_batch(
        &self,
        tenant_id: &str,
        batch_code: Option<&str>,
    ) -> Result<Tenant, StoreError> {
        let tenant = self.get_tenant(tenant_id).await?;
        let next = match (tenant.suspended_batches.as_deref(), batch_code) {
            (_, None) => "*".to_string(),
            (Some("*"), Some(_)) => "*".to_string(),
            (None, Some(code)) => code.to_string(),
            (Some(existing), Some(code)) => {
                if existing.split(',').any(|b| b == code) {
                    existing.to_string()
                } else {
                    format!("{existing},{code}")
                }
            }
        };
        self.set_suspended_batches(tenant_id, Some(&next)).await
    }

    /// Removing a single batch from `"*"` is rejected — the caller must lift
    /// full suspension first (spec.md §4.1).
    pub async fn activate_batch(
        &self,
        tenant_id: &str,
        batch_code: Option<&str>,
    ) -> Result<Tenant, StoreError> {
        let tenant = self.get_tenant(tenant_id).await?;
        match (tenant.suspended_batches.as_deref(), batch_code) {
            (_, None) => self.set_suspended_batches(tenant_id, None).await,
            (Some("*"), Some(_)) => Err(StoreError::Other(anyhow::anyhow!(
                "cannot activate a single batch while tenant is fully suspended"
            ))),
            (None, Some(_)) => Ok(tenant),
            (Some(existing), Some(code)) => {
                let remaining: Vec<&str> = existing.split(',').filter(|b| *b != code).collect();
                let next = if remaining.is_empty() {
                    None
                } else {
                    Some(remaining.join(","))
                };
                self.set_suspended_batches(tenant_id, next.as_deref()).await
            }
        }
    }

    async fn set_suspended_batches(
        &self,
        tenant_id: &str,
        value: Option<&str>,
    ) -> Result<Tenant, StoreError> {
        sqlx::query!(
            "UPDATE tenants SET suspended_batches = $2, updated_at = now() WHERE id = $1",
            tenant_id,
            value,
        )
        .execute(&self.pool)
        .await?;
        self.get_tenant(tenant_id).await
    }
}

fn split_client_auth(
    auth: &ClientAuth,
) -> (&'static str, Option<String>, Option<String>, Option<String>) {
    use secrecy::ExposeSecret;
    match auth {
        ClientAuth::None => ("none", None, None, None),
        ClientAuth::Bearer { token } => ("bearer", Some(token.expose_secret().clone()), None, None),
        ClientAuth::Basic { user, password } => (
            "basic",
            None,
            Some(user.clone()),
            Some(password.expose_secret().clone()),
        ),
    }
}
