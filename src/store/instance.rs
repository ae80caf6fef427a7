use secrecy::Secret;
use serde::Deserialize;

use crate::store::errors::StoreError;
use crate::store::Store;

/// The singleton row carrying instance-wide, mutable-at-runtime settings
/// that don't fit the static `Settings` file (spec.md §3, SPEC_FULL.md §3):
/// the hashed control-API token and the bounce mailbox the IMAP bounce
/// scanner (original_source's `mail_proxy.bounce` module) polls.
#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub api_token_hash: Option<String>,
    pub bounce_imap_host: Option<String>,
    pub bounce_imap_port: Option<u16>,
    pub bounce_imap_user: Option<String>,
    pub bounce_imap_password: Option<Secret<String>>,
    pub default_account_id: Option<String>,
}

struct InstanceRow {
    api_token_hash: Option<String>,
    bounce_imap_host: Option<String>,
    bounce_imap_port: Option<i32>,
    bounce_imap_user: Option<String>,
    bounce_imap_password: Option<String>,
    default_account_id: Option<String>,
}

impl From<InstanceRow> for Instance {
    fn from(r: InstanceRow) -> Self {
        Instance {
            api_token_hash: r.api_token_hash,
            bounce_imap_host: r.bounce_imap_host,
            bounce_imap_port: r.bounce_imap_port.map(|p| p as u16),
            bounce_imap_user: r.bounce_imap_user,
            bounce_imap_password: r.bounce_imap_password.map(Secret::new),
            default_account_id: r.default_account_id,
        }
    }
}

impl Store {
    pub async fn get_instance(&self) -> Result<Instance, StoreError> {
        let row = sqlx::query_as!(
            InstanceRow,
            r#"
            SELECT api_token_hash, bounce_imap_host, bounce_imap_port,
                   bounce_imap_user, bounce_imap_password, default_account_id
            FROM instance WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update_instance(&self, instance: &Instance) -> Result<Instance, StoreError> {
        use secrecy::ExposeSecret;
        let bounce_password = instance
            .bounce_imap_password
            .as_ref()
            .map(|p| p.expose_secret().clone());
        let row = sqlx::query_as!(
            InstanceRow,
            r#"
            UPDATE instance
            SET api_token_hash = $1,
                bounce_imap_host = $2,
                bounce_imap_port = $3,
                bounce_imap_user = $4,
                bounce_imap_password = $5,
                default_account_id = $6
            WHERE id = 1
            RETURNING api_token_hash, bounce_imap_host, bounce_imap_port,
                      bounce_imap_user, bounce_imap_password, default_account_id
            "#,
            instance.api_token_hash,
            instance.bounce_imap_host,
            instance.bounce_imap_port.map(i32::from),
            instance.bounce_imap_user,
            bounce_password,
            instance.default_account_id,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}
