use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::Core;
use crate::domain::Account;
use crate::domain::EventType;
use crate::domain::Priority;
use crate::domain::SubmittedMessage;
use crate::domain::Tenant;

/// Tagged-union command boundary (REDESIGN FLAGS: string-matched dispatch →
/// sum type), one variant per spec.md §6 row. The thin `actix-web` layer in
/// `startup` deserializes a JSON body into this enum and serializes
/// whatever `Core::handle` returns.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    RunNow,
    Suspend { tenant_id: String, batch_code: Option<String> },
    Activate { tenant_id: String, batch_code: Option<String> },
    AddTenant(Box<Tenant>),
    GetTenant { tenant_id: String },
    ListTenants,
    UpdateTenant(Box<Tenant>),
    DeleteTenant { tenant_id: String },
    AddAccount(Box<Account>),
    ListAccounts { tenant_id: String },
    DeleteAccount { account_id: String },
    AddMessages {
        tenant_id: String,
        messages: Vec<SubmittedMessage>,
        default_priority: Option<Value>,
    },
    DeleteMessages { tenant_id: String, ids: Vec<String> },
    ListMessages { tenant_id: String, active_only: Option<bool> },
    CleanupMessages { tenant_id: String, older_than_seconds: Option<i64> },
    GetInstance,
    UpdateInstance(Box<crate::store::Instance>),
    RecordExternalEvent {
        message_pk: Uuid,
        event_type: String,
        description: Option<String>,
        metadata: Option<Value>,
    },
}

#[derive(Debug, Serialize, Default)]
pub struct CommandResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResult {
    fn ok(data: Value) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            data: None,
        }
    }
}

impl Core {
    pub async fn handle(self: &Arc<Self>, command: Command) -> CommandResult {
        match command {
            Command::RunNow => {
                self.wake_event.notify_one();
                self.wake_client_event.notify_one();
                CommandResult::ok(serde_json::json!({}))
            }

            Command::Suspend { tenant_id, batch_code } => {
                self.suspend_or_activate(&tenant_id, batch_code, true).await
            }
            Command::Activate { tenant_id, batch_code } => {
                self.suspend_or_activate(&tenant_id, batch_code, false).await
            }

            Command::AddTenant(tenant) => match self.store.add_tenant(&tenant).await {
                Ok(t) => CommandResult::ok(serde_json::to_value(t).unwrap()),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::GetTenant { tenant_id } => match self.store.get_tenant(&tenant_id).await {
                Ok(t) => CommandResult::ok(serde_json::to_value(t).unwrap()),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::ListTenants => match self.store.list_tenants().await {
                Ok(ts) => CommandResult::ok(serde_json::to_value(ts).unwrap()),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::UpdateTenant(tenant) => match self.store.add_tenant(&tenant).await {
                Ok(t) => CommandResult::ok(serde_json::to_value(t).unwrap()),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::DeleteTenant { tenant_id } => match self.store.delete_tenant(&tenant_id).await {
                Ok(()) => CommandResult::ok(serde_json::json!({})),
                Err(e) => CommandResult::err(e.to_string()),
            },

            Command::AddAccount(account) => match self.store.add_account(&account).await {
                Ok(a) => CommandResult::ok(serde_json::to_value(a).unwrap()),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::ListAccounts { tenant_id } => match self.store.list_accounts(&tenant_id).await {
                Ok(accounts) => CommandResult::ok(serde_json::to_value(accounts).unwrap()),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::DeleteAccount { account_id } => {
                match self.store.delete_account(&account_id).await {
                    Ok(()) => CommandResult::ok(serde_json::json!({})),
                    Err(e) => CommandResult::err(e.to_string()),
                }
            }

            Command::AddMessages {
                tenant_id,
                messages,
                default_priority,
            } => self.add_messages(&tenant_id, messages, default_priority).await,

            Command::DeleteMessages { tenant_id, ids } => self.delete_messages(&tenant_id, ids).await,

            Command::ListMessages { tenant_id, active_only } => {
                self.list_messages(&tenant_id, active_only.unwrap_or(false)).await
            }

            Command::CleanupMessages { tenant_id, older_than_seconds } => {
                self.cleanup_messages(&tenant_id, older_than_seconds).await
            }

            Command::GetInstance => match self.store.get_instance().await {
                Ok(i) => CommandResult::ok(instance_to_json(&i)),
                Err(e) => CommandResult::err(e.to_string()),
            },
            Command::UpdateInstance(instance) => {
                match self.store.update_instance(&instance).await {
                    Ok(i) => CommandResult::ok(instance_to_json(&i)),
                    Err(e) => CommandResult::err(e.to_string()),
                }
            }

            Command::RecordExternalEvent {
                message_pk,
                event_type,
                description,
                metadata,
            } => {
                let Ok(event_type) = event_type.parse::<EventType>() else {
                    return CommandResult::err(format!("unknown event_type: {event_type}"));
                };
                match self
                    .store
                    .append_event(message_pk, event_type, description.as_deref(), metadata)
                    .await
                {
                    Ok(()) => {
                        self.wake_client_event.notify_one();
                        CommandResult::ok(serde_json::json!({}))
                    }
                    Err(e) => CommandResult::err(e.to_string()),
                }
            }
        }
    }

    async fn suspend_or_activate(
        self: &Arc<Self>,
        tenant_id: &str,
        batch_code: Option<String>,
        suspend: bool,
    ) -> CommandResult {
        let result = if suspend {
            self.store.suspend_batch(tenant_id, batch_code.as_deref()).await
        } else {
            self.store.activate_batch(tenant_id, batch_code.as_deref()).await
        };
        match result {
            Ok(tenant) => {
                let pending = self
                    .store
                    .list_messages(tenant_id, 1_000_000)
                    .await
                    .map(|ms| ms.iter().filter(|m| m.is_pending()).count())
                    .unwrap_or(0);
                CommandResult::ok(serde_json::json!({
                    "tenant_id": tenant_id,
                    "batch_code": batch_code,
                    "suspended_batches": tenant.suspended_batches,
                    "pending_messages": pending,
                }))
            }
            Err(e) => CommandResult::err(e.to_string()),
        }
    }

    async fn add_messages(
        self: &Arc<Self>,
        tenant_id: &str,
        messages: Vec<SubmittedMessage>,
        default_priority: Option<Value>,
    ) -> CommandResult {
        const MAX_ENQUEUE_BATCH: usize = 1000;
        if messages.len() > MAX_ENQUEUE_BATCH {
            return CommandResult::err(format!(
                "batch of {} exceeds max_enqueue_batch ({MAX_ENQUEUE_BATCH})",
                messages.len()
            ));
        }

        let default_priority = default_priority
            .as_ref()
            .map(|v| Priority::parse(v, Priority::Medium))
            .unwrap_or(Priority::Medium);

        let instance = self.store.get_instance().await.ok();
        let default_account_id = instance.as_ref().and_then(|i| i.default_account_id.clone());

        let pec_account_ids: std::collections::HashSet<String> = self
            .store
            .list_accounts(tenant_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|a| a.is_pec_account)
            .map(|a| a.id)
            .collect();

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for entry in messages {
            if let Some(reason) = validate_submission(self, &entry, default_account_id.as_deref()).await {
                // Rejected at admission, never queued (spec.md §6 "Admission
                // validation"). Entries that carry a client id are still
                // persisted as a terminal row with an `error` event, so the
                // tenant learns about the rejection via the normal reporting
                // path too, not just the synchronous response.
                if let Err(e) = self.store.insert_rejected_message(tenant_id, &entry, &reason).await {
                    tracing::error!(error = %e, "failed to persist rejected message");
                }
                rejected.push(serde_json::json!({ "id": entry.id, "reason": reason }));
                continue;
            }
            accepted.push(entry);
        }

        let outcome = match self
            .store
            .insert_messages(
                tenant_id,
                &accepted,
                default_priority,
                default_account_id.as_deref(),
                &pec_account_ids,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return CommandResult::err(e.to_string()),
        };

        for id in outcome.already_sent {
            rejected.push(serde_json::json!({ "id": id, "reason": "already sent" }));
        }
        let queued = outcome.inserted.len();

        self.wake_event.notify_one();

        CommandResult {
            ok: !(queued == 0 && !rejected.is_empty()),
            error: None,
            data: Some(serde_json::json!({ "queued": queued, "rejected": rejected })),
        }
    }

    async fn delete_messages(self: &Arc<Self>, tenant_id: &str, ids: Vec<String>) -> CommandResult {
        let mut removed = 0;
        let mut not_found = Vec::new();
        let mut unauthorized = Vec::new();

        for id in ids {
            match self.store.delete_message(tenant_id, &id).await {
                Ok(()) => removed += 1,
                Err(crate::store::StoreError::NotFound) => {
                    if self.message_belongs_to_other_tenant(&id, tenant_id).await {
                        unauthorized.push(id);
                    } else {
                        not_found.push(id);
                    }
                }
                Err(_) => not_found.push(id),
            }
        }

        CommandResult::ok(serde_json::json!({
            "removed": removed,
            "not_found": not_found,
            "unauthorized": unauthorized,
        }))
    }

    async fn message_belongs_to_other_tenant(self: &Arc<Self>, id: &str, tenant_id: &str) -> bool {
        // Cheap best-effort scan; the Store has no cross-tenant lookup by
        // client id since `(tenant_id, id)` is the unique key (spec.md §3
        // I5). Tenants are few relative to messages in this deployment
        // shape, so this stays linear rather than adding a new index.
        let Ok(tenants) = self.store.list_tenants().await else {
            return false;
        };
        for tenant in tenants {
            if tenant.id == tenant_id {
                continue;
            }
            if let Ok(messages) = self.store.list_messages(&tenant.id, 1_000_000).await {
                if messages.iter().any(|m| m.id == id) {
                    return true;
                }
            }
        }
        false
    }

    async fn list_messages(self: &Arc<Self>, tenant_id: &str, active_only: bool) -> CommandResult {
        match self.store.list_messages(tenant_id, 10_000).await {
            Ok(messages) => {
                let filtered: Vec<_> = messages
                    .into_iter()
                    .filter(|m| !active_only || m.is_pending())
                    .collect();
                CommandResult::ok(serde_json::to_value(filtered).unwrap())
            }
            Err(e) => CommandResult::err(e.to_string()),
        }
    }

    async fn cleanup_messages(
        self: &Arc<Self>,
        tenant_id: &str,
        older_than_seconds: Option<i64>,
    ) -> CommandResult {
        let retention = older_than_seconds.unwrap_or(self.settings.reporter.report_retention_secs);
        let cutoff = Utc::now() - chrono::Duration::seconds(retention);
        match self.store.cleanup_messages(tenant_id, cutoff).await {
            Ok(removed) => CommandResult::ok(serde_json::json!({ "removed": removed })),
            Err(e) => CommandResult::err(e.to_string()),
        }
    }
}

/// Validation rules from spec.md §6 "Admission validation".
async fn validate_submission(
    core: &Arc<Core>,
    entry: &SubmittedMessage,
    default_account_id: Option<&str>,
) -> Option<String> {
    if entry.id.is_none() {
        return Some("missing id".to_string());
    }
    if entry.from.is_none() {
        return Some("missing from".to_string());
    }
    if entry.to.as_ref().map_or(true, |to| to.is_empty()) {
        return Some("missing to".to_string());
    }
    if let Some(account_id) = &entry.account_id {
        if core.store.get_account(account_id).await.is_err() {
            return Some("account not found".to_string());
        }
    } else if default_account_id.is_none() {
        return Some("missing account configuration".to_string());
    }
    None
}

fn instance_to_json(instance: &crate::store::Instance) -> Value {
    serde_json::json!({
        "api_token_hash": instance.api_token_hash,
        "bounce_imap_host": instance.bounce_imap_host,
        "bounce_imap_port": instance.bounce_imap_port,
        "bounce_imap_user": instance.bounce_imap_user,
        "default_account_id": instance.default_account_id,
    })
}
