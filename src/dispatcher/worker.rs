use std::sync::Arc;

use chrono::Utc;

use crate::core::Core;
use crate::dispatcher::classify;
use crate::dispatcher::classify::Outcome;
use crate::dispatcher::mime::build_message;
use crate::domain::Account;
use crate::domain::Message;
use crate::domain::Tenant;
use crate::smtp_pool::send as pool_send;
use crate::smtp_pool::PoolError;

/// Per-message dispatch, spec.md §4.5 `_dispatch_message`. Every terminal
/// write to the Store is committed before this function returns, so no
/// message is lost across a shutdown mid-cycle (spec.md §5 "Cancellation").
pub async fn dispatch_message(core: &Arc<Core>, message: Message, tenant: &Tenant) {
    let now = Utc::now();

    let account = match resolve_account(core, &message).await {
        Ok(account) => account,
        Err(reason) => {
            let _ = core.store.mark_error(message.pk, now, &reason).await;
            core.metrics
                .errors_total
                .with_label_values(&["unknown"])
                .inc();
            return;
        }
    };

    let decision = match core.rate_limiter.check_and_plan(&account, now).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, message_pk = %message.pk, "rate limiter store error");
            return;
        }
    };

    if !decision.is_admitted() {
        if decision.should_reject {
            let _ = core.store.mark_error(message.pk, now, "rate_limit_exceeded").await;
            core.metrics
                .errors_total
                .with_label_values(&[account.id.as_str()])
                .inc();
        } else if let Some(until) = decision.deferred_until {
            let _ = core.store.set_deferred(message.pk, until, "rate_limit").await;
            core.metrics
                .deferred_total
                .with_label_values(&[account.id.as_str()])
                .inc();
        }
        core.metrics
            .rate_limited_total
            .with_label_values(&[account.id.as_str()])
            .inc();
        return;
    }

    let mut resolved_attachments = Vec::with_capacity(message.payload.attachments.len());
    for attachment in &message.payload.attachments {
        match core.attachments.resolve(attachment, tenant).await {
            Ok(resolved) => resolved_attachments.push(resolved),
            Err(e) => {
                // A single attachment fetch failure is a permanent per-message
                // error (spec.md §4.5 step 3): the tenant owns its attachment
                // sources, so this does not retry.
                core.rate_limiter.release_slot(&account.id).await;
                let _ = core
                    .store
                    .mark_error(message.pk, now, &format!("attachment fetch failed: {e}"))
                    .await;
                core.metrics
                    .errors_total
                    .with_label_values(&[account.id.as_str()])
                    .inc();
                return;
            }
        }
    }

    let built = match build_message(&message.payload, &resolved_attachments) {
        Ok(m) => m,
        Err(e) => {
            core.rate_limiter.release_slot(&account.id).await;
            let _ = core
                .store
                .mark_error(message.pk, now, &format!("invalid message: {e}"))
                .await;
            core.metrics
                .errors_total
                .with_label_values(&[account.id.as_str()])
                .inc();
            return;
        }
    };

    let worker = core.next_worker_id();
    let transport = match core.pool.acquire(worker, &account).await {
        Ok(t) => t,
        Err(e) => {
            handle_send_failure(core, &message, &account, smtp_code(&e), &e.to_string()).await;
            return;
        }
    };

    match pool_send(&transport, &built).await {
        Ok(()) => {
            let _ = core.store.mark_sent(message.pk, now).await;
            if let Err(e) = core.rate_limiter.log_send(&account.id, now).await {
                tracing::error!(error = %e, "failed to persist send_log row");
            }
            core.metrics
                .sent_total
                .with_label_values(&[account.id.as_str()])
                .inc();
        }
        Err(e) => handle_send_failure(core, &message, &account, smtp_code(&e), &e.to_string()).await,
    }
}

/// Extracts the 4xx/5xx distinction `lettre` already parsed out of the
/// server's reply, so `classify()` can take its "smtp_code known" branch
/// instead of falling back to substring matching on every real SMTP
/// rejection (spec.md §7).
fn smtp_code(error: &PoolError) -> Option<u16> {
    match error {
        PoolError::Transport(e) if e.is_permanent() => Some(550),
        PoolError::Transport(e) if e.is_transient() => Some(450),
        PoolError::Transport(_) | PoolError::Timeout => None,
    }
}

async fn handle_send_failure(
    core: &Arc<Core>,
    message: &Message,
    account: &Account,
    smtp_code: Option<u16>,
    description: &str,
) {
    let now = Utc::now();
    let outcome = classify::classify(smtp_code, description);
    let retry_count = message.payload.retry_count;
    let max_retries = core.settings.dispatch.max_retries;

    if outcome == Outcome::Temporary && (retry_count as u32) < max_retries {
        core.rate_limiter.release_slot(&account.id).await;

        let delays = &core.settings.dispatch.retry_delays_secs;
        let idx = (retry_count as usize).min(delays.len().saturating_sub(1));
        let delay_secs = delays.get(idx).copied().unwrap_or(7200);

        let mut payload = message.payload.clone();
        payload.retry_count += 1;
        if let Ok(value) = serde_json::to_value(&payload) {
            let _ = core.store.update_message_payload(message.pk, &value).await;
        }

        let retry_at = now + chrono::Duration::seconds(delay_secs);
        let _ = core
            .store
            .set_deferred(message.pk, retry_at, description)
            .await;
        core.metrics
            .deferred_total
            .with_label_values(&[account.id.as_str()])
            .inc();
    } else {
        core.rate_limiter.release_slot(&account.id).await;
        let reason = if outcome == Outcome::Temporary {
            format!("Max retries ({max_retries}) exceeded: {description}")
        } else {
            description.to_string()
        };
        let _ = core.store.mark_error(message.pk, now, &reason).await;
        core.metrics
            .errors_total
            .with_label_values(&[account.id.as_str()])
            .inc();
    }
}

async fn resolve_account(core: &Arc<Core>, message: &Message) -> Result<Account, String> {
    if let Some(account_id) = &message.account_id {
        return core
            .store
            .get_account(account_id)
            .await
            .map_err(|_| "missing_account_configuration".to_string());
    }

    let instance = core
        .store
        .get_instance()
        .await
        .map_err(|_| "missing_account_configuration".to_string())?;
    let default_id = instance
        .default_account_id
        .ok_or_else(|| "missing_account_configuration".to_string())?;
    core.store
        .get_account(&default_id)
        .await
        .map_err(|_| "missing_account_configuration".to_string())
}
