use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

use crate::core::Core;
use crate::domain::ClientAuth;
use crate::domain::EventType;
use crate::domain::MessageEvent;
use crate::domain::Tenant;
use crate::store::StoreUnreportedEvent;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct TenantResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    queued: i64,
}

/// Long-lived report loop: `_process_client_cycle` then wait on
/// `wake_client_event` or the fallback interval (spec.md §4.6, §5).
pub async fn run_loop(core: Arc<Core>) -> anyhow::Result<()> {
    let fallback = Duration::from_secs(core.settings.reporter.fallback_interval_secs);
    loop {
        let queued = match process_client_cycle(&core).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "report cycle failed");
                0
            }
        };

        if queued > 0 {
            continue;
        }

        tokio::select! {
            _ = core.wake_client_event.notified() => {},
            _ = tokio::time::sleep(fallback) => {},
        }
    }
}

async fn process_client_cycle(core: &Arc<Core>) -> Result<i64, ReportError> {
    let events = core
        .store
        .fetch_unreported_events(core.settings.dispatch.smtp_batch_size)
        .await?;

    if events.is_empty() {
        return poll_tenants_with_no_work(core, None).await;
    }

    let mut by_tenant: HashMap<String, Vec<StoreUnreportedEvent>> = HashMap::new();
    for event in events {
        by_tenant.entry(event.tenant_id.clone()).or_default().push(event);
    }

    let mut acked_ids = Vec::new();
    let mut total_queued = 0i64;

    for (tenant_id, events) in by_tenant {
        let Ok(tenant) = core.store.get_tenant(&tenant_id).await else {
            continue;
        };

        let Some(url) = tenant
            .sync_url()
            .or_else(|| core.settings.reporter.global_sync_url.clone())
        else {
            tracing::warn!(tenant_id = %tenant_id, "no sync url configured, events remain unreported");
            continue;
        };

        let payloads: Vec<Value> = events
            .iter()
            .filter(|e| e.event.event_type != EventType::Pending)
            .filter(|e| core.settings.dispatch.report_deferred_events || e.event.event_type != EventType::Deferred)
            .map(|e| event_payload(&e.event, &e.client_message_id))
            .collect();

        if payloads.is_empty() {
            acked_ids.extend(events.iter().map(|e| e.event.event_id));
            continue;
        }

        let body = json!({ "delivery_report": payloads });
        let client = core.reqwest_client();
        let mut request = client.post(&url).json(&body);
        request = apply_auth(request, &tenant);

        match request.send().await {
            Ok(response) => {
                if response.status().is_success() {
                    let queued = match response.json::<TenantResponse>().await {
                        Ok(parsed) => parsed.queued,
                        Err(_) => {
                            // Non-JSON 2xx still acknowledges the batch
                            // (tenant contract requires JSON to signal
                            // trouble) but is surfaced as an observability
                            // counter rather than silently dropped.
                            core.metrics
                                .errors_total
                                .with_label_values(&["reporter"])
                                .inc();
                            0
                        }
                    };
                    acked_ids.extend(events.iter().map(|e| e.event.event_id));
                    total_queued += queued;
                } else {
                    tracing::warn!(tenant_id = %tenant_id, status = %response.status(), "reporter POST failed");
                }
            }
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "reporter POST failed");
            }
        }
    }

    if !acked_ids.is_empty() {
        core.store.mark_events_reported(&acked_ids, Utc::now()).await?;
    }

    apply_retention(core).await?;
    Ok(total_queued)
}

/// When there's nothing to report, still poke tenant sync endpoints so they
/// can push new messages back to us during the call (spec.md §4.6 step 2).
async fn poll_tenants_with_no_work(
    core: &Arc<Core>,
    run_now_tenant_id: Option<&str>,
) -> Result<i64, ReportError> {
    let client = core.reqwest_client();
    let mut total_queued = 0i64;

    let tenants: Vec<Tenant> = if let Some(id) = run_now_tenant_id {
        core.store.get_tenant(id).await.into_iter().collect()
    } else {
        core.store
            .list_tenants()
            .await?
            .into_iter()
            .filter(|t| t.active)
            .collect()
    };

    for tenant in tenants {
        let Some(url) = tenant
            .sync_url()
            .or_else(|| core.settings.reporter.global_sync_url.clone())
        else {
            continue;
        };
        let mut request = client.post(&url).json(&json!({ "delivery_report": [] }));
        request = apply_auth(request, &tenant);
        if let Ok(response) = request.send().await {
            if let Ok(parsed) = response.json::<TenantResponse>().await {
                total_queued += parsed.queued;
            }
        }
    }

    apply_retention(core).await?;
    Ok(total_queued)
}

async fn apply_retention(core: &Arc<Core>) -> Result<(), ReportError> {
    let retention = core.settings.reporter.report_retention_secs;
    if retention <= 0 {
        return Ok(());
    }
    let cutoff = Utc::now() - chrono::Duration::seconds(retention);
    // `remove_reported_before` must run first: it qualifies a message by
    // `EXISTS (... message_events ...)`, which the event purge below would
    // otherwise invalidate by deleting a terminal message's last event rows
    // before the message itself is ever considered for deletion.
    core.store.remove_reported_before(cutoff).await?;
    core.store.purge_reported_events_before(cutoff).await?;
    Ok(())
}

fn apply_auth(request: reqwest::RequestBuilder, tenant: &Tenant) -> reqwest::RequestBuilder {
    match &tenant.client_auth {
        ClientAuth::None => request,
        ClientAuth::Bearer { token } => request.bearer_auth(token.expose_secret()),
        ClientAuth::Basic { user, password } => {
            request.basic_auth(user, Some(password.expose_secret()))
        }
    }
}

fn event_payload(event: &MessageEvent, client_message_id: &str) -> Value {
    match event.event_type {
        EventType::Sent => json!({
            "id": client_message_id,
            "sent_ts": event.event_ts.timestamp(),
        }),
        EventType::Error => json!({
            "id": client_message_id,
            "error_ts": event.event_ts.timestamp(),
            "error": event.description,
        }),
        EventType::Deferred => json!({
            "id": client_message_id,
            "deferred_ts": event.event_ts.timestamp(),
            "deferred_reason": event.description,
        }),
        EventType::Bounce => json!({
            "id": client_message_id,
            "bounce_ts": event.event_ts.timestamp(),
            "bounce_type": event.metadata.as_ref().and_then(|m| m.get("bounce_type")),
            "bounce_code": event.metadata.as_ref().and_then(|m| m.get("bounce_code")),
            "bounce_reason": event.description,
        }),
        EventType::PecAcceptance | EventType::PecDelivery | EventType::PecError => json!({
            "id": client_message_id,
            "pec_event": event.event_type.as_str(),
            "pec_ts": event.event_ts.timestamp(),
            "pec_details": event.metadata,
        }),
        // Filtered out before this function is ever called — spec.md §4.6's
        // conversion table has no `pending` entry, since the tenant already
        // knows it submitted the message.
        EventType::Pending => unreachable!("pending events are filtered out before conversion"),
    }
}
