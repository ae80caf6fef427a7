mod classify;
mod mime;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::core::Core;
use crate::domain::Message;
use crate::domain::Tenant;

/// Long-lived dispatch loop: `_process_smtp_cycle` then wait on
/// `wake_event` or `send_loop_interval` (spec.md §4.5, §5).
pub async fn run_loop(core: Arc<Core>) -> anyhow::Result<()> {
    let interval = Duration::from_millis(core.settings.dispatch.send_loop_interval_ms);
    loop {
        match process_smtp_cycle(&core).await {
            Ok(true) => core.wake_client_event.notify_one(),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "dispatch cycle failed"),
        }

        tokio::select! {
            _ = core.wake_event.notified() => {},
            _ = tokio::time::sleep(interval) => {},
        }
    }
}

/// Returns `true` iff at least one message was processed (success or
/// terminal failure), signalling the Reporter to drain sooner.
async fn process_smtp_cycle(core: &Arc<Core>) -> anyhow::Result<bool> {
    let now = Utc::now();
    let batch = core
        .store
        .fetch_ready_messages(core.settings.dispatch.smtp_batch_size, now)
        .await?;

    core.metrics.pending_messages.set(batch.len() as f64);

    if batch.is_empty() {
        return Ok(false);
    }

    // `fetch_ready_messages` already excludes suspended tenants/batches in
    // its own SQL (spec.md §4.1); the tenant is still looked up here because
    // dispatch needs it downstream (attachment endpoint + auth).
    let mut tenant_cache: HashMap<String, Option<Tenant>> = HashMap::new();
    let mut ready = Vec::with_capacity(batch.len());
    for message in batch {
        let tenant = match tenant_cache.get(&message.tenant_id) {
            Some(t) => t.clone(),
            None => {
                let fetched = core.store.get_tenant(&message.tenant_id).await.ok();
                tenant_cache.insert(message.tenant_id.clone(), fetched.clone());
                fetched
            }
        };
        let Some(tenant) = tenant else { continue };
        ready.push((message, tenant));
    }

    if ready.is_empty() {
        return Ok(false);
    }

    // Group by account_id, then cap each group at its batch_size (account
    // override or global default); anything beyond that is left untouched
    // for the next cycle (spec.md §4.5 step 3).
    let mut groups: HashMap<Option<String>, Vec<(Message, Tenant)>> = HashMap::new();
    for entry in ready {
        groups.entry(entry.0.account_id.clone()).or_default().push(entry);
    }

    let mut selected = Vec::new();
    for (account_id, mut entries) in groups {
        let cap = match &account_id {
            Some(id) => core
                .store
                .get_account(id)
                .await
                .ok()
                .and_then(|a| a.batch_size)
                .unwrap_or(core.settings.dispatch.batch_size_per_account),
            None => core.settings.dispatch.batch_size_per_account,
        };
        let cap = cap.max(0) as usize;
        if entries.len() > cap {
            entries.truncate(cap);
        }
        selected.extend(entries);
    }

    if selected.is_empty() {
        return Ok(false);
    }

    let global = Arc::new(tokio::sync::Semaphore::new(
        core.settings.dispatch.max_concurrent_sends,
    ));
    let mut per_account: HashMap<String, Arc<tokio::sync::Semaphore>> = HashMap::new();
    for (message, _) in &selected {
        let key = message.account_id.clone().unwrap_or_default();
        per_account
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Semaphore::new(
                core.settings.dispatch.max_concurrent_per_account,
            )));
    }

    let mut handles = Vec::with_capacity(selected.len());
    for (message, tenant) in selected {
        let core = Arc::clone(core);
        let global = Arc::clone(&global);
        let account_key = message.account_id.clone().unwrap_or_default();
        let per_account_sem = Arc::clone(per_account.get(&account_key).unwrap());

        handles.push(tokio::spawn(async move {
            let _global_permit = global.acquire_owned().await;
            let _account_permit = per_account_sem.acquire_owned().await;
            worker::dispatch_message(&core, message, &tenant).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "dispatch task panicked");
        }
    }

    Ok(true)
}
