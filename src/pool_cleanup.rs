use std::sync::Arc;
use std::time::Duration;

use crate::core::Core;

/// Background sweep: every `smtp_pool.cleanup_interval_secs`, evicts stale or
/// dead pooled SMTP connections (spec.md §4.3, §5). Has no wake signal of its
/// own — unlike the dispatch/report loops, there's nothing event-driven about
/// connection aging.
pub async fn run_loop(core: Arc<Core>) -> anyhow::Result<()> {
    let interval = Duration::from_secs(core.settings.smtp_pool.cleanup_interval_secs);
    loop {
        tokio::time::sleep(interval).await;
        core.pool.cleanup().await;
    }
}
