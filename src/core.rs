use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Notify;

use crate::attachments::AttachmentCache;
use crate::attachments::AttachmentResolver;
use crate::attachments::CacheConfig;
use crate::configuration::Settings;
use crate::metrics::Metrics;
use crate::rate_limiter::RateLimiter;
use crate::smtp_pool::SmtpPool;
use crate::smtp_pool::WorkerId;
use crate::store::Store;

/// Composition root (REDESIGN FLAGS: "Mixins/god-object" → composition).
/// Constructed once in `main`, shared as `Arc<Core>` with the background
/// loops and the thin control-API layer.
pub struct Core {
    pub store: Store,
    pub rate_limiter: RateLimiter,
    pub pool: SmtpPool,
    pub attachments: AttachmentResolver,
    pub metrics: Metrics,
    pub settings: Settings,
    pub wake_event: Notify,
    pub wake_client_event: Notify,
    /// Held for the life of `Core` and cloned out (a cheap `Arc` bump, see
    /// `reqwest::Client::clone`) wherever the Reporter needs it, the same
    /// "establish once, reuse everywhere" discipline the teacher's
    /// `email_client.rs` documents for its own `reqwest::Client` field.
    http: Client,
    next_worker: AtomicU32,
}

impl Core {
    pub fn new(store: Store, settings: Settings) -> Self {
        let cache = Some(AttachmentCache::new(CacheConfig {
            memory_max_mb: settings.attachments.memory_max_mb,
            memory_ttl_secs: settings.attachments.memory_ttl_secs,
            disk_max_mb: settings.attachments.disk_max_mb,
            disk_threshold_kb: settings.attachments.disk_threshold_kb,
            disk_dir: PathBuf::from(&settings.attachments.disk_dir),
        }));
        let attachment_http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        let attachments = AttachmentResolver::new(
            attachment_http,
            cache,
            PathBuf::from(&settings.attachments.filesystem_base_dir),
        );
        let rate_limiter = RateLimiter::new(store.clone());
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.reporter.http_timeout_secs))
            .build()
            .expect("reqwest client");

        Self {
            store,
            rate_limiter,
            pool: SmtpPool::new(),
            attachments,
            metrics: Metrics::new(),
            settings,
            wake_event: Notify::new(),
            wake_client_event: Notify::new(),
            http,
            next_worker: AtomicU32::new(0),
        }
    }

    /// Assigns a worker identity round-robin across a fixed-size band,
    /// bounding the number of distinct pool entries regardless of how many
    /// dispatch tasks run concurrently (spec.md §4.3, REDESIGN FLAGS).
    pub fn next_worker_id(&self) -> WorkerId {
        let band = self.settings.dispatch.max_concurrent_sends.max(1) as u32;
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
        WorkerId(n % band)
    }

    /// The Reporter's shared HTTP client — built once in `new`, cloned out
    /// (cheap: an `Arc` bump internally) rather than rebuilt per call.
    pub fn reqwest_client(&self) -> Client { self.http.clone() }
}

pub type SharedCore = Arc<Core>;
