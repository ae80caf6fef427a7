use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use lru::LruCache;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub memory_max_mb: u64,
    pub memory_ttl_secs: i64,
    pub disk_max_mb: u64,
    pub disk_threshold_kb: u64,
    pub disk_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_mb: 64,
            memory_ttl_secs: 600,
            disk_max_mb: 512,
            disk_threshold_kb: 256,
            disk_dir: PathBuf::from("attachment-cache"),
        }
    }
}

struct MemoryEntry {
    bytes: Vec<u8>,
    cached_at: DateTime<Utc>,
}

struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
    total_bytes: u64,
    max_bytes: u64,
    ttl: Duration,
}

struct DiskTier {
    entries: LruCache<String, u64>,
    total_bytes: u64,
    max_bytes: u64,
    dir: PathBuf,
}

/// Two-tier attachment cache keyed by `content_md5` (spec.md §4.4): an
/// in-memory LRU bounded by byte budget with TTL, backed by a disk LRU for
/// blobs too large to justify holding in memory.
pub struct AttachmentCache {
    memory: Mutex<MemoryTier>,
    disk: Mutex<DiskTier>,
    disk_threshold_bytes: u64,
}

impl AttachmentCache {
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(10_000).unwrap();
        Self {
            memory: Mutex::new(MemoryTier {
                entries: LruCache::new(cap),
                total_bytes: 0,
                max_bytes: config.memory_max_mb * 1024 * 1024,
                ttl: Duration::seconds(config.memory_ttl_secs),
            }),
            disk: Mutex::new(DiskTier {
                entries: LruCache::new(cap),
                total_bytes: 0,
                max_bytes: config.disk_max_mb * 1024 * 1024,
                dir: config.disk_dir,
            }),
            disk_threshold_bytes: config.disk_threshold_kb * 1024,
        }
    }

    pub async fn get(&self, content_md5: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.get_memory(content_md5).await {
            return Some(bytes);
        }
        self.get_disk(content_md5).await
    }

    async fn get_memory(&self, key: &str) -> Option<Vec<u8>> {
        let mut tier = self.memory.lock().await;
        let now = Utc::now();
        let ttl = tier.ttl;
        if let Some(entry) = tier.entries.get(key) {
            if now - entry.cached_at <= ttl {
                return Some(entry.bytes.clone());
            }
        }
        if let Some(entry) = tier.entries.pop(key) {
            tier.total_bytes = tier.total_bytes.saturating_sub(entry.bytes.len() as u64);
        }
        None
    }

    async fn get_disk(&self, key: &str) -> Option<Vec<u8>> {
        let path = {
            let mut tier = self.disk.lock().await;
            if tier.entries.get(key).is_none() {
                return None;
            }
            tier.dir.join(key)
        };
        tokio::fs::read(&path).await.ok()
    }

    pub async fn put(&self, content_md5: &str, bytes: Vec<u8>) {
        if (bytes.len() as u64) >= self.disk_threshold_bytes {
            self.put_disk(content_md5, bytes).await;
        } else {
            self.put_memory(content_md5, bytes).await;
        }
    }

    async fn put_memory(&self, key: &str, bytes: Vec<u8>) {
        let mut tier = self.memory.lock().await;
        let size = bytes.len() as u64;
        tier.entries.put(
            key.to_string(),
            MemoryEntry {
                bytes,
                cached_at: Utc::now(),
            },
        );
        tier.total_bytes += size;
        while tier.total_bytes > tier.max_bytes {
            let Some((_, evicted)) = tier.entries.pop_lru() else {
                break;
            };
            tier.total_bytes = tier.total_bytes.saturating_sub(evicted.bytes.len() as u64);
        }
    }

    async fn put_disk(&self, key: &str, bytes: Vec<u8>) {
        let mut tier = self.disk.lock().await;
        if tokio::fs::create_dir_all(&tier.dir).await.is_err() {
            return;
        }
        let path = tier.dir.join(key);
        if tokio::fs::write(&path, &bytes).await.is_err() {
            return;
        }
        let size = bytes.len() as u64;
        tier.entries.put(key.to_string(), size);
        tier.total_bytes += size;
        while tier.total_bytes > tier.max_bytes {
            let Some((evicted_key, evicted_size)) = tier.entries.pop_lru() else {
                break;
            };
            let _ = remove_file_best_effort(&tier.dir, &evicted_key).await;
            tier.total_bytes = tier.total_bytes.saturating_sub(evicted_size);
        }
    }
}

async fn remove_file_best_effort(dir: &Path, key: &str) -> std::io::Result<()> {
    tokio::fs::remove_file(dir.join(key)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_roundtrip() {
        let cache = AttachmentCache::new(CacheConfig::default());
        cache.put("abc", vec![1, 2, 3]).await;
        assert_eq!(cache.get("abc").await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn large_blob_goes_to_disk() {
        let dir = std::env::temp_dir().join(format!("mailcore-test-{}", std::process::id()));
        let mut config = CacheConfig::default();
        config.disk_threshold_kb = 1;
        config.disk_dir = dir.clone();
        let cache = AttachmentCache::new(config);
        let blob = vec![0u8; 4096];
        cache.put("big", blob.clone()).await;
        assert_eq!(cache.get("big").await, Some(blob));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = AttachmentCache::new(CacheConfig::default());
        assert_eq!(cache.get("nope").await, None);
    }
}
