use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("invalid cache pattern `{0}`")]
    InvalidPattern(String),
}

/// String key/value store with per-entry expiry. Writes are idempotent and
/// last-write-wins.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
    /// `prefix*` removes every key starting with `prefix`; anything else is an exact key.
    async fn clear(&self, pattern: &str) -> Result<usize, CacheError>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|entry| entry.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.expires_at <= Instant::now()) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries.write().await.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.contains('*') => Err(CacheError::InvalidPattern(pattern.to_string())),
            Some(prefix) => {
                let before = entries.len();
                entries.retain(|key, _| !key.starts_with(prefix));
                Ok(before - entries.len())
            }
            None if pattern.contains('*') => Err(CacheError::InvalidPattern(pattern.to_string())),
            None => Ok(usize::from(entries.remove(pattern).is_some())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Cache, CacheError, InMemoryCache};

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache.set("classify:abc", "{}".to_string(), Duration::from_millis(20)).await.expect("set");
        assert_eq!(cache.get("classify:abc").await.expect("get").as_deref(), Some("{}"));

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("classify:abc").await.expect("get"), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn clear_supports_prefix_patterns() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("classify:a", "1".to_string(), ttl).await.expect("set");
        cache.set("classify:b", "2".to_string(), ttl).await.expect("set");
        cache.set("other:c", "3".to_string(), ttl).await.expect("set");

        assert_eq!(cache.clear("classify:*").await.expect("clear"), 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.clear("other:c").await.expect("clear"), 1);
        assert_eq!(
            cache.clear("a*b*").await,
            Err(CacheError::InvalidPattern("a*b*".to_string()))
        );
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".to_string(), Duration::from_secs(1)).await.expect("set");
        assert!(cache.delete("k").await.expect("delete"));
        assert!(!cache.delete("k").await.expect("delete"));
    }
}
