//! Per-session context and the registry that owns them.

use super::TransactionStore;
use crate::memory::SummaryCache;
use crate::models::{RawRecord, Reply, Transaction};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Everything one voice session reads and writes.
pub struct SessionContext {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    store: TransactionStore,
    cache: RwLock<SummaryCache>,
    last_reply: RwLock<Option<Reply>>,
}

impl SessionContext {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            store: TransactionStore::new(),
            cache: RwLock::new(SummaryCache::new()),
            last_reply: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    /// Load a new upload and invalidate every cached summary.
    pub async fn replace_dataset(&self, records: Vec<RawRecord>) -> Result<Vec<Transaction>> {
        let transactions = self.store.load(records).await?;
        self.cache.write().await.clear();

        info!(session_id = %self.id, rows = transactions.len(), "Session dataset replaced");
        Ok(transactions)
    }

    pub async fn cached_summary(&self, key: &str, dataset_version: u64) -> Option<Reply> {
        self.cache
            .read()
            .await
            .get(key, dataset_version)
            .map(|entry| entry.reply.clone())
    }

    pub async fn remember_summary(&self, key: String, dataset_version: u64, reply: Reply) {
        self.cache.write().await.insert(key, dataset_version, reply);
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn last_reply(&self) -> Option<Reply> {
        self.last_reply.read().await.clone()
    }

    pub async fn set_last_reply(&self, reply: &Reply) {
        *self.last_reply.write().await = Some(reply.clone());
    }
}

pub const DEFAULT_SESSION_CAPACITY: usize = 1024;
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);

struct SessionEntry {
    context: Arc<SessionContext>,
    last_used: Instant,
}

/// Session id → context. Replaces any process-wide dataset.
///
/// Bounded: sessions idle longer than `idle_ttl` expire, and creating a
/// session at capacity evicts the least recently used one.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    capacity: usize,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_SESSION_CAPACITY, DEFAULT_SESSION_IDLE)
    }

    pub fn with_limits(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            idle_ttl,
        }
    }

    /// Look up a live session and mark it used. Never creates one.
    pub async fn get(&self, id: Uuid) -> Option<Arc<SessionContext>> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let expired = match sessions.get_mut(&id) {
            Some(entry) if now.duration_since(entry.last_used) <= self.idle_ttl => {
                entry.last_used = now;
                return Some(entry.context.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            sessions.remove(&id);
            info!(session_id = %id, "Session expired");
        }
        None
    }

    pub async fn get_or_create(&self, id: Uuid) -> Arc<SessionContext> {
        if let Some(context) = self.get(id).await {
            return context;
        }

        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        // Another request may have created it meanwhile
        if let Some(entry) = sessions.get_mut(&id) {
            entry.last_used = now;
            return entry.context.clone();
        }

        let idle_ttl = self.idle_ttl;
        sessions.retain(|_, entry| now.duration_since(entry.last_used) <= idle_ttl);

        while sessions.len() >= self.capacity {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key);
            match oldest {
                Some(key) => {
                    sessions.remove(&key);
                    info!(session_id = %key, "Session evicted");
                }
                None => break,
            }
        }

        info!(session_id = %id, "Session created");
        let context = Arc::new(SessionContext::new(id));
        sessions.insert(
            id,
            SessionEntry {
                context: context.clone(),
                last_used: now,
            },
        );
        context
    }

    /// Drop a session. In-flight work holding the context sees its dataset
    /// cleared and discards stale results.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(entry) => {
                entry.context.store().clear().await;
                info!(session_id = %id, "Session removed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReplyKind;

    #[tokio::test]
    async fn test_replace_dataset_clears_cache() {
        let context = SessionContext::new(Uuid::new_v4());
        context
            .replace_dataset(vec![RawRecord::new("2024-01-05", "Coffee", "-4.50", Some("Food"))])
            .await
            .unwrap();

        let version = context.store().version().await;
        context
            .remember_summary("k".to_string(), version, Reply::new(ReplyKind::Answer, "cached"))
            .await;
        assert!(context.cached_summary("k", version).await.is_some());

        context
            .replace_dataset(vec![RawRecord::new("2024-02-05", "Tea", "-3.00", Some("Food"))])
            .await
            .unwrap();

        assert_eq!(context.cached_count().await, 0);
        let new_version = context.store().version().await;
        assert!(context.cached_summary("k", new_version).await.is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create(Uuid::new_v4()).await;
        let b = registry.get_or_create(Uuid::new_v4()).await;

        a.replace_dataset(vec![RawRecord::new("2024-01-05", "Coffee", "-4.50", None)])
            .await
            .unwrap();

        assert_eq!(a.store().all().await.len(), 1);
        assert!(b.store().all().await.is_empty());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_context() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let first = registry.get_or_create(id).await;
        let second = registry.get_or_create(id).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_remove_clears_dataset() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let context = registry.get_or_create(id).await;
        context
            .replace_dataset(vec![RawRecord::new("2024-01-05", "Coffee", "-4.50", None)])
            .await
            .unwrap();

        assert!(registry.remove(id).await);
        assert!(context.store().all().await.is_empty());
        assert!(registry.get(id).await.is_none());
        assert!(!registry.remove(id).await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let registry = SessionRegistry::with_limits(2, DEFAULT_SESSION_IDLE);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        registry.get_or_create(a).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        registry.get_or_create(b).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(registry.get(a).await.is_some());

        registry.get_or_create(c).await;
        assert_eq!(registry.len().await, 2);
        assert!(registry.get(a).await.is_some());
        assert!(registry.get(b).await.is_none());
        assert!(registry.get(c).await.is_some());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let registry = SessionRegistry::with_limits(16, Duration::from_millis(20));
        let a = Uuid::new_v4();
        registry.get_or_create(a).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.get(a).await.is_none());
        assert!(registry.is_empty().await);

        registry.get_or_create(Uuid::new_v4()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.get_or_create(Uuid::new_v4()).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_never_creates() {
        let registry = SessionRegistry::new();
        assert!(registry.get(Uuid::new_v4()).await.is_none());
        assert!(registry.is_empty().await);
    }
}
