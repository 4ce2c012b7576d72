use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{
    apply_failure, apply_success, CacheEntry, CacheFilter, CacheKey, CacheStore, FailureRecord,
    StoreFuture, SuccessRecord,
};
use crate::domain::UtcDateTime;

/// Process-local cache store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<CacheEntry>> {
        Box::pin(async move { Ok(self.inner.read().await.get(key).cloned()) })
    }

    fn put(&self, entry: CacheEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().await.insert(entry.key.clone(), entry);
            Ok(())
        })
    }

    fn touch_access<'a>(&'a self, key: &'a CacheKey, at: UtcDateTime) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut store = self.inner.write().await;
            Ok(match store.get_mut(key) {
                Some(entry) => {
                    entry.last_accessed_at = at;
                    true
                }
                None => false,
            })
        })
    }

    fn delete(&self, filter: CacheFilter) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut store = self.inner.write().await;
            let before = store.len();
            store.retain(|_, entry| !filter.matches(entry));
            Ok(before - store.len())
        })
    }

    fn entries(&self) -> StoreFuture<'_, Vec<CacheEntry>> {
        Box::pin(async move {
            let store = self.inner.read().await;
            let mut entries = store.values().cloned().collect::<Vec<_>>();
            entries.sort_by(|left, right| left.key.cmp(&right.key));
            Ok(entries)
        })
    }

    fn record_success(&self, record: SuccessRecord) -> StoreFuture<'_, CacheEntry> {
        Box::pin(async move {
            let key = record.scope.key();
            let mut store = self.inner.write().await;
            let entry = apply_success(store.remove(&key), record);
            store.insert(key, entry.clone());
            Ok(entry)
        })
    }

    fn record_failure(&self, record: FailureRecord) -> StoreFuture<'_, Option<CacheEntry>> {
        Box::pin(async move {
            let mut store = self.inner.write().await;
            let updated = apply_failure(store.get(&record.key).cloned(), &record);
            if let Some(entry) = &updated {
                store.insert(record.key.clone(), entry.clone());
            }
            Ok(updated)
        })
    }
}
