//! In-process store for tests and single-node development.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{KeyPage, KvStore, PutCondition, PutOutcome, StoreError, Versioned};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, (serde_json::Value, u64)>,
    /// Monotonic across all keys, so a deleted-then-recreated key never
    /// reuses an old version.
    next_version: u64,
}

/// Versioned in-memory map. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).map(|(value, version)| Versioned {
            value: value.clone(),
            version: Some(*version),
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        condition: PutCondition,
    ) -> Result<PutOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.entries.get(key).map(|(_, v)| *v);
        let allowed = match condition {
            PutCondition::Any => true,
            PutCondition::Absent => current.is_none(),
            PutCondition::Version(expected) => current == Some(expected),
        };
        if !allowed {
            return Ok(PutOutcome::Conflict);
        }

        inner.next_version += 1;
        let version = inner.next_version;
        inner
            .entries
            .insert(key.to_owned(), (value.clone(), version));
        Ok(PutOutcome::Written)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.entries.remove(key).is_some())
    }

    /// The cursor is the last key of the previous page.
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<KeyPage, StoreError> {
        use std::ops::Bound;

        let inner = self.inner.read().await;
        let start = match cursor {
            Some(after) if after >= prefix => Bound::Excluded(after.to_owned()),
            _ => Bound::Included(prefix.to_owned()),
        };
        let mut keys: Vec<String> = inner
            .entries
            .range((start, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit.saturating_add(1))
            .map(|(k, _)| k.clone())
            .collect();

        let cursor = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };
        Ok(KeyPage { keys, cursor })
    }

    fn supports_conditional_writes(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn get_returns_none_for_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("cell:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_with_version() {
        let store = MemoryStore::new();
        let outcome = store
            .put("cell:abc", &json!({"received": 1.0}), PutCondition::Any)
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Written);

        let got = store.get("cell:abc").await.unwrap().expect("present");
        assert_eq!(got.value, json!({"received": 1.0}));
        assert!(got.version.is_some());
    }

    #[tokio::test]
    async fn absent_condition_only_creates() {
        let store = MemoryStore::new();
        let first = store.put("k", &json!(1), PutCondition::Absent).await.unwrap();
        let second = store.put("k", &json!(2), PutCondition::Absent).await.unwrap();
        assert_eq!(first, PutOutcome::Written);
        assert_eq!(second, PutOutcome::Conflict);
        assert_eq!(store.get("k").await.unwrap().unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn version_condition_detects_interleaved_write() {
        let store = MemoryStore::new();
        store.put("k", &json!(1), PutCondition::Any).await.unwrap();
        let read = store.get("k").await.unwrap().unwrap();
        let version = read.version.unwrap();

        // Another writer sneaks in.
        store.put("k", &json!(2), PutCondition::Any).await.unwrap();

        let stale = store
            .put("k", &json!(3), PutCondition::Version(version))
            .await
            .unwrap();
        assert_eq!(stale, PutOutcome::Conflict);
        assert_eq!(store.get("k").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn recreated_key_gets_fresh_version() {
        let store = MemoryStore::new();
        store.put("k", &json!(1), PutCondition::Any).await.unwrap();
        let old = store.get("k").await.unwrap().unwrap().version.unwrap();
        assert!(store.delete("k").await.unwrap());
        store.put("k", &json!(1), PutCondition::Any).await.unwrap();
        let new = store.get("k").await.unwrap().unwrap().version.unwrap();
        assert_ne!(old, new);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_in_order() {
        let store = MemoryStore::new();
        for key in ["cell:b", "cell:a", "other:a", "cell:c", "cellar"] {
            store.put(key, &json!(null), PutCondition::Any).await.unwrap();
        }
        let page = store.list_page("cell:", None, 10).await.unwrap();
        assert_eq!(page.keys, vec!["cell:a", "cell:b", "cell:c"]);
        assert_eq!(page.cursor, None);
    }

    #[tokio::test]
    async fn list_page_resumes_after_cursor() {
        let store = MemoryStore::new();
        for key in ["cell:a", "cell:b", "cell:c", "other:a"] {
            store.put(key, &json!(null), PutCondition::Any).await.unwrap();
        }
        let first = store.list_page("cell:", None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["cell:a", "cell:b"]);
        assert_eq!(first.cursor.as_deref(), Some("cell:b"));

        // Deleting the cursor key does not lose the rest of the listing.
        store.delete("cell:b").await.unwrap();
        let second = store
            .list_page("cell:", first.cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["cell:c"]);
        assert_eq!(second.cursor, None);
    }

    #[tokio::test]
    async fn exact_fit_page_has_no_cursor() {
        let store = MemoryStore::new();
        for key in ["cell:a", "cell:b"] {
            store.put(key, &json!(null), PutCondition::Any).await.unwrap();
        }
        let page = store.list_page("cell:", None, 2).await.unwrap();
        assert_eq!(page.keys.len(), 2);
        assert_eq!(page.cursor, None);
    }

    #[tokio::test]
    async fn delete_reports_whether_key_existed() {
        let store = MemoryStore::new();
        assert!(!store.delete("missing").await.unwrap());
        store.put("k", &json!(1), PutCondition::Any).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(store.is_empty().await);
    }
}
