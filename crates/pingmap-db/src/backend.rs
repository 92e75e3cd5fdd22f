use pingmap_core::{AppConfig, StoreKind};

use crate::{
    connect_pool, run_migrations, HttpKvStore, KeyPage, KvStore, MemoryStore, PgStore, PoolConfig,
    PutCondition, PutOutcome, StoreError, Versioned,
};

/// The store selected by `PINGMAP_STORE`, dispatching statically to one of
/// the concrete backends.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Postgres(PgStore),
    Http(HttpKvStore),
}

impl StoreBackend {
    /// Build the configured backend. For Postgres this connects the pool and
    /// runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot be reached or configured.
    pub async fn connect(config: &AppConfig) -> Result<Self, StoreError> {
        match &config.store {
            StoreKind::Memory => {
                tracing::warn!("using in-memory cell store; data is lost on restart");
                Ok(Self::Memory(MemoryStore::new()))
            }
            StoreKind::Postgres { database_url } => {
                let pool = connect_pool(database_url, PoolConfig::from_app_config(config)).await?;
                run_migrations(&pool).await?;
                Ok(Self::Postgres(PgStore::new(pool)))
            }
            StoreKind::Http {
                base_url,
                api_token,
            } => {
                tracing::warn!(
                    "HTTP cell store has no conditional writes; concurrent merges to one cell may undercount"
                );
                Ok(Self::Http(HttpKvStore::new(
                    base_url,
                    api_token.clone(),
                    config.kv_request_timeout_secs,
                )?))
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
            Self::Http(_) => "http",
        }
    }
}

impl KvStore for StoreBackend {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        match self {
            Self::Memory(s) => s.get(key).await,
            Self::Postgres(s) => s.get(key).await,
            Self::Http(s) => s.get(key).await,
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        condition: PutCondition,
    ) -> Result<PutOutcome, StoreError> {
        match self {
            Self::Memory(s) => s.put(key, value, condition).await,
            Self::Postgres(s) => s.put(key, value, condition).await,
            Self::Http(s) => s.put(key, value, condition).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            Self::Memory(s) => s.delete(key).await,
            Self::Postgres(s) => s.delete(key).await,
            Self::Http(s) => s.delete(key).await,
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<KeyPage, StoreError> {
        match self {
            Self::Memory(s) => s.list_page(prefix, cursor, limit).await,
            Self::Postgres(s) => s.list_page(prefix, cursor, limit).await,
            Self::Http(s) => s.list_page(prefix, cursor, limit).await,
        }
    }

    fn supports_conditional_writes(&self) -> bool {
        match self {
            Self::Memory(s) => s.supports_conditional_writes(),
            Self::Postgres(s) => s.supports_conditional_writes(),
            Self::Http(s) => s.supports_conditional_writes(),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.health_check().await,
            Self::Postgres(s) => s.ping().await,
            Self::Http(s) => s.ping().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_dispatches_and_reports_cas() {
        let backend = StoreBackend::Memory(MemoryStore::new());
        assert_eq!(backend.name(), "memory");
        assert!(backend.supports_conditional_writes());
        backend.health_check().await.expect("memory store is always healthy");

        let value = serde_json::json!({ "received": 1.0 });
        backend
            .put("cell:abc", &value, PutCondition::Absent)
            .await
            .expect("put");
        let stored = backend.get("cell:abc").await.expect("get").expect("present");
        assert_eq!(stored.value, value);
        let page = backend.list_page("cell:", None, 10).await.expect("list");
        assert_eq!(page.keys, vec!["cell:abc"]);
    }

    #[test]
    fn http_backend_has_no_conditional_writes() {
        let store = HttpKvStore::new("http://127.0.0.1:9/kv", None, 1).expect("client");
        let backend = StoreBackend::Http(store);
        assert_eq!(backend.name(), "http");
        assert!(!backend.supports_conditional_writes());
    }
}
