//! Postgres-backed store over the `kv_entries` table.
//!
//! Every write takes a fresh `version` from `kv_entries_version_seq`, which
//! makes compare-and-swap a plain `UPDATE ... WHERE version = $n`. Versions
//! are unique across keys, so a key deleted and recreated never hands a
//! stale reader its old version back.

use sqlx::PgPool;

use crate::{KeyPage, KvStore, PutCondition, PutOutcome, StoreError, Versioned};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Send a `SELECT 1` to verify the pool has a live connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the query fails.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// Escape `LIKE` metacharacters so the prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

impl KvStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let row = sqlx::query_as::<_, (serde_json::Value, i64)>(
            "SELECT value, version FROM kv_entries WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value, version)| Versioned {
            value,
            version: u64::try_from(version).ok(),
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        condition: PutCondition,
    ) -> Result<PutOutcome, StoreError> {
        let rows_affected = match condition {
            PutCondition::Any => sqlx::query(
                "INSERT INTO kv_entries (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO UPDATE SET \
                     value      = EXCLUDED.value, \
                     version    = nextval('kv_entries_version_seq'), \
                     updated_at = NOW()",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            PutCondition::Absent => sqlx::query(
                "INSERT INTO kv_entries (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            PutCondition::Version(expected) => {
                let Ok(expected) = i64::try_from(expected) else {
                    return Ok(PutOutcome::Conflict);
                };
                sqlx::query(
                    "UPDATE kv_entries \
                     SET value = $2, version = nextval('kv_entries_version_seq'), updated_at = NOW() \
                     WHERE key = $1 AND version = $3",
                )
                .bind(key)
                .bind(value)
                .bind(expected)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };

        Ok(if rows_affected == 0 {
            PutOutcome::Conflict
        } else {
            PutOutcome::Written
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let rows_affected = sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    /// The cursor is the last key of the previous page.
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<KeyPage, StoreError> {
        let fetch = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);
        let mut keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM kv_entries \
             WHERE key LIKE $1 ESCAPE '\\' \
               AND ($2::text IS NULL OR key COLLATE \"C\" > $2::text COLLATE \"C\") \
             ORDER BY key COLLATE \"C\" \
             LIMIT $3",
        )
        .bind(like_prefix(prefix))
        .bind(cursor)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await?;

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
