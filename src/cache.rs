use std::time::Duration;

use sea_orm::{
    DatabaseConnection, EntityTrait, Set,
    sea_query::OnConflict,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{entities::api_cache, error::AppResult, store::now_sec};

/// Read-through cache over the `api_cache` table. Entries are keyed by the
/// normalized request shape and expire purely by age; a sync run never
/// purges them.
#[derive(Clone)]
pub struct ResponseCache {
    db: DatabaseConnection,
}

impl ResponseCache {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Serve a fresh entry when one exists, otherwise run `compute`, store
    /// its value, and return it. A failing `compute` stores nothing and the
    /// error reaches the caller unchanged. Two concurrent misses may both
    /// compute; the later write wins.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> AppResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Value>>,
    {
        if let Some(value) = self.lookup(key, ttl).await? {
            debug!(key, "cache hit");
            return Ok(value);
        }
        debug!(key, "cache miss");

        let value = compute().await?;
        self.insert(key, &value).await?;
        Ok(value)
    }

    async fn lookup(&self, key: &str, ttl: Duration) -> AppResult<Option<Value>> {
        let Some(entry) = api_cache::Entity::find_by_id(key.to_string()).one(&self.db).await?
        else {
            return Ok(None);
        };

        if now_sec().saturating_sub(entry.cached_at) > ttl.as_secs() as i64 {
            return Ok(None);
        }

        match serde_json::from_str(&entry.payload) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "discarding unreadable cache entry");
                Ok(None)
            },
        }
    }

    async fn insert(&self, key: &str, value: &Value) -> AppResult<()> {
        let model = api_cache::ActiveModel {
            cache_key: Set(key.to_string()),
            payload: Set(value.to_string()),
            cached_at: Set(now_sec()),
        };

        api_cache::Entity::insert(model)
            .on_conflict(
                OnConflict::column(api_cache::Column::CacheKey)
                    .update_columns([api_cache::Column::Payload, api_cache::Column::CachedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }
}

/// Deterministic key for one endpoint + query-parameter shape. Parameters
/// are sorted so logically identical requests share an entry regardless of
/// argument order.
pub fn request_key(endpoint: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return endpoint.to_string();
    }
    let mut parts: Vec<String> =
        params.iter().map(|(name, value)| format!("{name}={}", urlencoding::encode(value))).collect();
    parts.sort();
    format!("{endpoint}?{}", parts.join("&"))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use sea_orm::ActiveModelTrait;
    use serde_json::json;

    use super::*;
    use crate::{error::AppError, testing::temp_store};

    async fn temp_cache() -> (ResponseCache, tempfile::NamedTempFile) {
        let (store, file) = temp_store().await;
        (ResponseCache::new(store.db().clone()), file)
    }

    fn ttl(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn request_key_is_order_insensitive() {
        let a = request_key("movies:list", &[("genre", "28".into()), ("page", "2".into())]);
        let b = request_key("movies:list", &[("page", "2".into()), ("genre", "28".into())]);
        assert_eq!(a, b);
        assert_eq!(a, "movies:list?genre=28&page=2");
    }

    #[test]
    fn request_key_separates_endpoints_and_params() {
        let a = request_key("movies:popular", &[]);
        let b = request_key("movies:top-rated", &[]);
        assert_ne!(a, b);

        let c = request_key("movies:list", &[("page", "1".into())]);
        let d = request_key("movies:list", &[("page", "2".into())]);
        assert_ne!(c, d);
    }

    #[tokio::test]
    async fn second_request_within_ttl_is_served_from_cache() {
        let (cache, _db_file) = temp_cache().await;
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in [json!({"v": 1}), json!({"v": 1})] {
            let calls = calls.clone();
            let value = cache
                .get_or_compute("k", ttl(60), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"v": 1}))
                })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_value_is_served_until_ttl_elapses() {
        let (cache, _db_file) = temp_cache().await;

        cache.get_or_compute("k", ttl(60), || async { Ok(json!("old")) }).await.unwrap();

        // Underlying data "changes", but the entry is still fresh.
        let value =
            cache.get_or_compute("k", ttl(60), || async { Ok(json!("new")) }).await.unwrap();
        assert_eq!(value, json!("old"));
    }

    #[tokio::test]
    async fn expired_entry_triggers_recompute() {
        let (cache, _db_file) = temp_cache().await;

        cache.get_or_compute("k", ttl(60), || async { Ok(json!("old")) }).await.unwrap();

        // Age the entry past any TTL.
        let entry = api_cache::Entity::find_by_id("k".to_string())
            .one(&cache.db)
            .await
            .unwrap()
            .unwrap();
        let mut active: api_cache::ActiveModel = entry.into();
        active.cached_at = Set(now_sec() - 3_600);
        active.update(&cache.db).await.unwrap();

        let value =
            cache.get_or_compute("k", ttl(60), || async { Ok(json!("new")) }).await.unwrap();
        assert_eq!(value, json!("new"));
    }

    #[tokio::test]
    async fn compute_failure_is_not_cached() {
        let (cache, _db_file) = temp_cache().await;

        let err = cache
            .get_or_compute("k", ttl(60), || async {
                Err(AppError::Validation("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let value =
            cache.get_or_compute("k", ttl(60), || async { Ok(json!("ok")) }).await.unwrap();
        assert_eq!(value, json!("ok"));
    }
}
