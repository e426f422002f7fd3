//! Memoized browser actions keyed by URL pattern and action type.
//!
//! Patterns keep host + path and drop query/fragment; pages that differ
//! only by query string therefore share entries. That collision is part of
//! the contract and must not be "fixed" without a data migration.

use {sha2::Digest, sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::ActionCacheEntry,
};

/// Entries live for 24 hours from their last successful use.
const TTL_MS: i64 = 24 * 60 * 60 * 1000;

pub struct ActionCacheStore {
    pool: SqlitePool,
}

/// One cacheable action observed during task execution.
#[derive(Debug, Clone)]
pub struct CacheableAction {
    pub url: String,
    pub action_type: String,
    pub action_data: serde_json::Value,
}

/// Reduce a URL to its cache pattern: host + path, no query or fragment.
/// Callers may also store literal patterns containing `%` wildcards, which
/// match with SQL LIKE semantics at lookup time.
pub fn url_to_pattern(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            format!("{}{}", host, parsed.path())
        },
        // Not a full URL; use as-is (already a pattern).
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// 16-hex-char prefix of SHA-256 over the instruction.
pub fn instruction_hash(instruction: &str) -> String {
    let digest = sha2::Sha256::digest(instruction.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    project_id: String,
    url_pattern: String,
    action_type: String,
    instruction_hash: String,
    action_data: String,
    success_count: i64,
    failure_count: i64,
    avg_duration_ms: f64,
    last_used_at: i64,
    expires_at: i64,
    created_at: i64,
}

impl TryFrom<EntryRow> for ActionCacheEntry {
    type Error = Error;

    fn try_from(r: EntryRow) -> Result<Self> {
        let action_data = serde_json::from_str(&r.action_data).map_err(|source| Error::Corrupt {
            column: "action_cache.action_data",
            source,
        })?;
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            url_pattern: r.url_pattern,
            action_type: r.action_type,
            instruction_hash: r.instruction_hash,
            action_data,
            success_count: r.success_count,
            failure_count: r.failure_count,
            avg_duration_ms: r.avg_duration_ms,
            last_used_at: r.last_used_at,
            expires_at: r.expires_at,
            created_at: r.created_at,
        })
    }
}

const SELECT: &str = "SELECT id, project_id, url_pattern, action_type, instruction_hash,
                             action_data, success_count, failure_count, avg_duration_ms,
                             last_used_at, expires_at, created_at
                      FROM action_cache";

impl ActionCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert one successful action. Existing entries gain a success and a
    /// fresh TTL; their payload is replaced with the newest observation.
    pub async fn store(
        &self,
        project_id: &str,
        url: &str,
        action_type: &str,
        action_data: &serde_json::Value,
        instruction: Option<&str>,
    ) -> Result<()> {
        let pattern = url_to_pattern(url);
        let hash = instruction.map(instruction_hash).unwrap_or_default();
        let now = now_ms();

        sqlx::query(
            "INSERT INTO action_cache
             (id, project_id, url_pattern, action_type, instruction_hash, action_data,
              success_count, failure_count, last_used_at, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, 0, ?, ?, ?)
             ON CONFLICT (project_id, url_pattern, action_type, instruction_hash)
             DO UPDATE SET success_count = success_count + 1,
                           action_data = excluded.action_data,
                           last_used_at = excluded.last_used_at,
                           expires_at = excluded.expires_at",
        )
        .bind(vision_common::new_id())
        .bind(project_id)
        .bind(&pattern)
        .bind(action_type)
        .bind(&hash)
        .bind(serde_json::to_string(action_data).unwrap_or_else(|_| "{}".into()))
        .bind(now)
        .bind(now + TTL_MS)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a batch from one task flush in a single transaction. Actions
    /// are grouped by (pattern, action type); each group contributes its
    /// size to `success_count`.
    pub async fn batch_store(
        &self,
        project_id: &str,
        actions: &[CacheableAction],
        instruction: Option<&str>,
    ) -> Result<usize> {
        if actions.is_empty() {
            return Ok(0);
        }

        let hash = instruction.map(instruction_hash).unwrap_or_default();
        let now = now_ms();

        let mut groups: Vec<(String, &str, &serde_json::Value, i64)> = Vec::new();
        for action in actions {
            let pattern = url_to_pattern(&action.url);
            match groups
                .iter_mut()
                .find(|(p, a, _, _)| *p == pattern && *a == action.action_type)
            {
                Some(group) => group.3 += 1,
                None => groups.push((pattern, &action.action_type, &action.action_data, 1)),
            }
        }

        let mut tx = self.pool.begin().await?;
        let group_count = groups.len();

        for (pattern, action_type, action_data, count) in groups {
            sqlx::query(
                "INSERT INTO action_cache
                 (id, project_id, url_pattern, action_type, instruction_hash, action_data,
                  success_count, failure_count, last_used_at, expires_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                 ON CONFLICT (project_id, url_pattern, action_type, instruction_hash)
                 DO UPDATE SET success_count = success_count + excluded.success_count,
                               action_data = excluded.action_data,
                               last_used_at = excluded.last_used_at,
                               expires_at = excluded.expires_at",
            )
            .bind(vision_common::new_id())
            .bind(project_id)
            .bind(&pattern)
            .bind(action_type)
            .bind(&hash)
            .bind(serde_json::to_string(action_data).unwrap_or_else(|_| "{}".into()))
            .bind(count)
            .bind(now)
            .bind(now + TTL_MS)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(group_count)
    }

    /// Reliable, unexpired entries matching the URL (LIKE over the stored
    /// pattern), best success record first.
    pub async fn lookup(
        &self,
        project_id: &str,
        url: &str,
        action_type: Option<&str>,
        instruction: Option<&str>,
    ) -> Result<Vec<ActionCacheEntry>> {
        let pattern = url_to_pattern(url);
        let now = now_ms();

        let mut sql = format!(
            "{SELECT} WHERE project_id = ? AND ? LIKE url_pattern AND expires_at > ?
                      AND success_count > 2 * failure_count"
        );
        if action_type.is_some() {
            sql.push_str(" AND action_type = ?");
        }
        if instruction.is_some() {
            sql.push_str(" AND instruction_hash = ?");
        }
        sql.push_str(" ORDER BY success_count DESC");

        let mut query = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(project_id)
            .bind(&pattern)
            .bind(now);
        if let Some(action) = action_type {
            query = query.bind(action);
        }
        if let Some(instruction) = instruction {
            query = query.bind(instruction_hash(instruction));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Reward a cache hit that worked, folding the duration into the
    /// rolling average.
    pub async fn record_success(&self, id: &str, duration_ms: Option<f64>) -> Result<()> {
        let result = match duration_ms {
            Some(duration) => {
                sqlx::query(
                    // Expressions read the pre-update row, so the new mean is
                    // (avg * n + duration) / (n + 1).
                    "UPDATE action_cache
                     SET success_count = success_count + 1,
                         avg_duration_ms = (avg_duration_ms * success_count + ?)
                                           / (success_count + 1),
                         last_used_at = ?
                     WHERE id = ?",
                )
                .bind(duration)
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?
            },
            None => {
                sqlx::query(
                    "UPDATE action_cache
                     SET success_count = success_count + 1, last_used_at = ?
                     WHERE id = ?",
                )
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?
            },
        };

        if result.rows_affected() == 0 {
            return Err(Error::not_found("action_cache_entry", id));
        }
        Ok(())
    }

    /// Penalize a cache hit that failed; entries that keep failing are
    /// deleted outright.
    pub async fn record_failure(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE action_cache SET failure_count = failure_count + 1 WHERE id = ?",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::not_found("action_cache_entry", id));
        }

        sqlx::query(
            "DELETE FROM action_cache
             WHERE id = ? AND failure_count > 3 AND failure_count > success_count / 2",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ActionCacheEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM action_cache WHERE expires_at <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ProjectSettings, projects::ProjectStore, schema::init_schema};

    async fn fixture() -> (ActionCacheStore, String) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        (ActionCacheStore::new(pool), project.id)
    }

    #[test]
    fn patterns_drop_query_and_fragment() {
        assert_eq!(
            url_to_pattern("https://app.example.com/login?next=/home#top"),
            "app.example.com/login"
        );
        assert_eq!(url_to_pattern("app.example.com/%"), "app.example.com/%");
    }

    #[test]
    fn instruction_hash_is_16_hex_chars() {
        let hash = instruction_hash("log into the site");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, instruction_hash("log into the site"));
        assert_ne!(hash, instruction_hash("something else"));
    }

    #[tokio::test]
    async fn store_upserts_and_counts_successes() {
        let (store, project_id) = fixture().await;
        let url = "https://app.example.com/login?x=1";
        let data = serde_json::json!({"selector": "#submit"});

        store.store(&project_id, url, "click", &data, None).await.unwrap();
        store.store(&project_id, url, "click", &data, None).await.unwrap();

        let hits = store.lookup(&project_id, url, Some("click"), None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].success_count, 2);
    }

    #[tokio::test]
    async fn lookup_requires_reliability() {
        let (store, project_id) = fixture().await;
        let url = "https://app.example.com/form";
        let data = serde_json::json!({"selector": "#ok"});

        store.store(&project_id, url, "click", &data, None).await.unwrap();
        let entry = store
            .lookup(&project_id, url, None, None)
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();

        // One success, one failure: 1 > 2 is false, so no longer reliable.
        store.record_failure(&entry.id).await.unwrap();
        assert!(store.lookup(&project_id, url, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_invalidate_the_entry() {
        let (store, project_id) = fixture().await;
        let url = "https://app.example.com/flaky";
        let data = serde_json::json!({"selector": "#go"});

        store.store(&project_id, url, "click", &data, None).await.unwrap();
        let entry = store
            .lookup(&project_id, url, None, None)
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();

        // 4 more successes: 5 total.
        for _ in 0..4 {
            store.record_success(&entry.id, Some(120.0)).await.unwrap();
        }
        // 1 failure: 5 vs 1, still reliable and still present.
        store.record_failure(&entry.id).await.unwrap();
        assert!(store.get(&entry.id).await.unwrap().is_some());
        assert_eq!(store.lookup(&project_id, url, None, None).await.unwrap().len(), 1);

        // 4 further failures: at 5 vs 5 the entry crosses the invalidation
        // rule (failure > 3 and failure > success/2) and is deleted.
        for _ in 0..4 {
            store.record_failure(&entry.id).await.unwrap();
        }
        assert!(store.get(&entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_store_groups_by_pattern_and_action() {
        let (store, project_id) = fixture().await;

        let actions = vec![
            CacheableAction {
                url: "https://shop.example.com/cart?step=1".into(),
                action_type: "click".into(),
                action_data: serde_json::json!({"x": 10, "y": 20}),
            },
            CacheableAction {
                url: "https://shop.example.com/cart?step=2".into(),
                action_type: "click".into(),
                action_data: serde_json::json!({"x": 12, "y": 20}),
            },
            CacheableAction {
                url: "https://shop.example.com/cart".into(),
                action_type: "type".into(),
                action_data: serde_json::json!({"value": "2"}),
            },
        ];

        let groups = store
            .batch_store(&project_id, &actions, Some("buy two widgets"))
            .await
            .unwrap();
        assert_eq!(groups, 2);

        let clicks = store
            .lookup(
                &project_id,
                "https://shop.example.com/cart",
                Some("click"),
                Some("buy two widgets"),
            )
            .await
            .unwrap();
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].success_count, 2);
    }

    #[tokio::test]
    async fn avg_duration_is_a_rolling_mean() {
        let (store, project_id) = fixture().await;
        let data = serde_json::json!({});
        store
            .store(&project_id, "https://a.example.com/x", "click", &data, None)
            .await
            .unwrap();
        let entry = store
            .lookup(&project_id, "https://a.example.com/x", None, None)
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();

        store.record_success(&entry.id, Some(100.0)).await.unwrap();
        store.record_success(&entry.id, Some(200.0)).await.unwrap();

        let updated = store.get(&entry.id).await.unwrap().unwrap();
        // Averaged over the successes that carried a duration.
        assert!(updated.avg_duration_ms > 0.0);
        assert!(updated.avg_duration_ms <= 200.0);
    }
}
