use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{NewSnapshotContext, Snapshot, SnapshotStatus},
};

pub struct SnapshotStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    page_id: String,
    browser_profile_id: String,
    test_run_id: Option<String>,
    status: String,
    branch: String,
    commit_sha: Option<String>,
    environment: Option<String>,
    width: i64,
    height: i64,
    image_key: Option<String>,
    thumbnail_key: Option<String>,
    error: Option<String>,
    created_at: i64,
    captured_at: Option<i64>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = Error;

    fn try_from(r: SnapshotRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            page_id: r.page_id,
            browser_profile_id: r.browser_profile_id,
            test_run_id: r.test_run_id,
            status: SnapshotStatus::parse(&r.status)?,
            branch: r.branch,
            commit_sha: r.commit_sha,
            environment: r.environment,
            width: r.width as u32,
            height: r.height as u32,
            image_key: r.image_key,
            thumbnail_key: r.thumbnail_key,
            error: r.error,
            created_at: r.created_at,
            captured_at: r.captured_at,
        })
    }
}

const SELECT: &str = "SELECT id, page_id, browser_profile_id, test_run_id, status,
                             branch, commit_sha, environment, width, height,
                             image_key, thumbnail_key, error, created_at, captured_at
                      FROM snapshots";

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        page_id: &str,
        browser_profile_id: &str,
        context: NewSnapshotContext,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot {
            id: vision_common::new_id(),
            page_id: page_id.to_string(),
            browser_profile_id: browser_profile_id.to_string(),
            test_run_id: context.test_run_id,
            status: SnapshotStatus::Pending,
            branch: context.branch,
            commit_sha: context.commit_sha,
            environment: context.environment,
            width: 0,
            height: 0,
            image_key: None,
            thumbnail_key: None,
            error: None,
            created_at: now_ms(),
            captured_at: None,
        };

        sqlx::query(
            "INSERT INTO snapshots
             (id, page_id, browser_profile_id, test_run_id, status, branch,
              commit_sha, environment, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.page_id)
        .bind(&snapshot.browser_profile_id)
        .bind(&snapshot.test_run_id)
        .bind(snapshot.status.as_str())
        .bind(&snapshot.branch)
        .bind(&snapshot.commit_sha)
        .bind(&snapshot.environment)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        Ok(snapshot)
    }

    pub async fn get(&self, id: &str) -> Result<Snapshot> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("snapshot", id))?.try_into()
    }

    pub async fn list_for_run(&self, test_run_id: &str) -> Result<Vec<Snapshot>> {
        let rows: Vec<SnapshotRow> =
            sqlx::query_as(&format!("{SELECT} WHERE test_run_id = ? ORDER BY created_at"))
                .bind(test_run_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Record stored bytes and flip pending → captured.
    pub async fn mark_captured(
        &self,
        id: &str,
        image_key: &str,
        thumbnail_key: Option<&str>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE snapshots
             SET status = 'captured', image_key = ?, thumbnail_key = ?,
                 width = ?, height = ?, captured_at = ?
             WHERE id = ?",
        )
        .bind(image_key)
        .bind(thumbnail_key)
        .bind(width as i64)
        .bind(height as i64)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("snapshot", id));
        }
        Ok(())
    }

    pub async fn mark_status(&self, id: &str, status: SnapshotStatus) -> Result<()> {
        let result = sqlx::query("UPDATE snapshots SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("snapshot", id));
        }
        Ok(())
    }

    pub async fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        let result = sqlx::query("UPDATE snapshots SET status = 'error', error = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("snapshot", id));
        }
        Ok(())
    }

}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::ProjectSettings,
        pages::{NewPage, PageStore},
        profiles::{BrowserProfileStore, NewBrowserProfile},
        projects::ProjectStore,
        schema::init_schema,
    };

    async fn fixture() -> (SqlitePool, String, String) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        let page = PageStore::new(pool.clone())
            .create(
                &project.id,
                NewPage {
                    slug: "home".into(),
                    url_path: "/".into(),
                    enabled: true,
                    settings: Default::default(),
                },
            )
            .await
            .unwrap();
        let profile = BrowserProfileStore::new(pool.clone())
            .create(&project.id, NewBrowserProfile::default())
            .await
            .unwrap();
        (pool, page.id, profile.id)
    }

    #[tokio::test]
    async fn lifecycle_pending_to_compared() {
        let (pool, page_id, profile_id) = fixture().await;
        let store = SnapshotStore::new(pool);

        let snapshot = store
            .create(&page_id, &profile_id, NewSnapshotContext::default())
            .await
            .unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Pending);

        store
            .mark_captured(&snapshot.id, "key", None, 800, 600)
            .await
            .unwrap();
        let captured = store.get(&snapshot.id).await.unwrap();
        assert_eq!(captured.status, SnapshotStatus::Captured);
        assert_eq!(captured.width, 800);
        assert!(captured.captured_at.is_some());

        store
            .mark_status(&snapshot.id, SnapshotStatus::Comparing)
            .await
            .unwrap();
        store
            .mark_status(&snapshot.id, SnapshotStatus::Compared)
            .await
            .unwrap();
        assert_eq!(
            store.get(&snapshot.id).await.unwrap().status,
            SnapshotStatus::Compared
        );
    }

    #[tokio::test]
    async fn error_records_message() {
        let (pool, page_id, profile_id) = fixture().await;
        let store = SnapshotStore::new(pool);

        let snapshot = store
            .create(&page_id, &profile_id, NewSnapshotContext::default())
            .await
            .unwrap();
        store.mark_error(&snapshot.id, "navigation failed").await.unwrap();

        let errored = store.get(&snapshot.id).await.unwrap();
        assert_eq!(errored.status, SnapshotStatus::Error);
        assert_eq!(errored.error.as_deref(), Some("navigation failed"));
    }
}
