//! Baseline persistence and the atomic promotion path.
//!
//! Invariant: at most one baseline is active per
//! (page, browser profile, branch); enforced by a unique partial index and
//! by running every promotion inside one transaction that deactivates the
//! previous active row before inserting the new one.

use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{Baseline, Snapshot},
};

pub struct BaselineStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct BaselineRow {
    id: String,
    page_id: String,
    browser_profile_id: String,
    branch: String,
    active: i64,
    approved_at: Option<i64>,
    approved_by: Option<String>,
    commit_sha: Option<String>,
    width: i64,
    height: i64,
    image_key: String,
    thumbnail_key: Option<String>,
    created_at: i64,
}

impl From<BaselineRow> for Baseline {
    fn from(r: BaselineRow) -> Self {
        Self {
            id: r.id,
            page_id: r.page_id,
            browser_profile_id: r.browser_profile_id,
            branch: r.branch,
            active: r.active != 0,
            approved_at: r.approved_at,
            approved_by: r.approved_by,
            commit_sha: r.commit_sha,
            width: r.width as u32,
            height: r.height as u32,
            image_key: r.image_key,
            thumbnail_key: r.thumbnail_key,
            created_at: r.created_at,
        }
    }
}

const SELECT: &str = "SELECT id, page_id, browser_profile_id, branch, active,
                             approved_at, approved_by, commit_sha, width, height,
                             image_key, thumbnail_key, created_at
                      FROM baselines";

impl BaselineStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Baseline> {
        let row: Option<BaselineRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Into::into).ok_or_else(|| Error::not_found("baseline", id))
    }

    /// The current active baseline for a (page, profile, branch) key.
    pub async fn active_for(
        &self,
        page_id: &str,
        browser_profile_id: &str,
        branch: &str,
    ) -> Result<Option<Baseline>> {
        let row: Option<BaselineRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE page_id = ? AND browser_profile_id = ? AND branch = ?
                     AND active = 1"
        ))
        .bind(page_id)
        .bind(browser_profile_id)
        .bind(branch)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    pub async fn list_for_page(&self, page_id: &str) -> Result<Vec<Baseline>> {
        let rows: Vec<BaselineRow> =
            sqlx::query_as(&format!("{SELECT} WHERE page_id = ? ORDER BY created_at DESC"))
                .bind(page_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Promote a captured snapshot to the active baseline for its key.
    ///
    /// Runs in one transaction: deactivate the previous active baseline,
    /// insert the new one referencing the snapshot's stored bytes. Promoting
    /// a snapshot whose bytes already back the active baseline is a no-op
    /// returning the existing row, so repeated approvals cannot pile up
    /// duplicates.
    pub async fn promote(&self, snapshot: &Snapshot, approved_by: &str) -> Result<Baseline> {
        let image_key = snapshot
            .image_key
            .as_deref()
            .ok_or_else(|| Error::invalid("snapshot", "has no stored image to promote"))?;

        let mut tx = self.pool.begin().await?;

        let current: Option<BaselineRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE page_id = ? AND browser_profile_id = ? AND branch = ?
                     AND active = 1"
        ))
        .bind(&snapshot.page_id)
        .bind(&snapshot.browser_profile_id)
        .bind(&snapshot.branch)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = current {
            if existing.image_key == image_key {
                tx.rollback().await?;
                return Ok(existing.into());
            }
            sqlx::query("UPDATE baselines SET active = 0 WHERE id = ?")
                .bind(&existing.id)
                .execute(&mut *tx)
                .await?;
        }

        let baseline = Baseline {
            id: vision_common::new_id(),
            page_id: snapshot.page_id.clone(),
            browser_profile_id: snapshot.browser_profile_id.clone(),
            branch: snapshot.branch.clone(),
            active: true,
            approved_at: Some(now_ms()),
            approved_by: Some(approved_by.to_string()),
            commit_sha: snapshot.commit_sha.clone(),
            width: snapshot.width,
            height: snapshot.height,
            image_key: image_key.to_string(),
            thumbnail_key: snapshot.thumbnail_key.clone(),
            created_at: now_ms(),
        };

        let inserted = sqlx::query(
            "INSERT INTO baselines
             (id, page_id, browser_profile_id, branch, active, approved_at, approved_by,
              commit_sha, width, height, image_key, thumbnail_key, created_at)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&baseline.id)
        .bind(&baseline.page_id)
        .bind(&baseline.browser_profile_id)
        .bind(&baseline.branch)
        .bind(baseline.approved_at)
        .bind(&baseline.approved_by)
        .bind(&baseline.commit_sha)
        .bind(baseline.width as i64)
        .bind(baseline.height as i64)
        .bind(&baseline.image_key)
        .bind(&baseline.thumbnail_key)
        .bind(baseline.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let err = Error::from(e);
            // A concurrent promotion won the unique-active race.
            if err.is_unique_violation() {
                return Err(Error::Conflict("baseline promotion race".into()));
            }
            return Err(err);
        }

        tx.commit().await?;

        tracing::info!(
            baseline_id = baseline.id,
            page_id = baseline.page_id,
            branch = baseline.branch,
            approved_by,
            "promoted snapshot to baseline"
        );

        Ok(baseline)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{NewSnapshotContext, ProjectSettings, SnapshotStatus},
        pages::{NewPage, PageStore},
        profiles::{BrowserProfileStore, NewBrowserProfile},
        projects::ProjectStore,
        schema::init_schema,
        snapshots::SnapshotStore,
    };

    async fn fixture() -> (SqlitePool, Snapshot) {
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

        let snapshots = SnapshotStore::new(pool.clone());
        let snapshot = snapshots
            .create(&page.id, &profile.id, NewSnapshotContext::default())
            .await
            .unwrap();
        snapshots
            .mark_captured(&snapshot.id, "blob-1", Some("thumb-1"), 1920, 1080)
            .await
            .unwrap();
        let snapshot = snapshots.get(&snapshot.id).await.unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Captured);

        (pool, snapshot)
    }

    #[tokio::test]
    async fn promotion_deactivates_previous_active() {
        let (pool, snapshot) = fixture().await;
        let store = BaselineStore::new(pool.clone());

        let first = store.promote(&snapshot, "qa@example.com").await.unwrap();
        assert!(first.active);

        // Capture a changed snapshot and promote it over the first baseline.
        let snapshots = SnapshotStore::new(pool.clone());
        let second_snap = snapshots
            .create(
                &snapshot.page_id,
                &snapshot.browser_profile_id,
                NewSnapshotContext::default(),
            )
            .await
            .unwrap();
        snapshots
            .mark_captured(&second_snap.id, "blob-2", None, 1920, 1080)
            .await
            .unwrap();
        let second_snap = snapshots.get(&second_snap.id).await.unwrap();

        let second = store.promote(&second_snap, "qa@example.com").await.unwrap();
        assert!(second.active);

        let active = store
            .active_for(&snapshot.page_id, &snapshot.browser_profile_id, "main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);

        let all = store.list_for_page(&snapshot.page_id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|b| b.active).count(), 1);
    }

    #[tokio::test]
    async fn repeated_promotion_of_same_bytes_is_idempotent() {
        let (pool, snapshot) = fixture().await;
        let store = BaselineStore::new(pool);

        let first = store.promote(&snapshot, "qa@example.com").await.unwrap();
        let second = store.promote(&snapshot, "qa@example.com").await.unwrap();
        assert_eq!(first.id, second.id);

        let all = store.list_for_page(&snapshot.page_id).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
