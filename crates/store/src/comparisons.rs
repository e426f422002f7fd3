use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{Comparison, ComparisonStatus, ReviewStatus},
};

pub struct ComparisonStore {
    pool: SqlitePool,
}

/// Verdict fields computed by the comparison engine.
#[derive(Debug, Clone)]
pub struct NewComparison {
    pub snapshot_id: String,
    pub baseline_id: Option<String>,
    pub test_run_id: Option<String>,
    pub status: ComparisonStatus,
    pub diff_percentage: f64,
    pub diff_pixels: i64,
    pub threshold_used: f64,
    pub within_threshold: bool,
    pub diff_image_key: Option<String>,
    pub review_status: Option<ReviewStatus>,
    pub error: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ComparisonRow {
    id: String,
    snapshot_id: String,
    baseline_id: Option<String>,
    test_run_id: Option<String>,
    status: String,
    diff_percentage: f64,
    diff_pixels: i64,
    threshold_used: f64,
    within_threshold: i64,
    diff_image_key: Option<String>,
    review_status: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<i64>,
    notes: Option<String>,
    error: Option<String>,
    created_at: i64,
}

impl TryFrom<ComparisonRow> for Comparison {
    type Error = Error;

    fn try_from(r: ComparisonRow) -> Result<Self> {
        let review_status = r
            .review_status
            .as_deref()
            .map(ReviewStatus::parse)
            .transpose()?;
        Ok(Self {
            id: r.id,
            snapshot_id: r.snapshot_id,
            baseline_id: r.baseline_id,
            test_run_id: r.test_run_id,
            status: ComparisonStatus::parse(&r.status)?,
            diff_percentage: r.diff_percentage,
            diff_pixels: r.diff_pixels,
            threshold_used: r.threshold_used,
            within_threshold: r.within_threshold != 0,
            diff_image_key: r.diff_image_key,
            review_status,
            reviewed_by: r.reviewed_by,
            reviewed_at: r.reviewed_at,
            notes: r.notes,
            error: r.error,
            created_at: r.created_at,
        })
    }
}

const SELECT: &str = "SELECT id, snapshot_id, baseline_id, test_run_id, status,
                             diff_percentage, diff_pixels, threshold_used,
                             within_threshold, diff_image_key, review_status,
                             reviewed_by, reviewed_at, notes, error, created_at
                      FROM comparisons";

impl ComparisonStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewComparison) -> Result<Comparison> {
        let comparison = Comparison {
            id: vision_common::new_id(),
            snapshot_id: new.snapshot_id,
            baseline_id: new.baseline_id,
            test_run_id: new.test_run_id,
            status: new.status,
            diff_percentage: new.diff_percentage,
            diff_pixels: new.diff_pixels,
            threshold_used: new.threshold_used,
            within_threshold: new.within_threshold,
            diff_image_key: new.diff_image_key,
            review_status: new.review_status,
            reviewed_by: None,
            reviewed_at: None,
            notes: None,
            error: new.error,
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO comparisons
             (id, snapshot_id, baseline_id, test_run_id, status, diff_percentage,
              diff_pixels, threshold_used, within_threshold, diff_image_key,
              review_status, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&comparison.id)
        .bind(&comparison.snapshot_id)
        .bind(&comparison.baseline_id)
        .bind(&comparison.test_run_id)
        .bind(comparison.status.as_str())
        .bind(comparison.diff_percentage)
        .bind(comparison.diff_pixels)
        .bind(comparison.threshold_used)
        .bind(comparison.within_threshold as i64)
        .bind(&comparison.diff_image_key)
        .bind(comparison.review_status.map(|s| s.as_str()))
        .bind(&comparison.error)
        .bind(comparison.created_at)
        .execute(&self.pool)
        .await?;

        Ok(comparison)
    }

    pub async fn get(&self, id: &str) -> Result<Comparison> {
        let row: Option<ComparisonRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("comparison", id))?.try_into()
    }

    pub async fn latest_for_snapshot(&self, snapshot_id: &str) -> Result<Option<Comparison>> {
        let row: Option<ComparisonRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE snapshot_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_for_run(&self, test_run_id: &str) -> Result<Vec<Comparison>> {
        let rows: Vec<ComparisonRow> =
            sqlx::query_as(&format!("{SELECT} WHERE test_run_id = ? ORDER BY created_at"))
                .bind(test_run_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn set_review(
        &self,
        id: &str,
        review: ReviewStatus,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE comparisons
             SET review_status = ?, reviewed_by = ?, reviewed_at = ?, notes = ?
             WHERE id = ?",
        )
        .bind(review.as_str())
        .bind(reviewed_by)
        .bind(now_ms())
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("comparison", id));
        }
        Ok(())
    }

    /// Swap the linked baseline after an approval promoted a new one.
    pub async fn set_baseline(&self, id: &str, baseline_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE comparisons SET baseline_id = ? WHERE id = ?")
            .bind(baseline_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("comparison", id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{NewSnapshotContext, ProjectSettings},
        pages::{NewPage, PageStore},
        profiles::{BrowserProfileStore, NewBrowserProfile},
        projects::ProjectStore,
        schema::init_schema,
        snapshots::SnapshotStore,
    };

    async fn fixture() -> (ComparisonStore, String) {
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
        let snapshot = SnapshotStore::new(pool.clone())
            .create(&page.id, &profile.id, NewSnapshotContext::default())
            .await
            .unwrap();
        (ComparisonStore::new(pool), snapshot.id)
    }

    fn failed(snapshot_id: &str) -> NewComparison {
        NewComparison {
            snapshot_id: snapshot_id.to_string(),
            baseline_id: None,
            test_run_id: None,
            status: ComparisonStatus::Failed,
            diff_percentage: 3.0,
            diff_pixels: 6200,
            threshold_used: 0.01,
            within_threshold: false,
            diff_image_key: Some("diff-key".into()),
            review_status: Some(ReviewStatus::Pending),
            error: None,
        }
    }

    #[tokio::test]
    async fn failed_comparison_enters_review_queue() {
        let (store, snapshot_id) = fixture().await;
        let comparison = store.create(failed(&snapshot_id)).await.unwrap();

        assert_eq!(comparison.status, ComparisonStatus::Failed);
        assert_eq!(comparison.review_status, Some(ReviewStatus::Pending));
        assert!(!comparison.within_threshold);
    }

    #[tokio::test]
    async fn review_records_reviewer_and_notes() {
        let (store, snapshot_id) = fixture().await;
        let comparison = store.create(failed(&snapshot_id)).await.unwrap();

        store
            .set_review(
                &comparison.id,
                ReviewStatus::Rejected,
                "qa@example.com",
                Some("intended change not approved"),
            )
            .await
            .unwrap();

        let reviewed = store.get(&comparison.id).await.unwrap();
        assert_eq!(reviewed.review_status, Some(ReviewStatus::Rejected));
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("qa@example.com"));
        assert!(reviewed.reviewed_at.is_some());
    }

    #[tokio::test]
    async fn latest_for_snapshot_prefers_newest() {
        let (store, snapshot_id) = fixture().await;
        store.create(failed(&snapshot_id)).await.unwrap();

        let mut second = failed(&snapshot_id);
        second.status = ComparisonStatus::Passed;
        second.diff_percentage = 0.0;
        second.within_threshold = true;
        second.review_status = None;
        let created = store.create(second).await.unwrap();

        let latest = store.latest_for_snapshot(&snapshot_id).await.unwrap().unwrap();
        assert_eq!(latest.id, created.id);
    }
}
