//! Comparison engine: fetch baseline and snapshot bytes, diff, persist
//! the verdict, and roll the outcome up into the owning test run.

use std::sync::Arc;

use {
    tracing::{info, warn},
    vision_differ::{DiffOptions, compare},
    vision_store::{
        BlobStore, Store,
        comparisons::NewComparison,
        models::{Comparison, ComparisonStatus, ReviewStatus, Snapshot, SnapshotStatus},
        test_runs::RunOutcome,
    },
};

use crate::error::{Error, Result};

pub struct CompareEngine {
    store: Store,
    blobs: Arc<dyn BlobStore>,
}

impl CompareEngine {
    pub fn new(store: Store, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Compare a captured snapshot against the active baseline for its
    /// (page, profile, branch) key.
    ///
    /// Threshold defaults to the project threshold; the verdict compares
    /// `diff_percentage / 100` against it. Failures downstream of capture
    /// (missing bytes, decode errors) become `error` comparisons rather
    /// than bubbling out, so one broken capture never stalls a run.
    pub async fn run_comparison(
        &self,
        snapshot_id: &str,
        threshold_override: Option<f64>,
    ) -> Result<Comparison> {
        let snapshot = self.store.snapshots().get(snapshot_id).await?;

        let baseline = self
            .store
            .baselines()
            .active_for(&snapshot.page_id, &snapshot.browser_profile_id, &snapshot.branch)
            .await?;

        let threshold = match threshold_override {
            Some(threshold) => threshold,
            None => self.project_threshold(&snapshot).await?,
        };

        let Some(baseline) = baseline else {
            // First capture for this key: nothing to compare against yet.
            warn!(snapshot_id, "no active baseline, recording error comparison");
            return self
                .record_error(&snapshot, threshold, "no active baseline for this page/browser/branch")
                .await;
        };

        self.store
            .snapshots()
            .mark_status(snapshot_id, SnapshotStatus::Comparing)
            .await?;

        let baseline_bytes = match self.blobs.get(&baseline.image_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .record_error(&snapshot, threshold, &format!("baseline image unavailable: {e}"))
                    .await;
            },
        };
        let snapshot_key = match snapshot.image_key.as_deref() {
            Some(key) => key,
            None => {
                return self
                    .record_error(&snapshot, threshold, "snapshot has no stored image")
                    .await;
            },
        };
        let snapshot_bytes = match self.blobs.get(snapshot_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .record_error(&snapshot, threshold, &format!("snapshot image unavailable: {e}"))
                    .await;
            },
        };

        let diff = match compare(&baseline_bytes, &snapshot_bytes, &DiffOptions::default()) {
            Ok(diff) => diff,
            Err(e) => {
                return self
                    .record_error(&snapshot, threshold, &format!("image diff failed: {e}"))
                    .await;
            },
        };

        let within_threshold = diff.diff_percentage <= threshold * 100.0;
        let status = if within_threshold {
            ComparisonStatus::Passed
        } else {
            ComparisonStatus::Failed
        };

        // Overlay only matters when something differed.
        let diff_image_key = match diff.diff_image {
            Some(bytes) if diff.diff_pixels > 0 => {
                let key = format!("comparisons/{}_diff.png", snapshot.id);
                self.blobs.put(&key, bytes, "image/png").await?;
                Some(key)
            },
            _ => None,
        };

        let comparison = self
            .store
            .comparisons()
            .create(NewComparison {
                snapshot_id: snapshot.id.clone(),
                baseline_id: Some(baseline.id.clone()),
                test_run_id: snapshot.test_run_id.clone(),
                status,
                diff_percentage: diff.diff_percentage,
                diff_pixels: diff.diff_pixels as i64,
                threshold_used: threshold,
                within_threshold,
                diff_image_key,
                review_status: (!within_threshold).then_some(ReviewStatus::Pending),
                error: None,
            })
            .await?;

        self.store
            .snapshots()
            .mark_status(&snapshot.id, SnapshotStatus::Compared)
            .await?;

        #[cfg(feature = "metrics")]
        {
            vision_metrics::counter!(vision_metrics::capture::COMPARISONS_TOTAL).increment(1);
            if status == ComparisonStatus::Failed {
                vision_metrics::counter!(vision_metrics::capture::COMPARISONS_FAILED_TOTAL)
                    .increment(1);
            }
        }

        let outcome = if within_threshold {
            RunOutcome::Passed
        } else {
            RunOutcome::Failed
        };
        self.record_run_outcome(&snapshot, outcome).await?;

        info!(
            snapshot_id = snapshot.id,
            status = %status,
            diff_percentage = diff.diff_percentage,
            "comparison recorded"
        );

        Ok(comparison)
    }

    /// Record an `error` comparison for a snapshot whose capture or diff
    /// failed, and push the error into the run counters.
    pub async fn record_error(
        &self,
        snapshot: &Snapshot,
        threshold: f64,
        message: &str,
    ) -> Result<Comparison> {
        let comparison = self
            .store
            .comparisons()
            .create(NewComparison {
                snapshot_id: snapshot.id.clone(),
                baseline_id: None,
                test_run_id: snapshot.test_run_id.clone(),
                status: ComparisonStatus::Error,
                diff_percentage: 0.0,
                diff_pixels: 0,
                threshold_used: threshold,
                within_threshold: false,
                diff_image_key: None,
                review_status: None,
                error: Some(message.to_string()),
            })
            .await?;

        self.store.snapshots().mark_error(&snapshot.id, message).await?;
        self.record_run_outcome(snapshot, RunOutcome::Error).await?;

        Ok(comparison)
    }

    /// Default threshold for a snapshot's project.
    pub async fn project_threshold(&self, snapshot: &Snapshot) -> Result<f64> {
        let page = self.store.pages().get(&snapshot.page_id).await?;
        let project = self.store.projects().get(&page.project_id).await?;
        Ok(project.settings.threshold)
    }

    async fn record_run_outcome(&self, snapshot: &Snapshot, outcome: RunOutcome) -> Result<()> {
        if let Some(run_id) = snapshot.test_run_id.as_deref() {
            let completed = self.store.test_runs().record_outcome(run_id, outcome).await?;

            #[cfg(feature = "metrics")]
            if completed.is_some() {
                vision_metrics::counter!(vision_metrics::capture::RUNS_COMPLETED_TOTAL)
                    .increment(1);
            }
            #[cfg(not(feature = "metrics"))]
            let _ = completed;
        }
        Ok(())
    }

    /// Approve a comparison. Optionally promotes the snapshot to the new
    /// active baseline; approving a failed comparison also moves its unit
    /// from failed to passed on the owning run.
    pub async fn approve(
        &self,
        comparison_id: &str,
        update_baseline: bool,
        user_email: &str,
    ) -> Result<Comparison> {
        let comparison = self.store.comparisons().get(comparison_id).await?;

        self.store
            .comparisons()
            .set_review(comparison_id, ReviewStatus::Approved, user_email, None)
            .await?;

        if update_baseline {
            let snapshot = self.store.snapshots().get(&comparison.snapshot_id).await?;
            let baseline = self.store.baselines().promote(&snapshot, user_email).await?;
            self.store.comparisons().set_baseline(comparison_id, &baseline.id).await?;
        }

        if comparison.status == ComparisonStatus::Failed
            && let Some(run_id) = comparison.test_run_id.as_deref()
        {
            self.store.test_runs().shift_failed_to_passed(run_id).await?;
        }

        info!(comparison_id, update_baseline, user_email, "comparison approved");
        self.store.comparisons().get(comparison_id).await.map_err(Error::from)
    }

    /// Reject a comparison with reviewer attribution. Counters are left
    /// untouched; the failure stands.
    pub async fn reject(
        &self,
        comparison_id: &str,
        user_email: &str,
        notes: Option<&str>,
    ) -> Result<Comparison> {
        self.store
            .comparisons()
            .set_review(comparison_id, ReviewStatus::Rejected, user_email, notes)
            .await?;

        info!(comparison_id, user_email, "comparison rejected");
        self.store.comparisons().get(comparison_id).await.map_err(Error::from)
    }
}
