//! Bounded pool of pre-warmed browser workers.
//!
//! A worker owns one live session. Checkout is mutex-protected and bounded
//! by a semaphore: callers block up to the configured timeout and then fail
//! with `PoolTimeout`. A checked-out worker is single-owner until checkin;
//! checkin always happens, including on panic, via a drop guard on the
//! free list.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::sync::{Mutex, Semaphore},
    tracing::{debug, info, warn},
};

use crate::{
    capability::BrowserCapability,
    error::{Error, Result},
    types::SessionSpec,
};

/// Pool sizing and lifetime bounds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers.
    pub size: usize,
    /// How long a checkout may wait for a free worker.
    pub checkout_timeout: Duration,
    /// Workers older than this are reinitialized at the next checkout.
    pub stale_after: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            checkout_timeout: Duration::from_secs(120),
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

/// One pre-warmed browser session owned by the pool.
struct Worker {
    session_id: String,
    /// Monotonic generation counter across reinitializations.
    sequence: u64,
    created_at: Instant,
}

impl Worker {
    fn is_stale(&self, bound: Duration) -> bool {
        self.created_at.elapsed() > bound
    }
}

/// What a checked-out caller gets to work with. The session is exclusively
/// theirs until the `with_worker` closure returns.
#[derive(Clone)]
pub struct WorkerHandle {
    pub capability: Arc<dyn BrowserCapability>,
    pub session_id: String,
    pub sequence: u64,
}

pub struct WorkerPool {
    capability: Arc<dyn BrowserCapability>,
    spec: SessionSpec,
    config: PoolConfig,
    slots: Vec<Arc<Mutex<Option<Worker>>>>,
    available: StdMutex<VecDeque<usize>>,
    semaphore: Arc<Semaphore>,
    sequence: AtomicU64,
}

/// Returns the slot to the free list when dropped, so checkin survives
/// panics inside the checked-out closure.
struct CheckinGuard<'a> {
    pool: &'a WorkerPool,
    index: usize,
}

impl Drop for CheckinGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut available) = self.pool.available.lock() {
            available.push_back(self.index);
        }
    }
}

impl WorkerPool {
    pub fn new(
        capability: Arc<dyn BrowserCapability>,
        spec: SessionSpec,
        config: PoolConfig,
    ) -> Self {
        let slots = (0..config.size).map(|_| Arc::new(Mutex::new(None))).collect();
        let available = StdMutex::new((0..config.size).collect());
        let semaphore = Arc::new(Semaphore::new(config.size));

        Self {
            capability,
            spec,
            config,
            slots,
            available,
            semaphore,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Eagerly create every worker so first captures do not pay launch
    /// latency.
    pub async fn warmup(&self) -> Result<()> {
        for slot in &self.slots {
            let mut guard = slot.lock().await;
            if guard.is_none() {
                *guard = Some(self.spawn_worker().await?);
            }
        }
        info!(size = self.config.size, "worker pool warmed up");
        Ok(())
    }

    /// Check out a worker, run `f` against it, then reset and check in.
    ///
    /// The worker is reinitialized first when it is missing, unhealthy, or
    /// stale. Reset failures degrade to a lazy relaunch on next checkout.
    pub async fn with_worker<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(WorkerHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = tokio::time::timeout(
            self.config.checkout_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            #[cfg(feature = "metrics")]
            vision_metrics::counter!(vision_metrics::pool::CHECKOUT_TIMEOUTS_TOTAL).increment(1);
            Error::PoolTimeout(self.config.checkout_timeout.as_secs())
        })?
        .map_err(|_| Error::PoolTimeout(self.config.checkout_timeout.as_secs()))?;

        // A permit guarantees a free slot.
        let index = self
            .available
            .lock()
            .ok()
            .and_then(|mut available| available.pop_front())
            .ok_or(Error::PoolTimeout(self.config.checkout_timeout.as_secs()))?;

        let checkin = CheckinGuard { pool: self, index };
        let slot = self.slots[index].clone();
        let mut guard = slot.lock().await;

        self.ensure_ready(&mut guard).await?;
        let handle = match guard.as_ref() {
            Some(worker) => WorkerHandle {
                capability: self.capability.clone(),
                session_id: worker.session_id.clone(),
                sequence: worker.sequence,
            },
            None => return Err(Error::LaunchFailed("worker unavailable after init".into())),
        };

        #[cfg(feature = "metrics")]
        vision_metrics::counter!(vision_metrics::pool::CHECKOUTS_TOTAL).increment(1);

        let result = f(handle).await;

        // Reset between uses; a failed reset forfeits the session.
        if let Some(worker) = guard.as_ref() {
            let session_id = worker.session_id.clone();
            if let Err(e) = self.reset_session(&session_id).await {
                warn!(session_id, error = %e, "worker reset failed, dropping session");
                let _ = self.capability.close_session(&session_id).await;
                *guard = None;
            }
        }

        drop(guard);
        drop(checkin);
        drop(permit);

        result
    }

    /// Walk every currently-free worker and reinitialize the stale or
    /// unhealthy ones. Busy workers are skipped rather than waited on.
    pub async fn refresh_stale_workers(&self) -> Result<usize> {
        let mut refreshed = 0;
        let mut failure = None;
        let mut visited = Vec::new();

        loop {
            let permit = match tokio::time::timeout(
                Duration::from_millis(250),
                self.semaphore.clone().acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                _ => break,
            };

            let index = match self.available.lock().ok().and_then(|mut a| a.pop_front()) {
                Some(index) => index,
                None => break,
            };
            visited.push((index, permit));

            let slot = self.slots[index].clone();
            let mut guard = slot.lock().await;
            let needs_refresh = match guard.as_ref() {
                Some(worker) => {
                    worker.is_stale(self.config.stale_after)
                        || !self.capability.is_session_alive(&worker.session_id).await
                },
                None => false,
            };

            if needs_refresh
                && let Some(worker) = guard.take()
            {
                debug!(session_id = worker.session_id, "refreshing stale worker");
                let _ = self.capability.close_session(&worker.session_id).await;
                match self.spawn_worker().await {
                    Ok(worker) => {
                        *guard = Some(worker);
                        refreshed += 1;

                        #[cfg(feature = "metrics")]
                        vision_metrics::counter!(vision_metrics::pool::REFRESHES_TOTAL)
                            .increment(1);
                    },
                    // Leave the slot empty for a lazy relaunch; stop here.
                    Err(e) => {
                        failure = Some(e);
                        break;
                    },
                }
            }

            if visited.len() >= self.config.size {
                break;
            }
        }

        // Return everything we held; permits release as they drop.
        if let Ok(mut available) = self.available.lock() {
            for (index, _permit) in &visited {
                available.push_back(*index);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(refreshed),
        }
    }

    /// Close every session. The pool is unusable afterwards.
    pub async fn shutdown(&self) {
        for slot in &self.slots {
            let mut guard = slot.lock().await;
            if let Some(worker) = guard.take() {
                let _ = self.capability.close_session(&worker.session_id).await;
            }
        }
        info!("worker pool shut down");
    }

    async fn ensure_ready(&self, guard: &mut Option<Worker>) -> Result<()> {
        let needs_init = match guard.as_ref() {
            None => true,
            Some(worker) => {
                worker.is_stale(self.config.stale_after)
                    || !self.capability.is_session_alive(&worker.session_id).await
            },
        };

        if needs_init {
            if let Some(worker) = guard.take() {
                debug!(
                    session_id = worker.session_id,
                    "reinitializing unhealthy or stale worker"
                );
                let _ = self.capability.close_session(&worker.session_id).await;
            }
            *guard = Some(self.spawn_worker().await?);
        }
        Ok(())
    }

    async fn spawn_worker(&self) -> Result<Worker> {
        let session_id = self.capability.create_session(&self.spec).await?;
        Ok(Worker {
            session_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
        })
    }

    async fn reset_session(&self, session_id: &str) -> Result<()> {
        self.capability.navigate(session_id, "about:blank").await?;
        self.capability.clear_cookies(session_id).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::types::{BrowserAction, ElementExtraction, Viewport};

    /// Scripted capability: sessions are counters, navigations are
    /// recorded, nothing touches a real browser.
    #[derive(Default)]
    struct StubCapability {
        created: AtomicUsize,
        closed: AtomicUsize,
        navigations: StdMutex<Vec<(String, String)>>,
        cookie_clears: AtomicUsize,
    }

    #[async_trait]
    impl BrowserCapability for StubCapability {
        fn provider(&self) -> &str {
            "stub"
        }

        async fn create_session(&self, _spec: &SessionSpec) -> Result<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("stub-{n}"))
        }

        async fn close_session(&self, _session_id: &str) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
            self.navigations
                .lock()
                .unwrap()
                .push((session_id.to_string(), url.to_string()));
            Ok(())
        }

        async fn perform_action(&self, _s: &str, _a: &BrowserAction) -> Result<()> {
            Ok(())
        }

        async fn screenshot(&self, _s: &str, _full_page: bool) -> Result<Vec<u8>> {
            Ok(vec![])
        }

        async fn page_content(&self, _s: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn current_url(&self, _s: &str) -> Result<String> {
            Ok("about:blank".into())
        }

        async fn current_title(&self, _s: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn evaluate(&self, _s: &str, _script: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn wait_for_selector(&self, _s: &str, _sel: &str, _t: u64) -> Result<()> {
            Ok(())
        }

        async fn wait_for_navigation(&self, _s: &str) -> Result<()> {
            Ok(())
        }

        async fn is_session_alive(&self, _s: &str) -> bool {
            true
        }

        async fn extract_elements(&self, _s: &str) -> Result<ElementExtraction> {
            Ok(ElementExtraction {
                elements: vec![],
                viewport_width: 1280,
                viewport_height: 720,
            })
        }

        async fn set_viewport(&self, _s: &str, _v: Viewport) -> Result<()> {
            Ok(())
        }

        async fn clear_cookies(&self, _s: &str) -> Result<()> {
            self.cookie_clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool_of(capability: Arc<StubCapability>, size: usize, timeout_ms: u64) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            capability,
            SessionSpec::default(),
            PoolConfig {
                size,
                checkout_timeout: Duration::from_millis(timeout_ms),
                stale_after: Duration::from_secs(30 * 60),
            },
        ))
    }

    #[tokio::test]
    async fn warmup_creates_every_worker() {
        let capability = Arc::new(StubCapability::default());
        let pool = pool_of(capability.clone(), 3, 100);

        pool.warmup().await.unwrap();
        assert_eq!(capability.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn saturated_pool_times_out_then_recovers() {
        let capability = Arc::new(StubCapability::default());
        let pool = pool_of(capability.clone(), 2, 100);

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        // Two holders occupy the entire pool.
        let mut holders = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            let mut release = release_rx.clone();
            holders.push(tokio::spawn(async move {
                pool.with_worker(|worker| async move {
                    // Hold until told to let go.
                    let _ = release.wait_for(|v| *v).await;
                    Ok(worker.session_id)
                })
                .await
            }));
        }

        // Give the holders time to check out.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Third caller exhausts the 100ms checkout timeout.
        let third = pool.with_worker(|_| async { Ok(()) }).await;
        assert!(matches!(third, Err(Error::PoolTimeout(_))));

        release_tx.send(true).unwrap();
        for holder in holders {
            holder.await.unwrap().unwrap();
        }

        // Pool drained: a retried call succeeds on a reset worker.
        let session = pool
            .with_worker(|worker| async move { Ok(worker.session_id) })
            .await
            .unwrap();
        assert!(session.starts_with("stub-"));

        // Resets navigated to blank and cleared cookies.
        let navigations = capability.navigations.lock().unwrap();
        assert!(
            navigations
                .iter()
                .any(|(_, url)| url == "about:blank")
        );
        drop(navigations);
        assert!(capability.cookie_clears.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn workers_are_reused_not_relaunched() {
        let capability = Arc::new(StubCapability::default());
        let pool = pool_of(capability.clone(), 1, 100);

        for _ in 0..5 {
            pool.with_worker(|_| async { Ok(()) }).await.unwrap();
        }

        assert_eq!(capability.created.load(Ordering::SeqCst), 1);
        assert_eq!(capability.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_workers_are_refreshed() {
        let capability = Arc::new(StubCapability::default());
        let pool = Arc::new(WorkerPool::new(
            capability.clone(),
            SessionSpec::default(),
            PoolConfig {
                size: 2,
                checkout_timeout: Duration::from_millis(100),
                stale_after: Duration::from_millis(0),
            },
        ));

        pool.warmup().await.unwrap();
        // Everything is instantly stale with a zero bound.
        let refreshed = pool.refresh_stale_workers().await.unwrap();
        assert_eq!(refreshed, 2);
        assert_eq!(capability.created.load(Ordering::SeqCst), 4);
        assert_eq!(capability.closed.load(Ordering::SeqCst), 2);
    }
}
