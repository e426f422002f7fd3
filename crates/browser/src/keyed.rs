//! Per-profile capture pools.
//!
//! Browser contexts carry viewport state, so capture work gets one bounded
//! pool per (browser family, width×height) key instead of sharing the
//! generic AI-task pool. Pools are created on first use and reused for the
//! life of the process.

use std::{sync::Arc, time::Duration};

use {dashmap::DashMap, tracing::debug};

use crate::{
    capability::BrowserCapability,
    pool::{PoolConfig, WorkerPool},
    types::{SessionSpec, Viewport},
};

/// Identity of a capture pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub family: String,
    pub width: u32,
    pub height: u32,
}

impl PoolKey {
    pub fn new(family: &str, width: u32, height: u32) -> Self {
        Self {
            family: family.to_string(),
            width,
            height,
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}x{}", self.family, self.width, self.height)
    }
}

pub struct KeyedPools {
    capability: Arc<dyn BrowserCapability>,
    pools: DashMap<PoolKey, Arc<WorkerPool>>,
    pool_size: usize,
    checkout_timeout: Duration,
    stale_after: Duration,
}

impl KeyedPools {
    pub fn new(
        capability: Arc<dyn BrowserCapability>,
        pool_size: usize,
        checkout_timeout: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            capability,
            pools: DashMap::new(),
            pool_size,
            checkout_timeout,
            stale_after,
        }
    }

    /// The pool for a capture profile, created on first use.
    pub fn pool_for(&self, key: PoolKey, spec: &SessionSpec) -> Arc<WorkerPool> {
        if let Some(pool) = self.pools.get(&key) {
            return pool.value().clone();
        }

        let pool = Arc::new(WorkerPool::new(
            self.capability.clone(),
            SessionSpec {
                viewport: Viewport {
                    width: key.width,
                    height: key.height,
                },
                ..spec.clone()
            },
            PoolConfig {
                size: self.pool_size,
                checkout_timeout: self.checkout_timeout,
                stale_after: self.stale_after,
            },
        ));

        debug!(key = %key, size = self.pool_size, "created capture pool");
        self.pools.entry(key).or_insert(pool).value().clone()
    }

    /// Refresh stale workers across every pool.
    pub async fn refresh_all(&self) -> usize {
        let pools: Vec<Arc<WorkerPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();

        let mut refreshed = 0;
        for pool in pools {
            refreshed += pool.refresh_stale_workers().await.unwrap_or(0);
        }
        refreshed
    }

    pub async fn shutdown(&self) {
        let pools: Vec<Arc<WorkerPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_distinguish_family_and_viewport() {
        let a = PoolKey::new("chromium", 1920, 1080);
        let b = PoolKey::new("chromium", 390, 844);
        let c = PoolKey::new("firefox", 1920, 1080);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, PoolKey::new("chromium", 1920, 1080));
        assert_eq!(a.to_string(), "chromium:1920x1080");
    }
}
