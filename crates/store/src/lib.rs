//! SQLite persistence for vision: projects, pages, browser profiles,
//! baselines, snapshots, test runs, comparisons, AI tasks, sessions,
//! credentials, and the action cache — plus the blob-store seam for
//! binary artifacts.
//!
//! Every table is owned by exactly one store type; cross-entity work that
//! must be atomic (baseline promotion, test-run counters, batch cache
//! upserts) runs inside a single transaction here rather than in callers.

pub mod action_cache;
pub mod baselines;
pub mod blob;
pub mod comparisons;
pub mod credentials;
pub mod error;
pub mod models;
pub mod pages;
pub mod profiles;
pub mod projects;
pub mod schema;
pub mod sessions;
pub mod snapshots;
pub mod tasks;
pub mod test_runs;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub use {
    action_cache::ActionCacheStore,
    baselines::BaselineStore,
    blob::{BlobStore, FsBlobStore, MemoryBlobStore},
    comparisons::ComparisonStore,
    credentials::CredentialStore,
    error::{Error as StoreError, Result},
    pages::PageStore,
    profiles::BrowserProfileStore,
    projects::ProjectStore,
    schema::init_schema,
    sessions::SessionStore,
    snapshots::SnapshotStore,
    tasks::TaskStore,
    test_runs::TestRunStore,
};

/// Open (creating if missing) the SQLite database and prepare the schema.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Handle bundling all entity stores over one pool.
///
/// Stores are cheap views over the shared pool; grab them per call site
/// instead of threading a dozen fields through constructors.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn projects(&self) -> ProjectStore {
        ProjectStore::new(self.pool.clone())
    }

    pub fn pages(&self) -> PageStore {
        PageStore::new(self.pool.clone())
    }

    pub fn profiles(&self) -> BrowserProfileStore {
        BrowserProfileStore::new(self.pool.clone())
    }

    pub fn baselines(&self) -> BaselineStore {
        BaselineStore::new(self.pool.clone())
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(self.pool.clone())
    }

    pub fn test_runs(&self) -> TestRunStore {
        TestRunStore::new(self.pool.clone())
    }

    pub fn comparisons(&self) -> ComparisonStore {
        ComparisonStore::new(self.pool.clone())
    }

    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(self.pool.clone())
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.pool.clone())
    }

    pub fn action_cache(&self) -> ActionCacheStore {
        ActionCacheStore::new(self.pool.clone())
    }

    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.pool.clone())
    }
}
