//! Schema bootstrap.
//!
//! Tables are created idempotently at startup. Foreign keys cascade from
//! projects downward so deleting a project removes everything it owns.

use sqlx::SqlitePool;

use crate::error::Result;

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS projects (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        settings    TEXT NOT NULL DEFAULT '{}',
        vault_token TEXT,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pages (
        id         TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        slug       TEXT NOT NULL,
        url_path   TEXT NOT NULL,
        enabled    INTEGER NOT NULL DEFAULT 1,
        settings   TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS browser_profiles (
        id                  TEXT PRIMARY KEY,
        project_id          TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        name                TEXT NOT NULL,
        family              TEXT NOT NULL,
        width               INTEGER NOT NULL,
        height              INTEGER NOT NULL,
        device_scale_factor REAL NOT NULL DEFAULT 1.0,
        mobile              INTEGER NOT NULL DEFAULT 0,
        has_touch           INTEGER NOT NULL DEFAULT 0,
        user_agent          TEXT,
        enabled             INTEGER NOT NULL DEFAULT 1,
        created_at          INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS baselines (
        id                 TEXT PRIMARY KEY,
        page_id            TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
        browser_profile_id TEXT NOT NULL REFERENCES browser_profiles(id) ON DELETE CASCADE,
        branch             TEXT NOT NULL DEFAULT 'main',
        active             INTEGER NOT NULL DEFAULT 0,
        approved_at        INTEGER,
        approved_by        TEXT,
        commit_sha         TEXT,
        width              INTEGER NOT NULL DEFAULT 0,
        height             INTEGER NOT NULL DEFAULT 0,
        image_key          TEXT NOT NULL,
        thumbnail_key      TEXT,
        created_at         INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS snapshots (
        id                 TEXT PRIMARY KEY,
        page_id            TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
        browser_profile_id TEXT NOT NULL REFERENCES browser_profiles(id) ON DELETE CASCADE,
        test_run_id        TEXT REFERENCES test_runs(id) ON DELETE SET NULL,
        status             TEXT NOT NULL DEFAULT 'pending',
        branch             TEXT NOT NULL DEFAULT 'main',
        commit_sha         TEXT,
        environment        TEXT,
        width              INTEGER NOT NULL DEFAULT 0,
        height             INTEGER NOT NULL DEFAULT 0,
        image_key          TEXT,
        thumbnail_key      TEXT,
        error              TEXT,
        created_at         INTEGER NOT NULL,
        captured_at        INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS test_runs (
        id            TEXT PRIMARY KEY,
        project_id    TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        status        TEXT NOT NULL DEFAULT 'pending',
        branch        TEXT NOT NULL DEFAULT 'main',
        commit_sha    TEXT,
        environment   TEXT,
        total_pages   INTEGER NOT NULL DEFAULT 0,
        passed_count  INTEGER NOT NULL DEFAULT 0,
        failed_count  INTEGER NOT NULL DEFAULT 0,
        pending_count INTEGER NOT NULL DEFAULT 0,
        error_count   INTEGER NOT NULL DEFAULT 0,
        started_at    INTEGER,
        completed_at  INTEGER,
        duration_ms   INTEGER,
        created_at    INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS comparisons (
        id               TEXT PRIMARY KEY,
        snapshot_id      TEXT NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
        baseline_id      TEXT REFERENCES baselines(id) ON DELETE CASCADE,
        test_run_id      TEXT REFERENCES test_runs(id) ON DELETE CASCADE,
        status           TEXT NOT NULL DEFAULT 'pending',
        diff_percentage  REAL NOT NULL DEFAULT 0.0,
        diff_pixels      INTEGER NOT NULL DEFAULT 0,
        threshold_used   REAL NOT NULL DEFAULT 0.01,
        within_threshold INTEGER NOT NULL DEFAULT 0,
        diff_image_key   TEXT,
        review_status    TEXT,
        reviewed_by      TEXT,
        reviewed_at      INTEGER,
        notes            TEXT,
        error            TEXT,
        created_at       INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ai_tasks (
        id                  TEXT PRIMARY KEY,
        project_id          TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        instruction         TEXT NOT NULL,
        start_url           TEXT,
        model               TEXT NOT NULL,
        browser_provider    TEXT NOT NULL DEFAULT 'local',
        max_steps           INTEGER NOT NULL DEFAULT 20,
        timeout_seconds     INTEGER NOT NULL DEFAULT 300,
        viewport_width      INTEGER NOT NULL DEFAULT 1280,
        viewport_height     INTEGER NOT NULL DEFAULT 720,
        capture_screenshots INTEGER NOT NULL DEFAULT 1,
        status              TEXT NOT NULL DEFAULT 'pending',
        steps_executed      INTEGER NOT NULL DEFAULT 0,
        input_tokens        INTEGER NOT NULL DEFAULT 0,
        output_tokens       INTEGER NOT NULL DEFAULT 0,
        stop_requested      INTEGER NOT NULL DEFAULT 0,
        result              TEXT,
        error_message       TEXT,
        created_at          INTEGER NOT NULL,
        started_at          INTEGER,
        completed_at        INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS task_steps (
        id             TEXT PRIMARY KEY,
        task_id        TEXT NOT NULL REFERENCES ai_tasks(id) ON DELETE CASCADE,
        position       INTEGER NOT NULL,
        action         TEXT NOT NULL,
        selector       TEXT,
        value          TEXT,
        action_data    TEXT,
        success        INTEGER NOT NULL DEFAULT 0,
        error          TEXT,
        duration_ms    INTEGER NOT NULL DEFAULT 0,
        url_before     TEXT,
        url_after      TEXT,
        reasoning      TEXT,
        input_tokens   INTEGER NOT NULL DEFAULT 0,
        output_tokens  INTEGER NOT NULL DEFAULT 0,
        screenshot_key TEXT,
        created_at     INTEGER NOT NULL,
        UNIQUE (task_id, position)
    )",
    "CREATE TABLE IF NOT EXISTS browser_sessions (
        id                  TEXT PRIMARY KEY,
        project_id          TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        provider            TEXT NOT NULL DEFAULT 'local',
        provider_session_id TEXT,
        status              TEXT NOT NULL DEFAULT 'initializing',
        current_url         TEXT,
        current_title       TEXT,
        viewport_width      INTEGER NOT NULL DEFAULT 1280,
        viewport_height     INTEGER NOT NULL DEFAULT 720,
        expires_at          INTEGER,
        created_at          INTEGER NOT NULL,
        updated_at          INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS action_cache (
        id               TEXT PRIMARY KEY,
        project_id       TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        url_pattern      TEXT NOT NULL,
        action_type      TEXT NOT NULL,
        instruction_hash TEXT NOT NULL DEFAULT '',
        action_data      TEXT NOT NULL DEFAULT '{}',
        success_count    INTEGER NOT NULL DEFAULT 1,
        failure_count    INTEGER NOT NULL DEFAULT 0,
        avg_duration_ms  REAL NOT NULL DEFAULT 0.0,
        last_used_at     INTEGER NOT NULL,
        expires_at       INTEGER NOT NULL,
        created_at       INTEGER NOT NULL,
        UNIQUE (project_id, url_pattern, action_type, instruction_hash)
    )",
    "CREATE TABLE IF NOT EXISTS credentials (
        id              TEXT PRIMARY KEY,
        project_id      TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        name            TEXT NOT NULL,
        vault_path      TEXT NOT NULL,
        service_url     TEXT NOT NULL DEFAULT '*',
        credential_type TEXT NOT NULL DEFAULT 'login',
        expires_at      INTEGER,
        use_count       INTEGER NOT NULL DEFAULT 0,
        last_used_at    INTEGER,
        active          INTEGER NOT NULL DEFAULT 1,
        created_at      INTEGER NOT NULL,
        UNIQUE (project_id, name)
    )",
];

const INDICES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_project_slug
     ON pages (project_id, slug)",
    // At most one active baseline per (page, profile, branch).
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_baselines_active_key
     ON baselines (page_id, browser_profile_id, branch) WHERE active = 1",
    "CREATE INDEX IF NOT EXISTS idx_comparisons_run_status
     ON comparisons (test_run_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_test_runs_project_status
     ON test_runs (project_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_ai_tasks_project_status
     ON ai_tasks (project_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_snapshots_run_status
     ON snapshots (test_run_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_action_cache_lookup
     ON action_cache (project_id, url_pattern, action_type)",
    "CREATE INDEX IF NOT EXISTS idx_action_cache_expiry
     ON action_cache (expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_task_steps_task
     ON task_steps (task_id, position)",
];

/// Create all tables and indices if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES.iter().chain(INDICES) {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
