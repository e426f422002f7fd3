use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{BrowserSessionRecord, SessionStatus},
};

pub struct SessionStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    project_id: String,
    provider: String,
    provider_session_id: Option<String>,
    status: String,
    current_url: Option<String>,
    current_title: Option<String>,
    viewport_width: i64,
    viewport_height: i64,
    expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SessionRow> for BrowserSessionRecord {
    type Error = Error;

    fn try_from(r: SessionRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            provider: r.provider,
            provider_session_id: r.provider_session_id,
            status: SessionStatus::parse(&r.status)?,
            current_url: r.current_url,
            current_title: r.current_title,
            viewport_width: r.viewport_width as u32,
            viewport_height: r.viewport_height as u32,
            expires_at: r.expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const SELECT: &str = "SELECT id, project_id, provider, provider_session_id, status,
                             current_url, current_title, viewport_width, viewport_height,
                             expires_at, created_at, updated_at
                      FROM browser_sessions";

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        project_id: &str,
        provider: &str,
        viewport_width: u32,
        viewport_height: u32,
        expires_at: Option<i64>,
    ) -> Result<BrowserSessionRecord> {
        let session = BrowserSessionRecord {
            id: vision_common::new_id(),
            project_id: project_id.to_string(),
            provider: provider.to_string(),
            provider_session_id: None,
            status: SessionStatus::Initializing,
            current_url: None,
            current_title: None,
            viewport_width,
            viewport_height,
            expires_at,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO browser_sessions
             (id, project_id, provider, status, viewport_width, viewport_height,
              expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.project_id)
        .bind(&session.provider)
        .bind(session.status.as_str())
        .bind(session.viewport_width as i64)
        .bind(session.viewport_height as i64)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<BrowserSessionRecord> {
        let row: Option<SessionRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("browser_session", id))?.try_into()
    }

    pub async fn list_active(&self, project_id: &str) -> Result<Vec<BrowserSessionRecord>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE project_id = ? AND status IN ('initializing', 'active', 'idle')
             ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn attach_provider_session(&self, id: &str, provider_session_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE browser_sessions
             SET provider_session_id = ?, status = 'active', updated_at = ?
             WHERE id = ?",
        )
        .bind(provider_session_id)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("browser_session", id));
        }
        Ok(())
    }

    pub async fn update_location(&self, id: &str, url: &str, title: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE browser_sessions
             SET current_url = ?, current_title = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(url)
        .bind(title)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("browser_session", id));
        }
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE browser_sessions SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("browser_session", id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ProjectSettings, projects::ProjectStore, schema::init_schema};

    #[tokio::test]
    async fn session_lifecycle() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        let store = SessionStore::new(pool);

        let session = store
            .create(&project.id, "local", 1280, 720, None)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Initializing);

        store
            .attach_provider_session(&session.id, "cdp-abc123")
            .await
            .unwrap();
        store
            .update_location(&session.id, "https://example.com", "Example")
            .await
            .unwrap();

        let active = store.get(&session.id).await.unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        assert_eq!(active.current_url.as_deref(), Some("https://example.com"));
        assert_eq!(store.list_active(&project.id).await.unwrap().len(), 1);

        store.set_status(&session.id, SessionStatus::Closed).await.unwrap();
        assert!(store.list_active(&project.id).await.unwrap().is_empty());
    }
}
