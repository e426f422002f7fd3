use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{Project, ProjectSettings},
};

pub struct ProjectStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    settings: String,
    vault_token: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ProjectRow> for Project {
    type Error = Error;

    fn try_from(r: ProjectRow) -> Result<Self> {
        let settings: ProjectSettings =
            serde_json::from_str(&r.settings).map_err(|source| Error::Corrupt {
                column: "projects.settings",
                source,
            })?;
        Ok(Self {
            id: r.id,
            name: r.name,
            settings,
            vault_token: r.vault_token,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

impl ProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str, settings: ProjectSettings) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::invalid("name", "must not be empty"));
        }

        let project = Project {
            id: vision_common::new_id(),
            name: name.to_string(),
            settings,
            vault_token: None,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO projects (id, name, settings, vault_token, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(serde_json::to_string(&project.settings).unwrap_or_else(|_| "{}".into()))
        .bind(&project.vault_token)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(project)
    }

    pub async fn get(&self, id: &str) -> Result<Project> {
        let row: Option<ProjectRow> = sqlx::query_as(
            "SELECT id, name, settings, vault_token, created_at, updated_at
             FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::not_found("project", id))?.try_into()
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        let rows: Vec<ProjectRow> = sqlx::query_as(
            "SELECT id, name, settings, vault_token, created_at, updated_at
             FROM projects ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update_settings(&self, id: &str, settings: &ProjectSettings) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET settings = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(settings).unwrap_or_else(|_| "{}".into()))
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("project", id));
        }
        Ok(())
    }

    pub async fn set_vault_token(&self, id: &str, token: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET vault_token = ?, updated_at = ? WHERE id = ?")
            .bind(token)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("project", id));
        }
        Ok(())
    }

    /// Cascades to every owned entity via foreign keys.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("project", id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let store = ProjectStore::new(pool().await);

        let project = store.create("marketing-site", ProjectSettings::default()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);

        let found = store.get(&project.id).await.unwrap();
        assert_eq!(found.name, "marketing-site");
        assert!((found.settings.threshold - 0.01).abs() < f64::EPSILON);

        let mut settings = found.settings.clone();
        settings.threshold = 0.05;
        store.update_settings(&project.id, &settings).await.unwrap();
        let updated = store.get(&project.id).await.unwrap();
        assert!((updated.settings.threshold - 0.05).abs() < f64::EPSILON);

        store.delete(&project.id).await.unwrap();
        assert!(store.get(&project.id).await.is_err());
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let store = ProjectStore::new(pool().await);
        assert!(store.create("  ", ProjectSettings::default()).await.is_err());
    }
}
