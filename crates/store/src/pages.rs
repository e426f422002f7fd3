use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{Page, PageSettings},
};

pub struct PageStore {
    pool: SqlitePool,
}

/// Fields accepted on create/update.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub slug: String,
    pub url_path: String,
    pub enabled: bool,
    pub settings: PageSettings,
}

#[derive(sqlx::FromRow)]
struct PageRow {
    id: String,
    project_id: String,
    slug: String,
    url_path: String,
    enabled: i64,
    settings: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<PageRow> for Page {
    type Error = Error;

    fn try_from(r: PageRow) -> Result<Self> {
        let settings: PageSettings =
            serde_json::from_str(&r.settings).map_err(|source| Error::Corrupt {
                column: "pages.settings",
                source,
            })?;
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            slug: r.slug,
            url_path: r.url_path,
            enabled: r.enabled != 0,
            settings,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const SELECT: &str = "SELECT id, project_id, slug, url_path, enabled, settings,
                             created_at, updated_at
                      FROM pages";

impl PageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project_id: &str, new: NewPage) -> Result<Page> {
        if new.slug.trim().is_empty() {
            return Err(Error::invalid("slug", "must not be empty"));
        }

        let page = Page {
            id: vision_common::new_id(),
            project_id: project_id.to_string(),
            slug: new.slug,
            url_path: new.url_path,
            enabled: new.enabled,
            settings: new.settings,
            created_at: now_ms(),
            updated_at: now_ms(),
        };

        let inserted = sqlx::query(
            "INSERT INTO pages (id, project_id, slug, url_path, enabled, settings,
                                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&page.id)
        .bind(&page.project_id)
        .bind(&page.slug)
        .bind(&page.url_path)
        .bind(page.enabled as i64)
        .bind(serde_json::to_string(&page.settings).unwrap_or_else(|_| "{}".into()))
        .bind(page.created_at)
        .bind(page.updated_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(page),
            Err(e) => {
                let err = Error::from(e);
                if err.is_unique_violation() {
                    Err(Error::Conflict(format!(
                        "page slug {} already exists in project",
                        page.slug
                    )))
                } else {
                    Err(err)
                }
            },
        }
    }

    pub async fn get(&self, id: &str) -> Result<Page> {
        let row: Option<PageRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("page", id))?.try_into()
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<Page>> {
        let rows: Vec<PageRow> =
            sqlx::query_as(&format!("{SELECT} WHERE project_id = ? ORDER BY slug"))
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn list_enabled(&self, project_id: &str) -> Result<Vec<Page>> {
        let rows: Vec<PageRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE project_id = ? AND enabled = 1 ORDER BY slug"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update(&self, id: &str, new: NewPage) -> Result<Page> {
        let result = sqlx::query(
            "UPDATE pages SET slug = ?, url_path = ?, enabled = ?, settings = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&new.slug)
        .bind(&new.url_path)
        .bind(new.enabled as i64)
        .bind(serde_json::to_string(&new.settings).unwrap_or_else(|_| "{}".into()))
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("page", id));
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM pages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("page", id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ProjectSettings, projects::ProjectStore, schema::init_schema};

    async fn project_and_store() -> (String, PageStore) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        (project.id, PageStore::new(pool))
    }

    fn new_page(slug: &str) -> NewPage {
        NewPage {
            slug: slug.into(),
            url_path: format!("/{slug}"),
            enabled: true,
            settings: PageSettings::default(),
        }
    }

    #[tokio::test]
    async fn slug_is_unique_per_project() {
        let (project_id, store) = project_and_store().await;

        store.create(&project_id, new_page("home")).await.unwrap();
        let dup = store.create(&project_id, new_page("home")).await;
        assert!(matches!(dup, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn list_enabled_filters_disabled_pages() {
        let (project_id, store) = project_and_store().await;

        store.create(&project_id, new_page("home")).await.unwrap();
        let mut disabled = new_page("checkout");
        disabled.enabled = false;
        store.create(&project_id, disabled).await.unwrap();

        assert_eq!(store.list(&project_id).await.unwrap().len(), 2);
        let enabled = store.list_enabled(&project_id).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].slug, "home");
    }
}
