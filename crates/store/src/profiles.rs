use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{BrowserFamily, BrowserProfile},
};

pub struct BrowserProfileStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct NewBrowserProfile {
    pub name: String,
    pub family: BrowserFamily,
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
    pub has_touch: bool,
    pub user_agent: Option<String>,
    pub enabled: bool,
}

impl Default for NewBrowserProfile {
    fn default() -> Self {
        Self {
            name: "desktop-chromium".into(),
            family: BrowserFamily::Chromium,
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
            has_touch: false,
            user_agent: None,
            enabled: true,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    project_id: String,
    name: String,
    family: String,
    width: i64,
    height: i64,
    device_scale_factor: f64,
    mobile: i64,
    has_touch: i64,
    user_agent: Option<String>,
    enabled: i64,
    created_at: i64,
}

impl TryFrom<ProfileRow> for BrowserProfile {
    type Error = Error;

    fn try_from(r: ProfileRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            name: r.name,
            family: BrowserFamily::parse(&r.family)?,
            width: r.width as u32,
            height: r.height as u32,
            device_scale_factor: r.device_scale_factor,
            mobile: r.mobile != 0,
            has_touch: r.has_touch != 0,
            user_agent: r.user_agent,
            enabled: r.enabled != 0,
            created_at: r.created_at,
        })
    }
}

const SELECT: &str = "SELECT id, project_id, name, family, width, height,
                             device_scale_factor, mobile, has_touch, user_agent,
                             enabled, created_at
                      FROM browser_profiles";

impl BrowserProfileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project_id: &str, new: NewBrowserProfile) -> Result<BrowserProfile> {
        if new.width == 0 || new.height == 0 {
            return Err(Error::invalid("viewport", "width and height must be positive"));
        }

        let profile = BrowserProfile {
            id: vision_common::new_id(),
            project_id: project_id.to_string(),
            name: new.name,
            family: new.family,
            width: new.width,
            height: new.height,
            device_scale_factor: new.device_scale_factor,
            mobile: new.mobile,
            has_touch: new.has_touch,
            user_agent: new.user_agent,
            enabled: new.enabled,
            created_at: now_ms(),
        };

        sqlx::query(
            "INSERT INTO browser_profiles
             (id, project_id, name, family, width, height, device_scale_factor,
              mobile, has_touch, user_agent, enabled, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile.id)
        .bind(&profile.project_id)
        .bind(&profile.name)
        .bind(profile.family.as_str())
        .bind(profile.width as i64)
        .bind(profile.height as i64)
        .bind(profile.device_scale_factor)
        .bind(profile.mobile as i64)
        .bind(profile.has_touch as i64)
        .bind(&profile.user_agent)
        .bind(profile.enabled as i64)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;

        Ok(profile)
    }

    pub async fn get(&self, id: &str) -> Result<BrowserProfile> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("browser_profile", id))?.try_into()
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<BrowserProfile>> {
        let rows: Vec<ProfileRow> =
            sqlx::query_as(&format!("{SELECT} WHERE project_id = ? ORDER BY name"))
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn list_enabled(&self, project_id: &str) -> Result<Vec<BrowserProfile>> {
        let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE project_id = ? AND enabled = 1 ORDER BY name"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM browser_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("browser_profile", id));
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
    async fn create_and_filter_enabled() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        let store = BrowserProfileStore::new(pool);

        store
            .create(&project.id, NewBrowserProfile::default())
            .await
            .unwrap();
        store
            .create(
                &project.id,
                NewBrowserProfile {
                    name: "mobile-webkit".into(),
                    family: BrowserFamily::Webkit,
                    width: 390,
                    height: 844,
                    mobile: true,
                    has_touch: true,
                    enabled: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(store.list(&project.id).await.unwrap().len(), 2);
        let enabled = store.list_enabled(&project.id).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].family, BrowserFamily::Chromium);
    }

    #[tokio::test]
    async fn zero_viewport_is_rejected() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        let store = BrowserProfileStore::new(pool);

        let result = store
            .create(
                &project.id,
                NewBrowserProfile {
                    width: 0,
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
    }
}
