//! Credential references. Secret bytes never touch this table; rows only
//! point at a vault path and track usage.

use {sqlx::SqlitePool, vision_common::now_ms};

use crate::{
    error::{Error, Result},
    models::{Credential, CredentialType},
};

pub struct CredentialStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub name: String,
    pub vault_path: String,
    pub service_url: String,
    pub credential_type: CredentialType,
    pub expires_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: String,
    project_id: String,
    name: String,
    vault_path: String,
    service_url: String,
    credential_type: String,
    expires_at: Option<i64>,
    use_count: i64,
    last_used_at: Option<i64>,
    active: i64,
    created_at: i64,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = Error;

    fn try_from(r: CredentialRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            project_id: r.project_id,
            name: r.name,
            vault_path: r.vault_path,
            service_url: r.service_url,
            credential_type: CredentialType::parse(&r.credential_type)?,
            expires_at: r.expires_at,
            use_count: r.use_count,
            last_used_at: r.last_used_at,
            active: r.active != 0,
            created_at: r.created_at,
        })
    }
}

const SELECT: &str = "SELECT id, project_id, name, vault_path, service_url,
                             credential_type, expires_at, use_count, last_used_at,
                             active, created_at
                      FROM credentials";

impl CredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, project_id: &str, new: NewCredential) -> Result<Credential> {
        if new.name.trim().is_empty() {
            return Err(Error::invalid("name", "must not be empty"));
        }

        let credential = Credential {
            id: vision_common::new_id(),
            project_id: project_id.to_string(),
            name: new.name,
            vault_path: new.vault_path,
            service_url: new.service_url,
            credential_type: new.credential_type,
            expires_at: new.expires_at,
            use_count: 0,
            last_used_at: None,
            active: true,
            created_at: now_ms(),
        };

        let inserted = sqlx::query(
            "INSERT INTO credentials
             (id, project_id, name, vault_path, service_url, credential_type,
              expires_at, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&credential.id)
        .bind(&credential.project_id)
        .bind(&credential.name)
        .bind(&credential.vault_path)
        .bind(&credential.service_url)
        .bind(credential.credential_type.as_str())
        .bind(credential.expires_at)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(credential),
            Err(e) => {
                let err = Error::from(e);
                if err.is_unique_violation() {
                    Err(Error::Conflict(format!(
                        "credential {} already exists in project",
                        credential.name
                    )))
                } else {
                    Err(err)
                }
            },
        }
    }

    pub async fn get(&self, id: &str) -> Result<Credential> {
        let row: Option<CredentialRow> = sqlx::query_as(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("credential", id))?.try_into()
    }

    pub async fn get_by_name(&self, project_id: &str, name: &str) -> Result<Credential> {
        let row: Option<CredentialRow> =
            sqlx::query_as(&format!("{SELECT} WHERE project_id = ? AND name = ?"))
                .bind(project_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| Error::not_found("credential", name))?.try_into()
    }

    /// Active, unexpired credentials for a project.
    pub async fn list_active(&self, project_id: &str) -> Result<Vec<Credential>> {
        let rows: Vec<CredentialRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE project_id = ? AND active = 1
                     AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY name"
        ))
        .bind(project_id)
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Bump usage on fetch. Every fetch counts, even when the vault call
    /// later fails, matching the fetch-on-demand contract.
    pub async fn record_use(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE credentials SET use_count = use_count + 1, last_used_at = ? WHERE id = ?",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("credential", id));
        }
        Ok(())
    }

    /// Soft delete: rows are kept for audit, vault contents untouched.
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE credentials SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("credential", id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ProjectSettings, projects::ProjectStore, schema::init_schema};

    async fn fixture() -> (CredentialStore, String) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let project = ProjectStore::new(pool.clone())
            .create("p", ProjectSettings::default())
            .await
            .unwrap();
        (CredentialStore::new(pool), project.id)
    }

    fn staging_login() -> NewCredential {
        NewCredential {
            name: "staging-login".into(),
            vault_path: "CRED_abc123_STAGING_LOGIN".into(),
            service_url: "https://*.staging.example.com/*".into(),
            credential_type: CredentialType::Login,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn name_is_unique_per_project() {
        let (store, project_id) = fixture().await;
        store.create(&project_id, staging_login()).await.unwrap();
        let dup = store.create(&project_id, staging_login()).await;
        assert!(matches!(dup, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn expired_credentials_are_excluded_from_active_list() {
        let (store, project_id) = fixture().await;
        let mut expired = staging_login();
        expired.name = "old-login".into();
        expired.expires_at = Some(now_ms() - 1_000);
        store.create(&project_id, expired).await.unwrap();
        store.create(&project_id, staging_login()).await.unwrap();

        let active = store.list_active(&project_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "staging-login");
    }

    #[tokio::test]
    async fn destroy_is_a_soft_deactivate() {
        let (store, project_id) = fixture().await;
        let credential = store.create(&project_id, staging_login()).await.unwrap();

        store.record_use(&credential.id).await.unwrap();
        store.deactivate(&credential.id).await.unwrap();

        // Row is retained for audit with its counters intact.
        let kept = store.get(&credential.id).await.unwrap();
        assert!(!kept.active);
        assert_eq!(kept.use_count, 1);
        assert!(store.list_active(&project_id).await.unwrap().is_empty());
    }
}
