//! Credential resolution: reference rows in the relational store, secret
//! bytes fetched on demand from the external store.

use {
    regex::Regex,
    serde_json::Value,
    tracing::{debug, info},
    vision_common::now_ms,
    vision_store::{
        CredentialStore,
        credentials::NewCredential,
        models::{Credential, CredentialType},
    },
};

use crate::{
    client::VaultClient,
    error::{Error, Result},
    keys::credential_key,
};

/// A resolved secret. `username` is absent for plain-password secrets.
#[derive(Debug, Clone)]
pub struct SecretValue {
    pub username: Option<String>,
    pub password: String,
    /// Any further fields the stored JSON carried (e.g. otp seeds).
    pub extra: Value,
}

pub struct CredentialService {
    store: CredentialStore,
    client: VaultClient,
}

impl CredentialService {
    pub fn new(store: CredentialStore, client: VaultClient) -> Self {
        Self { store, client }
    }

    /// Register a credential: write the secret to the external store and
    /// keep only the reference here.
    pub async fn store(
        &self,
        project_id: &str,
        name: &str,
        username: &str,
        password: &str,
        service_url: &str,
        credential_type: CredentialType,
        project_token: Option<&str>,
    ) -> Result<Credential> {
        let key = credential_key(project_id, name);
        self.client
            .set_credential(&key, username, password, None, project_token)
            .await?;

        let credential = self
            .store
            .create(
                project_id,
                NewCredential {
                    name: name.to_string(),
                    vault_path: key,
                    service_url: service_url.to_string(),
                    credential_type,
                    expires_at: None,
                },
            )
            .await?;

        info!(project_id, name, "stored credential reference");
        Ok(credential)
    }

    /// Fetch the secret behind a credential reference.
    ///
    /// Usage counters bump on every fetch attempt, successful or not, so
    /// audit trails show each time the secret was reached for. The stored
    /// value is parsed as JSON; non-JSON values resolve as a bare password.
    pub async fn fetch(
        &self,
        credential: &Credential,
        project_token: Option<&str>,
    ) -> Result<SecretValue> {
        if !credential.active {
            return Err(Error::Inactive(credential.name.clone()));
        }
        if let Some(expires_at) = credential.expires_at
            && expires_at <= now_ms()
        {
            return Err(Error::Expired(credential.name.clone()));
        }

        self.store.record_use(&credential.id).await?;

        let raw = self
            .client
            .get_credential(&credential.vault_path, project_token)
            .await?;

        Ok(parse_secret(&raw))
    }

    /// Verify the credential resolves without exposing its value.
    pub async fn test(&self, credential: &Credential, project_token: Option<&str>) -> bool {
        match self.fetch(credential, project_token).await {
            Ok(_) => true,
            Err(e) => {
                debug!(name = credential.name, error = %e, "credential test failed");
                false
            },
        }
    }

    /// Active, unexpired credentials whose service URL glob matches.
    pub async fn for_url(&self, project_id: &str, url: &str) -> Result<Vec<Credential>> {
        let credentials = self.store.list_active(project_id).await?;
        Ok(credentials
            .into_iter()
            .filter(|c| matches_url(c, url, now_ms()))
            .collect())
    }

    /// Soft delete; the external store keeps its contents for audit.
    pub async fn destroy(&self, credential_id: &str) -> Result<()> {
        self.store.deactivate(credential_id).await?;
        Ok(())
    }
}

/// Glob match of a credential's service URL against a concrete URL.
/// `*` is the only wildcard. Expired credentials never match.
pub fn matches_url(credential: &Credential, url: &str, now_ms: i64) -> bool {
    if !credential.active {
        return false;
    }
    if credential.expires_at.is_some_and(|exp| exp <= now_ms) {
        return false;
    }

    let pattern = format!(
        "^{}$",
        regex::escape(&credential.service_url).replace(r"\*", ".*")
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(url))
}

fn parse_secret(raw: &str) -> SecretValue {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => {
            let username = map.get("username").and_then(|v| v.as_str()).map(str::to_string);
            let password = map
                .get("password")
                .and_then(|v| v.as_str())
                .unwrap_or(raw)
                .to_string();
            SecretValue {
                username,
                password,
                extra: Value::Object(map),
            }
        },
        _ => SecretValue {
            username: None,
            password: raw.to_string(),
            extra: Value::Null,
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn credential(service_url: &str, expires_at: Option<i64>, active: bool) -> Credential {
        Credential {
            id: "c1".into(),
            project_id: "p1".into(),
            name: "login".into(),
            vault_path: "CRED_P1_LOGIN".into(),
            service_url: service_url.into(),
            credential_type: CredentialType::Login,
            expires_at,
            use_count: 0,
            last_used_at: None,
            active,
            created_at: 0,
        }
    }

    #[test]
    fn glob_stars_match_any_run() {
        let c = credential("https://*.example.com/*", None, true);
        assert!(matches_url(&c, "https://app.example.com/login", 0));
        assert!(matches_url(&c, "https://staging.example.com/", 0));
        assert!(!matches_url(&c, "https://example.org/login", 0));
    }

    #[test]
    fn literal_urls_must_match_exactly() {
        let c = credential("https://example.com/admin", None, true);
        assert!(matches_url(&c, "https://example.com/admin", 0));
        assert!(!matches_url(&c, "https://example.com/admin/users", 0));
    }

    #[test]
    fn expired_or_inactive_never_match() {
        let expired = credential("*", Some(100), true);
        assert!(!matches_url(&expired, "https://anything.example.com", 200));

        let inactive = credential("*", None, false);
        assert!(!matches_url(&inactive, "https://anything.example.com", 0));
    }

    #[test]
    fn json_secrets_parse_into_fields() {
        let secret = parse_secret(r#"{"username": "admin", "password": "pw", "otp": "seed"}"#);
        assert_eq!(secret.username.as_deref(), Some("admin"));
        assert_eq!(secret.password, "pw");
        assert_eq!(secret.extra["otp"], "seed");
    }

    #[test]
    fn bare_values_fall_back_to_password_only() {
        let secret = parse_secret("just-a-token");
        assert!(secret.username.is_none());
        assert_eq!(secret.password, "just-a-token");
    }

    #[tokio::test]
    async fn fetch_bumps_usage_even_when_the_store_call_fails() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        vision_store::init_schema(&pool).await.unwrap();
        let project = vision_store::ProjectStore::new(pool.clone())
            .create("p", Default::default())
            .await
            .unwrap();
        let store = CredentialStore::new(pool.clone());
        let reference = store
            .create(
                &project.id,
                NewCredential {
                    name: "login".into(),
                    vault_path: "CRED_X_LOGIN".into(),
                    service_url: "*".into(),
                    credential_type: CredentialType::Login,
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        // Vault returns 404 for the path.
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex("/api/v1/secrets/.*".into()))
            .with_status(404)
            .create_async()
            .await;

        let service = CredentialService::new(
            CredentialStore::new(pool.clone()),
            VaultClient::new(server.url(), "t".into(), "test".into()),
        );

        assert!(service.fetch(&reference, None).await.is_err());
        let after = store.get(&reference.id).await.unwrap();
        assert_eq!(after.use_count, 1);
        assert!(after.last_used_at.is_some());
    }
}
