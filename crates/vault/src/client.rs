//! HTTP client for the external secret store.
//!
//! The store holds every secret byte; this process only ever passes values
//! through. A service-level token authorizes calls; callers may override
//! it per request with a project token.

use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    keys::normalize_key,
};

#[derive(Clone)]
pub struct VaultClient {
    base_url: String,
    service_token: Secret<String>,
    environment: String,
    http: reqwest::Client,
}

impl VaultClient {
    pub fn new(base_url: String, service_token: String, environment: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token: service_token.into(),
            environment,
            http: reqwest::Client::new(),
        }
    }

    /// Build from `BRAINZLAB_VAULT_URL` / `VAULT_SERVICE_TOKEN`, when both
    /// are present.
    pub fn from_env(environment: &str) -> Option<Self> {
        let base_url = std::env::var("BRAINZLAB_VAULT_URL").ok().filter(|v| !v.is_empty())?;
        let token = std::env::var("VAULT_SERVICE_TOKEN").ok().filter(|v| !v.is_empty())?;
        Some(Self::new(base_url, token, environment.to_string()))
    }

    fn token<'a>(&'a self, override_token: Option<&'a str>) -> &'a str {
        override_token.unwrap_or_else(|| self.service_token.expose_secret())
    }

    /// Fetch one secret value by key.
    pub async fn get_secret(&self, key: &str, token: Option<&str>) -> Result<String> {
        let key = normalize_key(key);
        let response = self
            .http
            .get(format!("{}/api/v1/secrets/{key}", self.base_url))
            .query(&[("env", self.environment.as_str())])
            .bearer_auth(self.token(token))
            .send()
            .await?;

        #[cfg(feature = "metrics")]
        vision_metrics::counter!(vision_metrics::vault::FETCHES_TOTAL).increment(1);

        match response.status().as_u16() {
            404 => Err(Error::SecretNotFound(key)),
            status if status >= 400 => {
                #[cfg(feature = "metrics")]
                vision_metrics::counter!(vision_metrics::vault::FETCH_ERRORS_TOTAL).increment(1);
                Err(Error::Api {
                    status,
                    message: response.text().await.unwrap_or_default(),
                })
            },
            _ => {
                let body: Value = response.json().await?;
                body["value"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::SecretNotFound(key))
            },
        }
    }

    /// Fetch several secrets in one round trip. Missing keys are simply
    /// absent from the result.
    pub async fn get_secrets_batch(
        &self,
        keys: &[String],
        token: Option<&str>,
    ) -> Result<HashMap<String, String>> {
        let normalized: Vec<String> = keys.iter().map(|k| normalize_key(k)).collect();
        let response = self
            .http
            .post(format!("{}/api/v1/secrets/batch", self.base_url))
            .bearer_auth(self.token(token))
            .json(&serde_json::json!({
                "keys": normalized,
                "env": self.environment,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        let mut values = HashMap::new();
        if let Some(map) = body["secrets"].as_object() {
            for (key, value) in map {
                if let Some(value) = value.as_str() {
                    values.insert(key.clone(), value.to_string());
                }
            }
        }
        debug!(requested = keys.len(), resolved = values.len(), "batch secret fetch");
        Ok(values)
    }

    pub async fn set_secret(
        &self,
        key: &str,
        value: &str,
        metadata: Option<Value>,
        token: Option<&str>,
    ) -> Result<()> {
        let key = normalize_key(key);
        let response = self
            .http
            .post(format!("{}/api/v1/secrets", self.base_url))
            .bearer_auth(self.token(token))
            .json(&serde_json::json!({
                "key": key,
                "value": value,
                "env": self.environment,
                "metadata": metadata.unwrap_or(Value::Null),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Fetch a credential payload stored under the project credential key.
    pub async fn get_credential(
        &self,
        key: &str,
        token: Option<&str>,
    ) -> Result<String> {
        self.get_secret(key, token).await
    }

    /// Store a credential payload as JSON under the project credential key.
    pub async fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &str,
        metadata: Option<Value>,
        token: Option<&str>,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "username": username,
            "password": password,
        })
        .to_string();
        self.set_secret(key, &payload, metadata, token).await
    }

    /// Liveness probe against the store.
    pub async fn healthy(&self) -> bool {
        let result = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "secret store health check failed");
                false
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: String) -> VaultClient {
        VaultClient::new(base_url, "service-token".into(), "test".into())
    }

    #[tokio::test]
    async fn get_secret_normalizes_the_key_and_reads_value() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/secrets/STAGING_LOGIN?env=test")
            .match_header("authorization", "Bearer service-token")
            .with_status(200)
            .with_body(r#"{"value": "hunter2"}"#)
            .create_async()
            .await;

        let value = client(server.url()).get_secret("staging-login", None).await.unwrap();
        mock.assert_async().await;
        assert_eq!(value, "hunter2");
    }

    #[tokio::test]
    async fn project_token_overrides_the_service_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/secrets/K?env=test")
            .match_header("authorization", "Bearer project-token")
            .with_status(200)
            .with_body(r#"{"value": "v"}"#)
            .create_async()
            .await;

        client(server.url()).get_secret("k", Some("project-token")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_secret_is_a_typed_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/secrets/NOPE?env=test")
            .with_status(404)
            .create_async()
            .await;

        let err = client(server.url()).get_secret("nope", None).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn batch_fetch_collects_present_keys() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/secrets/batch")
            .with_status(200)
            .with_body(r#"{"secrets": {"A": "1", "B": "2"}}"#)
            .create_async()
            .await;

        let values = client(server.url())
            .get_secrets_batch(&["a".into(), "b".into(), "missing".into()], None)
            .await
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["A"], "1");
    }

    #[tokio::test]
    async fn health_reflects_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(200).create_async().await;
        assert!(client(server.url()).healthy().await);

        let mut bad = mockito::Server::new_async().await;
        bad.mock("GET", "/health").with_status(503).create_async().await;
        assert!(!client(bad.url()).healthy().await);
    }
}
