//! Transport-level retry for provider HTTP calls.

use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

pub const BASE_BACKOFF_MS: u64 = 500;
pub const MAX_ATTEMPTS: usize = 3;

/// Whether an HTTP status warrants a retry at the transport layer.
pub fn should_retry_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Exponential backoff: 500ms, 1s, 2s, …
pub fn backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(6) as u32;
    BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

/// Send a request, retrying 429s and 5xx up to [`MAX_ATTEMPTS`] total
/// attempts. The builder must be cloneable (no streaming bodies).
pub async fn send_with_retry(
    provider: &'static str,
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::Response> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let request = match builder.try_clone() {
            Some(cloned) => cloned,
            // Non-cloneable body: single attempt only.
            None => return Ok(builder.send().await?),
        };

        match request.send().await {
            Ok(response) if !should_retry_status(response.status().as_u16()) => {
                return Ok(response);
            },
            Ok(response) if attempt < MAX_ATTEMPTS => {
                let status = response.status();
                warn!(provider, %status, attempt, "provider call retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms(attempt))).await;
            },
            Ok(response) => {
                let status = response.status().as_u16();
                if status == 429 {
                    return Err(Error::RateLimited { provider });
                }
                let message = response.text().await.unwrap_or_default();
                return Err(Error::Api {
                    provider,
                    status,
                    message,
                });
            },
            Err(e) if attempt < MAX_ATTEMPTS && (e.is_timeout() || e.is_connect()) => {
                warn!(provider, error = %e, attempt, "provider call retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms(attempt))).await;
            },
            Err(e) => return Err(Error::Http(e)),
        }
    }
}
