//! Keeps a short-lived `ServiceAccount` token fresh via the `TokenRequest`
//! subresource, refreshing at half its remaining TTL in the background.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec, TokenRequestStatus};
use secrecy::SecretString;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_NEXT_SLEEP: Duration = Duration::from_secs(30);

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Keeps a token for `service_account` fresh, exposing the latest value via
/// [`ServiceAccountTokenRefresher::token`]. The background refresh loop is
/// started by [`ServiceAccountTokenRefresher::spawn`] and stopped via the
/// supplied [`CancellationToken`]; either way, `token` refreshes inline under
/// its own lock if the cached token has already expired.
pub struct ServiceAccountTokenRefresher {
    client: kube::Client,
    namespace: String,
    service_account: String,
    expiration_seconds: i64,
    current: RwLock<Option<CachedToken>>,
}

impl ServiceAccountTokenRefresher {
    pub fn new(
        client: kube::Client,
        namespace: impl Into<String>,
        service_account: impl Into<String>,
        expiration_seconds: i64,
    ) -> Self {
        ServiceAccountTokenRefresher {
            client,
            namespace: namespace.into(),
            service_account: service_account.into(),
            expiration_seconds,
            current: RwLock::new(None),
        }
    }

    /// Returns the cached token, refreshing inline if it has expired.
    pub async fn token(&self) -> Result<SecretString> {
        {
            let guard = self.current.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Utc::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut guard = self.current.write().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }
        let (token, expires_at) = self.request_token().await?;
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    /// Fetches an initial token, then spawns the background refresh loop.
    /// The loop exits when `cancel` is triggered.
    pub async fn spawn(self: std::sync::Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let (token, expires_at) = self.request_token().await?;
        *self.current.write().await = Some(CachedToken { token, expires_at });

        tokio::spawn(async move {
            let mut next_sleep = half_ttl_until(expires_at);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("stopping service account token refresh loop");
                        return;
                    }
                    _ = tokio::time::sleep(next_sleep) => {}
                }

                match self.request_token().await {
                    Ok((token, expires_at)) => {
                        *self.current.write().await = Some(CachedToken { token, expires_at });
                        next_sleep = half_ttl_until(expires_at);
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to refresh service account token, retrying in {:?}", MIN_NEXT_SLEEP);
                        next_sleep = MIN_NEXT_SLEEP;
                    }
                }
            }
        });

        Ok(())
    }

    async fn request_token(&self) -> Result<(SecretString, DateTime<Utc>)> {
        let body = TokenRequest {
            spec: TokenRequestSpec {
                expiration_seconds: Some(self.expiration_seconds),
                ..Default::default()
            },
            status: None,
            ..Default::default()
        };
        let request = token_request(&self.namespace, &self.service_account, &body)?;

        let response: TokenRequest = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request::<TokenRequest>(request))
            .await
            .map_err(|_| Error::Canceled)?
            .map_err(Error::Upstream)?;

        let status: TokenRequestStatus = response.status.ok_or_else(|| {
            error!("TokenRequest response had no status");
            Error::Internal("TokenRequest response had no status".into())
        })?;

        // The API server may clamp the requested TTL, so the expiry we track
        // comes from its response, not from `expiration_seconds`.
        Ok((SecretString::from(status.token), status.expiration_timestamp.0))
    }
}

fn token_request(namespace: &str, name: &str, body: &TokenRequest) -> Result<http::Request<Vec<u8>>> {
    let payload = serde_json::to_vec(body).map_err(|e| Error::Internal(format!("encoding TokenRequest: {e}")))?;
    http::Request::post(format!("/api/v1/namespaces/{namespace}/serviceaccounts/{name}/token"))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(payload)
        .map_err(|e| Error::Internal(format!("building TokenRequest: {e}")))
}

fn half_ttl(ttl: Duration) -> Duration {
    std::cmp::max(ttl / 2, MIN_NEXT_SLEEP)
}

fn half_ttl_until(expires_at: DateTime<Utc>) -> Duration {
    let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    half_ttl(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_ttl_respects_minimum_sleep() {
        assert_eq!(half_ttl(Duration::from_secs(10)), MIN_NEXT_SLEEP);
        assert_eq!(half_ttl(Duration::from_secs(3600)), Duration::from_secs(1800));
    }

    #[test]
    fn half_ttl_until_clamps_past_expiry_to_minimum() {
        let expired = Utc::now() - chrono::TimeDelta::seconds(5);
        assert_eq!(half_ttl_until(expired), MIN_NEXT_SLEEP);
    }
}
