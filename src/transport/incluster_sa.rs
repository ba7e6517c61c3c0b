//! In-cluster bearer-token transport: reads the kubelet-mounted service
//! account token file and caches it until its JWT `exp` claim says otherwise.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use http::Request;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tower::{Layer, Service};

use crate::error::{Error, Result};

/// Tokens are re-read this long before their `exp`, so a refresh in flight
/// does not race a request that is about to be signed.
const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

struct CachedToken {
    token: SecretString,
    /// `None` means the JWT carried no `exp` claim: cache it until the file changes.
    expires_at: Option<DateTime<Utc>>,
}

/// Reads and caches the projected service-account token, reparsing its
/// `exp` claim (without verifying the signature: the kubelet-owned tmpfs
/// mount is the trust boundary) to decide when to reread the file.
pub struct InClusterTokenSource {
    path: PathBuf,
    refresh_skew: TimeDelta,
    cached: RwLock<Option<CachedToken>>,
}

impl InClusterTokenSource {
    /// Uses [`DEFAULT_REFRESH_SKEW`] (1 minute). Use [`Self::with_refresh_skew`]
    /// to override it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_refresh_skew(path, DEFAULT_REFRESH_SKEW)
    }

    pub fn with_refresh_skew(path: impl Into<PathBuf>, refresh_skew: Duration) -> Self {
        InClusterTokenSource {
            path: path.into(),
            refresh_skew: TimeDelta::from_std(refresh_skew).unwrap_or(TimeDelta::seconds(60)),
            cached: RwLock::new(None),
        }
    }

    pub async fn token(&self) -> Result<String> {
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if !self.is_expiring(cached.expires_at) {
                    return Ok(cached.token.expose_secret().to_string());
                }
            }
        }
        self.reload().await
    }

    async fn reload(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| Error::ReadTokenFile {
                path: self.path.clone(),
                source,
            })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyTokenFile(self.path.clone()));
        }

        let expires_at = parse_expiry(trimmed)?;
        let mut guard = self.cached.write().await;
        *guard = Some(CachedToken {
            token: SecretString::from(trimmed.to_string()),
            expires_at,
        });
        Ok(trimmed.to_string())
    }

    fn is_expiring(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        match expires_at {
            Some(exp) => Utc::now() + self.refresh_skew >= exp,
            None => false,
        }
    }
}

/// Parses the `exp` claim out of a JWT without verifying its signature.
/// A missing `exp` claim means "never expires for caching purposes".
fn parse_expiry(token: &str) -> Result<Option<DateTime<Utc>>> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)))
}

#[derive(Clone)]
pub struct InClusterAuthLayer {
    source: Arc<InClusterTokenSource>,
}

impl InClusterAuthLayer {
    pub fn new(source: Arc<InClusterTokenSource>) -> Self {
        InClusterAuthLayer { source }
    }
}

impl<S> Layer<S> for InClusterAuthLayer {
    type Service = InClusterAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InClusterAuthService {
            inner,
            source: self.source.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InClusterAuthService<S> {
    inner: S,
    source: Arc<InClusterTokenSource>,
}

impl<S, B> Service<Request<B>> for InClusterAuthService<S>
where
    S: Service<Request<B>, Response = http::Response<hyper::body::Incoming>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<tower::BoxError>,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let mut inner = self.inner.clone();
        let source = self.source.clone();
        Box::pin(async move {
            let token = source.token().await.map_err(|e| -> tower::BoxError { Box::new(e) })?;
            let header = http::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| -> tower::BoxError { Box::new(e) })?;
            req.headers_mut().insert(http::header::AUTHORIZATION, header);
            inner.call(req).await.map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn unsigned_jwt_with_exp(exp: i64) -> String {
        use base64::Engine;
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let claims = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{claims}.")
    }

    #[tokio::test]
    async fn reads_and_caches_token_until_expiry() {
        let exp = (Utc::now() + TimeDelta::seconds(3600)).timestamp();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", unsigned_jwt_with_exp(exp)).unwrap();

        let source = InClusterTokenSource::new(file.path());
        let token = source.token().await.unwrap();
        assert!(!token.is_empty());
        let cached_again = source.token().await.unwrap();
        assert_eq!(token, cached_again);
    }

    #[tokio::test]
    async fn empty_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = InClusterTokenSource::new(file.path());
        assert!(source.token().await.is_err());
    }

    #[tokio::test]
    async fn custom_refresh_skew_forces_reload_before_default_skew_would() {
        let exp = (Utc::now() + TimeDelta::seconds(90)).timestamp();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", unsigned_jwt_with_exp(exp)).unwrap();

        // A 2-minute skew against a 90s-out expiry means the very first read
        // is already treated as expiring, so every call rereads the file.
        let source = InClusterTokenSource::with_refresh_skew(file.path(), Duration::from_secs(120));
        let first = source.token().await.unwrap();
        let new_exp = (Utc::now() + TimeDelta::seconds(3600)).timestamp();
        std::fs::write(file.path(), unsigned_jwt_with_exp(new_exp)).unwrap();
        let second = source.token().await.unwrap();
        assert_ne!(first, second);
    }
}
