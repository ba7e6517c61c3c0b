//! Per-request bearer-token transport for the desktop connection manager.
//!
//! Unlike the in-cluster transport, there is no single token to cache: each
//! request carries the caller's own token (e.g. forwarded from a `kubectl`
//! exec plugin or an IDE's credential store) as a request extension, and
//! this layer's only job is to turn that into an `Authorization` header.

use http::Request;
use secrecy::{ExposeSecret, SecretString};
use tower::{Layer, Service};

/// Inserted into a request's extensions by the caller before it reaches the
/// `kube::Client` built from this transport.
#[derive(Clone)]
pub struct CallerToken(pub SecretString);

#[derive(Clone, Default)]
pub struct ContextTokenLayer;

impl<S> Layer<S> for ContextTokenLayer {
    type Service = ContextTokenService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextTokenService { inner }
    }
}

#[derive(Clone)]
pub struct ContextTokenService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for ContextTokenService<S>
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
        Box::pin(async move {
            // No caller token threaded through: pass the request through as-is
            // rather than failing it. The caller may be relying on a
            // kubeconfig-embedded credential (client cert, exec plugin) that
            // `kube`'s own config layer already installed on the connector.
            if let Some(token) = req.extensions().get::<CallerToken>().cloned() {
                let header = http::HeaderValue::from_str(&format!("Bearer {}", token.0.expose_secret()))
                    .map_err(|e| -> tower::BoxError { Box::new(e) })?;
                req.headers_mut().insert(http::header::AUTHORIZATION, header);
            }
            inner.call(req).await.map_err(Into::into)
        })
    }
}

impl std::fmt::Debug for CallerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerToken").field("0", &"<redacted>").finish()
    }
}
