//! Builds a [`kube::Client`] wired through one of this crate's own
//! bearer-token transports instead of `kube`'s built-in auth layer.

use std::sync::Arc;

use kube::client::ConfigExt;
use kube::Config;
use tower::ServiceBuilder;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{ContextTokenLayer, InClusterAuthLayer, InClusterTokenSource, RateLimitLayer};

/// Matches client-go's default in-cluster REST config rate limit.
const IN_CLUSTER_QPS: u32 = 10;
const IN_CLUSTER_BURST: u32 = 40;

/// Builds a `kube::Client` for the desktop connection manager: requests are
/// authenticated per-call via a [`crate::transport::CallerToken`] request
/// extension rather than a single cached token.
pub fn context_token_client(config: Config) -> Result<kube::Client> {
    let https = config.rustls_https_connector().map_err(Error::Upstream)?;
    let service = ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .layer(ContextTokenLayer)
        .service(hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(https));

    debug!("built desktop kube client with per-request bearer token transport");
    Ok(kube::Client::new(service, config.default_namespace))
}

/// Builds a `kube::Client` for the in-cluster connection manager: requests
/// are authenticated from the kubelet-projected service-account token,
/// cached and refreshed by JWT `exp`.
pub fn in_cluster_client(config: Config, token_path: impl Into<std::path::PathBuf>) -> Result<kube::Client> {
    let source = Arc::new(InClusterTokenSource::new(token_path));
    let https = config.rustls_https_connector().map_err(Error::Upstream)?;
    let service = ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .layer(RateLimitLayer::new(IN_CLUSTER_QPS, IN_CLUSTER_BURST))
        .layer(InClusterAuthLayer::new(source))
        .service(hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(https));

    debug!(qps = IN_CLUSTER_QPS, burst = IN_CLUSTER_BURST, "built in-cluster kube client with rate-limited service account token transport");
    Ok(kube::Client::new(service, config.default_namespace))
}
