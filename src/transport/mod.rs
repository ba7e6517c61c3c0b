//! Bearer-token transports: `tower` middleware that injects an
//! `Authorization` header, composed into the `ServiceBuilder` stack used to
//! build a [`kube::Client`].

pub mod context_token;
pub mod incluster_sa;
pub mod rate_limit;

pub use context_token::{CallerToken, ContextTokenLayer};
pub use incluster_sa::{InClusterAuthLayer, InClusterTokenSource};
pub use rate_limit::RateLimitLayer;
