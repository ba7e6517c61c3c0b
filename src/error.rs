//! Crate-wide error type and the category taxonomy callers can match on.

use std::path::PathBuf;

/// Coarse category attached to every [`Error`], so callers (the gRPC/GraphQL
/// layer) can map failures to a response status without inspecting variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Unauthenticated,
    Forbidden,
    Upstream,
    Canceled,
    Internal,
}

/// Errors produced by this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kubeconfig could not be loaded at startup, or no configured path exists.
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Could not watch one or more kubeconfig paths for changes.
    #[error("failed to watch kubeconfig path {path:?}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Denied SelfSubjectAccessReview.
    #[error("permission denied: `{verb} \"{group}\"/\"{resource}\"` in namespace `{namespace}`")]
    PermissionDenied {
        verb: String,
        group: String,
        resource: String,
        namespace: String,
    },

    /// Requested namespace is not in the caller's allow-list.
    #[error("namespace `{requested}` is not permitted")]
    Forbidden { requested: String },

    /// An upstream Kubernetes API call failed (SSAR, TokenRequest, discovery, list/watch).
    #[error("upstream Kubernetes API error: {0}")]
    Upstream(#[from] kube::Error),

    /// The caller's context was canceled or its deadline elapsed.
    #[error("operation canceled")]
    Canceled,

    /// A token file could not be read or trimmed to a non-empty value.
    #[error("failed to read token file {path:?}: {source}")]
    ReadTokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The token file was empty after trimming whitespace.
    #[error("token file {0:?} was empty")]
    EmptyTokenFile(PathBuf),

    /// JWT could not be parsed (a failure mode other than a missing `exp` claim).
    #[error("failed to parse service account JWT: {0}")]
    JwtParse(#[from] jsonwebtoken::errors::Error),

    /// The in-cluster authorizer was constructed or called without a required bearer token.
    #[error("a bearer token is required for the in-cluster authorizer")]
    MissingToken,

    /// A non-empty kube context was supplied to the in-cluster connection manager.
    #[error("in-cluster connection manager does not accept an explicit kube context, got {0:?}")]
    UnexpectedKubeContext(String),

    /// Catch-all for invariant violations and bugs that should be surfaced rather than panicked on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Kubeconfig(_) => ErrorCategory::Configuration,
            Error::Watch { .. } => ErrorCategory::Configuration,
            Error::PermissionDenied { .. } => ErrorCategory::Unauthenticated,
            Error::Forbidden { .. } => ErrorCategory::Forbidden,
            Error::Upstream(_) => ErrorCategory::Upstream,
            Error::Canceled => ErrorCategory::Canceled,
            Error::ReadTokenFile { .. } => ErrorCategory::Internal,
            Error::EmptyTokenFile(_) => ErrorCategory::Internal,
            Error::JwtParse(_) => ErrorCategory::Internal,
            Error::MissingToken => ErrorCategory::Unauthenticated,
            Error::UnexpectedKubeContext(_) => ErrorCategory::Internal,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Canceled
    }
}

pub type Result<T> = std::result::Result<T, Error>;
