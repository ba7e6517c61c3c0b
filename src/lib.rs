//! Cluster-access core for a Kubernetes log-viewing service.
//!
//! Owns everything between "a kubeconfig (or in-cluster environment) exists"
//! and "here is an authorized, informer-backed view of a cluster resource":
//! kubeconfig watching, bearer-token transports, service-account token
//! refresh, informer authorization, informer provisioning, connection
//! management and the namespace allow-list guard. Building a Kubernetes
//! client from scratch is explicitly out of scope; this crate orchestrates
//! the real `kube` crate rather than reimplementing it.

pub mod authorizer;
pub mod cache;
pub mod client_stack;
pub mod connection;
pub mod error;
pub mod gvr;
pub mod informer;
pub mod kubeconfig;
pub mod namespace_guard;
pub mod token_refresher;
pub mod transport;

pub use authorizer::InformerAuthorizer;
pub use connection::{ConnectionManager, DesktopConnectionManager, InClusterConnectionManager, StartFn};
pub use error::{Error, ErrorCategory, Result};
pub use gvr::Gvr;
pub use informer::InformerFactory;
pub use kubeconfig::{KubeConfigWatcher, Kubeconfig, Snapshot};
pub use namespace_guard::{deref_namespace, deref_namespace_to_list, NamespaceRequest};
pub use token_refresher::ServiceAccountTokenRefresher;
