//! Connection management: turns a kube context into a ready [`kube::Client`],
//! and composes the authorizer and informer factory into `new_informer`, the
//! hot path every watch-backed feature goes through.

pub mod desktop;
pub mod in_cluster;

pub use desktop::DesktopConnectionManager;
pub use in_cluster::InClusterConnectionManager;

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::runtime::reflector::Store;

use crate::error::Result;
use crate::gvr::Gvr;

/// Re-registers a GVR's informer with its running factory. Idempotent: the
/// factory de-duplicates starts per GVR, so calling this more than once is
/// harmless.
pub type StartFn = Arc<dyn Fn() -> Store<DynamicObject> + Send + Sync>;

/// Produces and caches a [`kube::Client`] for a given kube context, and
/// gates/provisions informers on top of it.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// `context` is `None` for the manager's default context.
    async fn client(&self, context: Option<&str>) -> Result<kube::Client>;

    /// The dynamic-resource-capable client for `context`. `kube::Client`
    /// already serves typed and dynamic access out of the same cached
    /// connection, so this shares `client`'s cache rather than building a
    /// second one.
    async fn get_or_create_dynamic_client(&self, context: Option<&str>) -> Result<kube::Client> {
        self.client(context).await
    }

    /// Blocks until a client for `context` has been constructed at least
    /// once, without forcing a fresh build if one is already cached.
    async fn wait_until_ready(&self, context: Option<&str>) -> Result<()>;

    /// The context's preferred namespace, or `"default"` if it has none.
    async fn get_default_namespace(&self, context: Option<&str>) -> Result<String>;

    /// Resolves `None` to this manager's notion of "current context".
    async fn deref_kube_context(&self, context: Option<&str>) -> Result<String>;

    /// Resolves/creates a clientset for `context`, authorizes `subject` to
    /// `list`/`watch` `gvr` in `namespace`, resolves/creates the
    /// `(context, namespace)` informer factory, and starts `gvr` on it.
    /// Returns the resulting store and an idempotent closure that re-starts
    /// the same GVR on the same factory.
    async fn new_informer(
        &self,
        context: Option<&str>,
        subject: Option<&str>,
        namespace: &str,
        gvr: &Gvr,
    ) -> Result<(Store<DynamicObject>, StartFn)>;

    /// Cancels every factory this manager has ever created and waits for
    /// them to drain.
    async fn shutdown(&self) -> Result<()>;
}
