//! In-cluster connection manager: standard in-cluster discovery, no
//! kubeconfig, no per-context switching.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::runtime::reflector::Store;
use kube::Config;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::authorizer::{InformerAuthorizer, DEFAULT_TTL};
use crate::cache::SingleFlightCache;
use crate::client_stack::in_cluster_client;
use crate::connection::{ConnectionManager, StartFn};
use crate::error::{Error, Result};
use crate::gvr::Gvr;
use crate::informer::InformerFactory;

const SA_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Builds a single client from the standard in-cluster environment
/// (service host/port env vars, mounted CA, projected service-account
/// token). Rejects an explicit `kube_context`, which has no meaning here.
pub struct InClusterConnectionManager {
    token_path: PathBuf,
    client: OnceCell<kube::Client>,
    authorizer: OnceCell<Arc<InformerAuthorizer>>,
    factories: SingleFlightCache<String, Arc<InformerFactory>>,
}

impl InClusterConnectionManager {
    pub fn new() -> Self {
        InClusterConnectionManager {
            token_path: PathBuf::from(SA_TOKEN_PATH),
            client: OnceCell::new(),
            authorizer: OnceCell::new(),
            factories: SingleFlightCache::new(),
        }
    }

    #[cfg(test)]
    pub fn with_token_path(token_path: impl Into<PathBuf>) -> Self {
        InClusterConnectionManager {
            token_path: token_path.into(),
            client: OnceCell::new(),
            authorizer: OnceCell::new(),
            factories: SingleFlightCache::new(),
        }
    }

    async fn build(&self) -> Result<kube::Client> {
        let config = Config::from_cluster_env().map_err(|e| Error::Kubeconfig(e.to_string()))?;
        debug!("built in-cluster kube client");
        in_cluster_client(config, self.token_path.clone())
    }

    fn reject_explicit_context(context: Option<&str>) -> Result<()> {
        if let Some(ctx) = context {
            if !ctx.is_empty() {
                return Err(Error::UnexpectedKubeContext(ctx.to_string()));
            }
        }
        Ok(())
    }
}

impl Default for InClusterConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionManager for InClusterConnectionManager {
    async fn client(&self, context: Option<&str>) -> Result<kube::Client> {
        Self::reject_explicit_context(context)?;
        self.client.get_or_try_init(|| self.build()).await.cloned()
    }

    async fn wait_until_ready(&self, context: Option<&str>) -> Result<()> {
        self.client(context).await.map(|_| ())
    }

    async fn get_default_namespace(&self, context: Option<&str>) -> Result<String> {
        let client = self.client(context).await?;
        let namespace = client.default_namespace();
        Ok(if namespace.is_empty() {
            "default".to_string()
        } else {
            namespace.to_string()
        })
    }

    async fn deref_kube_context(&self, context: Option<&str>) -> Result<String> {
        Self::reject_explicit_context(context)?;
        Ok(String::new())
    }

    async fn new_informer(
        &self,
        context: Option<&str>,
        subject: Option<&str>,
        namespace: &str,
        gvr: &Gvr,
    ) -> Result<(Store<DynamicObject>, StartFn)> {
        let client = self.client(context).await?;

        let authorizer = self
            .authorizer
            .get_or_try_init(|| async { Ok::<_, Error>(Arc::new(InformerAuthorizer::new(client.clone(), DEFAULT_TTL))) })
            .await?
            .clone();
        authorizer.authorize(subject, namespace, gvr).await?;

        let factory = self
            .factories
            .get_or_create(namespace.to_string(), || {
                let client = client.clone();
                let namespace = namespace.to_string();
                async move { Ok::<_, Error>(Arc::new(InformerFactory::new(client, namespace))) }
            })
            .await?;

        let store = factory.start(gvr);
        let start_factory = factory.clone();
        let start_gvr = gvr.clone();
        let start_fn: StartFn = Arc::new(move || start_factory.start(&start_gvr));

        Ok((store, start_fn))
    }

    async fn shutdown(&self) -> Result<()> {
        for factory in self.factories.populated_values() {
            factory.shutdown().await?;
        }
        Ok(())
    }
}
