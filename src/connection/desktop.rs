//! Desktop connection manager: one `kube::Client` per kube context, built
//! from the watched kubeconfig.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::runtime::reflector::Store;
use kube::Config;
use tracing::{debug, warn};

use crate::authorizer::{InformerAuthorizer, DEFAULT_TTL};
use crate::cache::SingleFlightCache;
use crate::client_stack::context_token_client;
use crate::connection::{ConnectionManager, StartFn};
use crate::error::{Error, Result};
use crate::gvr::Gvr;
use crate::informer::InformerFactory;
use crate::kubeconfig::{KubeConfigWatcher, SubscriptionId};

const WARM_UP_TIMEOUT: Duration = Duration::from_secs(20);

/// Builds and caches one client per kube context out of a watched
/// kubeconfig. Every context advertised by the current snapshot is
/// lazily warmed up in the background so the first real request for a
/// popular context doesn't pay the connection-build cost.
pub struct DesktopConnectionManager {
    watcher: Arc<KubeConfigWatcher>,
    subscription: SubscriptionId,
    clients: Arc<SingleFlightCache<String, kube::Client>>,
    authorizers: Arc<SingleFlightCache<String, Arc<InformerAuthorizer>>>,
    factories: Arc<SingleFlightCache<(String, String), Arc<InformerFactory>>>,
}

impl DesktopConnectionManager {
    pub async fn new(watcher: Arc<KubeConfigWatcher>) -> Arc<Self> {
        let (subscription, mut updates) = watcher.subscribe();
        let this = Arc::new(DesktopConnectionManager {
            watcher: watcher.clone(),
            subscription,
            clients: Arc::new(SingleFlightCache::new()),
            authorizers: Arc::new(SingleFlightCache::new()),
            factories: Arc::new(SingleFlightCache::new()),
        });

        let weak = Arc::downgrade(&this);
        tokio::spawn(async move {
            while let Some(snapshot) = updates.recv().await {
                let Some(this) = weak.upgrade() else { return };
                // Already-cached clients/authorizers/factories remain valid
                // until a cache miss (e.g. a context disappearing) forces
                // recreation; a mere kubeconfig edit must not disrupt
                // in-flight informers built on the old snapshot.
                debug!("kubeconfig changed, warming up contexts in the new snapshot");
                this.warm_up_all(snapshot.current_context.as_deref());
            }
        });

        let initial = watcher.get().await;
        this.warm_up_all(initial.current_context.as_deref());
        this
    }

    fn warm_up_all(self: &Arc<Self>, default_context: Option<&str>) {
        let Some(context) = default_context.map(str::to_owned) else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(WARM_UP_TIMEOUT, this.client(Some(&context))).await {
                Ok(Ok(_)) => debug!(context = %context, "warmed up client"),
                Ok(Err(e)) => warn!(context = %context, error = %e, "failed to warm up client"),
                Err(_) => warn!(context = %context, "warming up client timed out"),
            }
        });
    }

    async fn resolve_context(&self, context: Option<&str>) -> Result<String> {
        match context {
            Some(c) => Ok(c.to_string()),
            None => {
                let snapshot = self.watcher.get().await;
                snapshot
                    .current_context
                    .clone()
                    .ok_or_else(|| Error::Kubeconfig("no current-context set and none was requested".into()))
            }
        }
    }

    async fn build_client(&self, context: &str) -> Result<kube::Client> {
        let snapshot = self.watcher.get().await;
        // Our watcher keeps its own `Kubeconfig` model (so it can merge and
        // debounce independently of `kube`'s own loader); round-trip it
        // through YAML to get the real `kube` crate's native type, which is
        // what `Config::from_custom_kubeconfig` needs.
        let yaml = serde_yaml::to_string(&*snapshot.kubeconfig)
            .map_err(|e| Error::Kubeconfig(format!("re-serializing merged kubeconfig: {e}")))?;
        let native = kube::config::Kubeconfig::from_yaml(&yaml)
            .map_err(|e| Error::Kubeconfig(format!("adapting merged kubeconfig: {e}")))?;

        let config = Config::from_custom_kubeconfig(native, &kube::config::KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        })
        .await
        .map_err(|e| Error::Kubeconfig(e.to_string()))?;
        context_token_client(config)
    }
}

#[async_trait]
impl ConnectionManager for DesktopConnectionManager {
    async fn client(&self, context: Option<&str>) -> Result<kube::Client> {
        let context = self.resolve_context(context).await?;
        let this_context = context.clone();
        self.clients
            .get_or_create(context, move || {
                let this_context = this_context.clone();
                async move { self.build_client(&this_context).await }
            })
            .await
    }

    async fn wait_until_ready(&self, context: Option<&str>) -> Result<()> {
        self.client(context).await.map(|_| ())
    }

    async fn get_default_namespace(&self, context: Option<&str>) -> Result<String> {
        let context = self.resolve_context(context).await?;
        let snapshot = self.watcher.get().await;
        Ok(snapshot
            .kubeconfig
            .context(&context)
            .and_then(|c| c.namespace.clone())
            .unwrap_or_else(|| "default".to_string()))
    }

    async fn deref_kube_context(&self, context: Option<&str>) -> Result<String> {
        self.resolve_context(context).await
    }

    async fn new_informer(
        &self,
        context: Option<&str>,
        subject: Option<&str>,
        namespace: &str,
        gvr: &Gvr,
    ) -> Result<(Store<DynamicObject>, StartFn)> {
        let context = self.deref_kube_context(context).await?;
        let client = self.client(Some(&context)).await?;

        let authorizer = self
            .authorizers
            .get_or_create(context.clone(), || {
                let client = client.clone();
                async move { Ok::<_, Error>(Arc::new(InformerAuthorizer::new(client, DEFAULT_TTL))) }
            })
            .await?;
        authorizer.authorize(subject, namespace, gvr).await?;

        let factory = self
            .factories
            .get_or_create((context.clone(), namespace.to_string()), || {
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
        self.watcher.unsubscribe(self.subscription);
        self.watcher.close();
        Ok(())
    }
}
