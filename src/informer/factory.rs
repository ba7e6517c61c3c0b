//! Per-`(context, namespace)` registry of running reflectors, one per GVR.
//!
//! Plays the role of a `SharedInformerFactory`: `start` is idempotent per
//! GVR, and `shutdown` cancels every spawned reflector task and waits for
//! them to exit (bounded by a deadline).

use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gvr::Gvr;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

struct RunningInformer {
    store: Store<DynamicObject>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Lazily starts and owns one reflector per GVR for a single
/// `(kube_context, namespace)` pair.
pub struct InformerFactory {
    client: kube::Client,
    namespace: String,
    informers: DashMap<Gvr, RunningInformer>,
}

impl InformerFactory {
    pub fn new(client: kube::Client, namespace: impl Into<String>) -> Self {
        InformerFactory {
            client,
            namespace: namespace.into(),
            informers: DashMap::new(),
        }
    }

    /// Starts (or returns the already-running) reflector for `gvr`.
    pub fn start(&self, gvr: &Gvr) -> Store<DynamicObject> {
        if let Some(existing) = self.informers.get(gvr) {
            return existing.store.clone();
        }

        let resource = ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: gvr.api_version(),
            kind: gvr.resource.clone(),
            plural: gvr.resource.clone(),
        };
        let api: Api<DynamicObject> = if self.namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
        };

        let writer: Writer<DynamicObject> = reflector::store::Writer::new(resource);
        let store = writer.as_reader();
        let cancel = CancellationToken::new();
        let stream_cancel = cancel.clone();
        let gvr_owned = gvr.clone();

        let task = tokio::spawn(async move {
            let stream = reflector::reflector(writer, watcher(api, watcher::Config::default())).default_backoff();
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = stream_cancel.cancelled() => return,
                    next = stream.next() => {
                        match next {
                            Some(Ok(_)) => {}
                            Some(Err(e)) => warn!(gvr = %gvr_owned, error = %e, "informer watch error"),
                            None => return,
                        }
                    }
                }
            }
        });

        self.informers.insert(
            gvr.clone(),
            RunningInformer {
                store: store.clone(),
                cancel,
                task,
            },
        );
        debug!(%gvr, namespace = %self.namespace, "started informer");
        store
    }

    pub fn store(&self, gvr: &Gvr) -> Option<Store<DynamicObject>> {
        self.informers.get(gvr).map(|i| i.store.clone())
    }

    /// Cancels every running reflector and waits (bounded by a deadline)
    /// for their tasks to exit.
    pub async fn shutdown(&self) -> Result<()> {
        let gvrs: Vec<Gvr> = self.informers.iter().map(|e| e.key().clone()).collect();
        let mut removed = Vec::with_capacity(gvrs.len());
        for gvr in gvrs {
            if let Some((_, informer)) = self.informers.remove(&gvr) {
                informer.cancel.cancel();
                debug!(%gvr, "canceling informer");
                removed.push((gvr, informer));
            }
        }
        for (gvr, informer) in removed {
            if tokio::time::timeout(SHUTDOWN_DEADLINE, informer.task).await.is_err() {
                warn!(%gvr, "informer task did not exit within the shutdown deadline");
            }
        }
        Ok(())
    }
}
