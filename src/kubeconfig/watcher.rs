//! Watches the resolved kubeconfig paths for changes and republishes a
//! merged [`Snapshot`] to subscribers, debounced behind a single timer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::kubeconfig::loader::load_and_merge;
use crate::kubeconfig::model::Kubeconfig;

const DEBOUNCE: Duration = Duration::from_millis(100);
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 8;

pub type SubscriptionId = u64;

/// A merged kubeconfig plus the context the watcher resolved as current.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub kubeconfig: Arc<Kubeconfig>,
    pub current_context: Option<String>,
}

impl Snapshot {
    fn from_kubeconfig(kubeconfig: Kubeconfig) -> Self {
        let current_context = kubeconfig.current_context.clone();
        Snapshot {
            kubeconfig: Arc::new(kubeconfig),
            current_context,
        }
    }
}

/// Watches one or more kubeconfig files, republishing a fresh [`Snapshot`]
/// to subscribers whenever any of them changes, debounced by 100ms.
pub struct KubeConfigWatcher {
    paths: Vec<PathBuf>,
    state: RwLock<Arc<Snapshot>>,
    subscribers: DashMap<SubscriptionId, mpsc::Sender<Arc<Snapshot>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    // Kept alive for the lifetime of the watcher; dropping it stops the OS watch.
    _watcher: RecommendedWatcher,
}

impl KubeConfigWatcher {
    /// Loads and merges `paths`, then starts watching their parent
    /// directories for changes. Fails with [`Error::Kubeconfig`] if the
    /// initial load fails, or [`Error::Watch`] if the OS watch cannot be
    /// established.
    pub async fn new(paths: Vec<PathBuf>) -> Result<Arc<Self>> {
        let initial = load_and_merge(&paths)?;
        let cancel = CancellationToken::new();

        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|source| Error::Watch {
            path: paths[0].clone(),
            source,
        })?;

        for path in &paths {
            let dir = path.parent().unwrap_or(path.as_path());
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| Error::Watch {
                    path: path.clone(),
                    source,
                })?;
        }

        let this = Arc::new(KubeConfigWatcher {
            paths: paths.clone(),
            state: RwLock::new(Arc::new(Snapshot::from_kubeconfig(initial))),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            cancel: cancel.clone(),
            _watcher: watcher,
        });

        let (debounce_tx, debounce_rx) = mpsc::unbounded_channel::<()>();
        let watched_paths = paths;
        std::thread::spawn(move || {
            for res in raw_rx {
                match res {
                    Ok(event) if event.paths.iter().any(|p| watched_paths.contains(p)) => {
                        let _ = debounce_tx.send(());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "kubeconfig watch error"),
                }
            }
        });

        tokio::spawn(debounce_and_reload(this.clone(), debounce_rx));

        Ok(this)
    }

    /// The current merged snapshot.
    pub async fn get(&self) -> Arc<Snapshot> {
        self.state.read().await.clone()
    }

    /// Registers a new subscriber and returns its id and receiver. The
    /// channel is bounded; a subscriber that falls behind has its oldest
    /// unread update dropped rather than blocking the publisher.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::Receiver<Arc<Snapshot>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(&id);
    }

    /// Stops the background watch and debounce loop. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    async fn reload_and_publish(&self) {
        match load_and_merge(&self.paths) {
            Ok(kubeconfig) => {
                let snapshot = Arc::new(Snapshot::from_kubeconfig(kubeconfig));
                *self.state.write().await = snapshot.clone();
                for entry in self.subscribers.iter() {
                    if entry.value().try_send(snapshot.clone()).is_err() {
                        warn!(subscription = entry.key(), "dropping kubeconfig update, subscriber is behind");
                    }
                }
                debug!("republished kubeconfig snapshot after change");
            }
            Err(e) => warn!(error = %e, "failed to reload kubeconfig after change, keeping previous snapshot"),
        }
    }
}

async fn debounce_and_reload(watcher: Arc<KubeConfigWatcher>, mut rx: mpsc::UnboundedReceiver<()>) {
    loop {
        tokio::select! {
            _ = watcher.cancel.cancelled() => return,
            event = rx.recv() => {
                if event.is_none() {
                    return;
                }
            }
        }

        trace!("kubeconfig change detected, debouncing");
        loop {
            tokio::select! {
                _ = watcher.cancel.cancelled() => return,
                _ = tokio::time::sleep(DEBOUNCE) => break,
                more = rx.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
            }
        }

        watcher.reload_and_publish().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_initial_snapshot_on_construction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "current-context: dev").unwrap();

        let watcher = KubeConfigWatcher::new(vec![file.path().to_path_buf()]).await.unwrap();
        let snapshot = watcher.get().await;
        assert_eq!(snapshot.current_context.as_deref(), Some("dev"));
        watcher.close();
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_do_not_panic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "current-context: dev").unwrap();

        let watcher = KubeConfigWatcher::new(vec![file.path().to_path_buf()]).await.unwrap();
        let (id, rx) = watcher.subscribe();
        watcher.unsubscribe(id);
        drop(rx);
        watcher.close();
    }
}
