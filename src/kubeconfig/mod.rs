//! Kubeconfig data model, path resolution, and the debounced file watcher.

pub mod loader;
pub mod model;
pub mod watcher;

pub use loader::resolve_paths;
pub use model::Kubeconfig;
pub use watcher::{KubeConfigWatcher, Snapshot, SubscriptionId};
