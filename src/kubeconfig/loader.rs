//! Resolves the set of kubeconfig paths to watch and loads/merges them.
//!
//! Precedence: an explicit path argument, then the `KUBECONFIG` environment
//! variable (a platform path-list, merged first-file-wins), then the default
//! `~/.kube/config`.

use std::env;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};
use crate::kubeconfig::model::Kubeconfig;

pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Determine which on-disk paths make up the effective kubeconfig, in
/// merge order (first entry wins on conflicts).
pub fn resolve_paths(explicit: Option<&Path>) -> Result<Vec<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(vec![path.to_path_buf()]);
    }

    if let Some(value) = env::var_os(KUBECONFIG_ENV) {
        let paths: Vec<PathBuf> = env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()).collect();
        if !paths.is_empty() {
            return Ok(paths);
        }
    }

    Ok(vec![default_path()?])
}

fn default_path() -> Result<PathBuf> {
    let home = dirs_home().ok_or_else(|| Error::Kubeconfig("could not determine home directory".into()))?;
    Ok(home.join(".kube").join("config"))
}

fn dirs_home() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

/// Read and merge every path in `paths`, in order, first-file-wins.
///
/// A path that cannot be read is skipped rather than treated as fatal: the
/// `KUBECONFIG` list routinely names paths that don't all exist. Failure is
/// reserved for the case where none of the configured paths exist.
pub fn load_and_merge(paths: &[PathBuf]) -> Result<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;
    for path in paths {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable kubeconfig path");
                continue;
            }
        };
        let doc = Kubeconfig::from_yaml(&text)?;
        merged = Some(match merged {
            Some(base) => base.merge(doc)?,
            None => doc,
        });
    }
    merged.ok_or_else(|| {
        let attempted = paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ");
        Error::Kubeconfig(format!(
            "none of the configured kubeconfig paths exist: [{attempted}]. \
             Pass an explicit kubeconfig path, or set KUBECONFIG, or use the in-cluster \
             connection manager if running inside a cluster"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_path_takes_precedence() {
        let explicit = PathBuf::from("/tmp/explicit-kubeconfig");
        let resolved = resolve_paths(Some(&explicit)).unwrap();
        assert_eq!(resolved, vec![explicit]);
    }

    #[test]
    fn load_and_merge_reads_in_order() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "current-context: first").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(second, "current-context: second").unwrap();

        let merged = load_and_merge(&[first.path().to_path_buf(), second.path().to_path_buf()]).unwrap();
        assert_eq!(merged.current_context.as_deref(), Some("first"));
    }

    #[test]
    fn missing_path_is_skipped_not_fatal() {
        let mut present = tempfile::NamedTempFile::new().unwrap();
        writeln!(present, "current-context: dev").unwrap();
        let missing = PathBuf::from("/nonexistent/kubeconfig-does-not-exist");

        let merged = load_and_merge(&[missing, present.path().to_path_buf()]).unwrap();
        assert_eq!(merged.current_context.as_deref(), Some("dev"));
    }

    #[test]
    fn all_paths_missing_is_fatal_with_guidance() {
        let err = load_and_merge(&[PathBuf::from("/nonexistent/a"), PathBuf::from("/nonexistent/b")]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("explicit"));
        assert!(message.contains("in-cluster"));
    }
}
