//! Canonical resource identifier used throughout the core.

use std::fmt;

/// `(group, version, resource)` — the plural resource name, not the kind.
///
/// An empty `group` means the legacy core API group (`""`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_omits_empty_group() {
        let gvr = Gvr::new("", "v1", "pods");
        assert_eq!(gvr.api_version(), "v1");
        let gvr = Gvr::new("apps", "v1", "deployments");
        assert_eq!(gvr.api_version(), "apps/v1");
    }
}
