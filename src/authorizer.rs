//! Authorizes informer creation via paired list/watch `SelfSubjectAccessReview`
//! checks, with a positive-only TTL cache so repeated checks for the same
//! subject/resource don't round-trip to the API server every time.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec, SelfSubjectAccessReviewStatus,
};
use kube::api::{Api, PostParams};
use tracing::debug;

use crate::error::{Error, Result};
use crate::gvr::Gvr;

/// Default positive-decision cache TTL: 5 minutes, per the informer
/// authorizer's own data model.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    /// The caller's bearer token, or `None` for the in-cluster service account identity.
    subject: Option<String>,
    namespace: String,
    group: String,
    resource: String,
    verb: String,
}

/// Checks whether the acting identity may `list` and `watch` a resource in a
/// namespace, caching only positive decisions for `ttl`.
pub struct InformerAuthorizer {
    client: kube::Client,
    ttl: Duration,
    cache: DashMap<CacheKey, Instant>,
}

impl InformerAuthorizer {
    pub fn new(client: kube::Client, ttl: Duration) -> Self {
        InformerAuthorizer {
            client,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Returns `Ok(())` if both `list` and `watch` are allowed, otherwise
    /// `Err(Error::PermissionDenied)`. `list` and `watch` are cached (and,
    /// on a miss, checked) as two independent entries.
    pub async fn authorize(&self, subject: Option<&str>, namespace: &str, gvr: &Gvr) -> Result<()> {
        let (list_allowed, watch_allowed) = tokio::try_join!(
            self.cached_or_check(subject, namespace, gvr, "list"),
            self.cached_or_check(subject, namespace, gvr, "watch"),
        )?;

        if list_allowed && watch_allowed {
            debug!(%gvr, namespace, "informer authorization granted");
            return Ok(());
        }

        Err(Error::PermissionDenied {
            verb: if list_allowed { "watch" } else { "list" }.to_string(),
            group: gvr.group.clone(),
            resource: gvr.resource.clone(),
            namespace: namespace.to_string(),
        })
    }

    async fn cached_or_check(&self, subject: Option<&str>, namespace: &str, gvr: &Gvr, verb: &str) -> Result<bool> {
        let key = CacheKey {
            subject: subject.map(str::to_owned),
            namespace: namespace.to_owned(),
            group: gvr.group.clone(),
            resource: gvr.resource.clone(),
            verb: verb.to_owned(),
        };

        if let Some(entry) = self.cache.get(&key) {
            if *entry > Instant::now() {
                return Ok(true);
            }
            drop(entry);
            self.cache.remove(&key);
        }

        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let allowed = self.check(&api, gvr, namespace, verb).await?;
        if allowed {
            self.cache.insert(key, Instant::now() + self.ttl);
        }
        Ok(allowed)
    }

    async fn check(&self, api: &Api<SelfSubjectAccessReview>, gvr: &Gvr, namespace: &str, verb: &str) -> Result<bool> {
        let review = SelfSubjectAccessReview {
            metadata: Default::default(),
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(namespace.to_string()),
                    group: Some(gvr.group.clone()),
                    resource: Some(gvr.resource.clone()),
                    verb: Some(verb.to_string()),
                    ..Default::default()
                }),
                non_resource_attributes: None,
            },
            status: None,
        };

        let result = api.create(&PostParams::default(), &review).await.map_err(Error::Upstream)?;
        let status: SelfSubjectAccessReviewStatus = result
            .status
            .ok_or_else(|| Error::Internal("SelfSubjectAccessReview response had no status".into()))?;
        Ok(status.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_distinguishes_subjects_and_namespaces() {
        let a = CacheKey {
            subject: Some("token-a".into()),
            namespace: "ns1".into(),
            group: "apps".into(),
            resource: "deployments".into(),
            verb: "list".into(),
        };
        let b = CacheKey {
            subject: Some("token-b".into()),
            ..a.clone()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_distinguishes_list_from_watch() {
        let list = CacheKey {
            subject: None,
            namespace: "ns1".into(),
            group: "apps".into(),
            resource: "deployments".into(),
            verb: "list".into(),
        };
        let watch = CacheKey {
            verb: "watch".into(),
            ..list.clone()
        };
        assert_ne!(list, watch);
    }
}
