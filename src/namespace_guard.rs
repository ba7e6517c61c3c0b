//! Pure reduction of a caller-requested namespace against an allow-list.
//!
//! The upstream source modeled "no namespace requested" and "bypass the
//! allow-list entirely" both as sentinel pointer values. Rust has no
//! equivalent footgun-by-convenience, so both are explicit variants here.

use crate::error::{Error, Result};

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceRequest {
    /// No namespace was supplied; fall back to the context's default when unrestricted.
    Default,
    /// An explicit namespace, including the empty string ("all namespaces").
    Named(String),
    /// Bypass the allow-list entirely. Reserved for trusted internal callers.
    Bypass,
}

impl From<Option<String>> for NamespaceRequest {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(ns) => NamespaceRequest::Named(ns),
            None => NamespaceRequest::Default,
        }
    }
}

/// Reduce a requested namespace to a single namespace, honoring `allowed`.
///
/// - `allowed` empty: returns the request (or `default` if none was given).
/// - `allowed` non-empty: the request must be one of `allowed`, or this is
///   forbidden. A request of [`NamespaceRequest::Default`] never matches.
/// - [`NamespaceRequest::Bypass`] always returns the empty string, ignoring `allowed`.
pub fn deref_namespace(allowed: &[String], requested: NamespaceRequest, default: &str) -> Result<String> {
    if requested == NamespaceRequest::Bypass {
        return Ok(String::new());
    }
    if allowed.is_empty() {
        return Ok(match requested {
            NamespaceRequest::Named(ns) => ns,
            NamespaceRequest::Default => default.to_string(),
            NamespaceRequest::Bypass => unreachable!("handled above"),
        });
    }
    match requested {
        NamespaceRequest::Named(ns) if allowed.iter().any(|a| a == &ns) => Ok(ns),
        NamespaceRequest::Named(ns) => Err(Error::Forbidden { requested: ns }),
        NamespaceRequest::Default => Err(Error::Forbidden {
            requested: String::new(),
        }),
        NamespaceRequest::Bypass => unreachable!("handled above"),
    }
}

/// Like [`deref_namespace`], but an empty-string request against a non-empty
/// allow-list expands to the full allow-list instead of being forbidden.
pub fn deref_namespace_to_list(
    allowed: &[String],
    requested: NamespaceRequest,
    default: &str,
) -> Result<Vec<String>> {
    if requested == NamespaceRequest::Bypass {
        return Ok(vec![String::new()]);
    }
    if allowed.is_empty() {
        return Ok(vec![match requested {
            NamespaceRequest::Named(ns) => ns,
            NamespaceRequest::Default => default.to_string(),
            NamespaceRequest::Bypass => unreachable!("handled above"),
        }]);
    }
    match requested {
        NamespaceRequest::Named(ns) if ns.is_empty() => Ok(allowed.to_vec()),
        NamespaceRequest::Named(ns) if allowed.iter().any(|a| a == &ns) => Ok(vec![ns]),
        NamespaceRequest::Named(ns) => Err(Error::Forbidden { requested: ns }),
        NamespaceRequest::Default => Err(Error::Forbidden {
            requested: String::new(),
        }),
        NamespaceRequest::Bypass => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(s: &str) -> NamespaceRequest {
        NamespaceRequest::Named(s.to_string())
    }

    #[test]
    fn empty_allow_list_falls_back_to_default_only_when_unset() {
        assert_eq!(deref_namespace(&[], NamespaceRequest::Default, "d").unwrap(), "d");
        assert_eq!(deref_namespace(&[], named(""), "d").unwrap(), "");
        assert_eq!(deref_namespace(&[], named("x"), "d").unwrap(), "x");
    }

    #[test]
    fn non_empty_allow_list_requires_membership() {
        let allowed = vec!["a".to_string()];
        assert_eq!(deref_namespace(&allowed, named("a"), "d").unwrap(), "a");
        assert!(deref_namespace(&allowed, named("b"), "d").is_err());

        let allowed = vec!["a".to_string(), "b".to_string()];
        assert!(deref_namespace(&allowed, NamespaceRequest::Default, "d").is_err());
    }

    #[test]
    fn bypass_sentinel_always_wins() {
        let allowed = vec!["a".to_string(), "b".to_string()];
        assert_eq!(deref_namespace(&allowed, NamespaceRequest::Bypass, "d").unwrap(), "");
        assert_eq!(
            deref_namespace_to_list(&allowed, NamespaceRequest::Bypass, "d").unwrap(),
            vec!["".to_string()]
        );
    }

    #[test]
    fn to_list_expands_empty_request_against_non_empty_allow_list() {
        let allowed = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            deref_namespace_to_list(&allowed, named(""), "d").unwrap(),
            allowed
        );
        assert_eq!(deref_namespace_to_list(&allowed, named("a"), "d").unwrap(), vec![
            "a".to_string()
        ]);
        assert!(deref_namespace_to_list(&allowed, named("z"), "d").is_err());
    }

    #[test]
    fn to_list_empty_allow_list_matches_scalar_behavior() {
        assert_eq!(deref_namespace_to_list(&[], NamespaceRequest::Default, "d").unwrap(), vec![
            "d".to_string()
        ]);
    }
}
