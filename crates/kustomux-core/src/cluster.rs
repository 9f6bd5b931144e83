//! Cluster endpoint identifiers and operator-supplied mappings.
//!
//! A cluster is addressed everywhere by its normalized URL; normalization is
//! idempotent and is the only key used to identify an endpoint.

use serde::{Deserialize, Serialize};

use crate::error::{KustomuxError, KustomuxResult};

/// Normalize a cluster URL into the canonical endpoint key.
///
/// Trims surrounding whitespace, lower-cases, strips trailing slashes, and
/// prepends `https://` when no scheme is present. Applying it twice yields
/// the same string.
pub fn normalize_cluster_url(raw: &str) -> String {
    let mut url = raw.trim().to_lowercase();
    while url.ends_with('/') {
        url.pop();
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("https://{url}");
    }
    url
}

/// One operator-supplied `(cluster URL, identity)` pair.
///
/// The identity is an opaque credential hint passed through to the child
/// process environment; it may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMapping {
    pub url: String,
    pub identity: String,
}

impl ClusterMapping {
    /// Parse a `--mapping` value of the form `URL=IDENTITY` or bare `URL`.
    ///
    /// The value is split at the first `=`; everything after it (including
    /// further `=` characters) is the identity. The URL part is normalized.
    pub fn parse(raw: &str) -> KustomuxResult<Self> {
        let (url_part, identity) = match raw.find('=') {
            Some(idx) => (&raw[..idx], raw[idx + 1..].to_string()),
            None => (raw, String::new()),
        };

        if url_part.trim().is_empty() {
            return Err(KustomuxError::Config(format!(
                "mapping '{raw}' has an empty cluster URL"
            )));
        }

        Ok(Self {
            url: normalize_cluster_url(url_part),
            identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_keeps_scheme() {
        assert_eq!(
            normalize_cluster_url("https://MyCluster.Kusto.Windows.Net"),
            "https://mycluster.kusto.windows.net"
        );
    }

    #[test]
    fn test_normalize_strips_trailing_slash() {
        assert_eq!(
            normalize_cluster_url("https://mycluster.kusto.windows.net/"),
            "https://mycluster.kusto.windows.net"
        );
    }

    #[test]
    fn test_normalize_prepends_https() {
        assert_eq!(
            normalize_cluster_url("mycluster.kusto.windows.net"),
            "https://mycluster.kusto.windows.net"
        );
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(
            normalize_cluster_url("  https://mycluster.kusto.windows.net  "),
            "https://mycluster.kusto.windows.net"
        );
    }

    #[test]
    fn test_normalize_preserves_http_scheme() {
        assert_eq!(normalize_cluster_url("http://x"), "http://x");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in [
            "https://MyCluster.Kusto.Windows.Net",
            "mycluster.kusto.windows.net/",
            "  http://x/  ",
        ] {
            let once = normalize_cluster_url(raw);
            assert_eq!(normalize_cluster_url(&once), once);
        }
    }

    #[test]
    fn test_parse_url_and_identity() {
        let m = ClusterMapping::parse("https://c.example=/sub/rg/id=with=equals").unwrap();
        assert_eq!(m.url, "https://c.example");
        assert_eq!(m.identity, "/sub/rg/id=with=equals");
    }

    #[test]
    fn test_parse_bare_url_has_empty_identity() {
        let m = ClusterMapping::parse("https://c.example").unwrap();
        assert_eq!(m.url, "https://c.example");
        assert_eq!(m.identity, "");
    }

    #[test]
    fn test_parse_empty_url_is_error() {
        let err = ClusterMapping::parse("=/some").unwrap_err();
        assert!(matches!(err, KustomuxError::Config(_)));
    }

    #[test]
    fn test_parse_normalizes_url() {
        let m = ClusterMapping::parse("MyCluster.Kusto.Windows.Net/=id").unwrap();
        assert_eq!(m.url, "https://mycluster.kusto.windows.net");
        assert_eq!(m.identity, "id");
    }
}
