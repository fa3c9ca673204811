//! Which of an update's declared content URLs to fetch from.

use wsync_metadata::FileUrls;

/// Resolves the URL [`crate::ContentStore::download`] actually requests.
///
/// Both the Microsoft Update CDN URL and the upstream-server-sync URL
/// are preserved on [`FileUrls`]; choosing between them, or rewriting
/// the host entirely (a downstream server redirecting its own clients
/// to its own content root), is a deployment decision this crate takes
/// as configuration rather than deciding unilaterally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRewritePolicy {
    /// Prefer `muUrl`, falling back to `ussUrl`.
    PreferMu,
    /// Prefer `ussUrl`, falling back to `muUrl`.
    PreferUss,
    /// Use the given host, keeping the scheme/path/query of whichever
    /// URL a `PreferMu`-style preference would otherwise have picked.
    HostOverride(String),
}

impl UrlRewritePolicy {
    /// Resolve the URL to fetch for one declared `FileUrls` entry.
    #[must_use]
    pub fn resolve(&self, urls: &FileUrls) -> Option<String> {
        match self {
            Self::PreferMu => urls.mu_url.clone().or_else(|| urls.uss_url.clone()),
            Self::PreferUss => urls.uss_url.clone().or_else(|| urls.mu_url.clone()),
            Self::HostOverride(host) => {
                let base = urls.mu_url.as_deref().or(urls.uss_url.as_deref())?;
                Some(rewrite_host(base, host))
            }
        }
    }
}

fn rewrite_host(base: &str, host: &str) -> String {
    match reqwest::Url::parse(base) {
        Ok(mut url) => {
            let _ = url.set_host(Some(host));
            url.to_string()
        }
        Err(_) => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(mu: Option<&str>, uss: Option<&str>) -> FileUrls {
        FileUrls {
            mu_url: mu.map(str::to_string),
            uss_url: uss.map(str::to_string),
        }
    }

    #[test]
    fn prefer_mu_falls_back_to_uss() {
        let policy = UrlRewritePolicy::PreferMu;
        assert_eq!(
            policy.resolve(&urls(Some("https://mu.example/a"), Some("https://uss.example/a"))),
            Some("https://mu.example/a".to_string())
        );
        assert_eq!(
            policy.resolve(&urls(None, Some("https://uss.example/a"))),
            Some("https://uss.example/a".to_string())
        );
    }

    #[test]
    fn host_override_rewrites_host_only() {
        let policy = UrlRewritePolicy::HostOverride("content.internal".to_string());
        let resolved = policy
            .resolve(&urls(Some("https://mu.example/path/file.cab?x=1"), None))
            .unwrap();
        assert_eq!(resolved, "https://content.internal/path/file.cab?x=1");
    }

    #[test]
    fn no_urls_resolves_to_none() {
        assert_eq!(UrlRewritePolicy::PreferMu.resolve(&urls(None, None)), None);
    }
}
