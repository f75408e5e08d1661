//! Dispatch guard: refuses collection from policy-restricted platforms.

use std::collections::HashSet;

use url::Url;

use crate::models::SourceType;

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GuardDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Static deny-lists of source types and domains.
///
/// A domain entry matches the host itself and every subdomain of it.
#[derive(Debug, Clone)]
pub struct DispatchGuard {
    denied_types: HashSet<SourceType>,
    denied_domains: Vec<String>,
}

impl Default for DispatchGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchGuard {
    pub fn new() -> Self {
        Self {
            denied_types: [
                SourceType::Twitter,
                SourceType::Facebook,
                SourceType::Linkedin,
                SourceType::Instagram,
                SourceType::Youtube,
                SourceType::GoogleReviews,
                SourceType::Trustpilot,
                SourceType::Tripadvisor,
            ]
            .into_iter()
            .collect(),
            denied_domains: [
                "twitter.com",
                "x.com",
                "facebook.com",
                "fb.com",
                "instagram.com",
                "linkedin.com",
                "telegram.org",
                "telegram.me",
                "telegram.com",
                "t.me",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    pub fn deny_type(mut self, source_type: SourceType) -> Self {
        self.denied_types.insert(source_type);
        self
    }

    pub fn deny_domain(mut self, domain: impl Into<String>) -> Self {
        self.denied_domains.push(domain.into().to_lowercase());
        self
    }

    /// Check a source type and optional target URL against the deny-lists.
    ///
    /// URLs without a scheme are read as `https://`. A URL that does not
    /// parse is judged on its source type alone.
    pub fn validate(&self, source_type: SourceType, target_url: Option<&str>) -> GuardDecision {
        if self.denied_types.contains(&source_type) {
            return GuardDecision::deny(format!("forbidden source type: {source_type}"));
        }

        if let Some(host) = target_url.and_then(Self::host_of)
            && let Some(domain) = self.denied_domains.iter().find(|d| Self::matches(&host, d))
        {
            tracing::debug!(%host, %domain, "Target host matches denied domain");
            return GuardDecision::deny(format!("forbidden domain: {host}"));
        }

        GuardDecision::allow()
    }

    fn host_of(raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = Url::parse(raw)
            .ok()
            .filter(|u| u.host_str().is_some())
            .or_else(|| Url::parse(&format!("https://{raw}")).ok())?;
        parsed
            .host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
    }

    fn matches(host: &str, domain: &str) -> bool {
        host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}
