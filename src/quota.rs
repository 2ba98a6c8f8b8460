use std::collections::HashMap;
use url::Url;

/// Outcome of asking the quota for room on a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The page was counted against its domain
    Admitted,
    /// The domain is full, or the URL has no usable domain
    Exceeded,
}

impl QuotaDecision {
    pub fn is_admitted(self) -> bool {
        matches!(self, QuotaDecision::Admitted)
    }
}

/// Per-domain page counter with a fixed ceiling
#[derive(Debug)]
pub struct DomainQuota {
    max_per_domain: usize,
    counts: HashMap<String, usize>,
}

impl DomainQuota {
    pub fn new(max_per_domain: usize) -> Self {
        Self {
            max_per_domain,
            counts: HashMap::new(),
        }
    }

    /// Count `url` against its domain if there is room.
    ///
    /// Mutates state only on the admitted path, so each URL must be offered once.
    pub fn admit(&mut self, url: &str) -> QuotaDecision {
        let Some(domain) = domain_of(url) else {
            ::log::debug!("No domain for {}, treating as over quota", url);
            return QuotaDecision::Exceeded;
        };

        let count = self.counts.entry(domain).or_insert(0);
        if *count < self.max_per_domain {
            *count += 1;
            QuotaDecision::Admitted
        } else {
            QuotaDecision::Exceeded
        }
    }

    /// Pages admitted so far for `domain`
    pub fn count(&self, domain: &str) -> usize {
        self.counts.get(domain).copied().unwrap_or(0)
    }

    pub fn max_per_domain(&self) -> usize {
        self.max_per_domain
    }
}

/// Authority of a URL (host, plus port when one is given)
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim();
    if host.is_empty() {
        return None;
    }

    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
