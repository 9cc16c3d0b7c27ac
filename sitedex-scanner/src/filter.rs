// Link-following policy, post-fetch content filter and canonical URLs

use crate::config::CrawlConfig;
use std::sync::Arc;
use url::Url;

/// The first rule a URL failed in [`LinkFilter::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unparseable,
    Scheme,
    Query,
    Fragment,
    CoreInvalid,
    UserInvalid,
    NotAllowlisted,
    Host,
    Depth,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Unparseable => "unparseable",
            Rejection::Scheme => "scheme",
            Rejection::Query => "query",
            Rejection::Fragment => "fragment",
            Rejection::CoreInvalid => "core_invalid",
            Rejection::UserInvalid => "user_invalid",
            Rejection::NotAllowlisted => "not_allowlisted",
            Rejection::Host => "host",
            Rejection::Depth => "depth",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkFilter {
    config: Arc<CrawlConfig>,
}

impl LinkFilter {
    pub fn new(config: Arc<CrawlConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn should_follow(&self, url: &str, current_depth: usize) -> bool {
        self.check(url, current_depth).is_ok()
    }

    /// Apply the link rules in order and report the first one that fails.
    pub fn check(&self, url: &str, current_depth: usize) -> Result<(), Rejection> {
        let config = &*self.config;
        let parsed = Url::parse(url).map_err(|_| Rejection::Unparseable)?;

        if !config.is_scheme_allowed(parsed.scheme()) {
            return Err(Rejection::Scheme);
        }
        if !config.allow_query_in_url && parsed.query().is_some() {
            return Err(Rejection::Query);
        }
        if !config.allow_hash_in_url && parsed.fragment().is_some() {
            return Err(Rejection::Fragment);
        }
        if config.core_invalid_links.is_match(url) {
            return Err(Rejection::CoreInvalid);
        }
        if config.user_invalid_links.iter().any(|re| re.is_match(url)) {
            return Err(Rejection::UserInvalid);
        }
        if !config.valid_links.is_empty() && !config.valid_links.iter().any(|re| re.is_match(url)) {
            return Err(Rejection::NotAllowlisted);
        }
        if !self.host_in_scope(&parsed) {
            return Err(Rejection::Host);
        }
        if current_depth > config.max_link_depth {
            return Err(Rejection::Depth);
        }

        Ok(())
    }

    /// Post-fetch filter on the response's content type and size.
    pub fn accepts_content(&self, content_type: Option<&str>, size: Option<u64>) -> bool {
        let config = &*self.config;

        if !config.allowed_mime_types.is_empty() {
            let Some(essence) = content_type.map(mime_essence) else {
                return false;
            };
            if !config.allowed_mime_types.iter().any(|m| *m == essence) {
                return false;
            }
        }

        if config.content_max_size > 0
            && let Some(size) = size
            && size > config.content_max_size
        {
            return false;
        }

        true
    }

    fn host_in_scope(&self, url: &Url) -> bool {
        let config = &*self.config;
        if !config.own_host_only && !config.allow_subdomains {
            return true;
        }

        let (Some(host), Some(scope)) = (url.host_str(), config.scope_host()) else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let scope = scope.to_ascii_lowercase();

        if config.own_host_only {
            return host == scope;
        }

        host == scope || host.ends_with(&format!(".{}", scope))
    }
}

/// Lowercased `type/subtype` without parameters.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Dedup key for a URL: scheme, lowercased host, non-default port and path
/// without a trailing slash. Query and fragment are not part of the key.
pub fn canonicalize(url: &Url) -> String {
    let mut key = String::with_capacity(url.as_str().len());
    key.push_str(url.scheme());
    key.push_str("://");

    if let Some(host) = url.host_str() {
        key.push_str(&host.to_ascii_lowercase());
    }
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }

    let path = url.path().trim_end_matches('/');
    if path.is_empty() {
        key.push('/');
    } else {
        key.push_str(path);
    }

    key
}
