// Provider options and the validated, immutable crawl configuration built from them

use crate::error::{CrawlError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use url::Url;

pub const DEFAULT_MAX_LINK_DEPTH: usize = 15;

pub const DEFAULT_CORE_INVALID_LINKS: &str = r"@.*\.(js|JS|gif|GIF|jpg|JPG|png|PNG|ico|ICO|eps|jpeg|JPEG|bmp|BMP|css|CSS|sit|wmf|zip|ppt|mpg|xls|gz|rpm|tgz|mov|MOV|exe|mp3|MP3|kmz|gpx|kml|swf|SWF)$@";

/// Delimiters accepted around PCRE-style patterns, e.g. `@...@` or `/.../i`.
const PATTERN_DELIMITERS: [char; 6] = ['/', '@', '#', '~', '!', '%'];

const PCRE_MODIFIERS: &str = "imsxuUXJADSn";

/// Which kind of crawl a configuration is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Follow links from a seed URL
    Full,
    /// Fetch exactly one `host` + `path` locator
    Single,
}

/// Raw provider options, as read from a config file or built by a caller.
///
/// Grouped the same way the options are consumed: `always` applies to every
/// crawl, `full_dispatch` to seeded crawls and `single_dispatch` to
/// single-resource provisioning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOptions {
    pub always: AlwaysOptions,
    pub full_dispatch: FullDispatchOptions,
    pub single_dispatch: SingleDispatchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlwaysOptions {
    pub own_host_only: bool,
    pub allow_subdomains: bool,
    pub allow_query_in_url: bool,
    pub allow_hash_in_url: bool,
    pub allowed_mime_types: Vec<String>,
    pub allowed_schemes: Vec<String>,
    pub content_max_size: u64,
    pub core_invalid_links: String,
}

impl Default for AlwaysOptions {
    fn default() -> Self {
        Self {
            own_host_only: false,
            allow_subdomains: false,
            allow_query_in_url: false,
            allow_hash_in_url: false,
            allowed_mime_types: vec!["text/html".to_string(), "application/pdf".to_string()],
            allowed_schemes: vec!["http".to_string()],
            content_max_size: 0,
            core_invalid_links: DEFAULT_CORE_INVALID_LINKS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullDispatchOptions {
    pub seed: Option<String>,
    pub valid_links: Vec<String>,
    pub user_invalid_links: Vec<String>,
    pub max_link_depth: usize,
    pub max_crawl_limit: usize,
}

impl Default for FullDispatchOptions {
    fn default() -> Self {
        Self {
            seed: None,
            valid_links: Vec::new(),
            user_invalid_links: Vec::new(),
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
            max_crawl_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleDispatchOptions {
    pub host: Option<String>,
    pub path: Option<String>,
}

/// Validated crawl configuration. Built once per crawl and shared read-only.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub mode: DispatchMode,
    pub own_host_only: bool,
    pub allow_subdomains: bool,
    pub allow_query_in_url: bool,
    pub allow_hash_in_url: bool,
    pub allowed_mime_types: Vec<String>,
    pub allowed_schemes: Vec<String>,
    /// 0 means unbounded
    pub content_max_size: u64,
    pub core_invalid_links: Regex,
    pub valid_links: Vec<Regex>,
    pub user_invalid_links: Vec<Regex>,
    pub max_link_depth: usize,
    /// 0 means unbounded
    pub max_crawl_limit: usize,
    pub seed: Option<Url>,
    pub host: Option<Url>,
    pub path: Option<String>,
}

impl CrawlConfig {
    pub fn from_options(options: &ProviderOptions, mode: DispatchMode) -> Result<Self> {
        let always = &options.always;
        let full = &options.full_dispatch;
        let single = &options.single_dispatch;

        let allowed_schemes: Vec<String> = always
            .allowed_schemes
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed_schemes.is_empty() {
            return Err(CrawlError::Configuration(
                "allowed_schemes must contain at least one scheme".to_string(),
            ));
        }

        if always.core_invalid_links.trim().is_empty() {
            return Err(CrawlError::Configuration(
                "core_invalid_links must not be empty".to_string(),
            ));
        }

        let allowed_mime_types = always
            .allowed_mime_types
            .iter()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        let mut config = CrawlConfig {
            mode,
            own_host_only: always.own_host_only,
            allow_subdomains: always.allow_subdomains,
            allow_query_in_url: always.allow_query_in_url,
            allow_hash_in_url: always.allow_hash_in_url,
            allowed_mime_types,
            allowed_schemes,
            content_max_size: always.content_max_size,
            core_invalid_links: compile_pattern(&always.core_invalid_links)?,
            valid_links: compile_patterns(&full.valid_links)?,
            user_invalid_links: compile_patterns(&full.user_invalid_links)?,
            max_link_depth: full.max_link_depth,
            max_crawl_limit: full.max_crawl_limit,
            seed: None,
            host: None,
            path: single.path.clone(),
        };

        match mode {
            DispatchMode::Full => {
                let seed = full.seed.as_deref().ok_or_else(|| {
                    CrawlError::Configuration("option \"seed\" is required for a full crawl".to_string())
                })?;
                config.seed = Some(config.validate_locator("seed", seed)?);
            }
            DispatchMode::Single => {
                let host = single.host.as_deref().ok_or_else(|| {
                    CrawlError::Configuration(
                        "option \"host\" is required for single dispatch".to_string(),
                    )
                })?;
                config.host = Some(config.validate_locator("host", host)?);
            }
        }

        Ok(config)
    }

    /// Host every followed link is scoped against: the seed host for a full
    /// crawl, the configured host for single dispatch.
    pub fn scope_host(&self) -> Option<&str> {
        self.seed
            .as_ref()
            .or(self.host.as_ref())
            .and_then(|u| u.host_str())
    }

    pub fn is_scheme_allowed(&self, scheme: &str) -> bool {
        self.allowed_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }

    /// Resolve the single-resource locator from `host` and `path`.
    pub fn single_target(&self) -> Result<Url> {
        let host = self.host.as_ref().ok_or_else(|| {
            CrawlError::Configuration("option \"host\" is required for single dispatch".to_string())
        })?;
        let path = self.path.as_deref().ok_or_else(|| {
            CrawlError::Configuration(
                "resource option \"path\" must be set to provide single data".to_string(),
            )
        })?;

        host.join(path)
            .map_err(|e| CrawlError::InvalidUrl(format!("{}{}: {}", host, path, e)))
    }

    fn validate_locator(&self, option: &str, raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim())
            .map_err(|e| CrawlError::InvalidUrl(format!("{} '{}': {}", option, raw, e)))?;

        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(CrawlError::InvalidUrl(format!(
                "{} '{}' is not an absolute URL",
                option, raw
            )));
        }
        if !self.is_scheme_allowed(url.scheme()) {
            return Err(CrawlError::Configuration(format!(
                "{} '{}' uses scheme '{}' which is not in allowed_schemes",
                option,
                raw,
                url.scheme()
            )));
        }

        Ok(url)
    }
}

/// Compile a link pattern. PCRE-style delimiters are stripped and a trailing
/// flag group (`i`, `m`, `s`, `x`) becomes an inline flag.
pub fn compile_pattern(raw: &str) -> Result<Regex> {
    let body = strip_delimiters(raw.trim());
    Regex::new(&body)
        .map_err(|e| CrawlError::Configuration(format!("invalid pattern '{}': {}", raw, e)))
}

fn compile_patterns(raw: &[String]) -> Result<Vec<Regex>> {
    raw.iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| compile_pattern(p))
        .collect()
}

fn strip_delimiters(pattern: &str) -> Cow<'_, str> {
    let Some(first) = pattern.chars().next() else {
        return Cow::Borrowed(pattern);
    };
    if !PATTERN_DELIMITERS.contains(&first) {
        return Cow::Borrowed(pattern);
    }

    let Some(end) = pattern.rfind(first) else {
        return Cow::Borrowed(pattern);
    };
    if end == 0 {
        return Cow::Borrowed(pattern);
    }

    let flags = &pattern[end + first.len_utf8()..];
    if !flags.chars().all(|c| PCRE_MODIFIERS.contains(c)) {
        return Cow::Borrowed(pattern);
    }

    let body = &pattern[first.len_utf8()..end];
    let inline: String = flags
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if inline.is_empty() {
        Cow::Borrowed(body)
    } else {
        Cow::Owned(format!("(?{}){}", inline, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_options(seed: &str) -> ProviderOptions {
        let mut options = ProviderOptions::default();
        options.full_dispatch.seed = Some(seed.to_string());
        options
    }

    #[test]
    fn test_defaults_match_provider_defaults() {
        let options = ProviderOptions::default();
        assert!(!options.always.own_host_only);
        assert_eq!(options.always.allowed_schemes, vec!["http"]);
        assert_eq!(
            options.always.allowed_mime_types,
            vec!["text/html", "application/pdf"]
        );
        assert_eq!(options.full_dispatch.max_link_depth, 15);
        assert_eq!(options.full_dispatch.max_crawl_limit, 0);
    }

    #[test]
    fn test_full_config_requires_seed() {
        let err = CrawlConfig::from_options(&ProviderOptions::default(), DispatchMode::Full)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("seed"));
    }

    #[test]
    fn test_full_config_rejects_relative_seed() {
        let err = CrawlConfig::from_options(&full_options("/relative/path"), DispatchMode::Full)
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl(_)));
    }

    #[test]
    fn test_full_config_rejects_disallowed_seed_scheme() {
        let err = CrawlConfig::from_options(&full_options("https://example.com"), DispatchMode::Full)
            .unwrap_err();
        assert!(matches!(err, CrawlError::Configuration(_)));
    }

    #[test]
    fn test_full_config_scope_host() {
        let config =
            CrawlConfig::from_options(&full_options("http://Example.com/start"), DispatchMode::Full)
                .unwrap();
        assert_eq!(config.scope_host(), Some("example.com"));
    }

    #[test]
    fn test_single_config_requires_host() {
        let err = CrawlConfig::from_options(&ProviderOptions::default(), DispatchMode::Single)
            .unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_single_target_joins_host_and_path() {
        let mut options = ProviderOptions::default();
        options.single_dispatch.host = Some("http://example.com".to_string());
        options.single_dispatch.path = Some("/en/about".to_string());
        let config = CrawlConfig::from_options(&options, DispatchMode::Single).unwrap();

        assert_eq!(
            config.single_target().unwrap().as_str(),
            "http://example.com/en/about"
        );
    }

    #[test]
    fn test_single_target_without_path() {
        let mut options = ProviderOptions::default();
        options.single_dispatch.host = Some("http://example.com".to_string());
        let config = CrawlConfig::from_options(&options, DispatchMode::Single).unwrap();

        assert!(config.single_target().unwrap_err().is_configuration());
    }

    #[test]
    fn test_empty_schemes_rejected() {
        let mut options = full_options("http://example.com");
        options.always.allowed_schemes.clear();
        assert!(CrawlConfig::from_options(&options, DispatchMode::Full).is_err());
    }

    #[test]
    fn test_compile_pattern_strips_delimiters() {
        let re = compile_pattern("@.*\\.(zip|exe)$@").unwrap();
        assert!(re.is_match("http://example.com/setup.exe"));
        assert!(!re.is_match("http://example.com/page"));
    }

    #[test]
    fn test_compile_pattern_case_insensitive_flag() {
        let re = compile_pattern("/\\/BLOG\\//i").unwrap();
        assert!(re.is_match("http://example.com/blog/post"));
    }

    #[test]
    fn test_compile_pattern_plain_regex() {
        let re = compile_pattern(".*\\.pdf$").unwrap();
        assert!(re.is_match("http://example.com/doc.pdf"));
    }

    #[test]
    fn test_compile_pattern_group_not_treated_as_delimiter() {
        let re = compile_pattern("(foo)|(bar)").unwrap();
        assert!(re.is_match("http://example.com/bar"));
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let mut options = full_options("http://example.com");
        options.full_dispatch.valid_links = vec!["([unclosed".to_string()];
        let err = CrawlConfig::from_options(&options, DispatchMode::Full).unwrap_err();
        assert!(matches!(err, CrawlError::Configuration(_)));
    }

    #[test]
    fn test_partial_options_keep_defaults() {
        let options: ProviderOptions = serde_json::from_str(
            r#"{"always": {"own_host_only": true}, "full_dispatch": {"seed": "http://example.com", "max_crawl_limit": 20}}"#,
        )
        .unwrap();
        assert!(options.always.own_host_only);
        assert_eq!(options.always.allowed_schemes, vec!["http"]);
        assert_eq!(options.full_dispatch.max_crawl_limit, 20);
        assert_eq!(options.full_dispatch.max_link_depth, 15);
    }
}
