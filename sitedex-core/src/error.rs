use sitedex_scanner::error::{CrawlError, StateError};
use thiserror::Error;

/// A resource is missing metadata its normalizer requires. The resource is
/// dropped; the crawl continues.
#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("{kind} '{locator}' has no indexable text")]
    EmptyBody { kind: &'static str, locator: String },

    #[error("{kind} '{locator}' is missing {field}")]
    MissingField {
        kind: &'static str,
        locator: String,
        field: &'static str,
    },

    #[error("Failed to parse '{locator}': {reason}")]
    Parse { locator: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Crawl session error: {0}")]
    Session(CrawlError),

    #[error("State store error: {0}")]
    State(#[from] StateError),
}

impl ProviderError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::Configuration(_))
    }
}

impl From<CrawlError> for ProviderError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::Configuration(msg) => ProviderError::Configuration(msg),
            CrawlError::InvalidUrl(msg) => ProviderError::Configuration(msg),
            CrawlError::State(e) => ProviderError::State(e),
            other => ProviderError::Session(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
