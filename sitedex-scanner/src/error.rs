use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Crawl session failed: {0}")]
    Session(String),

    #[error("Crawl state error: {0}")]
    State(#[from] StateError),
}

impl CrawlError {
    /// Configuration and URL errors are raised before any crawl work starts.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CrawlError::Configuration(_) | CrawlError::InvalidUrl(_))
    }
}

/// Failure to fetch a single frontier entry. Never fatal on its own.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Host unreachable for {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Text extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },
}

impl FetchError {
    /// True when the fetch layer itself could not be reached, as opposed to a
    /// single resource answering badly.
    pub fn is_unreachable(&self) -> bool {
        match self {
            FetchError::Unreachable { .. } => true,
            FetchError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("State store lock poisoned")]
    Poisoned,
}

impl StateError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StateError::Backend(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
