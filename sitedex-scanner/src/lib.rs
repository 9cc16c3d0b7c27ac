pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod pdf;
pub mod result;
pub mod state;

pub use config::{CrawlConfig, DispatchMode, ProviderOptions};
pub use crawler::{CancelFlag, CrawlSession, SessionState};
pub use error::{CrawlError, FetchError, StateError};
pub use fetcher::{Fetcher, HttpFetcher, TextExtractor};
pub use filter::LinkFilter;
pub use pdf::PdfTextExtractor;
pub use result::{BinaryDocument, CrawlStats, HtmlPage, SpiderResource};
pub use state::{CrawlStateStore, MemoryStateStore};
