pub mod classify;
pub mod crawl;
pub mod data;
pub mod error;
pub mod normalize;
pub mod provider;
pub mod resource;

pub use classify::{NormalizerTarget, classify};
pub use error::{NormalizationError, ProviderError};
pub use normalize::{DefaultResourceNormalizer, NormalizedRecord, ResourceNormalizer};
pub use provider::{CrawlerDataProvider, Provision};
pub use resource::{ContextDefinition, Element, FetchedResource, ResourceMeta};
