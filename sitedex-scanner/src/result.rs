use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A resource fetched by the spider. Never mutated once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SpiderResource {
    Html(HtmlPage),
    Binary(BinaryDocument),
}

impl SpiderResource {
    pub fn url(&self) -> &str {
        match self {
            SpiderResource::Html(page) => &page.url,
            SpiderResource::Binary(doc) => &doc.url,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            SpiderResource::Html(page) => page.content_type.as_deref(),
            SpiderResource::Binary(doc) => Some(&doc.content_type),
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            SpiderResource::Html(page) => Some(page.body.len() as u64),
            SpiderResource::Binary(doc) => Some(doc.size),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            SpiderResource::Html(page) => page.depth,
            SpiderResource::Binary(doc) => doc.depth,
        }
    }

    pub(crate) fn set_depth(&mut self, depth: usize) {
        match self {
            SpiderResource::Html(page) => page.depth = depth,
            SpiderResource::Binary(doc) => doc.depth = depth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlPage {
    pub url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub response_time: Duration,
    pub fetched_at: DateTime<Utc>,
    pub depth: usize,
}

impl HtmlPage {
    pub fn new(url: String, body: String) -> Self {
        Self {
            url,
            status_code: 200,
            content_type: Some("text/html".to_string()),
            headers: BTreeMap::new(),
            body,
            response_time: Duration::from_secs(0),
            fetched_at: Utc::now(),
            depth: 0,
        }
    }
}

/// Non-HTML payload. Text extraction (e.g. for PDFs) is done by the fetch
/// layer; `extracted_text` is `None` when nothing could be extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryDocument {
    pub url: String,
    pub status_code: u16,
    pub content_type: String,
    pub size: u64,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub extracted_text: Option<String>,
    pub page_count: Option<u32>,
    pub title: Option<String>,
    pub response_time: Duration,
    pub fetched_at: DateTime<Utc>,
    pub depth: usize,
}

impl BinaryDocument {
    pub fn new(url: String, content_type: String, body: Vec<u8>) -> Self {
        Self {
            url,
            status_code: 200,
            content_type,
            size: body.len() as u64,
            body,
            extracted_text: None,
            page_count: None,
            title: None,
            response_time: Duration::from_secs(0),
            fetched_at: Utc::now(),
            depth: 0,
        }
    }
}

/// Unit of work in the crawl frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub canonical: String,
    pub depth: usize,
    pub parent: Option<String>,
}

/// Counters reported when a session finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    /// Resources fetched successfully, including ones dropped by the content filter
    pub fetched: usize,
    pub failed: usize,
    /// Fetched but rejected by the content filter
    pub filtered: usize,
    /// Links queued for crawling
    pub discovered: usize,
    /// Links rejected by the link filter
    pub rejected: usize,
    /// Links already seen or already claimed
    pub duplicates: usize,
}
