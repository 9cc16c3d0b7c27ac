// Fetch layer: network I/O, link extraction and binary text extraction

use crate::error::FetchError;
use crate::filter::mime_essence;
use crate::result::{BinaryDocument, HtmlPage, SpiderResource};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// A fetched resource plus the absolute links found in it.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub resource: SpiderResource,
    pub links: Vec<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: Option<u32>,
    pub title: Option<String>,
}

/// Turns a binary payload (e.g. a PDF) into text.
pub trait TextExtractor: Send + Sync {
    fn supports(&self, content_type: &str) -> bool;

    fn extract(&self, url: &str, body: &[u8]) -> Result<ExtractedText, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("sitedex/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs((timeout_secs / 2).max(1)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            extractor: None,
        })
    }

    pub fn with_text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn binary_document(
        &self,
        url: &str,
        status_code: u16,
        content_type: String,
        body: Vec<u8>,
        response_time: Duration,
    ) -> BinaryDocument {
        let mut doc = BinaryDocument::new(url.to_string(), content_type, body);
        doc.status_code = status_code;
        doc.response_time = response_time;

        let essence = mime_essence(&doc.content_type);
        if let Some(extractor) = self.extractor.as_ref()
            && extractor.supports(&essence)
        {
            match extractor.extract(url, &doc.body) {
                Ok(extracted) => {
                    doc.extracted_text = Some(extracted.text);
                    doc.page_count = extracted.page_count;
                    doc.title = extracted.title;
                }
                Err(e) => warn!("Text extraction failed for {}: {}", url, e),
            }
        }

        doc
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        debug!("Fetching {}", url);

        let start = Instant::now();
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_connect() {
                FetchError::Unreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            } else {
                FetchError::Http(e)
            }
        })?;
        let response_time = start.elapsed();

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status_code,
            });
        }

        let final_url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let content_type = headers.get("content-type").cloned();

        let is_html = content_type
            .as_deref()
            .map(|ct| mime_essence(ct) == "text/html")
            .unwrap_or(false);

        if is_html {
            let body = response.text().await?;
            let links = extract_links(&body, &final_url)?;

            let page = HtmlPage {
                url: final_url,
                status_code,
                content_type,
                headers,
                body,
                response_time,
                fetched_at: Utc::now(),
                depth: 0,
            };
            return Ok(FetchOutcome {
                resource: SpiderResource::Html(page),
                links,
            });
        }

        let body = response.bytes().await?.to_vec();
        let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
        let doc = self.binary_document(&final_url, status_code, content_type, body, response_time);

        Ok(FetchOutcome {
            resource: SpiderResource::Binary(doc),
            links: Vec::new(),
        })
    }
}

/// Absolute URLs of every `a[href]` in the document, in document order.
pub fn extract_links(html: &str, current_url: &str) -> Result<Vec<String>, FetchError> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").map_err(|e| FetchError::Malformed {
        url: current_url.to_string(),
        reason: e.to_string(),
    })?;

    let links = document
        .select(&link_selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_url(current_url, href))
        .collect();

    Ok(links)
}

fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    // Skip empty, javascript:, mailto:, tel:
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let resolved = base_url.join(href).ok()?;
    Some(resolved.to_string())
}
