// Tests for the crawler data provider lifecycle

use async_trait::async_trait;
use sitedex_core::normalize::RecordKind;
use sitedex_core::provider::CrawlerDataProvider;
use sitedex_core::resource::{
    Asset, ContextDefinition, DataObject, Element, FetchedResource, OtherElement, Page,
    ResourceMeta,
};
use sitedex_scanner::config::ProviderOptions;
use sitedex_scanner::error::FetchError;
use sitedex_scanner::fetcher::{FetchOutcome, Fetcher, HttpFetcher};
use sitedex_scanner::pdf::PdfTextExtractor;
use sitedex_scanner::result::{HtmlPage, SpiderResource};
use sitedex_scanner::state::{CrawlStateStore, MemoryStateStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves an endless chain of pages: /n links to /n+1 and /n+2.
struct ChainFetcher {
    calls: AtomicUsize,
    delay: Duration,
}

impl ChainFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ChainFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let n: usize = url.path().trim_start_matches('/').parse().unwrap_or(0);
        let links = vec![
            format!("http://example.com/{}", n + 1),
            format!("http://example.com/{}", n + 2),
        ];
        Ok(FetchOutcome {
            resource: SpiderResource::Html(HtmlPage::new(
                url.to_string(),
                format!("<html><head><title>Page {}</title></head><body>page {}</body></html>", n, n),
            )),
            links,
        })
    }
}

fn ctx() -> ContextDefinition {
    ContextDefinition::new("website")
}

fn full_options(seed: &str) -> ProviderOptions {
    let mut options = ProviderOptions::default();
    options.full_dispatch.seed = Some(seed.to_string());
    options
}

// ============================================================================
// Full Provisioning Tests
// ============================================================================

#[tokio::test]
async fn test_provide_all_normalizes_crawled_pages() {
    let mock_server = MockServer::start().await;

    let root = format!(
        r#"<html><head><title>Home</title></head><body>
            <p>Welcome</p>
            <a href="{0}/docs">Docs</a>
            <a href="{0}/report.pdf">Report</a>
            <a href="{0}/logo.png">Logo</a>
        </body></html>"#,
        mock_server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_bytes(root.as_bytes()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_bytes(b"<html><head><title>Docs</title></head><body>Read me</body></html>"),
        )
        .mount(&mock_server)
        .await;
    // No text extractor is configured, so this PDF is dropped by the normalizer
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.4".to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStateStore::new());
    let provider = CrawlerDataProvider::new(
        full_options(&mock_server.uri()),
        Arc::new(HttpFetcher::new().unwrap()),
        store.clone(),
    )
    .with_workers(2);

    provider.warm_up(&ctx()).unwrap();
    let provision = provider.provide_all(&ctx()).await.unwrap();

    let titles: Vec<&str> = provision
        .records
        .iter()
        .map(|r| r.meta.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Home", "Docs"]);
    assert!(provision.records.iter().all(|r| r.meta.kind == RecordKind::Html));
    assert_eq!(provision.stats.fetched, 3);
    assert!(!provision.cancelled);
    assert_eq!(store.progress_len().unwrap(), 3);

    provider.cool_down(&ctx()).unwrap();
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn test_provide_all_respects_crawl_limit() {
    let fetcher = Arc::new(ChainFetcher::new(Duration::from_millis(1)));
    let mut options = full_options("http://example.com/0");
    options.full_dispatch.max_crawl_limit = 5;

    let provider =
        CrawlerDataProvider::new(options, fetcher.clone(), Arc::new(MemoryStateStore::new()))
            .with_workers(3);
    let provision = provider.provide_all(&ctx()).await.unwrap();

    assert_eq!(provision.records.len(), 5);
    assert_eq!(fetcher.calls(), 5);
}

#[tokio::test]
async fn test_provide_all_with_invalid_options_is_configuration_error() {
    let fetcher = Arc::new(ChainFetcher::new(Duration::ZERO));
    let mut options = full_options("http://example.com/");
    options.full_dispatch.user_invalid_links = vec!["([broken".to_string()];

    let provider = CrawlerDataProvider::new(options, fetcher.clone(), Arc::new(MemoryStateStore::new()));
    let err = provider.provide_all(&ctx()).await.unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_provide_all_without_seed_is_configuration_error() {
    let provider = CrawlerDataProvider::new(
        ProviderOptions::default(),
        Arc::new(ChainFetcher::new(Duration::ZERO)),
        Arc::new(MemoryStateStore::new()),
    );
    assert!(provider.provide_all(&ctx()).await.unwrap_err().is_configuration());
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancel_then_cancelled_shutdown_leaves_store_empty() {
    let fetcher = Arc::new(ChainFetcher::new(Duration::from_millis(20)));
    let store = Arc::new(MemoryStateStore::new());
    let provider = CrawlerDataProvider::new(
        full_options("http://example.com/0"),
        fetcher.clone(),
        store.clone(),
    )
    .with_workers(2);

    provider.warm_up(&ctx()).unwrap();
    let cancel = provider.cancel_handle();
    let context = ctx();

    let (provision, _) = tokio::join!(provider.provide_all(&context), async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
    });
    let provision = provision.unwrap();

    assert!(provision.cancelled);
    assert!(fetcher.calls() > 0);
    assert!(!store.is_empty().unwrap());

    provider.cancelled_shutdown(&ctx()).unwrap();
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn test_warm_up_clears_progress_and_cancel_flag() {
    let store = Arc::new(MemoryStateStore::new());
    store.claim("http://example.com/stale", 2, None).unwrap();

    let provider = CrawlerDataProvider::new(
        full_options("http://example.com/0"),
        Arc::new(ChainFetcher::new(Duration::ZERO)),
        store.clone(),
    );
    provider.cancel_handle().cancel();

    provider.warm_up(&ctx()).unwrap();
    provider.warm_up(&ctx()).unwrap();

    assert_eq!(store.progress_len().unwrap(), 0);
    assert!(!provider.cancel_handle().is_cancelled());
}

#[tokio::test]
async fn test_emergency_shutdown_clears_all_state() {
    let store = Arc::new(MemoryStateStore::new());
    store.claim("http://example.com/a", 0, None).unwrap();
    store.remember_uri("http://example.com/a#top").unwrap();

    let provider = CrawlerDataProvider::new(
        ProviderOptions::default(),
        Arc::new(ChainFetcher::new(Duration::ZERO)),
        store.clone(),
    );
    provider.emergency_shutdown(&ctx()).unwrap();

    assert!(store.is_empty().unwrap());
    assert!(provider.cancel_handle().is_cancelled());
}

// ============================================================================
// Single Provisioning Tests
// ============================================================================

#[tokio::test]
async fn test_provide_single_without_path_fails_without_fetching() {
    let fetcher = Arc::new(ChainFetcher::new(Duration::ZERO));
    let mut options = ProviderOptions::default();
    options.single_dispatch.host = Some("http://example.com".to_string());

    let provider = CrawlerDataProvider::new(options, fetcher.clone(), Arc::new(MemoryStateStore::new()));
    let meta = ResourceMeta {
        resource_type: "spider".to_string(),
        ..Default::default()
    };

    let err = provider.provide_single(&ctx(), &meta).await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_provide_single_without_host_is_configuration_error() {
    let fetcher = Arc::new(ChainFetcher::new(Duration::ZERO));
    let provider = CrawlerDataProvider::new(
        ProviderOptions::default(),
        fetcher.clone(),
        Arc::new(MemoryStateStore::new()),
    );

    let err = provider
        .provide_single(&ctx(), &ResourceMeta::with_path("/7"))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_provide_single_fetches_one_resource() {
    let fetcher = Arc::new(ChainFetcher::new(Duration::ZERO));
    let mut options = ProviderOptions::default();
    options.single_dispatch.host = Some("http://example.com".to_string());

    let provider = CrawlerDataProvider::new(options, fetcher.clone(), Arc::new(MemoryStateStore::new()));
    let provision = provider
        .provide_single(&ctx(), &ResourceMeta::with_path("/7"))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(provision.records.len(), 1);
    assert_eq!(provision.records[0].meta.title, "Page 7");
    assert_eq!(provision.records[0].meta.locator, "http://example.com/7");
}

/// Single page PDF showing `text` in Helvetica, with a valid xref table.
fn one_page_pdf(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 24 Tf 72 720 Td ({}) Tj ET", text);
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_at = pdf.len();
    let mut tail = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        tail.push_str(&format!("{:010} 00000 n \n", offset));
    }
    tail.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    ));
    pdf.extend_from_slice(tail.as_bytes());
    pdf
}

#[tokio::test]
async fn test_provide_single_pdf_with_text_extractor() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/report.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(one_page_pdf("Dividends")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut options = ProviderOptions::default();
    options.single_dispatch.host = Some(mock_server.uri());
    let fetcher = HttpFetcher::new()
        .unwrap()
        .with_text_extractor(Arc::new(PdfTextExtractor::new()));
    let provider =
        CrawlerDataProvider::new(options, Arc::new(fetcher), Arc::new(MemoryStateStore::new()));

    let provision = provider
        .provide_single(&ctx(), &ResourceMeta::with_path("/files/report.pdf"))
        .await
        .unwrap();

    assert_eq!(provision.records.len(), 1);
    let meta = &provision.records[0].meta;
    assert_eq!(meta.kind, RecordKind::Pdf);
    assert_eq!(meta.title, "report.pdf");
    assert_eq!(meta.page_count, Some(1));
    let body: String = meta.body.chars().filter(|c| !c.is_whitespace()).collect();
    assert!(body.contains("Dividends"), "body was {:?}", meta.body);
}

// ============================================================================
// Element Tests
// ============================================================================

#[test]
fn test_validate_untrusted_resource() {
    let provider = CrawlerDataProvider::new(
        ProviderOptions::default(),
        Arc::new(ChainFetcher::new(Duration::ZERO)),
        Arc::new(MemoryStateStore::new()),
    );

    assert!(provider.validate_untrusted_resource(&FetchedResource::Element(Element::Page(
        Page::default()
    ))));
    assert!(provider.validate_untrusted_resource(&FetchedResource::Element(Element::Asset(
        Asset::default()
    ))));
    assert!(provider.validate_untrusted_resource(&FetchedResource::Element(
        Element::DataObject(DataObject::default())
    )));
    assert!(!provider.validate_untrusted_resource(&FetchedResource::Element(
        Element::Other(OtherElement::default())
    )));
}

#[test]
fn test_normalize_resource_uses_context_locale() {
    let provider = CrawlerDataProvider::new(
        ProviderOptions::default(),
        Arc::new(ChainFetcher::new(Duration::ZERO)),
        Arc::new(MemoryStateStore::new()),
    );
    let page = Page {
        id: 3,
        key: "contact".to_string(),
        path: "/contact".to_string(),
        title: Some("Contact".to_string()),
        published: true,
        content: "<p>Call us</p>".to_string(),
        ..Default::default()
    };

    let context = ContextDefinition::new("website").with_default_locale("nl");
    let records = provider
        .normalize_resource(&context, Arc::new(FetchedResource::Element(Element::Page(page))))
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].meta.locale.as_deref(), Some("nl"));
    assert_eq!(records[0].meta.kind, RecordKind::Page);
}
