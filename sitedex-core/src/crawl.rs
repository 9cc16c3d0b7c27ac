use crate::error::{ProviderError, Result};
use crate::normalize::NormalizedRecord;
use crate::provider::{CrawlerDataProvider, Provision};
use crate::resource::{ContextDefinition, ResourceMeta};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use sitedex_scanner::config::ProviderOptions;
use sitedex_scanner::fetcher::Fetcher;
use sitedex_scanner::result::CrawlStats;
use sitedex_scanner::state::CrawlStateStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};
use url::Url;

/// What a crawl run provisions
#[derive(Debug, Clone)]
pub enum CrawlTarget {
    /// Follow links from the configured seed
    Full,
    /// Fetch the one resource the handle points at
    Single(ResourceMeta),
}

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub provider_options: ProviderOptions,
    pub target: CrawlTarget,
    pub threads: usize,
    pub context: ContextDefinition,
    pub show_progress_bars: bool,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

/// Read provider options from a TOML file. Missing keys keep their defaults.
pub fn load_provider_options(path: &Path) -> Result<ProviderOptions> {
    let content = fs::read_to_string(path).map_err(|e| {
        ProviderError::Configuration(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    parse_provider_options(&content)
        .map_err(|e| ProviderError::Configuration(format!("{}: {}", path.display(), e)))
}

pub fn parse_provider_options(content: &str) -> std::result::Result<ProviderOptions, toml::de::Error> {
    toml::from_str(content)
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Run a full provider lifecycle: warm-up, provisioning, then cool-down, or
/// the matching shutdown when the run was cancelled or failed.
pub async fn execute_crawl(
    options: CrawlOptions,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn CrawlStateStore>,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<Provision> {
    let CrawlOptions {
        provider_options,
        target,
        threads,
        context,
        show_progress_bars,
    } = options;

    // Set up single progress bar for overall crawl progress (only if enabled)
    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Starting crawl...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let processed_count = Arc::new(AtomicUsize::new(0));
    let count_clone = processed_count.clone();
    let pb_clone = progress_bar.clone();
    let fetch_callback = Arc::new(move |depth: usize, url: String| {
        let count = count_clone.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(ref pb) = pb_clone {
            pb.set_message(format!(
                "Crawling... {} fetched, depth {}: {}",
                count,
                depth,
                extract_url_path(&url)
            ));
            pb.tick();
        }
    });

    let provider = CrawlerDataProvider::new(provider_options, fetcher, store)
        .with_workers(threads)
        .with_progress_callback(fetch_callback);

    if let Err(e) = provider.warm_up(&context) {
        if let Some(ref pb) = progress_bar {
            pb.finish_and_clear();
        }
        return Err(e);
    }

    // Ctrl-C cancels cooperatively; in-flight fetches finish
    let cancel = provider.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    if let Some(ref callback) = progress_callback {
        callback(format!("Provisioning context '{}'", context.name));
    }

    let result = match target {
        CrawlTarget::Full => provider.provide_all(&context).await,
        CrawlTarget::Single(ref meta) => provider.provide_single(&context, meta).await,
    };
    interrupt.abort();

    let total = processed_count.load(Ordering::Relaxed);
    match result {
        Ok(provision) => {
            let shutdown = if provision.cancelled {
                provider.cancelled_shutdown(&context)
            } else {
                provider.cool_down(&context)
            };

            if let Some(ref pb) = progress_bar {
                if provision.cancelled {
                    pb.finish_with_message(format!("Crawl cancelled after {} fetches", total));
                } else {
                    pb.finish_with_message(format!("Crawl complete! {} URLs processed", total));
                }
            }
            shutdown?;

            info!(
                "Provisioned {} records from {} fetched resources",
                provision.records.len(),
                provision.stats.fetched
            );
            Ok(provision)
        }
        Err(e) => {
            // Fatal session errors already ran the emergency cleanup
            if e.is_configuration()
                && let Err(cleanup) = provider.emergency_shutdown(&context)
            {
                warn!("Cleanup failed: {}", cleanup);
            }
            if let Some(ref pb) = progress_bar {
                pb.finish_and_clear();
            }
            if let Some(ref callback) = progress_callback {
                callback(format!("[!]  Crawl failed: {}", e));
            }
            Err(e)
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    stats: &'a CrawlStats,
    records: &'a [NormalizedRecord],
}

/// Render records as a human readable summary or as JSON
pub fn generate_record_report(
    records: &[NormalizedRecord],
    stats: &CrawlStats,
    format: ReportFormat,
) -> std::result::Result<String, serde_json::Error> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&JsonReport { stats, records }),
        ReportFormat::Text => Ok(text_report(records, stats)),
    }
}

fn text_report(records: &[NormalizedRecord], stats: &CrawlStats) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Records: {}\n", records.len()));
    report.push_str(&format!("  Resources fetched: {}\n", stats.fetched));
    report.push_str(&format!("  Fetch failures: {}\n", stats.failed));
    report.push_str(&format!("  Filtered by content: {}\n", stats.filtered));
    report.push_str(&format!("  Links rejected: {}\n", stats.rejected));
    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    // Group records by host; repository elements have no host
    let mut by_host: BTreeMap<String, Vec<&NormalizedRecord>> = BTreeMap::new();
    for record in records {
        let host = Url::parse(&record.meta.locator)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| "repository".to_string());
        by_host.entry(host).or_default().push(record);
    }

    for (host, host_records) in by_host.iter() {
        report.push_str(&format!("## {}\n", host));
        report.push_str(&format!("  {} records\n\n", host_records.len()));

        for record in host_records {
            let mut line = format!(
                "  [{}] {} {}",
                record.meta.kind.as_str(),
                extract_url_path(&record.meta.locator),
                record.meta.title
            );

            // Only show MIME type if it's not text/html
            if let Some(ref content_type) = record.meta.content_type
                && content_type != "text/html"
            {
                line.push_str(&format!(" ({})", content_type));
            }

            report.push_str(&line);
            report.push('\n');
        }
        report.push('\n');
    }

    report
}
