use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use sitedex_core::crawl::{
    CrawlOptions, CrawlProgressCallback, CrawlTarget, ReportFormat, execute_crawl,
    generate_record_report, load_provider_options,
};
use sitedex_core::data::SqliteStateStore;
use sitedex_core::provider::Provision;
use sitedex_core::resource::{ContextDefinition, ResourceMeta};
use sitedex_scanner::config::ProviderOptions;
use sitedex_scanner::fetcher::HttpFetcher;
use sitedex_scanner::pdf::PdfTextExtractor;
use sitedex_scanner::state::CrawlStateStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const DEFAULT_STATE_PATH: &str = "~/.config/sitedex/state.db";

/// Command line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub seed: Option<String>,
    pub host: Option<String>,
    pub max_depth: Option<usize>,
    pub limit: Option<usize>,
    pub own_host_only: bool,
}

impl CliOverrides {
    pub fn apply(&self, options: &mut ProviderOptions) {
        if let Some(ref seed) = self.seed {
            options.full_dispatch.seed = Some(seed.clone());
        }
        if let Some(ref host) = self.host {
            options.single_dispatch.host = Some(host.clone());
        }
        if let Some(depth) = self.max_depth {
            options.full_dispatch.max_link_depth = depth;
        }
        if let Some(limit) = self.limit {
            options.full_dispatch.max_crawl_limit = limit;
        }
        if self.own_host_only {
            options.always.own_host_only = true;
        }
    }
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    // Try to parse as-is
    if let Ok(url) = Url::parse(line)
        && url.has_host()
    {
        return Some(line.to_string());
    }

    // Try adding http://
    let with_scheme = format!("http://{}", line);
    match Url::parse(&with_scheme) {
        Ok(url) if url.host_str().is_some_and(|h| !h.contains(' ')) => Some(with_scheme),
        _ => None,
    }
}

/// Provider options from the config file (or defaults) with CLI overrides on top
pub fn build_provider_options(
    config: Option<&PathBuf>,
    overrides: &CliOverrides,
) -> Result<ProviderOptions> {
    let mut options = match config {
        Some(path) => load_provider_options(path)?,
        None => ProviderOptions::default(),
    };
    overrides.apply(&mut options);
    Ok(options)
}

/// Expand `~` and make sure the parent directory exists
pub fn resolve_state_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    Ok(path)
}

pub fn open_state_store(raw: &str) -> Result<Arc<SqliteStateStore>> {
    let path = resolve_state_path(raw)?;
    debug!("Using crawl state at {}", path.display());
    let store = SqliteStateStore::open(&path)
        .with_context(|| format!("Failed to open state database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Write the report to `output`, or to stdout when no file is given
pub fn write_report(report: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, report)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

fn report_format(args: &ArgMatches) -> Result<ReportFormat> {
    let raw = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    ReportFormat::from_str(raw).ok_or_else(|| anyhow!("Unknown report format '{}'", raw))
}

fn state_path(args: &ArgMatches) -> &str {
    args.get_one::<String>("state")
        .map(String::as_str)
        .unwrap_or(DEFAULT_STATE_PATH)
}

async fn run_and_report(
    args: &ArgMatches,
    options: CrawlOptions,
    store: Arc<SqliteStateStore>,
) -> Result<()> {
    let format = report_format(args)?;
    let verbose = options.show_progress_bars;

    let progress_callback: Option<CrawlProgressCallback> = if verbose {
        Some(Arc::new(|msg: String| {
            eprintln!("{}", msg);
        }))
    } else {
        None
    };
    let fetcher = Arc::new(
        HttpFetcher::new()
            .context("Failed to build HTTP client")?
            .with_text_extractor(Arc::new(PdfTextExtractor::new())),
    );

    let Provision {
        records,
        stats,
        cancelled,
    } = execute_crawl(options, fetcher, store, progress_callback).await?;

    if cancelled {
        eprintln!("{} Crawl cancelled, partial results below", "!".yellow().bold());
    } else if verbose {
        eprintln!("\n{} Crawl complete!\n", "✓".green().bold());
    }

    let report = generate_record_report(&records, &stats, format)?;
    write_report(&report, args.get_one::<PathBuf>("output"))
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) -> Result<()> {
    let seed = match args.get_one::<String>("seed") {
        Some(raw) => Some(
            parse_url_line(raw).ok_or_else(|| anyhow!("Invalid seed URL '{}'", raw))?,
        ),
        None => None,
    };
    let overrides = CliOverrides {
        seed,
        max_depth: args.get_one::<usize>("max-depth").copied(),
        limit: args.get_one::<usize>("limit").copied(),
        own_host_only: args.get_flag("own-host-only"),
        ..Default::default()
    };
    let provider_options = build_provider_options(args.get_one::<PathBuf>("config"), &overrides)?;
    let threads = args
        .get_one::<usize>("threads")
        .copied()
        .unwrap_or(sitedex_scanner::crawler::DEFAULT_WORKERS);

    if !quiet {
        let seed = provider_options
            .full_dispatch
            .seed
            .as_deref()
            .unwrap_or("<none>");
        eprintln!("\n{} Crawling {}", "→".blue().bold(), seed.bright_white());
        eprintln!("Workers: {}", threads);
        eprintln!("Max depth: {}", provider_options.full_dispatch.max_link_depth);
        if provider_options.full_dispatch.max_crawl_limit > 0 {
            eprintln!("Limit: {}", provider_options.full_dispatch.max_crawl_limit);
        }
        eprintln!();
    }

    let store = open_state_store(state_path(args))?;
    let options = CrawlOptions {
        provider_options,
        target: CrawlTarget::Full,
        threads,
        context: ContextDefinition::new("cli"),
        show_progress_bars: !quiet,
    };

    run_and_report(args, options, store).await
}

pub async fn handle_single(args: &ArgMatches, quiet: bool) -> Result<()> {
    let host = match args.get_one::<String>("host") {
        Some(raw) => Some(
            parse_url_line(raw).ok_or_else(|| anyhow!("Invalid host URL '{}'", raw))?,
        ),
        None => None,
    };
    let path = args
        .get_one::<String>("path")
        .ok_or_else(|| anyhow!("--path is required"))?;

    let overrides = CliOverrides {
        host,
        ..Default::default()
    };
    let provider_options = build_provider_options(args.get_one::<PathBuf>("config"), &overrides)?;

    let store = open_state_store(state_path(args))?;
    let options = CrawlOptions {
        provider_options,
        target: CrawlTarget::Single(ResourceMeta::with_path(path.clone())),
        threads: 1,
        context: ContextDefinition::new("cli"),
        show_progress_bars: !quiet,
    };

    run_and_report(args, options, store).await
}

pub fn handle_reset(args: &ArgMatches) -> Result<()> {
    let path = resolve_state_path(state_path(args))?;
    reset_state(&path)?;
    println!(
        "{} Crawl state cleared: {}",
        "✓".green().bold(),
        path.display().to_string().bright_white()
    );
    Ok(())
}

/// Clear both state buckets of the database at `path`, if there is one
pub fn reset_state(path: &Path) -> Result<()> {
    if !SqliteStateStore::exists(path) {
        return Ok(());
    }
    let store = SqliteStateStore::open(path)
        .with_context(|| format!("Failed to open state database {}", path.display()))?;
    store.reset_progress()?;
    store.reset_uri_filter()?;
    Ok(())
}
