// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    CliOverrides, build_provider_options, parse_url_line, reset_state, resolve_state_path,
    write_report,
};

// Re-export crawl functionality from sitedex-core
pub use sitedex_core::crawl::{
    CrawlOptions, CrawlProgressCallback, CrawlTarget, ReportFormat, execute_crawl,
    extract_url_path, generate_record_report,
};
