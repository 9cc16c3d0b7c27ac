// Entry point the indexing pipeline drives: wires options into a crawl
// session and normalizes what it emits

use crate::classify::is_indexable_element;
use crate::error::{NormalizationError, ProviderError, Result};
use crate::normalize::{
    DefaultResourceNormalizer, NormalizedRecord, ResourceNormalizer, normalize_to_records,
};
use crate::resource::{ContextDefinition, FetchedResource, ResourceMeta};
use sitedex_scanner::config::{CrawlConfig, DispatchMode, ProviderOptions};
use sitedex_scanner::crawler::{
    CancelFlag, CrawlSession, DEFAULT_WORKERS, ProgressCallback, SessionState,
};
use sitedex_scanner::fetcher::Fetcher;
use sitedex_scanner::result::CrawlStats;
use sitedex_scanner::state::CrawlStateStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Records produced by one provider call, in emission order.
#[derive(Debug, Clone, Default)]
pub struct Provision {
    pub records: Vec<NormalizedRecord>,
    pub stats: CrawlStats,
    pub cancelled: bool,
}

pub struct CrawlerDataProvider {
    options: ProviderOptions,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn CrawlStateStore>,
    normalizer: Arc<dyn ResourceNormalizer>,
    cancel: CancelFlag,
    workers: usize,
    progress_callback: Option<ProgressCallback>,
}

impl CrawlerDataProvider {
    pub fn new(
        options: ProviderOptions,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn CrawlStateStore>,
    ) -> Self {
        Self {
            options,
            fetcher,
            store,
            normalizer: Arc::new(DefaultResourceNormalizer::new()),
            cancel: CancelFlag::new(),
            workers: DEFAULT_WORKERS,
            progress_callback: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ResourceNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn CrawlStateStore> {
        &self.store
    }

    /// Flag that stops a running `provide_*` call at the next dispatch.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Clear transient crawl progress before a run. Idempotent.
    pub fn warm_up(&self, ctx: &ContextDefinition) -> Result<()> {
        info!(context = %ctx.name, "Warming up crawler provider");
        self.cancel.reset();
        self.store.reset_progress()?;
        Ok(())
    }

    /// Crawl from the configured seed and return every normalized record.
    pub async fn provide_all(&self, ctx: &ContextDefinition) -> Result<Provision> {
        let config = Arc::new(CrawlConfig::from_options(&self.options, DispatchMode::Full)?);
        let seed = config.seed.clone().ok_or_else(|| {
            ProviderError::Configuration("option \"seed\" is required for a full crawl".to_string())
        })?;

        info!(context = %ctx.name, "Providing all resources from {}", seed);
        let mut session = self.session(config);
        session.init_full_crawl(seed.as_str())?;

        self.run(ctx, session).await
    }

    /// Fetch and normalize the single resource `meta` points at.
    pub async fn provide_single(
        &self,
        ctx: &ContextDefinition,
        meta: &ResourceMeta,
    ) -> Result<Provision> {
        let path = meta.path().ok_or_else(|| {
            ProviderError::Configuration(
                "resource option \"path\" must be set to provide single data".to_string(),
            )
        })?;

        let mut options = self.options.clone();
        options.single_dispatch.path = Some(path.to_string());
        let config = Arc::new(CrawlConfig::from_options(&options, DispatchMode::Single)?);
        let target = config.single_target()?;

        info!(context = %ctx.name, "Providing single resource {}", target);
        let mut session = self.session(config);
        session.init_single_crawl(target)?;

        self.run(ctx, session).await
    }

    pub fn cool_down(&self, ctx: &ContextDefinition) -> Result<()> {
        info!(context = %ctx.name, "Cooling down crawler provider");
        self.clear_state()
    }

    pub fn cancelled_shutdown(&self, ctx: &ContextDefinition) -> Result<()> {
        info!(context = %ctx.name, "Crawler provider shutdown after cancel");
        self.cancel.cancel();
        self.clear_state()
    }

    pub fn emergency_shutdown(&self, ctx: &ContextDefinition) -> Result<()> {
        warn!(context = %ctx.name, "Emergency shutdown of crawler provider");
        self.cancel.cancel();
        self.clear_state()
    }

    pub fn validate_untrusted_resource(&self, resource: &FetchedResource) -> bool {
        is_indexable_element(resource)
    }

    /// Normalize a repository element handed in by the element source.
    pub fn normalize_resource(
        &self,
        ctx: &ContextDefinition,
        resource: Arc<FetchedResource>,
    ) -> std::result::Result<Vec<NormalizedRecord>, NormalizationError> {
        normalize_to_records(self.normalizer.as_ref(), ctx, resource)
    }

    fn session(&self, config: Arc<CrawlConfig>) -> CrawlSession {
        let session = CrawlSession::new(config, self.fetcher.clone(), self.store.clone())
            .with_workers(self.workers)
            .with_cancel_flag(self.cancel.clone());

        match self.progress_callback {
            Some(ref callback) => session.with_progress_callback(callback.clone()),
            None => session,
        }
    }

    async fn run(&self, ctx: &ContextDefinition, mut session: CrawlSession) -> Result<Provision> {
        let normalizer = self.normalizer.as_ref();
        let mut records = Vec::new();

        let result = session
            .process(|resource| {
                let resource = Arc::new(FetchedResource::Spider(resource));
                match normalize_to_records(normalizer, ctx, resource) {
                    Ok(normalized) => records.extend(normalized),
                    Err(e) => warn!("Dropping resource: {}", e),
                }
            })
            .await;

        match result {
            Ok(stats) => Ok(Provision {
                records,
                stats,
                cancelled: session.state() == SessionState::Cancelled,
            }),
            Err(e) => {
                error!(context = %ctx.name, "Crawl session failed: {}", e);
                if let Err(cleanup) = self.emergency_shutdown(ctx) {
                    error!("Cleanup after failed crawl also failed: {}", cleanup);
                }
                Err(e.into())
            }
        }
    }

    fn clear_state(&self) -> Result<()> {
        self.store.reset_progress()?;
        self.store.reset_uri_filter()?;
        Ok(())
    }
}
