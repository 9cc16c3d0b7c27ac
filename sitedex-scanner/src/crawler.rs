use crate::config::CrawlConfig;
use crate::error::{CrawlError, FetchError, Result, StateError};
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::filter::{LinkFilter, Rejection, canonicalize};
use crate::result::{CrawlStats, FrontierEntry, SpiderResource};
use crate::state::{CrawlStateStore, EntryStatus, StateResult};
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use url::Url;

/// Called with (depth, url) when a fetch starts
pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Consecutive "fetch layer unreachable" errors after which a session fails
const MAX_CONSECUTIVE_UNREACHABLE: usize = 5;

pub const DEFAULT_WORKERS: usize = 10;

/// Cooperative cancellation shared between a session and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
enum Work {
    Full { seed: Url },
    Single { target: Url },
}

enum Finish {
    Completed,
    Cancelled,
}

enum Dispatch {
    Fetched {
        entry: FrontierEntry,
        outcome: FetchOutcome,
    },
    Failed {
        entry: FrontierEntry,
        error: FetchError,
    },
    /// The fetch was redirected to a URL the session may not keep
    Redirected {
        entry: FrontierEntry,
        target: String,
        skip: RedirectSkip,
    },
    Cancelled,
    OverBudget(FrontierEntry),
    StoreFailed(StateError),
}

#[derive(Debug, Clone, Copy)]
enum RedirectSkip {
    Rejected(Rejection),
    Duplicate,
}

impl RedirectSkip {
    fn record(self, entry: &FrontierEntry, target: &str, stats: &mut CrawlStats) {
        match self {
            RedirectSkip::Rejected(rejection) => {
                debug!(
                    "Dropped {}: redirect to {} rejected ({})",
                    entry.url,
                    target,
                    rejection.as_str()
                );
                stats.rejected += 1;
            }
            RedirectSkip::Duplicate => {
                debug!("Dropped {}: redirect to already claimed {}", entry.url, target);
                stats.duplicates += 1;
            }
        }
    }
}

/// Fetch budget for `max_crawl_limit`. A slot is reserved before each fetch
/// and handed back when the fetch fails.
struct Budget {
    limit: usize,
    used: AtomicUsize,
}

impl Budget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    fn try_reserve(&self) -> bool {
        if self.limit == 0 {
            return true;
        }
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        if self.limit > 0 {
            self.used.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn exhausted(&self) -> bool {
        self.limit > 0 && self.used.load(Ordering::SeqCst) >= self.limit
    }
}

/// One full-site or single-resource traversal.
///
/// The frontier is consumed breadth-first. Entries of the same depth are
/// fetched concurrently by up to `workers` fetches; discovered links are
/// merged back by the session loop only.
pub struct CrawlSession {
    config: Arc<CrawlConfig>,
    filter: LinkFilter,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn CrawlStateStore>,
    work: Option<Work>,
    state: SessionState,
    cancel: CancelFlag,
    workers: usize,
    progress_callback: Option<ProgressCallback>,
}

impl CrawlSession {
    pub fn new(
        config: Arc<CrawlConfig>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn CrawlStateStore>,
    ) -> Self {
        Self {
            filter: LinkFilter::new(config.clone()),
            config,
            fetcher,
            store,
            work: None,
            state: SessionState::Idle,
            cancel: CancelFlag::new(),
            workers: DEFAULT_WORKERS,
            progress_callback: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Prepare a seeded crawl. Does not touch the state store.
    pub fn init_full_crawl(&mut self, seed: &str) -> Result<()> {
        self.ensure_idle()?;

        let seed = Url::parse(seed)
            .map_err(|e| CrawlError::InvalidUrl(format!("seed '{}': {}", seed, e)))?;
        if seed.cannot_be_a_base() || seed.host_str().is_none() {
            return Err(CrawlError::InvalidUrl(format!(
                "seed '{}' is not an absolute URL",
                seed
            )));
        }
        self.ensure_scheme(&seed)?;

        self.work = Some(Work::Full { seed });
        Ok(())
    }

    /// Prepare a crawl of exactly one locator, without following links.
    pub fn init_single_crawl(&mut self, target: Url) -> Result<()> {
        self.ensure_idle()?;
        self.ensure_scheme(&target)?;

        self.work = Some(Work::Single { target });
        Ok(())
    }

    /// Run the prepared crawl, handing every accepted resource to `emit` in
    /// fetch order.
    pub async fn process<E>(&mut self, mut emit: E) -> Result<CrawlStats>
    where
        E: FnMut(SpiderResource),
    {
        let work = self.work.clone().ok_or_else(|| {
            CrawlError::Configuration("crawl session was not initialized".to_string())
        })?;
        self.ensure_idle()?;
        self.state = SessionState::Running;

        let result = match &work {
            Work::Full { seed } => self.run_full(seed, &mut emit).await,
            Work::Single { target } => self.run_single(target, &mut emit).await,
        };

        match result {
            Ok((stats, finish)) => {
                self.state = match finish {
                    Finish::Completed => SessionState::Completed,
                    Finish::Cancelled => SessionState::Cancelled,
                };
                info!(
                    "Crawl {:?}: {} fetched, {} failed, {} filtered, {} queued",
                    self.state, stats.fetched, stats.failed, stats.filtered, stats.discovered
                );
                Ok(stats)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!("Crawl failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_full<E>(&self, seed: &Url, emit: &mut E) -> Result<(CrawlStats, Finish)>
    where
        E: FnMut(SpiderResource),
    {
        info!("Starting crawl of {} with {} workers", seed, self.workers);

        let mut stats = CrawlStats::default();
        let mut frontier: VecDeque<FrontierEntry> = VecDeque::new();

        let mut seed_url = seed.clone();
        seed_url.set_fragment(None);
        let seed_key = canonicalize(&seed_url);
        if self.store.claim(&seed_key, 0, None)? {
            frontier.push_back(FrontierEntry {
                url: seed_url.to_string(),
                canonical: seed_key,
                depth: 0,
                parent: None,
            });
        } else {
            debug!("Seed {} already claimed, nothing to do", seed_key);
            stats.duplicates += 1;
        }

        let budget = Budget::new(self.config.max_crawl_limit);
        let mut unreachable_streak = 0;

        while let Some(front) = frontier.front() {
            if self.cancel.is_cancelled() {
                info!("Crawl cancelled with {} entries left", frontier.len());
                return Ok((stats, Finish::Cancelled));
            }
            if budget.exhausted() {
                info!("Crawl limit of {} reached", self.config.max_crawl_limit);
                break;
            }

            let depth = front.depth;
            let mut level = Vec::new();
            while frontier.front().is_some_and(|e| e.depth == depth) {
                if let Some(entry) = frontier.pop_front() {
                    level.push(entry);
                }
            }
            debug!("Dispatching {} entries at depth {}", level.len(), depth);

            let mut deferred = Vec::new();
            let mut fatal: Option<CrawlError> = None;
            {
                let mut dispatched = stream::iter(level)
                    .map(|entry| self.dispatch(entry, &budget))
                    .buffered(self.workers);

                while let Some(result) = dispatched.next().await {
                    match result {
                        Dispatch::Fetched { entry, outcome } => {
                            unreachable_streak = 0;
                            stats.fetched += 1;

                            let FetchOutcome {
                                mut resource,
                                links,
                            } = outcome;
                            resource.set_depth(entry.depth);

                            if self.cancel.is_cancelled() {
                                debug!("Discarding {} links from {} after cancel", links.len(), entry.url);
                            } else if let Err(e) =
                                self.enqueue_links(&entry, links, &mut frontier, &mut stats)
                            {
                                fatal = Some(e.into());
                                break;
                            }

                            if self
                                .filter
                                .accepts_content(resource.content_type(), resource.size())
                            {
                                emit(resource);
                            } else {
                                debug!("Content filter dropped {}", entry.url);
                                stats.filtered += 1;
                            }
                        }
                        Dispatch::Failed { entry, error } => {
                            stats.failed += 1;
                            warn!("Crawl error for {}: {}", entry.url, error);

                            if error.is_unreachable() {
                                unreachable_streak += 1;
                                if unreachable_streak >= MAX_CONSECUTIVE_UNREACHABLE {
                                    fatal = Some(CrawlError::Session(format!(
                                        "fetch layer unreachable {} times in a row, last error: {}",
                                        unreachable_streak, error
                                    )));
                                    break;
                                }
                            } else {
                                unreachable_streak = 0;
                            }
                        }
                        Dispatch::Redirected {
                            entry,
                            target,
                            skip,
                        } => {
                            unreachable_streak = 0;
                            skip.record(&entry, &target, &mut stats);
                        }
                        Dispatch::OverBudget(entry) => deferred.push(entry),
                        Dispatch::Cancelled => {}
                        Dispatch::StoreFailed(e) => {
                            fatal = Some(e.into());
                            break;
                        }
                    }
                }
            }

            if let Some(e) = fatal {
                return Err(e);
            }

            // Entries passed over while every slot was reserved get another
            // chance if a failed fetch handed its slot back.
            if !budget.exhausted() {
                for entry in deferred.into_iter().rev() {
                    frontier.push_front(entry);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok((stats, Finish::Cancelled));
        }
        Ok((stats, Finish::Completed))
    }

    async fn run_single<E>(&self, target: &Url, emit: &mut E) -> Result<(CrawlStats, Finish)>
    where
        E: FnMut(SpiderResource),
    {
        info!("Starting single crawl of {}", target);

        let mut stats = CrawlStats::default();
        if self.cancel.is_cancelled() {
            return Ok((stats, Finish::Cancelled));
        }

        let mut url = target.clone();
        url.set_fragment(None);
        let key = canonicalize(&url);

        if !self.store.claim(&key, 0, None)? && self.store.is_visited(&key)? {
            debug!("{} already visited, skipping", key);
            stats.duplicates += 1;
            return Ok((stats, Finish::Completed));
        }

        let entry = FrontierEntry {
            url: url.to_string(),
            canonical: key,
            depth: 0,
            parent: None,
        };
        let budget = Budget::new(0);

        match self.dispatch(entry, &budget).await {
            Dispatch::Fetched { entry, outcome } => {
                stats.fetched += 1;
                let mut resource = outcome.resource;
                resource.set_depth(0);
                if self
                    .filter
                    .accepts_content(resource.content_type(), resource.size())
                {
                    emit(resource);
                } else {
                    debug!("Content filter dropped {}", entry.url);
                    stats.filtered += 1;
                }
                Ok((stats, Finish::Completed))
            }
            Dispatch::Failed { entry, error } => {
                warn!("Crawl error for {}: {}", entry.url, error);
                stats.failed += 1;
                Ok((stats, Finish::Completed))
            }
            Dispatch::Redirected {
                entry,
                target,
                skip,
            } => {
                skip.record(&entry, &target, &mut stats);
                Ok((stats, Finish::Completed))
            }
            Dispatch::Cancelled | Dispatch::OverBudget(_) => Ok((stats, Finish::Cancelled)),
            Dispatch::StoreFailed(e) => Err(e.into()),
        }
    }

    async fn dispatch(&self, entry: FrontierEntry, budget: &Budget) -> Dispatch {
        if self.cancel.is_cancelled() {
            return Dispatch::Cancelled;
        }
        if !budget.try_reserve() {
            return Dispatch::OverBudget(entry);
        }
        if let Err(e) = self.store.set_status(&entry.canonical, EntryStatus::InFlight) {
            budget.release();
            return Dispatch::StoreFailed(e);
        }

        if let Some(ref callback) = self.progress_callback {
            callback(entry.depth, entry.url.clone());
        }

        let fetched = match Url::parse(&entry.url) {
            Ok(url) => self.fetcher.fetch(&url).await,
            Err(e) => Err(FetchError::Malformed {
                url: entry.url.clone(),
                reason: e.to_string(),
            }),
        };

        match fetched {
            Ok(outcome) => {
                if let Err(e) = self.store.set_status(&entry.canonical, EntryStatus::Visited) {
                    return Dispatch::StoreFailed(e);
                }
                match self.claim_redirect(&entry, outcome.resource.url()) {
                    Ok(None) => Dispatch::Fetched { entry, outcome },
                    Ok(Some(skip)) => {
                        budget.release();
                        Dispatch::Redirected {
                            target: outcome.resource.url().to_string(),
                            entry,
                            skip,
                        }
                    }
                    Err(e) => Dispatch::StoreFailed(e),
                }
            }
            Err(error) => {
                budget.release();
                match self.store.set_status(&entry.canonical, EntryStatus::Failed) {
                    Ok(()) => Dispatch::Failed { entry, error },
                    Err(e) => Dispatch::StoreFailed(e),
                }
            }
        }
    }

    /// A fetch that ended on another URL keeps its resource only if that URL
    /// passes the link filter and was not claimed yet.
    fn claim_redirect(
        &self,
        entry: &FrontierEntry,
        final_url: &str,
    ) -> StateResult<Option<RedirectSkip>> {
        let Ok(mut url) = Url::parse(final_url) else {
            return Ok(Some(RedirectSkip::Rejected(Rejection::Unparseable)));
        };
        url.set_fragment(None);
        let canonical = canonicalize(&url);
        if canonical == entry.canonical {
            return Ok(None);
        }

        if let Err(rejection) = self.filter.check(url.as_str(), entry.depth) {
            return Ok(Some(RedirectSkip::Rejected(rejection)));
        }
        if !self
            .store
            .claim(&canonical, entry.depth, Some(&entry.canonical))?
        {
            return Ok(Some(RedirectSkip::Duplicate));
        }
        self.store.set_status(&canonical, EntryStatus::Visited)?;

        debug!("{} redirected to {}", entry.url, canonical);
        Ok(None)
    }

    fn enqueue_links(
        &self,
        parent: &FrontierEntry,
        links: Vec<String>,
        frontier: &mut VecDeque<FrontierEntry>,
        stats: &mut CrawlStats,
    ) -> std::result::Result<(), StateError> {
        let depth = parent.depth + 1;

        for link in links {
            if !self.store.remember_uri(&link)? {
                stats.duplicates += 1;
                continue;
            }

            if let Err(rejection) = self.filter.check(&link, depth) {
                debug!("  -> Rejected {} ({})", link, rejection.as_str());
                stats.rejected += 1;
                continue;
            }

            let Ok(mut url) = Url::parse(&link) else {
                continue;
            };
            url.set_fragment(None);
            let canonical = canonicalize(&url);

            if !self.store.claim(&canonical, depth, Some(&parent.canonical))? {
                stats.duplicates += 1;
                continue;
            }

            debug!("  -> Queued {} at depth {}", canonical, depth);
            stats.discovered += 1;
            frontier.push_back(FrontierEntry {
                url: url.to_string(),
                canonical,
                depth,
                parent: Some(parent.url.clone()),
            });
        }

        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(CrawlError::Session(format!(
                "session is {:?}, expected Idle",
                self.state
            )));
        }
        Ok(())
    }

    fn ensure_scheme(&self, url: &Url) -> Result<()> {
        if !self.config.is_scheme_allowed(url.scheme()) {
            return Err(CrawlError::Configuration(format!(
                "'{}' uses scheme '{}' which is not in allowed_schemes",
                url,
                url.scheme()
            )));
        }
        Ok(())
    }
}
