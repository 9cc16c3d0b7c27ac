// Crawl progress and link-filter dedup state

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

pub type StateResult<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Queued,
    InFlight,
    Visited,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::InFlight => "in_flight",
            EntryStatus::Visited => "visited",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(EntryStatus::Queued),
            "in_flight" => Some(EntryStatus::InFlight),
            "visited" => Some(EntryStatus::Visited),
            "failed" => Some(EntryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub status: EntryStatus,
    pub depth: usize,
    pub parent: Option<String>,
}

/// Shared crawl state, keyed by canonical URL.
///
/// Two buckets are kept: crawl progress (every URL claimed by the session with
/// its depth and status) and the URI filter (raw discovered links already run
/// through the link filter). Both are cleared independently.
pub trait CrawlStateStore: Send + Sync {
    /// Atomically claim `key` for crawling at `depth`. Returns false when the
    /// key is already known, in which case nothing is changed.
    fn claim(&self, key: &str, depth: usize, parent: Option<&str>) -> StateResult<bool>;

    /// Update the status of a claimed key.
    fn set_status(&self, key: &str, status: EntryStatus) -> StateResult<()>;

    fn entry(&self, key: &str) -> StateResult<Option<ProgressEntry>>;

    fn is_visited(&self, key: &str) -> StateResult<bool> {
        Ok(matches!(
            self.entry(key)?,
            Some(ProgressEntry {
                status: EntryStatus::Visited,
                ..
            })
        ))
    }

    fn progress_len(&self) -> StateResult<usize>;

    /// Record a raw URI as evaluated by the link filter. Returns false when it
    /// was already recorded.
    fn remember_uri(&self, uri: &str) -> StateResult<bool>;

    fn uri_filter_len(&self) -> StateResult<usize>;

    fn reset_progress(&self) -> StateResult<()>;

    fn reset_uri_filter(&self) -> StateResult<()>;

    fn is_empty(&self) -> StateResult<bool> {
        Ok(self.progress_len()? == 0 && self.uri_filter_len()? == 0)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    progress: HashMap<String, ProgressEntry>,
    uri_filter: HashSet<String>,
}

/// Process-local store. Each instance is independent, so separate sessions can
/// run side by side.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StateResult<MutexGuard<'_, MemoryState>> {
        self.inner.lock().map_err(|_| StateError::Poisoned)
    }
}

impl CrawlStateStore for MemoryStateStore {
    fn claim(&self, key: &str, depth: usize, parent: Option<&str>) -> StateResult<bool> {
        let mut state = self.lock()?;
        if state.progress.contains_key(key) {
            return Ok(false);
        }
        state.progress.insert(
            key.to_string(),
            ProgressEntry {
                status: EntryStatus::Queued,
                depth,
                parent: parent.map(String::from),
            },
        );
        Ok(true)
    }

    fn set_status(&self, key: &str, status: EntryStatus) -> StateResult<()> {
        let mut state = self.lock()?;
        if let Some(entry) = state.progress.get_mut(key) {
            entry.status = status;
        }
        Ok(())
    }

    fn entry(&self, key: &str) -> StateResult<Option<ProgressEntry>> {
        Ok(self.lock()?.progress.get(key).cloned())
    }

    fn progress_len(&self) -> StateResult<usize> {
        Ok(self.lock()?.progress.len())
    }

    fn remember_uri(&self, uri: &str) -> StateResult<bool> {
        Ok(self.lock()?.uri_filter.insert(uri.to_string()))
    }

    fn uri_filter_len(&self) -> StateResult<usize> {
        Ok(self.lock()?.uri_filter.len())
    }

    fn reset_progress(&self) -> StateResult<()> {
        self.lock()?.progress.clear();
        Ok(())
    }

    fn reset_uri_filter(&self) -> StateResult<()> {
        self.lock()?.uri_filter.clear();
        Ok(())
    }
}
