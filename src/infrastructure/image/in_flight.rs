//! Single-flight table of running fetch pipelines.
//!
//! For every key there is at most one entry. The first caller becomes the
//! driver and runs the pipeline; everyone else subscribes to the entry's
//! `watch` channel and observes the same outcome. The table lock only guards
//! metadata; no I/O happens while it is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::errors::FetchError;

/// Result published by a pipeline to all of its listeners.
pub type FetchOutcome = Result<Arc<CachedImage>, FetchError>;

/// Default limit on simultaneously running pipelines.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

struct InFlightFetch {
    id: u64,
    outcome: watch::Sender<Option<FetchOutcome>>,
    persist: bool,
    started_at: Instant,
}

type Table = Arc<Mutex<HashMap<CacheKey, InFlightFetch>>>;

/// Result of [`FetchDeduplicator::acquire`].
pub enum Acquired {
    /// No pipeline was running; the caller must run it and publish through
    /// `driver`. `listener` observes the published outcome.
    Driver {
        /// Publishing side.
        driver: FetchDriver,
        /// Observer for the caller itself.
        listener: FetchListener,
    },
    /// A pipeline for the key is already running.
    Listener(FetchListener),
    /// A pipeline finished between the caller's cache miss and this call.
    Cached(Arc<CachedImage>),
}

/// Deduplicates fetch pipelines per key.
pub struct FetchDeduplicator {
    table: Table,
    next_id: AtomicU64,
    max_in_flight: usize,
}

impl FetchDeduplicator {
    /// Creates a table accepting at most `max_in_flight` concurrent pipelines.
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Joins the running pipeline for `key`, or registers a new one.
    ///
    /// `persist` records that this caller wants the result written to the
    /// thumbnail store. `recheck` runs under the table lock when no pipeline
    /// is running, to catch a result installed since the caller's last miss.
    ///
    /// # Errors
    /// Returns a network error when a new pipeline would exceed the
    /// in-flight limit.
    pub fn acquire<F>(&self, key: &CacheKey, persist: bool, recheck: F) -> Result<Acquired, FetchError>
    where
        F: FnOnce() -> Option<Arc<CachedImage>>,
    {
        let mut table = self.table.lock();

        if let Some(entry) = table.get_mut(key) {
            entry.persist |= persist;
            trace!(key = %key, "Joining in-flight fetch");
            return Ok(Acquired::Listener(FetchListener {
                rx: entry.outcome.subscribe(),
            }));
        }

        if let Some(image) = recheck() {
            trace!(key = %key, "Fetch completed before acquire");
            return Ok(Acquired::Cached(image));
        }

        if table.len() >= self.max_in_flight {
            warn!(key = %key, limit = self.max_in_flight, "Too many fetches in flight");
            return Err(FetchError::capacity_exhausted());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        table.insert(
            key.clone(),
            InFlightFetch {
                id,
                outcome: tx,
                persist,
                started_at: Instant::now(),
            },
        );
        debug!(key = %key, in_flight = table.len(), "Registered fetch pipeline");

        Ok(Acquired::Driver {
            driver: FetchDriver {
                key: key.clone(),
                id,
                table: self.table.clone(),
                completed: false,
            },
            listener: FetchListener { rx },
        })
    }

    /// Returns true if a pipeline for `key` is running.
    #[must_use]
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.table.lock().contains_key(key)
    }

    /// Returns the number of running pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FetchDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

/// Publishing side of a registered pipeline.
///
/// Dropping a driver without calling [`FetchDriver::complete`] unregisters
/// the pipeline and wakes listeners with an aborted error.
pub struct FetchDriver {
    key: CacheKey,
    id: u64,
    table: Table,
    completed: bool,
}

impl FetchDriver {
    /// Key this pipeline fetches.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Unregisters the pipeline and publishes `outcome` to every listener.
    ///
    /// Returns whether any caller asked for the result to be persisted.
    /// Install a successful result into the memory cache before calling this,
    /// so callers arriving after the unregister find it there.
    pub fn complete(mut self, outcome: FetchOutcome) -> bool {
        self.completed = true;
        let Some(entry) = self.unregister() else {
            return false;
        };

        debug!(
            key = %self.key,
            ok = outcome.is_ok(),
            elapsed_ms = entry.started_at.elapsed().as_millis(),
            "Fetch pipeline finished"
        );
        let persist = entry.persist && outcome.is_ok();
        entry.outcome.send_replace(Some(outcome));
        persist
    }

    fn unregister(&self) -> Option<InFlightFetch> {
        let mut table = self.table.lock();
        match table.get(&self.key) {
            Some(entry) if entry.id == self.id => table.remove(&self.key),
            _ => None,
        }
    }
}

impl Drop for FetchDriver {
    fn drop(&mut self) {
        if !self.completed && self.unregister().is_some() {
            warn!(key = %self.key, "Fetch pipeline dropped without an outcome");
        }
    }
}

/// Observer of a pipeline's outcome.
pub struct FetchListener {
    rx: watch::Receiver<Option<FetchOutcome>>,
}

impl FetchListener {
    /// Waits for the pipeline to publish its outcome.
    pub async fn wait(mut self) -> FetchOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(FetchError::aborted())),
            Err(_) => Err(FetchError::aborted()),
        }
    }
}
