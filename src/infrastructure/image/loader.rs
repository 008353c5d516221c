//! Image request orchestrator.
//!
//! Implements a three-tier lookup: memory -> thumbnail store -> network, with
//! per-URL fetch deduplication and per-target delivery binding.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, CachedImage, ImageSource, TargetId};
use crate::domain::errors::{CacheError, CacheResult, FetchError};
use crate::domain::ports::{ByteFetcherPort, ImageCachePort, ThumbnailStorePort};

use super::bindings::{Binding, BindingTracker};
use super::decoder::ImageDecoder;
use super::in_flight::{Acquired, DEFAULT_MAX_IN_FLIGHT, FetchDeduplicator, FetchDriver, FetchOutcome};
use super::memory_cache::{CacheStats, MemoryCacheConfig, MemoryImageCache};

/// Message delivered to the home context when a request resolves.
///
/// Sent at most once per request, and only while the request's binding is
/// current. `image` is `None` when the fetch failed; consumers keep whatever
/// the target showed before.
#[derive(Debug, Clone)]
pub struct ImageReadyEvent {
    /// Target the image is for.
    pub target: TargetId,
    /// Requested key.
    pub key: CacheKey,
    /// The image, or `None` if no image is available.
    pub image: Option<Arc<CachedImage>>,
    /// Where the image came from, when there is one.
    pub source: Option<ImageSource>,
}

/// Configuration for the image loader.
#[derive(Debug, Clone)]
pub struct ImageLoaderConfig {
    /// Memory tier sizing.
    pub memory: MemoryCacheConfig,
    /// Maximum pipelines downloading or decoding at once.
    pub max_concurrent_fetches: usize,
    /// Maximum registered pipelines; requests beyond fail immediately.
    pub max_in_flight: usize,
    /// Downscale decoded images larger than this.
    pub max_dimension: Option<u32>,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            memory: MemoryCacheConfig::default(),
            max_concurrent_fetches: 4,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_dimension: None,
        }
    }
}

/// How a request was handled at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Served from memory; the event is already queued.
    Delivered,
    /// Resolution continues in the background.
    Pending,
}

/// Counters reported by [`ImageLoader::stats`].
#[derive(Debug, Clone)]
pub struct LoaderStats {
    /// Memory tier statistics.
    pub memory: CacheStats,
    /// Running fetch pipelines.
    pub in_flight: usize,
    /// Targets with a binding.
    pub bound_targets: usize,
}

/// Entry point for image requests.
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
    config: ImageLoaderConfig,
}

struct LoaderInner {
    memory: MemoryImageCache,
    store: Arc<dyn ThumbnailStorePort>,
    fetcher: Arc<dyn ByteFetcherPort>,
    decoder: ImageDecoder,
    in_flight: FetchDeduplicator,
    bindings: BindingTracker,
    workers: Semaphore,
    active_pipelines: watch::Sender<usize>,
    event_tx: mpsc::UnboundedSender<ImageReadyEvent>,
    runtime: Handle,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader bound to the current Tokio runtime.
    ///
    /// # Errors
    /// Returns error if called outside a Tokio runtime.
    pub fn new(
        config: ImageLoaderConfig,
        fetcher: Arc<dyn ByteFetcherPort>,
        store: Arc<dyn ThumbnailStorePort>,
        event_tx: mpsc::UnboundedSender<ImageReadyEvent>,
    ) -> CacheResult<Self> {
        let runtime = Handle::try_current().map_err(|e| CacheError::NoRuntime(e.to_string()))?;

        let decoder = config
            .max_dimension
            .map_or_else(ImageDecoder::new, ImageDecoder::with_max_dimension);

        let inner = LoaderInner {
            memory: MemoryImageCache::new(config.memory),
            store,
            fetcher,
            decoder,
            in_flight: FetchDeduplicator::new(config.max_in_flight),
            bindings: BindingTracker::new(),
            workers: Semaphore::new(config.max_concurrent_fetches.max(1)),
            active_pipelines: watch::Sender::new(0),
            event_tx,
            runtime,
        };

        Ok(Self {
            inner: Arc::new(inner),
            config,
        })
    }

    /// Requests `url` for `target`.
    ///
    /// Never blocks. A memory hit is delivered before returning; otherwise
    /// the target is bound now and the result is delivered later, unless the
    /// target is re-bound or forgotten first. With `use_local_store` the
    /// thumbnail store is consulted before the network and a downloaded
    /// image is written back to it.
    pub fn request_image(
        &self,
        url: impl Into<CacheKey>,
        target: TargetId,
        use_local_store: bool,
    ) -> RequestStatus {
        let key = url.into();

        if let Some(image) = self.inner.memory.get(&key) {
            let binding = self.inner.bindings.bind(target, key);
            self.inner
                .deliver(&binding, Some(image), Some(ImageSource::MemoryCache));
            return RequestStatus::Delivered;
        }

        let binding = self.inner.bindings.bind(target, key);
        trace!(target_id = %binding.target(), key = %binding.key(), "Image request pending");

        let inner = self.inner.clone();
        self.inner
            .runtime
            .spawn(async move { inner.resolve(binding, use_local_store).await });

        RequestStatus::Pending
    }

    /// Loads `url` into the cache without delivering it to any target.
    pub fn prefetch(&self, url: impl Into<CacheKey>, use_local_store: bool) {
        let key = url.into();
        if self.inner.memory.peek(&key).is_some() {
            return;
        }

        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            if use_local_store && inner.lookup_store(&key).await.is_some() {
                return;
            }
            if let Err(e) = inner.fetch(&key, use_local_store).await {
                debug!(key = %key, error = %e, "Prefetch failed");
            }
        });
    }

    /// Prefetches multiple images into cache.
    pub fn prefetch_batch<I, K>(&self, urls: I, use_local_store: bool)
    where
        I: IntoIterator<Item = K>,
        K: Into<CacheKey>,
    {
        for url in urls {
            self.prefetch(url, use_local_store);
        }
    }

    /// Forgets a destroyed target; its pending request is never delivered.
    pub fn forget_target(&self, target: &TargetId) -> bool {
        self.inner.bindings.release(target).is_some()
    }

    /// Returns true if a fetch for `url` is currently running.
    #[must_use]
    pub fn is_in_flight(&self, url: &CacheKey) -> bool {
        self.inner.in_flight.is_in_flight(url)
    }

    /// Returns the number of running fetch pipelines.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Returns the number of targets with a binding.
    #[must_use]
    pub fn bound_targets(&self) -> usize {
        self.inner.bindings.len()
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryImageCache {
        &self.inner.memory
    }

    /// Returns a snapshot of cache and pipeline counters.
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            memory: self.inner.memory.stats(),
            in_flight: self.in_flight_count(),
            bound_targets: self.bound_targets(),
        }
    }

    /// Waits until every running pipeline, thumbnail write included, has
    /// finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active_pipelines.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }

    /// Drops every image held in memory.
    pub fn clear_memory(&self) {
        self.inner.memory.clear();
        info!("Cleared in-memory images");
    }
}

impl LoaderInner {
    async fn resolve(self: Arc<Self>, binding: Binding, use_local_store: bool) {
        let key = binding.key().clone();

        if use_local_store && let Some(image) = self.lookup_store(&key).await {
            self.deliver(&binding, Some(image), Some(ImageSource::LocalStore));
            return;
        }

        match self.fetch(&key, use_local_store).await {
            Ok((image, source)) => self.deliver(&binding, Some(image), Some(source)),
            Err(e) => {
                debug!(key = %key, error = %e, "No image available");
                self.deliver(&binding, None, None);
            }
        }
    }

    fn deliver(&self, binding: &Binding, image: Option<Arc<CachedImage>>, source: Option<ImageSource>) {
        self.bindings.deliver_if_current(binding, || {
            let event = ImageReadyEvent {
                target: binding.target().clone(),
                key: binding.key().clone(),
                image,
                source,
            };
            if self.event_tx.send(event).is_err() {
                debug!("Image event receiver dropped");
            }
        });
    }

    async fn lookup_store(&self, key: &CacheKey) -> Option<Arc<CachedImage>> {
        match self.store.get_thumbnail(key).await {
            Ok(Some(decoded)) => {
                let image = CachedImage::shared(key.clone(), decoded);
                self.memory.put(key.clone(), image.clone());
                Some(image)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Thumbnail store lookup failed");
                None
            }
        }
    }

    /// Joins or starts the pipeline for `key` and waits for its outcome.
    async fn fetch(
        self: &Arc<Self>,
        key: &CacheKey,
        persist: bool,
    ) -> Result<(Arc<CachedImage>, ImageSource), FetchError> {
        let acquired = self
            .in_flight
            .acquire(key, persist, || self.memory.get_uncounted(key))?;

        let listener = match acquired {
            Acquired::Cached(image) => return Ok((image, ImageSource::MemoryCache)),
            Acquired::Listener(listener) => listener,
            Acquired::Driver { driver, listener } => {
                let active = ActivePipeline::start(self.clone());
                self.runtime
                    .spawn(async move { active.run(driver).await });
                listener
            }
        };

        listener
            .wait()
            .await
            .map(|image| (image, ImageSource::Network))
    }

    async fn run_pipeline(&self, driver: FetchDriver) {
        let key = driver.key().clone();
        let outcome = self.download_and_decode(&key).await;

        match &outcome {
            Ok(image) => self.memory.put(key.clone(), image.clone()),
            Err(e) => warn!(key = %key, error = %e, "Image fetch failed"),
        }

        let image = outcome.as_ref().ok().cloned();
        if driver.complete(outcome)
            && let Some(image) = image
        {
            match self.store.put_thumbnail(&key, image.image()).await {
                Ok(()) => debug!(key = %key, "Persisted thumbnail"),
                Err(e) => warn!(key = %key, error = %e, "Failed to persist thumbnail"),
            }
        }
    }

    async fn download_and_decode(&self, key: &CacheKey) -> FetchOutcome {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| FetchError::network("worker pool closed"))?;

        debug!(key = %key, "Downloading image from network");
        let bytes = self.fetcher.fetch(key.as_str()).await?;

        let decoder = self.decoder;
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| FetchError::decode(format!("decode task panicked: {e}")))??;

        debug!(
            key = %key,
            width = decoded.width(),
            height = decoded.height(),
            "Image decoded"
        );
        Ok(CachedImage::shared(key.clone(), decoded))
    }
}

/// Counts a spawned pipeline as active until it finishes or is dropped.
struct ActivePipeline(Arc<LoaderInner>);

impl ActivePipeline {
    fn start(inner: Arc<LoaderInner>) -> Self {
        inner.active_pipelines.send_modify(|active| *active += 1);
        Self(inner)
    }

    async fn run(self, driver: FetchDriver) {
        self.0.run_pipeline(driver).await;
    }
}

impl Drop for ActivePipeline {
    fn drop(&mut self) {
        self.0
            .active_pipelines
            .send_modify(|active| *active = active.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::domain::errors::StoreError;
    use crate::domain::ports::mocks::{InMemoryThumbnailStore, MockByteFetcher, MockThumbnailStorePort};

    const A: &str = "http://x/a.jpg";
    const B: &str = "http://x/b.jpg";

    struct Harness {
        loader: ImageLoader,
        fetcher: Arc<MockByteFetcher>,
        store: Arc<InMemoryThumbnailStore>,
        rx: mpsc::UnboundedReceiver<ImageReadyEvent>,
    }

    fn harness_with(config: ImageLoaderConfig, store: InMemoryThumbnailStore) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(MockByteFetcher::new());
        let store = Arc::new(store);
        let loader = ImageLoader::new(config, fetcher.clone(), store.clone(), tx).unwrap();
        Harness {
            loader,
            fetcher,
            store,
            rx,
        }
    }

    fn harness() -> Harness {
        harness_with(ImageLoaderConfig::default(), InMemoryThumbnailStore::new())
    }

    fn t(id: &str) -> TargetId {
        TargetId::from(id)
    }

    fn k(url: &str) -> CacheKey {
        CacheKey::from(url)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ImageReadyEvent>) -> ImageReadyEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("event channel closed")
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    /// Waits for every pipeline to finish and the resolvers to run.
    async fn settle(loader: &ImageLoader) {
        wait_until(|| loader.in_flight_count() == 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_single_request_fetches_once_and_caches() {
        let mut h = harness();
        h.fetcher.respond_png(A, 10, 8);

        assert_eq!(h.loader.request_image(A, t("T1"), false), RequestStatus::Pending);
        let event = next_event(&mut h.rx).await;

        assert_eq!(event.target, t("T1"));
        assert_eq!(event.key, k(A));
        assert_eq!(event.source, Some(ImageSource::Network));
        let image = event.image.expect("image delivered");
        assert_eq!((image.width(), image.height()), (10, 8));
        assert_eq!(h.fetcher.calls(A), 1);
        assert!(h.loader.memory().peek(&k(A)).is_some());
    }

    #[tokio::test]
    async fn test_fetched_request_counts_one_memory_miss() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);

        h.loader.request_image(A, t("T1"), false);
        assert!(next_event(&mut h.rx).await.image.is_some());
        h.loader.wait_idle().await;

        let stats = h.loader.stats().memory;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);

        assert_eq!(h.loader.request_image(A, t("T2"), false), RequestStatus::Delivered);
        let stats = h.loader.stats().memory;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_fetch() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.gate(A);

        for i in 0..10 {
            h.loader.request_image(A, t(&format!("T{i}")), false);
        }
        wait_until(|| h.fetcher.calls(A) == 1).await;
        h.fetcher.release(A);

        let mut images = Vec::new();
        for _ in 0..10 {
            images.push(next_event(&mut h.rx).await.image.expect("image delivered"));
        }

        assert_eq!(h.fetcher.calls(A), 1);
        assert_eq!(h.fetcher.max_concurrent(A), 1);
        assert!(images.iter().all(|img| Arc::ptr_eq(img, &images[0])));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_failure() {
        let mut h = harness();
        h.fetcher.fail(A, "HTTP 503");
        h.fetcher.gate(A);

        h.loader.request_image(A, t("T1"), false);
        h.loader.request_image(A, t("T2"), false);
        wait_until(|| h.fetcher.calls(A) == 1).await;
        h.fetcher.release(A);

        assert!(next_event(&mut h.rx).await.image.is_none());
        assert!(next_event(&mut h.rx).await.image.is_none());
        assert_eq!(h.fetcher.calls(A), 1);
    }

    #[tokio::test]
    async fn test_rebound_target_only_receives_latest() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.respond_png(B, 6, 6);
        h.fetcher.gate(A);
        h.fetcher.gate(B);

        h.loader.request_image(A, t("T1"), false);
        h.loader.request_image(B, t("T1"), false);
        h.loader.request_image(A, t("T2"), false);

        wait_until(|| h.fetcher.calls(B) == 1).await;
        h.fetcher.release(B);
        let event = next_event(&mut h.rx).await;
        assert_eq!((event.target, event.key), (t("T1"), k(B)));

        h.fetcher.release(A);
        let event = next_event(&mut h.rx).await;
        assert_eq!((event.target, event.key), (t("T2"), k(A)));

        settle(&h.loader).await;
        assert!(h.rx.try_recv().is_err());
        // The superseded fetch still populated the cache.
        assert!(h.loader.memory().peek(&k(A)).is_some());
    }

    #[tokio::test]
    async fn test_memory_hit_supersedes_pending_fetch() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.gate(A);

        assert_eq!(h.loader.request_image(A, t("T1"), false), RequestStatus::Pending);
        wait_until(|| h.fetcher.calls(A) == 1).await;

        h.loader.memory().put(
            k(B),
            CachedImage::shared(k(B), image::DynamicImage::new_rgb8(6, 6)),
        );
        assert_eq!(h.loader.request_image(B, t("T1"), false), RequestStatus::Delivered);
        let event = h.rx.try_recv().expect("delivered synchronously");
        assert_eq!((event.target, event.key), (t("T1"), k(B)));
        assert_eq!(event.source, Some(ImageSource::MemoryCache));

        h.fetcher.release(A);
        h.loader.wait_idle().await;
        settle(&h.loader).await;

        assert!(h.rx.try_recv().is_err());
        assert!(h.loader.memory().peek(&k(A)).is_some());
    }

    #[tokio::test]
    async fn test_slow_store_hit_is_superseded() {
        let store = InMemoryThumbnailStore::with_thumbnail(&k(A), image::DynamicImage::new_rgb8(5, 5));
        let mut h = harness_with(ImageLoaderConfig::default(), store);
        h.store.gate_reads();

        assert_eq!(h.loader.request_image(A, t("T1"), true), RequestStatus::Pending);
        wait_until(|| h.store.reads() == 1).await;

        h.fetcher.respond_png(B, 6, 6);
        h.loader.request_image(B, t("T1"), false);
        let event = next_event(&mut h.rx).await;
        assert_eq!((event.target, event.key), (t("T1"), k(B)));
        assert_eq!(event.source, Some(ImageSource::Network));

        h.store.release_reads();
        wait_until(|| h.loader.memory().peek(&k(A)).is_some()).await;
        settle(&h.loader).await;

        assert!(h.rx.try_recv().is_err());
        assert_eq!(h.fetcher.calls(A), 0);
    }

    #[tokio::test]
    async fn test_rerequest_same_url_delivers_once() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.gate(A);

        h.loader.request_image(A, t("T1"), false);
        h.loader.request_image(A, t("T1"), false);
        wait_until(|| h.fetcher.calls(A) == 1).await;
        h.fetcher.release(A);

        assert!(next_event(&mut h.rx).await.image.is_some());
        settle(&h.loader).await;
        assert!(h.rx.try_recv().is_err());
        assert_eq!(h.fetcher.calls(A), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_next_time() {
        let mut h = harness();
        h.fetcher.fail(A, "HTTP 500");

        h.loader.request_image(A, t("T1"), false);
        let event = next_event(&mut h.rx).await;
        assert!(event.image.is_none());
        assert!(event.source.is_none());
        assert!(h.loader.memory().peek(&k(A)).is_none());

        h.fetcher.respond_png(A, 4, 4);
        h.loader.request_image(A, t("T1"), false);
        assert!(next_event(&mut h.rx).await.image.is_some());
        assert_eq!(h.fetcher.calls(A), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_delivers_absent() {
        let mut h = harness();
        h.fetcher.respond_bytes(A, &b"<html>gone</html>"[..]);

        h.loader.request_image(A, t("T1"), false);

        assert!(next_event(&mut h.rx).await.image.is_none());
        assert!(h.loader.memory().peek(&k(A)).is_none());
    }

    #[tokio::test]
    async fn test_memory_hit_delivers_immediately() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.loader.request_image(A, t("T1"), false);
        let first = next_event(&mut h.rx).await.image.unwrap();

        assert_eq!(h.loader.request_image(A, t("T2"), false), RequestStatus::Delivered);
        let event = h.rx.try_recv().expect("delivered synchronously");

        assert_eq!(event.target, t("T2"));
        assert_eq!(event.source, Some(ImageSource::MemoryCache));
        assert!(Arc::ptr_eq(&event.image.unwrap(), &first));
        assert_eq!(h.fetcher.calls(A), 1);
    }

    #[tokio::test]
    async fn test_reclaimed_entry_falls_through_to_network() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.loader.request_image(A, t("T1"), false);
        drop(next_event(&mut h.rx).await);

        h.loader.memory().evict(&k(A));

        assert_eq!(h.loader.request_image(A, t("T1"), false), RequestStatus::Pending);
        assert!(next_event(&mut h.rx).await.image.is_some());
        assert_eq!(h.fetcher.calls(A), 2);
    }

    #[tokio::test]
    async fn test_local_store_hit_skips_network() {
        let store = InMemoryThumbnailStore::with_thumbnail(&k(A), image::DynamicImage::new_rgb8(5, 5));
        let mut h = harness_with(ImageLoaderConfig::default(), store);

        h.loader.request_image(A, t("T1"), true);
        let event = next_event(&mut h.rx).await;

        assert_eq!(event.source, Some(ImageSource::LocalStore));
        assert_eq!(event.image.unwrap().width(), 5);
        assert_eq!(h.fetcher.calls(A), 0);
        assert!(h.loader.memory().peek(&k(A)).is_some());
    }

    #[tokio::test]
    async fn test_store_miss_fetches_once_and_persists() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);

        h.loader.request_image(A, t("T1"), true);
        let event = next_event(&mut h.rx).await;

        assert_eq!(event.source, Some(ImageSource::Network));
        assert_eq!(h.store.reads(), 1);
        assert_eq!(h.fetcher.calls(A), 1);
        h.loader.wait_idle().await;
        assert!(h.store.contains(&k(A)));
    }

    #[tokio::test]
    async fn test_no_persistence_unless_requested() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);

        h.loader.request_image(A, t("T1"), false);
        assert!(next_event(&mut h.rx).await.image.is_some());
        h.loader.wait_idle().await;

        assert!(!h.store.contains(&k(A)));
        assert_eq!(h.store.reads(), 0);
    }

    #[tokio::test]
    async fn test_store_failures_never_reach_the_target() {
        let attempted = Arc::new(AtomicBool::new(false));
        let mut store = MockThumbnailStorePort::new();
        store
            .expect_get_thumbnail()
            .returning(|_| Err(StoreError::Io("permission denied".to_string())));
        let flag = attempted.clone();
        store.expect_put_thumbnail().returning(move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Err(StoreError::Io("disk full".to_string()))
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(MockByteFetcher::new());
        fetcher.respond_png(A, 4, 4);
        let loader =
            ImageLoader::new(ImageLoaderConfig::default(), fetcher.clone(), Arc::new(store), tx)
                .unwrap();

        loader.request_image(A, t("T1"), true);
        assert!(next_event(&mut rx).await.image.is_some());

        wait_until(|| attempted.load(Ordering::SeqCst)).await;
        assert!(loader.memory().peek(&k(A)).is_some());
    }

    #[tokio::test]
    async fn test_capacity_exhaustion_delivers_absent() {
        let config = ImageLoaderConfig {
            max_in_flight: 1,
            ..ImageLoaderConfig::default()
        };
        let mut h = harness_with(config, InMemoryThumbnailStore::new());
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.respond_png(B, 4, 4);
        h.fetcher.gate(A);

        h.loader.request_image(A, t("T1"), false);
        wait_until(|| h.loader.is_in_flight(&k(A))).await;

        h.loader.request_image(B, t("T2"), false);
        let event = next_event(&mut h.rx).await;
        assert_eq!(event.target, t("T2"));
        assert!(event.image.is_none());
        assert_eq!(h.fetcher.calls(B), 0);

        h.fetcher.release(A);
        let event = next_event(&mut h.rx).await;
        assert_eq!(event.target, t("T1"));
        assert!(event.image.is_some());
    }

    #[tokio::test]
    async fn test_forgotten_target_receives_nothing() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.gate(A);

        h.loader.request_image(A, t("T1"), false);
        assert!(h.loader.forget_target(&t("T1")));
        assert_eq!(h.loader.bound_targets(), 0);
        wait_until(|| h.fetcher.calls(A) == 1).await;
        h.fetcher.release(A);

        settle(&h.loader).await;
        assert!(h.rx.try_recv().is_err());
        assert!(h.loader.memory().peek(&k(A)).is_some());
    }

    #[tokio::test]
    async fn test_prefetch_warms_cache() {
        let mut h = harness();
        h.fetcher.respond_png(A, 4, 4);
        h.fetcher.respond_png(B, 4, 4);

        h.loader.prefetch_batch([A, B], false);
        wait_until(|| {
            h.loader.memory().peek(&k(A)).is_some() && h.loader.memory().peek(&k(B)).is_some()
        })
        .await;

        assert_eq!(h.loader.request_image(A, t("T1"), false), RequestStatus::Delivered);
        assert!(h.rx.try_recv().is_ok());
        assert_eq!(h.fetcher.calls(A), 1);

        h.loader.wait_idle().await;
        let stats = h.loader.stats();
        assert_eq!(stats.memory.size, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.bound_targets, 1);
    }

    #[tokio::test]
    async fn test_downscales_with_max_dimension() {
        let config = ImageLoaderConfig {
            max_dimension: Some(16),
            ..ImageLoaderConfig::default()
        };
        let mut h = harness_with(config, InMemoryThumbnailStore::new());
        h.fetcher.respond_png(A, 64, 32);

        h.loader.request_image(A, t("T1"), false);
        let image = next_event(&mut h.rx).await.image.unwrap();

        assert_eq!((image.width(), image.height()), (16, 8));
    }

    #[test]
    fn test_new_requires_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = ImageLoader::new(
            ImageLoaderConfig::default(),
            Arc::new(MockByteFetcher::new()),
            Arc::new(InMemoryThumbnailStore::new()),
            tx,
        );
        assert!(matches!(result, Err(CacheError::NoRuntime(_))));
    }
}
