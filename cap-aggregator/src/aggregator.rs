use crate::cache::CachedFetcher;
use crate::detail::DetailResolver;
use crate::fetcher::HttpFetcher;
use crate::geo_filter::GeoFilter;
use crate::snapshot::FeedItems;
use crate::sources::{CapFeedSource, FeedEvent, UnresolvedItem};
use crate::traits::Fetcher;
use crate::types::{
    AggregatorError, AggregatorOptions, ErrorKind, FeedRegistration, FetchConfig, Result,
    TransportCause, TransportError,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

/// What the coordinator hands to its consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "notification", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregatorEvent {
    FeedItems { feeds: FeedItems },
    FeedError {
        kind: ErrorKind,
        url: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<TransportCause>,
    },
}

impl AggregatorEvent {
    fn from_error(error: &AggregatorError) -> Self {
        AggregatorEvent::FeedError {
            kind: error.kind(),
            url: error.url().to_string(),
            message: error.to_string(),
            cause: error.transport_cause(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleTrigger {
    FeedUpdate,
    DetailRetry,
}

/// Owns the feed sources, resolves alert detail, applies the geographic
/// filter and broadcasts the merged per-feed alert lists.
pub struct CapAggregator {
    options: AggregatorOptions,
    fetcher: Arc<dyn Fetcher>,
    resolver: DetailResolver,
    geo_filter: Option<GeoFilter>,
    sources: RwLock<HashMap<String, Arc<CapFeedSource>>>,
    feed_events: mpsc::UnboundedSender<FeedEvent>,
    feed_receiver: Mutex<Option<mpsc::UnboundedReceiver<FeedEvent>>>,
    output: mpsc::UnboundedSender<AggregatorEvent>,
    retry: Arc<Notify>,
    retry_pending: Arc<AtomicBool>,
    shutdown: Notify,
}

impl CapAggregator {
    pub fn new(
        options: AggregatorOptions,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<AggregatorEvent>) {
        let (feed_events, feed_receiver) = mpsc::unbounded_channel();
        let (output, output_receiver) = mpsc::unbounded_channel();

        let aggregator = Self {
            geo_filter: GeoFilter::from_options(&options),
            resolver: DetailResolver::new(Arc::clone(&fetcher)),
            options,
            fetcher,
            sources: RwLock::new(HashMap::new()),
            feed_events,
            feed_receiver: Mutex::new(Some(feed_receiver)),
            output,
            retry: Arc::new(Notify::new()),
            retry_pending: Arc::new(AtomicBool::new(false)),
            shutdown: Notify::new(),
        };

        (aggregator, output_receiver)
    }

    /// Build with the live HTTP client, behind the on-disk cache when
    /// `cache_feed` is set.
    pub fn with_config(
        options: AggregatorOptions,
        fetch_config: &FetchConfig,
    ) -> std::result::Result<(Self, mpsc::UnboundedReceiver<AggregatorEvent>), TransportError>
    {
        let http = HttpFetcher::new(fetch_config)?;
        let fetcher: Arc<dyn Fetcher> = if options.cache_feed {
            info!("Caching responses under {}", fetch_config.cache_dir.display());
            Arc::new(CachedFetcher::from_config(http, fetch_config))
        } else {
            Arc::new(http)
        };
        Ok(Self::new(options, fetcher))
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    pub fn geo_filter(&self) -> Option<&GeoFilter> {
        self.geo_filter.as_ref()
    }

    /// Register a feed. Registering a URL that already has a source only
    /// lowers its reload interval and re-broadcasts its current items.
    pub async fn add_feed(&self, registration: FeedRegistration) -> Result<()> {
        if let Err(source) = Url::parse(&registration.url) {
            let error = AggregatorError::MalformedUrl {
                url: registration.url.clone(),
                source,
            };
            error!("CAP feed error: {}", error);
            self.report(&error);
            return Err(error);
        }

        let interval_ms = registration
            .reload_interval_ms
            .unwrap_or(self.options.reload_interval_ms);

        let mut sources = self.sources.write().await;
        if let Some(existing) = sources.get(&registration.url) {
            let existing = Arc::clone(existing);
            drop(sources);

            info!("Use existing feed source for url: {}", registration.url);
            existing.set_reload_interval(interval_ms);

            if existing.item_count().await == 0 {
                info!("No items to broadcast yet for {}", registration.url);
            } else if self
                .feed_events
                .send(FeedEvent::ItemsReceived {
                    url: registration.url.clone(),
                })
                .is_err()
            {
                warn!("Coordinator is not running; skipping re-broadcast");
            }
            return Ok(());
        }

        info!(
            "Create new feed source for url: {} - Interval: {}",
            registration.url, interval_ms
        );
        let source = Arc::new(CapFeedSource::new(
            &registration,
            self.options.reload_interval_ms,
            self.options.log_feed_warnings,
            Arc::clone(&self.fetcher),
            self.feed_events.clone(),
        ));
        sources.insert(registration.url.clone(), Arc::clone(&source));
        drop(sources);

        source.start_fetch();
        Ok(())
    }

    pub async fn source(&self, url: &str) -> Option<Arc<CapFeedSource>> {
        self.sources.read().await.get(url).cloned()
    }

    pub async fn feed_urls(&self) -> Vec<String> {
        self.sources.read().await.keys().cloned().collect()
    }

    /// True once every registered feed has finished at least one fetch.
    pub async fn all_feeds_settled(&self) -> bool {
        self.sources
            .read()
            .await
            .values()
            .all(|source| source.completed_cycles() > 0)
    }

    /// Current per-feed items, without running a cycle.
    pub async fn feed_items(&self) -> FeedItems {
        let sources = self.snapshot_sources().await;
        collect_items(&sources).await
    }

    /// Consume feed events until [`shutdown`](Self::shutdown). Only one
    /// caller can run the loop.
    pub async fn run(&self) {
        let Some(mut receiver) = self.feed_receiver.lock().await.take() else {
            warn!("Coordinator loop is already running");
            return;
        };

        info!("Coordinator started");
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(FeedEvent::ItemsReceived { url }) => {
                        debug!("Items received from {}", url);
                        self.run_cycle(CycleTrigger::FeedUpdate).await;
                    }
                    Some(FeedEvent::FetchFailed { url, error }) => {
                        debug!("Fetch failed for {}", url);
                        self.report(&error);
                    }
                    None => break,
                },
                _ = self.retry.notified() => {
                    self.run_cycle(CycleTrigger::DetailRetry).await;
                }
                _ = self.shutdown.notified() => break,
            }
        }

        *self.feed_receiver.lock().await = Some(receiver);
        info!("Coordinator stopped");
    }

    /// Run one full cycle now: resolve missing detail across all feeds,
    /// filter, broadcast.
    pub async fn process_alerts(&self) {
        self.run_cycle(CycleTrigger::FeedUpdate).await;
    }

    /// Stop every feed's reload timer and the coordinator loop.
    pub async fn shutdown(&self) {
        for source in self.snapshot_sources().await {
            source.stop();
        }
        self.shutdown.notify_one();
    }

    async fn run_cycle(&self, trigger: CycleTrigger) {
        let sources = self.snapshot_sources().await;

        let failures = self.resolve_details(&sources).await;

        if let Some(filter) = &self.geo_filter {
            for source in &sources {
                let removed = source.retain_items(filter).await;
                if removed > 0 {
                    debug!("Geo filter removed {} alerts from {}", removed, source.url());
                }
            }
        }

        if failures > 0 && trigger == CycleTrigger::FeedUpdate {
            self.schedule_detail_retry();
        }

        let feeds = collect_items(&sources).await;
        debug!(
            "Sending {} alerts for {} feeds",
            feeds.total_items(),
            feeds.feed_count()
        );
        self.send(AggregatorEvent::FeedItems { feeds });
    }

    /// Resolve every missing detail concurrently and wait for all of them.
    /// Stubs sharing a detail URL share one request. Returns the number of
    /// failed resolutions.
    async fn resolve_details(&self, sources: &[Arc<CapFeedSource>]) -> usize {
        let mut pending: HashMap<String, Vec<(Arc<CapFeedSource>, UnresolvedItem)>> =
            HashMap::new();
        for source in sources {
            for item in source.unresolved_items().await {
                pending
                    .entry(item.detail_url.clone())
                    .or_default()
                    .push((Arc::clone(source), item));
            }
        }

        if pending.is_empty() {
            return 0;
        }
        debug!("Resolving {} alert details", pending.len());

        let resolutions = join_all(pending.keys().map(|url| async move {
            let outcome = self.resolver.resolve(url).await;
            (url.clone(), outcome)
        }))
        .await;

        let mut failures = 0;
        for (url, outcome) in resolutions {
            let waiting = pending.remove(&url).unwrap_or_default();
            match outcome {
                Ok(detail) => {
                    for (source, item) in waiting {
                        source.attach_detail(&item, detail.clone()).await;
                    }
                }
                Err(error) => {
                    failures += 1;
                    error!("CAP feed error: {}", error);
                    self.report(&error);
                }
            }
        }
        failures
    }

    fn schedule_detail_retry(&self) {
        if self.options.retry_delay_ms == 0 || self.retry_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let delay = Duration::from_millis(self.options.retry_delay_ms);
        let retry = Arc::clone(&self.retry);
        let pending = Arc::clone(&self.retry_pending);
        debug!("Retrying failed alert details in {:?}", delay);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.store(false, Ordering::SeqCst);
            retry.notify_one();
        });
    }

    async fn snapshot_sources(&self) -> Vec<Arc<CapFeedSource>> {
        self.sources.read().await.values().cloned().collect()
    }

    fn report(&self, error: &AggregatorError) {
        self.send(AggregatorEvent::from_error(error));
    }

    fn send(&self, event: AggregatorEvent) {
        if self.output.send(event).is_err() {
            debug!("Consumer dropped; event discarded");
        }
    }
}

async fn collect_items(sources: &[Arc<CapFeedSource>]) -> FeedItems {
    let mut feeds = FeedItems::new();
    for source in sources {
        feeds.insert(source.url(), source.items().await);
    }
    feeds
}
