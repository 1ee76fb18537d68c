use crate::geo_filter::GeoFilter;
use crate::parser::{FeedParser, ParsedFeed};
use crate::traits::{FetchedDocument, Fetcher};
use crate::types::{AggregatorError, AlertDetail, AlertStub, FeedRegistration, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lower bound for any reload interval.
pub const MIN_RELOAD_INTERVAL_MS: u64 = 1_000;
/// Upper bound for an interval raised by a feed `ttl` hint.
pub const MAX_TTL_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    Parsing,
    Error,
}

/// Notifications from a feed source to whoever owns its event channel.
#[derive(Debug)]
pub enum FeedEvent {
    ItemsReceived { url: String },
    FetchFailed { url: String, error: AggregatorError },
}

/// A stub whose detail is still missing, addressed by the item list
/// generation it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedItem {
    pub generation: u64,
    pub index: usize,
    pub detail_url: String,
}

#[derive(Debug, Default)]
struct ItemList {
    generation: u64,
    items: Vec<AlertStub>,
}

/// Polls one CAP feed on its own reload timer and keeps the stubs of the
/// most recently completed parse.
pub struct CapFeedSource {
    url: String,
    title: String,
    encoding: String,
    reload_interval_ms: AtomicU64,
    items: RwLock<ItemList>,
    state: Mutex<FetchState>,
    reload_timer: Mutex<Option<JoinHandle<()>>>,
    completed_cycles: AtomicU64,
    stopped: AtomicBool,
    fetcher: Arc<dyn Fetcher>,
    parser: FeedParser,
    events: mpsc::UnboundedSender<FeedEvent>,
}

impl CapFeedSource {
    pub fn new(
        registration: &FeedRegistration,
        default_interval_ms: u64,
        log_feed_warnings: bool,
        fetcher: Arc<dyn Fetcher>,
        events: mpsc::UnboundedSender<FeedEvent>,
    ) -> Self {
        let interval_ms = registration
            .reload_interval_ms
            .unwrap_or(default_interval_ms)
            .max(MIN_RELOAD_INTERVAL_MS);

        Self {
            url: registration.url.clone(),
            title: registration.title.clone(),
            encoding: registration.encoding.clone(),
            reload_interval_ms: AtomicU64::new(interval_ms),
            items: RwLock::new(ItemList::default()),
            state: Mutex::new(FetchState::Idle),
            reload_timer: Mutex::new(None),
            completed_cycles: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            fetcher,
            parser: FeedParser::new(registration.use_cors_proxy, log_feed_warnings),
            events,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn state(&self) -> FetchState {
        *lock(&self.state)
    }

    pub fn reload_interval_ms(&self) -> u64 {
        self.reload_interval_ms.load(Ordering::SeqCst)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms())
    }

    /// Number of fetch cycles that have finished, successfully or not.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::SeqCst)
    }

    pub fn has_pending_reload(&self) -> bool {
        lock(&self.reload_timer).is_some()
    }

    /// Lower the reload interval. Larger values, and values under the
    /// one-second floor, are ignored. Returns whether the interval changed.
    pub fn set_reload_interval(&self, interval_ms: u64) -> bool {
        if interval_ms < MIN_RELOAD_INTERVAL_MS {
            return false;
        }
        let lowered = self
            .reload_interval_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (interval_ms < current).then_some(interval_ms)
            })
            .is_ok();
        if lowered {
            info!("Reload interval for {} lowered to {}ms", self.url, interval_ms);
        }
        lowered
    }

    /// Apply a feed `ttl` hint in minutes. The interval only ever grows from
    /// this, capped at 24 hours. Returns whether the interval changed.
    pub fn apply_ttl(&self, minutes: u32) -> bool {
        let ttl_ms = u64::from(minutes)
            .saturating_mul(60 * 1000)
            .min(MAX_TTL_INTERVAL_MS);
        let raised = self
            .reload_interval_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (ttl_ms > current).then_some(ttl_ms)
            })
            .is_ok();
        if raised {
            info!("Reload interval set to ttl={}ms for url {}", ttl_ms, self.url);
        }
        raised
    }

    /// Snapshot of the current stubs.
    pub async fn items(&self) -> Vec<AlertStub> {
        self.items.read().await.items.clone()
    }

    pub async fn item_count(&self) -> usize {
        self.items.read().await.items.len()
    }

    pub async fn generation(&self) -> u64 {
        self.items.read().await.generation
    }

    /// Stubs that still lack detail and have a URL to resolve it from.
    pub async fn unresolved_items(&self) -> Vec<UnresolvedItem> {
        let list = self.items.read().await;
        list.items
            .iter()
            .enumerate()
            .filter(|(_, stub)| !stub.is_resolved() && !stub.detail_url.is_empty())
            .map(|(index, stub)| UnresolvedItem {
                generation: list.generation,
                index,
                detail_url: stub.detail_url.clone(),
            })
            .collect()
    }

    /// Attach resolved detail to a stub, unless the item list has been
    /// replaced since `item` was read or the stub already has detail.
    pub async fn attach_detail(&self, item: &UnresolvedItem, detail: Vec<AlertDetail>) -> bool {
        let mut list = self.items.write().await;
        if list.generation != item.generation {
            debug!(
                "Discarding detail for {}: feed {} was refreshed",
                item.detail_url, self.url
            );
            return false;
        }
        match list.items.get_mut(item.index) {
            Some(stub) if !stub.is_resolved() && stub.detail_url == item.detail_url => {
                stub.detail = Some(detail);
                true
            }
            _ => false,
        }
    }

    /// Remove the stubs the filter rejects. Returns how many were removed.
    pub async fn retain_items(&self, filter: &GeoFilter) -> usize {
        let mut list = self.items.write().await;
        filter.apply(&mut list.items)
    }

    /// Fetch now. Any pending scheduled reload is cancelled; a request that
    /// is already in flight is left to finish.
    pub fn start_fetch(self: &Arc<Self>) {
        self.cancel_reload();
        let source = Arc::clone(self);
        tokio::spawn(async move { source.run_cycle().await });
    }

    /// Stop polling. In-flight requests still complete but schedule nothing.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel_reload();
    }

    async fn run_cycle(self: Arc<Self>) {
        self.set_state(FetchState::Fetching);

        match self.fetch_items().await {
            Ok(parsed) => {
                if let Some(minutes) = parsed.ttl_minutes {
                    self.apply_ttl(minutes);
                }

                let count = parsed.items.len();
                {
                    let mut list = self.items.write().await;
                    list.items = parsed.items;
                    list.generation += 1;
                }
                self.set_state(FetchState::Idle);
                self.completed_cycles.fetch_add(1, Ordering::SeqCst);

                info!("Received {} items from {}", count, self.url);
                self.emit(FeedEvent::ItemsReceived {
                    url: self.url.clone(),
                });
            }
            Err(error) => {
                self.set_state(FetchState::Error);
                self.completed_cycles.fetch_add(1, Ordering::SeqCst);

                error!("CAP feed error: {}", error);
                self.emit(FeedEvent::FetchFailed {
                    url: self.url.clone(),
                    error,
                });
            }
        }

        self.schedule_reload();
        self.set_state(FetchState::Idle);
    }

    async fn fetch_items(&self) -> Result<ParsedFeed> {
        let document = self
            .fetcher
            .fetch(&self.url)
            .await
            .and_then(FetchedDocument::error_for_status)
            .map_err(|source| AggregatorError::FeedTransport {
                url: self.url.clone(),
                source,
            })?;

        self.set_state(FetchState::Parsing);

        self.parser
            .parse_feed(&document.body, &self.encoding)
            .map_err(|e| AggregatorError::FeedParse {
                url: self.url.clone(),
                message: e.to_string(),
            })
    }

    fn schedule_reload(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let delay = self.reload_interval();
        let source = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(source) = source.upgrade() {
                if source.release_own_timer() {
                    source.start_fetch();
                }
            }
        });

        debug!("Next fetch of {} in {:?}", self.url, delay);
        if let Some(previous) = lock(&self.reload_timer).replace(handle) {
            previous.abort();
        }
    }

    /// Called from inside a reload timer task. Clears the stored handle only
    /// if it belongs to the calling task, so start_fetch does not abort it.
    /// Returns false if this timer was replaced or the source was stopped.
    fn release_own_timer(&self) -> bool {
        let mut timer = lock(&self.reload_timer);
        let own = timer
            .as_ref()
            .is_some_and(|handle| handle.id() == tokio::task::id());
        if !own || self.stopped.load(Ordering::SeqCst) {
            debug!("Stale reload timer for {} skipped", self.url);
            return false;
        }
        timer.take();
        true
    }

    fn cancel_reload(&self) {
        if let Some(timer) = lock(&self.reload_timer).take() {
            timer.abort();
        }
    }

    fn set_state(&self, state: FetchState) {
        *lock(&self.state) = state;
    }

    fn emit(&self, event: FeedEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for events of {}", self.url);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
