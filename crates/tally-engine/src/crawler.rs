use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tally_db::RecordOutcome;
use tally_types::models::{ChannelCursor, ChannelId};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::counter_cache::CounterCache;
use crate::cursor_cache::CursorCache;
use crate::error::{EngineError, FetchError, Result};
use crate::source::{ChannelDirectory, HistoryFetcher};

/// Messages requested per channel per cycle.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub page_size: usize,
    /// Pause between cycles while there is backlog left.
    pub interval: Duration,
    /// Pause after a cycle that found nothing to read.
    pub idle_cooldown: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            interval: Duration::from_secs(10),
            idle_cooldown: Duration::from_secs(10 * 60),
        }
    }
}

/// What one page did to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel_id: ChannelId,
    pub fetched: usize,
    /// Messages counted for the first time. Lower than `fetched` when live
    /// events got there first.
    pub counted: usize,
    pub furthest_read: Option<DateTime<Utc>>,
    pub fully_read: bool,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    /// Channels with backlog left that this cycle could see.
    pub eligible: usize,
    pub channels: Vec<ChannelReport>,
    pub failures: Vec<(ChannelId, String)>,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.eligible == 0
    }

    pub fn messages_counted(&self) -> usize {
        self.channels.iter().map(|c| c.counted).sum()
    }
}

type ChannelResult = (ChannelId, Result<ChannelReport>);

struct Dispatch {
    eligible: usize,
    dispatched: usize,
}

/// Incremental history backfill.
///
/// Each cycle reads one page per channel that still has backlog, newest to
/// oldest, counts what it finds and only then moves the channel's cursor.
/// A failed page leaves the cursor where it was, so the next cycle retries
/// the same page; messages counted on the failed attempt are deduplicated.
/// A channel the source refuses is left alone until its permissions change.
#[derive(Clone)]
pub struct Crawler {
    inner: Arc<CrawlerInner>,
}

struct CrawlerInner {
    config: CrawlerConfig,
    cursors: CursorCache,
    counters: CounterCache,
    fetcher: Arc<dyn HistoryFetcher>,
    directory: Arc<dyn ChannelDirectory>,
    /// Channels whose page is still being processed.
    in_flight: Mutex<HashSet<ChannelId>>,
    /// Channels the source refused, with when it last did.
    denied: Mutex<HashMap<ChannelId, Instant>>,
    cycles: AtomicU64,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        cursors: CursorCache,
        counters: CounterCache,
        fetcher: Arc<dyn HistoryFetcher>,
        directory: Arc<dyn ChannelDirectory>,
    ) -> Self {
        Self {
            inner: Arc::new(CrawlerInner {
                config,
                cursors,
                counters,
                fetcher,
                directory,
                in_flight: Mutex::new(HashSet::new()),
                denied: Mutex::new(HashMap::new()),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Run one cycle to completion and report on every channel it touched.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut tasks = JoinSet::new();
        let dispatch = self.dispatch(&mut tasks).await?;

        let mut report = CycleReport {
            eligible: dispatch.eligible,
            ..CycleReport::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match flatten(joined) {
                Ok(channel) => report.channels.push(channel),
                Err((channel_id, err)) => report.failures.push((channel_id, err.to_string())),
            }
        }
        Ok(report)
    }

    /// Crawl until `cancel` fires. Pages already in flight are allowed to
    /// finish before this returns.
    ///
    /// A channel whose page outlives the cycle interval is skipped by later
    /// cycles until it completes; other channels keep progressing.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks: JoinSet<ChannelResult> = JoinSet::new();
        info!(
            page_size = self.inner.config.page_size,
            interval_secs = self.inner.config.interval.as_secs(),
            "Crawler started"
        );

        loop {
            let cycle = self.inner.cycles.fetch_add(1, Ordering::Relaxed) + 1;
            let dispatched = tokio::select! {
                _ = cancel.cancelled() => {
                    drain(&mut tasks).await;
                    return;
                }
                dispatched = self.dispatch(&mut tasks) => dispatched,
            };
            let pause = match dispatched {
                Ok(dispatch) => {
                    info!(
                        cycle,
                        eligible = dispatch.eligible,
                        dispatched = dispatch.dispatched,
                        "Crawl cycle"
                    );
                    if dispatch.eligible == 0 && tasks.is_empty() {
                        info!(
                            cooldown_secs = self.inner.config.idle_cooldown.as_secs(),
                            "No channel has backlog left, cooling down"
                        );
                        self.inner.config.idle_cooldown
                    } else {
                        self.inner.config.interval
                    }
                }
                Err(e) => {
                    warn!(cycle, "Crawl cycle failed: {}", e);
                    self.inner.config.interval
                }
            };

            let sleep = tokio::time::sleep(pause);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        drain(&mut tasks).await;
                        return;
                    }
                    _ = &mut sleep => break,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_result(joined),
                }
            }
        }
    }

    /// Spawn one page task per eligible channel that is not already in flight.
    async fn dispatch(&self, tasks: &mut JoinSet<ChannelResult>) -> Result<Dispatch> {
        let eligible = self.eligible_channels().await?;
        let mut dispatched = 0;

        for cursor in &eligible {
            let channel_id = cursor.channel_id;
            let Some(claim) = InFlight::claim(&self.inner, channel_id) else {
                debug!(%channel_id, "Previous page still in flight, skipping");
                continue;
            };

            let inner = self.inner.clone();
            let cursor = cursor.clone();
            tasks.spawn(async move {
                let _claim = claim;
                (channel_id, inner.crawl_channel(cursor).await)
            });
            dispatched += 1;
        }

        Ok(Dispatch {
            eligible: eligible.len(),
            dispatched,
        })
    }

    /// Readable channels that have not been fully read, registering any the
    /// store has not seen yet.
    ///
    /// A channel whose fetch was refused stays out until the directory stops
    /// listing it as readable or the idle cooldown has passed.
    async fn eligible_channels(&self) -> Result<Vec<ChannelCursor>> {
        let channels = self.inner.directory.list_channels().await?;
        let mut eligible = Vec::new();

        for channel_id in channels {
            if !self.inner.directory.can_read_history(channel_id).await {
                debug!(%channel_id, "History not readable, skipping");
                self.inner.allow(channel_id);
                continue;
            }
            if self.inner.is_denied(channel_id) {
                debug!(%channel_id, "Source refused this channel recently, skipping");
                continue;
            }

            match self.inner.cursors.register(channel_id).await {
                Ok(cursor) if cursor.fully_read => {}
                Ok(cursor) => eligible.push(cursor),
                Err(e) => warn!(%channel_id, "Failed to load cursor: {}", e),
            }
        }

        Ok(eligible)
    }
}

impl CrawlerInner {
    async fn crawl_channel(&self, cursor: ChannelCursor) -> Result<ChannelReport> {
        let channel_id = cursor.channel_id;
        let page_size = self.config.page_size.max(1);

        let page = match self
            .fetcher
            .fetch_page(channel_id, cursor.furthest_read, page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                if matches!(e, FetchError::Forbidden(_)) {
                    self.deny(channel_id);
                }
                return Err(e.into());
            }
        };

        let mut counted = 0;
        let mut first_error: Option<EngineError> = None;
        let mut failed = 0;
        for message in &page {
            match self.counters.record(message).await {
                Ok(RecordOutcome::Counted { .. }) => counted += 1,
                Ok(RecordOutcome::Duplicate) => {}
                Err(e) => {
                    failed += 1;
                    warn!(%channel_id, message_id = %message.id, "Failed to record message: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(err) = first_error {
            warn!(%channel_id, failed, "Page not fully persisted, cursor left in place");
            return Err(err);
        }

        let oldest = page.iter().map(|m| m.created_at).min();
        let fully_read = page.len() < page_size;
        let cursor = self.cursors.advance(channel_id, oldest, fully_read).await?;

        if cursor.fully_read {
            info!(%channel_id, fetched = page.len(), counted, "Channel history fully read");
        } else {
            debug!(%channel_id, fetched = page.len(), counted, "Read history page");
        }

        Ok(ChannelReport {
            channel_id,
            fetched: page.len(),
            counted,
            furthest_read: cursor.furthest_read,
            fully_read: cursor.fully_read,
        })
    }

    fn deny(&self, channel_id: ChannelId) {
        self.denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id, Instant::now());
    }

    fn allow(&self, channel_id: ChannelId) {
        self.denied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel_id);
    }

    fn is_denied(&self, channel_id: ChannelId) -> bool {
        let mut denied = self.denied.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match denied.get(&channel_id) {
            Some(since) => since.elapsed() >= self.config.idle_cooldown,
            None => return false,
        };
        if expired {
            denied.remove(&channel_id);
        }
        !expired
    }
}

/// Marks a channel as having a page in flight until dropped.
struct InFlight {
    inner: Arc<CrawlerInner>,
    channel_id: ChannelId,
}

impl InFlight {
    fn claim(inner: &Arc<CrawlerInner>, channel_id: ChannelId) -> Option<Self> {
        let mut in_flight = inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(channel_id) {
            return None;
        }
        Some(Self {
            inner: inner.clone(),
            channel_id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.channel_id);
    }
}

fn flatten(
    joined: std::result::Result<ChannelResult, JoinError>,
) -> std::result::Result<ChannelReport, (ChannelId, EngineError)> {
    match joined {
        Ok((_, Ok(report))) => Ok(report),
        Ok((channel_id, Err(err))) => Err((channel_id, err)),
        // The channel is unknown once its task has panicked
        Err(join_err) => Err((ChannelId(0), EngineError::Task(join_err))),
    }
}

async fn drain(tasks: &mut JoinSet<ChannelResult>) {
    info!(in_flight = tasks.len(), "Crawler stopping");
    while let Some(joined) = tasks.join_next().await {
        log_result(joined);
    }
}

fn log_result(joined: std::result::Result<ChannelResult, JoinError>) {
    match flatten(joined) {
        Ok(_) => {}
        Err((channel_id, EngineError::Fetch(e @ FetchError::Forbidden(_)))) => {
            info!(%channel_id, "Pausing channel until permissions change: {}", e);
        }
        Err((channel_id, EngineError::Fetch(e))) if e.is_transient() => {
            warn!(%channel_id, "Channel page failed, will retry next cycle: {}", e);
        }
        Err((channel_id, e)) => {
            error!(%channel_id, "Channel page failed: {}", e);
        }
    }
}
