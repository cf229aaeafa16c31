#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tally_db::Database;
use tally_engine::{
    ChannelDirectory, CounterCache, Crawler, CrawlerConfig, CursorCache, EventIngestor, FetchError,
    HistoryFetcher,
};
use tally_types::models::{ChannelId, Message, MessageId, UserId};
use tokio::sync::Notify;

/// In-memory message source with injectable failures and stalls.
#[derive(Default)]
pub struct FakeSource {
    channels: Mutex<Vec<(ChannelId, bool)>>,
    /// Newest first, like the real source.
    history: Mutex<HashMap<ChannelId, Vec<Message>>>,
    failures: Mutex<HashMap<ChannelId, usize>>,
    refused: Mutex<HashSet<ChannelId>>,
    listing_failures: Mutex<usize>,
    listings: AtomicUsize,
    stall: Mutex<Option<ChannelId>>,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    pub fetches: Mutex<Vec<(ChannelId, Option<DateTime<Utc>>)>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_channel(&self, channel_id: ChannelId, readable: bool, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.channels.lock().unwrap().push((channel_id, readable));
        self.history.lock().unwrap().insert(channel_id, messages);
    }

    pub fn fail_next(&self, channel_id: ChannelId, times: usize) {
        self.failures.lock().unwrap().insert(channel_id, times);
    }

    /// Listed as readable, but every fetch is refused.
    pub fn refuse(&self, channel_id: ChannelId, refused: bool) {
        let mut set = self.refused.lock().unwrap();
        if refused {
            set.insert(channel_id);
        } else {
            set.remove(&channel_id);
        }
    }

    pub fn set_readable(&self, channel_id: ChannelId, readable: bool) {
        for entry in self.channels.lock().unwrap().iter_mut() {
            if entry.0 == channel_id {
                entry.1 = readable;
            }
        }
    }

    pub fn fail_listing(&self, times: usize) {
        *self.listing_failures.lock().unwrap() = times;
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    /// Block the next fetch for `channel_id` until `release` is notified.
    pub fn stall(&self, channel_id: ChannelId) {
        *self.stall.lock().unwrap() = Some(channel_id);
    }

    pub fn fetches_for(&self, channel_id: ChannelId) -> Vec<Option<DateTime<Utc>>> {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == channel_id)
            .map(|(_, before)| *before)
            .collect()
    }
}

#[async_trait]
impl HistoryFetcher for FakeSource {
    async fn fetch_page(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, FetchError> {
        self.fetches.lock().unwrap().push((channel_id, before));

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&channel_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FetchError::Transient("rate limited".into()));
                }
            }
        }

        if self.refused.lock().unwrap().contains(&channel_id) {
            return Err(FetchError::Forbidden(channel_id));
        }

        let stalled = self.stall.lock().unwrap().take_if(|c| *c == channel_id).is_some();
        if stalled {
            self.entered.notify_one();
            self.release.notified().await;
        }

        let history = self.history.lock().unwrap();
        let page = history
            .get(&channel_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| before.is_none_or(|b| m.created_at < b))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(page)
    }
}

#[async_trait]
impl ChannelDirectory for FakeSource {
    async fn list_channels(&self) -> Result<Vec<ChannelId>, FetchError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        {
            let mut left = self.listing_failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::Transient("directory unavailable".into()));
            }
        }
        Ok(self.channels.lock().unwrap().iter().map(|(c, _)| *c).collect())
    }

    async fn can_read_history(&self, channel_id: ChannelId) -> bool {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .any(|(c, readable)| *c == channel_id && *readable)
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
}

pub fn ts_micros(secs: i64, micros: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(1_600_000_000 + secs, micros * 1_000).unwrap()
}

pub fn message(id: i64, author: i64, channel: i64, secs: i64) -> Message {
    Message {
        id: MessageId(id),
        author_id: UserId(author),
        channel_id: ChannelId(channel),
        created_at: ts(secs),
        content: format!("message {id}"),
        attachment_count: 0,
        embeds: Vec::new(),
    }
}

/// `count` messages in `channel`, one second apart, authors cycling through
/// `authors`. Message ids grow with time.
pub fn backlog(channel: i64, count: i64, authors: i64) -> Vec<Message> {
    (0..count)
        .map(|i| message(channel * 1_000_000 + i, 1 + i % authors, channel, i))
        .collect()
}

pub struct Harness {
    pub db: Arc<Database>,
    pub source: Arc<FakeSource>,
    pub cursors: CursorCache,
    pub counters: CounterCache,
    pub crawler: Crawler,
    pub ingestor: EventIngestor,
}

pub fn harness(db: Arc<Database>, source: Arc<FakeSource>, page_size: usize) -> Harness {
    let config = CrawlerConfig {
        page_size,
        interval: Duration::from_millis(20),
        idle_cooldown: Duration::from_millis(50),
    };
    harness_with(db, source, config)
}

pub fn harness_with(db: Arc<Database>, source: Arc<FakeSource>, config: CrawlerConfig) -> Harness {
    let cursors = CursorCache::new(db.clone());
    let counters = CounterCache::new(db.clone());
    let crawler = Crawler::new(
        config,
        cursors.clone(),
        counters.clone(),
        source.clone(),
        source.clone(),
    );
    let ingestor = EventIngestor::new(db.clone(), cursors.clone(), counters.clone());
    Harness {
        db,
        source,
        cursors,
        counters,
        crawler,
        ingestor,
    }
}

pub fn in_memory(source: Arc<FakeSource>, page_size: usize) -> Harness {
    harness(Arc::new(Database::open_in_memory().unwrap()), source, page_size)
}
