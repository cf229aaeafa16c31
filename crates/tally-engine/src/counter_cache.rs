use std::collections::HashMap;
use std::sync::Arc;

use tally_db::{Database, RecordOutcome};
use tally_types::models::{ChannelCount, ChannelId, Message, UserCount, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::EngineError;
use crate::{Result, blocking};

/// Per-user aggregate view of the counters, loaded lazily from the store.
///
/// Increments are never computed locally. The store performs the add and
/// the cache keeps the returned value; counters only grow, so merging by
/// `max` makes concurrent loads and increments commute.
#[derive(Clone)]
pub struct CounterCache {
    inner: Arc<CounterCacheInner>,
}

struct CounterCacheInner {
    db: Arc<Database>,
    users: RwLock<HashMap<UserId, HashMap<ChannelId, u64>>>,
}

impl CounterCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(CounterCacheInner {
                db,
                users: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Add `delta` to the user's counter in `channel_id` and return the stored total.
    pub async fn touch(&self, user_id: UserId, channel_id: ChannelId, delta: u64) -> Result<u64> {
        self.ensure_loaded(user_id).await?;
        let counter = blocking(&self.inner.db, move |db| {
            db.increment_counter(user_id, channel_id, delta)
        })
        .await?;
        self.observe(user_id, channel_id, counter).await;
        Ok(counter)
    }

    /// Persist a message and count it for its author unless its id was
    /// counted before.
    pub async fn record(&self, message: &Message) -> Result<RecordOutcome> {
        let (user_id, channel_id) = (message.author_id, message.channel_id);
        self.ensure_loaded(user_id).await?;

        let msg = message.clone();
        let outcome = blocking(&self.inner.db, move |db| db.record_message(&msg)).await?;
        match outcome {
            RecordOutcome::Counted { counter } => self.observe(user_id, channel_id, counter).await,
            RecordOutcome::Duplicate => {
                debug!(message_id = %message.id, %channel_id, "Message already counted");
            }
        }
        Ok(outcome)
    }

    pub async fn get_count(&self, user_id: UserId, channel_id: ChannelId) -> Result<u64> {
        self.ensure_loaded(user_id).await?;
        let users = self.inner.users.read().await;
        Ok(users
            .get(&user_id)
            .and_then(|channels| channels.get(&channel_id))
            .copied()
            .unwrap_or(0))
    }

    pub async fn total_for_user(&self, user_id: UserId) -> Result<u64> {
        self.ensure_loaded(user_id).await?;
        let users = self.inner.users.read().await;
        Ok(users.get(&user_id).map(|channels| channels.values().sum()).unwrap_or(0))
    }

    /// The user's busiest channels among `candidates`, quietest first.
    ///
    /// Keeps the top `limit` by count (ties resolved by candidate order),
    /// drops channels with no messages and returns them in ascending count
    /// order. Fails with [`EngineError::NoActivity`] when no candidate has
    /// a positive count, so "nothing at all" stays distinguishable from a
    /// short list.
    pub async fn most_active(
        &self,
        user_id: UserId,
        candidates: &[ChannelId],
        limit: usize,
    ) -> Result<Vec<ChannelCount>> {
        self.ensure_loaded(user_id).await?;
        let mut ranked: Vec<ChannelCount> = {
            let users = self.inner.users.read().await;
            let channels = users.get(&user_id);
            candidates
                .iter()
                .map(|&channel_id| ChannelCount {
                    channel_id,
                    count: channels.and_then(|c| c.get(&channel_id)).copied().unwrap_or(0),
                })
                .collect()
        };

        if ranked.iter().all(|c| c.count == 0) {
            return Err(EngineError::NoActivity(user_id));
        }

        // Both sorts are stable
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        ranked.retain(|c| c.count > 0);
        ranked.sort_by_key(|c| c.count);
        Ok(ranked)
    }

    /// Busiest authors of a channel, read straight from the store.
    pub async fn top_users(&self, channel_id: ChannelId, limit: usize) -> Result<Vec<UserCount>> {
        blocking(&self.inner.db, move |db| db.top_users(channel_id, limit)).await
    }

    async fn ensure_loaded(&self, user_id: UserId) -> Result<()> {
        if self.inner.users.read().await.contains_key(&user_id) {
            return Ok(());
        }

        let rows = blocking(&self.inner.db, move |db| db.counters_for_user(user_id)).await?;

        let mut users = self.inner.users.write().await;
        let channels = users.entry(user_id).or_default();
        for row in rows {
            merge(channels, row.channel_id, row.count);
        }
        Ok(())
    }

    async fn observe(&self, user_id: UserId, channel_id: ChannelId, counter: u64) {
        let mut users = self.inner.users.write().await;
        if let Some(channels) = users.get_mut(&user_id) {
            merge(channels, channel_id, counter);
        }
    }
}

fn merge(channels: &mut HashMap<ChannelId, u64>, channel_id: ChannelId, counter: u64) {
    let slot = channels.entry(channel_id).or_insert(0);
    *slot = (*slot).max(counter);
}
