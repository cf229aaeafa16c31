use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tally_db::Database;
use tally_types::models::{ChannelCursor, ChannelId};
use tokio::sync::RwLock;

use crate::{Result, blocking};

/// Process-lifetime view of channel cursors, loaded on miss.
///
/// The store stays the source of truth: every write goes to the database
/// first and the cache keeps whatever the store handed back.
#[derive(Clone)]
pub struct CursorCache {
    inner: Arc<CursorCacheInner>,
}

struct CursorCacheInner {
    db: Arc<Database>,
    cursors: RwLock<HashMap<ChannelId, ChannelCursor>>,
}

impl CursorCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(CursorCacheInner {
                db,
                cursors: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub async fn get(&self, channel_id: ChannelId) -> Result<Option<ChannelCursor>> {
        if let Some(cursor) = self.inner.cursors.read().await.get(&channel_id) {
            return Ok(Some(cursor.clone()));
        }

        let loaded = blocking(&self.inner.db, move |db| db.get_cursor(channel_id)).await?;
        if let Some(cursor) = &loaded {
            self.remember(cursor.clone()).await;
        }
        Ok(loaded)
    }

    /// Make sure the channel has a cursor, creating an unread one if needed.
    pub async fn register(&self, channel_id: ChannelId) -> Result<ChannelCursor> {
        if let Some(cursor) = self.inner.cursors.read().await.get(&channel_id) {
            return Ok(cursor.clone());
        }

        let cursor =
            blocking(&self.inner.db, move |db| db.create_cursor_if_absent(channel_id)).await?;
        self.remember(cursor.clone()).await;
        Ok(cursor)
    }

    pub async fn advance(
        &self,
        channel_id: ChannelId,
        furthest_read: Option<DateTime<Utc>>,
        fully_read: bool,
    ) -> Result<ChannelCursor> {
        let cursor = blocking(&self.inner.db, move |db| {
            db.advance_cursor(channel_id, furthest_read, fully_read)
        })
        .await?;
        self.remember(cursor.clone()).await;
        Ok(cursor)
    }

    /// Every known cursor, read from the store.
    pub async fn list(&self) -> Result<Vec<ChannelCursor>> {
        let cursors = blocking(&self.inner.db, |db| db.list_cursors()).await?;
        for cursor in &cursors {
            self.remember(cursor.clone()).await;
        }
        Ok(cursors)
    }

    async fn remember(&self, cursor: ChannelCursor) {
        let mut cursors = self.inner.cursors.write().await;
        match cursors.get_mut(&cursor.channel_id) {
            // Never let a slower reader replace newer progress
            Some(existing) if existing.fully_read && !cursor.fully_read => {}
            Some(existing) => *existing = cursor,
            None => {
                cursors.insert(cursor.channel_id, cursor);
            }
        }
    }
}
