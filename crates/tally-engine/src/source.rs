//! Seams to the remote message source. The server crate provides HTTP
//! implementations; tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_types::models::{ChannelId, Message};

use crate::error::FetchError;

#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Up to `limit` messages of `channel_id`, newest first.
    ///
    /// With `before = None` the page starts at the channel's most recent
    /// message; otherwise it holds only messages strictly older than `before`.
    async fn fetch_page(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, FetchError>;
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Every channel the source knows about.
    async fn list_channels(&self) -> Result<Vec<ChannelId>, FetchError>;

    async fn can_read_history(&self, channel_id: ChannelId) -> bool;
}
