use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BackfillState, ChannelCount, ChannelCursor, ChannelId, UserCount, UserId};

// -- Counts --

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TotalResponse {
    pub user_id: UserId,
    pub total: u64,
}

// -- Most active --

#[derive(Debug, Deserialize)]
pub struct MostActiveQuery {
    /// Comma-separated candidate channel ids, in display order.
    pub channels: String,
    #[serde(default = "default_most_active_limit")]
    pub limit: usize,
}

fn default_most_active_limit() -> usize {
    5
}

/// Channels ordered by count ascending, the busiest last.
#[derive(Debug, Serialize, Deserialize)]
pub struct MostActiveResponse {
    pub user_id: UserId,
    pub channels: Vec<ChannelCount>,
}

// -- Top users --

#[derive(Debug, Deserialize)]
pub struct TopUsersQuery {
    #[serde(default = "default_top_users_limit")]
    pub limit: usize,
}

fn default_top_users_limit() -> usize {
    10
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopUsersResponse {
    pub channel_id: ChannelId,
    pub users: Vec<UserCount>,
}

// -- Crawl progress --

#[derive(Debug, Serialize, Deserialize)]
pub struct CursorResponse {
    pub channel_id: ChannelId,
    pub state: BackfillState,
    pub furthest_read: Option<DateTime<Utc>>,
    pub fully_read: bool,
}

impl CursorResponse {
    /// A channel the crawler has not registered yet.
    pub fn unseen(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            state: BackfillState::Unseen,
            furthest_read: None,
            fully_read: false,
        }
    }
}

impl From<ChannelCursor> for CursorResponse {
    fn from(cursor: ChannelCursor) -> Self {
        Self {
            channel_id: cursor.channel_id,
            state: cursor.state(),
            furthest_read: cursor.furthest_read,
            fully_read: cursor.fully_read,
        }
    }
}

// -- Misc --

#[derive(Debug, Serialize, Deserialize)]
pub struct EventAccepted {
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
