use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

id_type!(
    /// Author of a message.
    UserId
);
id_type!(
    /// A conversation channel. Stable for the channel's lifetime.
    ChannelId
);
id_type!(
    /// Globally unique, increases with creation time for a given source.
    MessageId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// Rich embed attached to a message. Only the parts worth keeping are modelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub has_thumbnail: bool,
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub author_name: Option<String>,
    /// Kept in display order.
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

/// A message as delivered by the history source or a live event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author_id: UserId,
    pub channel_id: ChannelId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachment_count: u32,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

/// Backfill progress for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCursor {
    pub channel_id: ChannelId,
    /// Oldest point reached so far. `None` until the first page lands.
    pub furthest_read: Option<DateTime<Utc>>,
    pub fully_read: bool,
}

impl ChannelCursor {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            furthest_read: None,
            fully_read: false,
        }
    }

    pub fn state(&self) -> BackfillState {
        if self.fully_read {
            BackfillState::Complete
        } else {
            BackfillState::Partial
        }
    }
}

/// `Unseen` channels have no cursor row yet; `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    Unseen,
    Partial,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCount {
    pub channel_id: ChannelId,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCount {
    pub user_id: UserId,
    pub count: u64,
}
