use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, Message, MessageId};

/// Live notifications delivered by the message source.
///
/// Delivery is at-least-once and unordered across distinct messages, so
/// every handler has to tolerate replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LiveEvent {
    /// A new message was posted
    MessageCreate(Message),

    /// A message's content or embeds changed
    MessageUpdate(Message),

    /// A single message was removed
    MessageDelete {
        channel_id: ChannelId,
        message_id: MessageId,
    },

    /// Several messages were removed at once
    MessageBulkDelete {
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    },
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreate(_) => "message_create",
            Self::MessageUpdate(_) => "message_update",
            Self::MessageDelete { .. } => "message_delete",
            Self::MessageBulkDelete { .. } => "message_bulk_delete",
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::MessageCreate(msg) | Self::MessageUpdate(msg) => msg.channel_id,
            Self::MessageDelete { channel_id, .. } | Self::MessageBulkDelete { channel_id, .. } => {
                *channel_id
            }
        }
    }
}
