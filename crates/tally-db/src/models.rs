/// Row-level helpers shared by the store modules. The public API speaks
/// `tally-types` models; these conversions keep SQLite's integer encoding
/// out of the callers' way.
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tally_types::models::{ChannelId, Embed, MessageId, UserId};

/// Result of trying to record a message for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time this message id was seen; `counter` is the author's new
    /// count in the channel.
    Counted { counter: u64 },
    /// The message id was counted before. Nothing was written.
    Duplicate,
}

/// A message record as persisted, embeds included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub author_id: UserId,
    pub channel_id: ChannelId,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub attachment_count: u32,
    pub embeds: Vec<Embed>,
}

/// Timestamps are stored as integer nanoseconds so a cursor taken from a
/// message's `created_at` compares exactly against it.
pub(crate) fn to_nanos(ts: DateTime<Utc>) -> anyhow::Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| anyhow!("Timestamp {} outside the storable range", ts))
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

pub(crate) fn to_count(counter: i64) -> u64 {
    u64::try_from(counter).unwrap_or(0)
}
