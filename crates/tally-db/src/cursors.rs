use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tally_types::models::{ChannelCursor, ChannelId};

use crate::Database;
use crate::models::{from_nanos, to_nanos};

impl Database {
    // -- Channel cursors --

    pub fn get_cursor(&self, channel_id: ChannelId) -> Result<Option<ChannelCursor>> {
        self.with_conn(|conn| query_cursor(conn, channel_id))
    }

    /// Insert-or-fetch. A new cursor starts with no progress and `fully_read = false`.
    pub fn create_cursor_if_absent(&self, channel_id: ChannelId) -> Result<ChannelCursor> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO channel_cursors (channel_id) VALUES (?1)",
                [channel_id.get()],
            )?;
            query_cursor(conn, channel_id)?
                .ok_or_else(|| anyhow!("Cursor vanished after insert: {}", channel_id))
        })
    }

    /// Record a page of backfill progress and return the stored cursor.
    ///
    /// Clamped in SQL so a stale caller can never move `furthest_read`
    /// forward in time or reopen a completed channel.
    pub fn advance_cursor(
        &self,
        channel_id: ChannelId,
        furthest_read: Option<DateTime<Utc>>,
        fully_read: bool,
    ) -> Result<ChannelCursor> {
        let furthest_read = furthest_read.map(to_nanos).transpose()?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE channel_cursors SET
                    furthest_read = CASE
                        WHEN ?2 IS NULL THEN furthest_read
                        WHEN furthest_read IS NULL THEN ?2
                        ELSE MIN(furthest_read, ?2)
                    END,
                    fully_read = MAX(fully_read, ?3)
                 WHERE channel_id = ?1 AND fully_read = 0",
                params![channel_id.get(), furthest_read, fully_read],
            )?;

            let cursor = query_cursor(conn, channel_id)?
                .ok_or_else(|| anyhow!("No cursor for channel {}", channel_id))?;
            if changed == 0 {
                tracing::debug!(%channel_id, "Cursor already complete, advance ignored");
            }
            Ok(cursor)
        })
    }

    pub fn list_cursors(&self) -> Result<Vec<ChannelCursor>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, furthest_read, fully_read FROM channel_cursors ORDER BY channel_id",
            )?;
            let rows = stmt
                .query_map([], map_cursor)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_cursor(conn: &Connection, channel_id: ChannelId) -> Result<Option<ChannelCursor>> {
    let cursor = conn
        .query_row(
            "SELECT channel_id, furthest_read, fully_read FROM channel_cursors WHERE channel_id = ?1",
            [channel_id.get()],
            map_cursor,
        )
        .optional()?;
    Ok(cursor)
}

fn map_cursor(row: &Row<'_>) -> rusqlite::Result<ChannelCursor> {
    let furthest: Option<i64> = row.get(1)?;
    Ok(ChannelCursor {
        channel_id: ChannelId(row.get(0)?),
        furthest_read: furthest.map(from_nanos),
        fully_read: row.get(2)?,
    })
}
