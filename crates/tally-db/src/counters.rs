use anyhow::Result;
use rusqlite::{Connection, params};
use tally_types::models::{ChannelCount, ChannelId, UserCount, UserId};

use crate::Database;
use crate::models::to_count;

impl Database {
    // -- User/channel counters --

    /// Atomic add-and-return. Creates the row with `counter = delta` when absent.
    pub fn increment_counter(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        delta: u64,
    ) -> Result<u64> {
        self.with_conn(|conn| increment(conn, user_id, channel_id, delta))
    }

    pub fn counters_for_user(&self, user_id: UserId) -> Result<Vec<ChannelCount>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, counter FROM user_channel_counts WHERE user_id = ?1",
            )?;
            let rows = stmt
                .query_map([user_id.get()], |row| {
                    Ok(ChannelCount {
                        channel_id: ChannelId(row.get(0)?),
                        count: to_count(row.get(1)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Busiest authors in a channel, highest count first.
    pub fn top_users(&self, channel_id: ChannelId, limit: usize) -> Result<Vec<UserCount>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, counter FROM user_channel_counts
                 WHERE channel_id = ?1 AND counter > 0
                 ORDER BY counter DESC, user_id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![channel_id.get(), limit], |row| {
                    Ok(UserCount {
                        user_id: UserId(row.get(0)?),
                        count: to_count(row.get(1)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Sum of every author's counter in a channel.
    pub fn channel_total(&self, channel_id: ChannelId) -> Result<u64> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(counter), 0) FROM user_channel_counts WHERE channel_id = ?1",
                [channel_id.get()],
                |row| row.get(0),
            )?;
            Ok(to_count(total))
        })
    }
}

pub(crate) fn increment(
    conn: &Connection,
    user_id: UserId,
    channel_id: ChannelId,
    delta: u64,
) -> Result<u64> {
    let delta = i64::try_from(delta)?;
    let counter: i64 = conn.query_row(
        "INSERT INTO user_channel_counts (user_id, channel_id, counter) VALUES (?1, ?2, ?3)
         ON CONFLICT (user_id, channel_id) DO UPDATE SET counter = counter + excluded.counter
         RETURNING counter",
        params![user_id.get(), channel_id.get(), delta],
        |row| row.get(0),
    )?;
    Ok(to_count(counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_creates_then_adds() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.increment_counter(UserId(1), ChannelId(10), 1).unwrap(), 1);
        assert_eq!(db.increment_counter(UserId(1), ChannelId(10), 1).unwrap(), 2);
        assert_eq!(db.increment_counter(UserId(1), ChannelId(10), 5).unwrap(), 7);
        assert_eq!(db.increment_counter(UserId(1), ChannelId(11), 3).unwrap(), 3);
    }

    #[test]
    fn counters_for_user_lists_every_channel() {
        let db = Database::open_in_memory().unwrap();
        db.increment_counter(UserId(1), ChannelId(10), 2).unwrap();
        db.increment_counter(UserId(1), ChannelId(11), 4).unwrap();
        db.increment_counter(UserId(2), ChannelId(10), 9).unwrap();

        let mut rows = db.counters_for_user(UserId(1)).unwrap();
        rows.sort_by_key(|c| c.channel_id);
        assert_eq!(
            rows,
            vec![
                ChannelCount { channel_id: ChannelId(10), count: 2 },
                ChannelCount { channel_id: ChannelId(11), count: 4 },
            ]
        );
        assert!(db.counters_for_user(UserId(3)).unwrap().is_empty());
    }

    #[test]
    fn top_users_orders_by_count() {
        let db = Database::open_in_memory().unwrap();
        db.increment_counter(UserId(1), ChannelId(10), 3).unwrap();
        db.increment_counter(UserId(2), ChannelId(10), 8).unwrap();
        db.increment_counter(UserId(3), ChannelId(10), 5).unwrap();
        db.increment_counter(UserId(4), ChannelId(99), 50).unwrap();

        let top = db.top_users(ChannelId(10), 2).unwrap();
        assert_eq!(
            top,
            vec![
                UserCount { user_id: UserId(2), count: 8 },
                UserCount { user_id: UserId(3), count: 5 },
            ]
        );
        assert_eq!(db.channel_total(ChannelId(10)).unwrap(), 16);
        assert_eq!(db.channel_total(ChannelId(12)).unwrap(), 0);
    }
}
