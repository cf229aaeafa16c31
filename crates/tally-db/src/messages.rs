use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use tally_types::models::{ChannelId, Embed, EmbedField, Message, MessageId, UserId};

use crate::Database;
use crate::counters::increment;
use crate::models::{RecordOutcome, StoredMessage, from_nanos, to_nanos};

impl Database {
    // -- Message records --

    /// Persist a message and count it, at most once per message id.
    ///
    /// The ledger insert, the record insert and the counter increment share
    /// one transaction. A message id already in the ledger (replayed event,
    /// backfill overlapping live traffic, or a message deleted since) is
    /// reported as [`RecordOutcome::Duplicate`] and nothing is written.
    ///
    /// A message whose delete arrived first is counted but not stored.
    pub fn record_message(&self, msg: &Message) -> Result<RecordOutcome> {
        let created_at = to_nanos(msg.created_at)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let fresh = tx.execute(
                "INSERT OR IGNORE INTO counted_messages (message_id, author_id, channel_id)
                 VALUES (?1, ?2, ?3)",
                params![msg.id.get(), msg.author_id.get(), msg.channel_id.get()],
            )?;
            if fresh == 0 {
                return Ok(RecordOutcome::Duplicate);
            }

            let tombstoned = tx
                .query_row(
                    "SELECT 1 FROM deleted_messages WHERE message_id = ?1",
                    [msg.id.get()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !tombstoned {
                tx.execute(
                    "INSERT INTO messages (message_id, author_id, channel_id, created_at, content, attachment_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        msg.id.get(),
                        msg.author_id.get(),
                        msg.channel_id.get(),
                        created_at,
                        msg.content,
                        msg.attachment_count,
                    ],
                )?;
                insert_embeds(&tx, msg.id, &msg.embeds)?;
            }
            let counter = increment(&tx, msg.author_id, msg.channel_id, 1)?;

            tx.commit()?;
            Ok(RecordOutcome::Counted { counter })
        })
    }

    /// Rewrite content, attachment count and embeds of an existing record.
    /// Returns `false` when no record exists. Author and channel never change.
    pub fn update_message(&self, msg: &Message) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE messages SET content = ?2, attachment_count = ?3 WHERE message_id = ?1",
                params![msg.id.get(), msg.content, msg.attachment_count],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            // Fields go with their embeds via ON DELETE CASCADE
            tx.execute("DELETE FROM message_embeds WHERE message_id = ?1", [msg.id.get()])?;
            insert_embeds(&tx, msg.id, &msg.embeds)?;

            tx.commit()?;
            Ok(true)
        })
    }

    /// Remove a record and its embeds, leaving a tombstone so a create
    /// that arrives later is not stored. The counted-message ledger and the
    /// counters are left alone: counts mean "messages ever sent".
    pub fn delete_message(&self, message_id: MessageId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted =
                tx.execute("DELETE FROM messages WHERE message_id = ?1", [message_id.get()])?;
            tx.execute(
                "INSERT OR IGNORE INTO deleted_messages (message_id) VALUES (?1)",
                [message_id.get()],
            )?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    pub fn get_message(&self, message_id: MessageId) -> Result<Option<StoredMessage>> {
        self.with_conn(|conn| query_message(conn, message_id))
    }
}

fn insert_embeds(conn: &Connection, message_id: MessageId, embeds: &[Embed]) -> Result<()> {
    if embeds.is_empty() {
        return Ok(());
    }

    let mut embed_stmt = conn.prepare(
        "INSERT INTO message_embeds (message_id, title, description, footer, has_thumbnail, color, author_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut field_stmt =
        conn.prepare(
            "INSERT INTO embed_fields (embed_id, position, name, value) VALUES (?1, ?2, ?3, ?4)",
        )?;

    for embed in embeds {
        embed_stmt.execute(params![
            message_id.get(),
            embed.title,
            embed.description,
            embed.footer,
            embed.has_thumbnail,
            embed.color,
            embed.author_name,
        ])?;
        let embed_id = conn.last_insert_rowid();

        for (position, field) in embed.fields.iter().enumerate() {
            field_stmt.execute(params![embed_id, position as i64, field.name, field.value])?;
        }
    }

    Ok(())
}

fn query_message(conn: &Connection, message_id: MessageId) -> Result<Option<StoredMessage>> {
    let row = conn
        .query_row(
            "SELECT message_id, author_id, channel_id, created_at, content, attachment_count
             FROM messages WHERE message_id = ?1",
            [message_id.get()],
            |row| {
                Ok(StoredMessage {
                    id: MessageId(row.get(0)?),
                    author_id: UserId(row.get(1)?),
                    channel_id: ChannelId(row.get(2)?),
                    created_at: from_nanos(row.get(3)?),
                    content: row.get(4)?,
                    attachment_count: row.get(5)?,
                    embeds: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut stored) = row else {
        return Ok(None);
    };
    stored.embeds = query_embeds(conn, message_id)?;
    Ok(Some(stored))
}

fn query_embeds(conn: &Connection, message_id: MessageId) -> Result<Vec<Embed>> {
    let mut stmt = conn.prepare(
        "SELECT embed_id, title, description, footer, has_thumbnail, color, author_name
         FROM message_embeds WHERE message_id = ?1 ORDER BY embed_id",
    )?;
    let embeds = stmt
        .query_map([message_id.get()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Embed {
                    title: row.get(1)?,
                    description: row.get(2)?,
                    footer: row.get(3)?,
                    has_thumbnail: row.get(4)?,
                    color: row.get(5)?,
                    author_name: row.get(6)?,
                    fields: Vec::new(),
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut field_stmt =
        conn.prepare("SELECT name, value FROM embed_fields WHERE embed_id = ?1 ORDER BY position")?;
    let mut out = Vec::with_capacity(embeds.len());
    for (embed_id, mut embed) in embeds {
        embed.fields = field_stmt
            .query_map([embed_id], |row| {
                Ok(EmbedField {
                    name: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        out.push(embed);
    }
    Ok(out)
}
