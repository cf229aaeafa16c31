use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        migrate_v1(conn)?;
    }

    if version < 2 {
        info!("Running migration v2 (nanosecond timestamps, delete tombstones)");
        migrate_v2(conn)?;
    }

    info!("Database migrations complete");
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE channel_cursors (
            channel_id      INTEGER PRIMARY KEY,
            furthest_read   INTEGER,
            fully_read      INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE user_channel_counts (
            user_id     INTEGER NOT NULL,
            channel_id  INTEGER NOT NULL,
            counter     INTEGER NOT NULL CHECK (counter >= 0),
            PRIMARY KEY (user_id, channel_id)
        );

        CREATE INDEX idx_counts_channel
            ON user_channel_counts(channel_id, counter);

        -- One row per message id ever counted. Survives deletion of the record.
        CREATE TABLE counted_messages (
            message_id  INTEGER PRIMARY KEY,
            author_id   INTEGER NOT NULL,
            channel_id  INTEGER NOT NULL,
            counted_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE messages (
            message_id          INTEGER PRIMARY KEY,
            author_id           INTEGER NOT NULL,
            channel_id          INTEGER NOT NULL,
            created_at          INTEGER NOT NULL,
            content             TEXT NOT NULL,
            attachment_count    INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE TABLE message_embeds (
            embed_id        INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id      INTEGER NOT NULL REFERENCES messages(message_id) ON DELETE CASCADE,
            title           TEXT,
            description     TEXT,
            footer          TEXT,
            has_thumbnail   INTEGER NOT NULL DEFAULT 0,
            color           INTEGER,
            author_name     TEXT
        );

        CREATE INDEX idx_embeds_message
            ON message_embeds(message_id);

        CREATE TABLE embed_fields (
            embed_id    INTEGER NOT NULL REFERENCES message_embeds(embed_id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            name        TEXT NOT NULL,
            value       TEXT NOT NULL,
            PRIMARY KEY (embed_id, position)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// v1 stored timestamps as milliseconds, which truncated sub-millisecond
/// cursors and skipped messages on the next page.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        UPDATE channel_cursors SET furthest_read = furthest_read * 1000000
            WHERE furthest_read IS NOT NULL;
        UPDATE messages SET created_at = created_at * 1000000;

        -- Ids deleted before (or without) their create ever being stored
        CREATE TABLE deleted_messages (
            message_id  INTEGER PRIMARY KEY,
            deleted_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (2);

        COMMIT;
        ",
    )?;
    Ok(())
}
