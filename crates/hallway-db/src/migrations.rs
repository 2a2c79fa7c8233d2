use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id                          TEXT PRIMARY KEY,
                name                        TEXT NOT NULL,
                email                       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password                    TEXT NOT NULL,
                avatar_url                  TEXT,
                profanity_filter_enabled    INTEGER NOT NULL DEFAULT 0,
                privacy_mode                INTEGER NOT NULL DEFAULT 0,
                created_at                  TEXT NOT NULL
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content         TEXT NOT NULL DEFAULT '',
                media_url       TEXT,
                kind            TEXT NOT NULL DEFAULT 'text'
                                CHECK (kind IN ('text', 'image', 'gif')),
                created_at      TEXT NOT NULL,
                edited_at       TEXT
            );

            CREATE INDEX idx_messages_pair
                ON messages(sender_id, recipient_id, created_at);
            CREATE INDEX idx_messages_recipient
                ON messages(recipient_id, created_at);

            CREATE TABLE dm_requests (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'accepted', 'rejected')),
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE (sender_id, recipient_id),
                CHECK (sender_id != recipient_id)
            );

            CREATE INDEX idx_dm_requests_recipient
                ON dm_requests(recipient_id, status);

            CREATE TABLE allowed_contacts (
                id          TEXT PRIMARY KEY,
                user1_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                user2_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                UNIQUE (user1_id, user2_id),
                CHECK (user1_id < user2_id)
            );

            -- Privacy gate: a recipient in privacy mode only receives messages
            -- from users they share an allowed_contacts row with.
            CREATE TRIGGER messages_privacy_gate
            BEFORE INSERT ON messages
            FOR EACH ROW
            WHEN (SELECT privacy_mode FROM users WHERE id = NEW.recipient_id) = 1
             AND NOT EXISTS (
                SELECT 1 FROM allowed_contacts
                 WHERE user1_id = min(NEW.sender_id, NEW.recipient_id)
                   AND user2_id = max(NEW.sender_id, NEW.recipient_id)
             )
            BEGIN
                SELECT RAISE(ABORT, 'privacy_gate');
            END;

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn contact_rows_must_be_normalized() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, name, email, password, created_at)
                 VALUES ('a', 'A', 'a@school.test', 'x', '2026-01-01T00:00:00.000Z'),
                        ('b', 'B', 'b@school.test', 'x', '2026-01-01T00:00:00.000Z');",
        )
        .unwrap();

        let reversed = conn.execute(
            "INSERT INTO allowed_contacts (id, user1_id, user2_id, created_at)
                 VALUES ('c1', 'b', 'a', '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(reversed.is_err());
    }
}
