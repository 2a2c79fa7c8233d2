use crate::models::{
    AllowedContactRow, DmRequestRow, MessageInsert, MessageRow, ProfileUpdate, RequestDirection,
    UserRow,
};
use crate::{Database, now_timestamp};
use anyhow::Result;
use hallway_types::models::DmRequestStatus;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, name, email, password, avatar_url, profanity_filter_enabled, privacy_mode, created_at";
const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, content, media_url, kind, created_at, edited_at";
const DM_REQUEST_COLUMNS: &str = "id, sender_id, recipient_id, status, created_at, updated_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns `false` if the email is already registered.
    pub fn create_user(&self, id: &str, name: &str, email: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email) DO NOTHING",
                params![id, name, email, password_hash, now_timestamp()],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [email],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Batch-fetch users for a set of ids. Unknown ids are skipped.
    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Users the viewer may find by browsing: everyone except the viewer
    /// and privacy-mode users who are not already the viewer's contacts.
    pub fn list_discoverable_users(
        &self,
        viewer_id: &str,
        search: Option<&str>,
        limit: u32,
    ) -> Result<Vec<UserRow>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u
                 WHERE u.id != ?1
                   AND (u.privacy_mode = 0 OR EXISTS (
                        SELECT 1 FROM allowed_contacts c
                         WHERE c.user1_id = min(u.id, ?1) AND c.user2_id = max(u.id, ?1)))
                   AND (?2 IS NULL
                        OR u.name LIKE ?2 ESCAPE '\\'
                        OR u.email LIKE ?2 ESCAPE '\\')
                 ORDER BY u.name COLLATE NOCASE, u.id
                 LIMIT ?3"
            ))?;

            let rows = stmt
                .query_map(params![viewer_id, pattern, limit], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Apply a partial profile update and return the updated row, or `None`
    /// if the user doesn't exist.
    pub fn update_user_profile(&self, id: &str, update: &ProfileUpdate<'_>) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let (set_avatar, avatar) = match update.avatar_url {
                Some(value) => (true, value),
                None => (false, None),
            };

            conn.execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    avatar_url = CASE WHEN ?3 THEN ?4 ELSE avatar_url END,
                    profanity_filter_enabled = COALESCE(?5, profanity_filter_enabled),
                    privacy_mode = COALESCE(?6, privacy_mode)
                 WHERE id = ?1",
                params![
                    id,
                    update.name,
                    set_avatar,
                    avatar,
                    update.profanity_filter_enabled,
                    update.privacy_mode,
                ],
            )?;

            query_user_by_id(conn, id)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &MessageRow) -> Result<MessageInsert> {
        self.with_conn_mut(|conn| {
            let result = conn.execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    message.id,
                    message.sender_id,
                    message.recipient_id,
                    message.content,
                    message.media_url,
                    message.kind,
                    message.created_at,
                    message.edited_at,
                ],
            );

            match result {
                Ok(_) => Ok(MessageInsert::Inserted),
                Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg == "privacy_gate" => {
                    Ok(MessageInsert::PrivacyBlocked)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Messages exchanged between two users, oldest first. `before_id` is the
    /// id of the oldest message of the previous page; only messages ordered
    /// strictly before it by `(created_at, rowid)` are returned, so messages
    /// sharing a timestamp are neither repeated nor skipped. An id outside
    /// this conversation yields an empty page.
    pub fn get_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        before_id: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE ((sender_id = ?1 AND recipient_id = ?2)
                     OR (sender_id = ?2 AND recipient_id = ?1))
                   AND (?3 IS NULL OR (created_at, rowid) < (
                       SELECT created_at, rowid FROM messages
                       WHERE id = ?3
                         AND ((sender_id = ?1 AND recipient_id = ?2)
                           OR (sender_id = ?2 AND recipient_id = ?1))))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4"
            ))?;

            let mut rows = stmt
                .query_map(params![user_a, user_b, before_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    /// Latest message per conversation partner, newest conversation first.
    /// With `incoming_only`, only messages received by `user_id` count.
    pub fn latest_message_per_peer(&self, user_id: &str, incoming_only: bool) -> Result<Vec<MessageRow>> {
        let filter = if incoming_only {
            "recipient_id = ?1"
        } else {
            "sender_id = ?1 OR recipient_id = ?1"
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                    SELECT m.*, ROW_NUMBER() OVER (
                        PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.recipient_id ELSE m.sender_id END
                        ORDER BY m.created_at DESC, m.rowid DESC
                    ) AS rn
                    FROM messages m
                    WHERE {filter}
                 )
                 WHERE rn = 1
                 ORDER BY created_at DESC"
            ))?;

            let rows = stmt
                .query_map([user_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Replace the content of a message and stamp `edited_at`. Returns the
    /// updated row, or `None` if it no longer exists.
    pub fn update_message_content(&self, id: &str, content: &str) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
                params![id, content, now_timestamp()],
            )?;

            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(deleted == 1)
        })
    }

    // -- DM requests --

    /// Insert a pending request. Returns `false` if a request for the same
    /// ordered (sender, recipient) pair already exists, whatever its status.
    pub fn create_dm_request(&self, id: &str, sender_id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let now = now_timestamp();
            let inserted = conn.execute(
                "INSERT INTO dm_requests (id, sender_id, recipient_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
                 ON CONFLICT(sender_id, recipient_id) DO NOTHING",
                params![id, sender_id, recipient_id, now],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_dm_request(&self, id: &str) -> Result<Option<DmRequestRow>> {
        self.with_conn(|conn| query_dm_request(conn, id))
    }

    pub fn list_dm_requests(
        &self,
        user_id: &str,
        direction: RequestDirection,
        status: Option<DmRequestStatus>,
    ) -> Result<Vec<DmRequestRow>> {
        let column = match direction {
            RequestDirection::Incoming => "recipient_id",
            RequestDirection::Outgoing => "sender_id",
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DM_REQUEST_COLUMNS} FROM dm_requests
                 WHERE {column} = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY updated_at DESC, rowid DESC"
            ))?;

            let rows = stmt
                .query_map(params![user_id, status.map(|s| s.as_str())], dm_request_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Move a pending request to `status` and, when the final status is
    /// accepted, make sure the normalized contact row exists. Both happen in
    /// one transaction.
    ///
    /// Returns the request as it stands afterwards and whether this call
    /// performed the transition. A request that was already terminal is
    /// returned unchanged.
    pub fn respond_dm_request(
        &self,
        id: &str,
        status: DmRequestStatus,
    ) -> Result<Option<(DmRequestRow, bool)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let transitioned = tx.execute(
                "UPDATE dm_requests SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, status.as_str(), now_timestamp()],
            )? == 1;

            let Some(row) = query_dm_request(&tx, id)? else {
                return Ok(None);
            };

            if row.status() == DmRequestStatus::Accepted {
                insert_allowed_contact(&tx, &row.sender_id, &row.recipient_id)?;
            }

            tx.commit()?;
            Ok(Some((row, transitioned)))
        })
    }

    // -- Allowed contacts --

    pub fn are_allowed_contacts(&self, user_a: &str, user_b: &str) -> Result<bool> {
        let (user1, user2) = normalize_pair(user_a, user_b);
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM allowed_contacts WHERE user1_id = ?1 AND user2_id = ?2)",
                [user1, user2],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn list_allowed_contacts(&self, user_id: &str) -> Result<Vec<AllowedContactRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user1_id, user2_id, created_at FROM allowed_contacts
                 WHERE user1_id = ?1 OR user2_id = ?1
                 ORDER BY created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(AllowedContactRow {
                        id: row.get(0)?,
                        user1_id: row.get(1)?,
                        user2_id: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn normalize_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Insert the contact row for a pair unless it already exists.
fn insert_allowed_contact(conn: &Connection, user_a: &str, user_b: &str) -> Result<()> {
    let (user1, user2) = normalize_pair(user_a, user_b);
    conn.execute(
        "INSERT INTO allowed_contacts (id, user1_id, user2_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user1_id, user2_id) DO NOTHING",
        params![Uuid::new_v4().to_string(), user1, user2, now_timestamp()],
    )?;
    Ok(())
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        user_from_row,
    )
    .optional()
}

fn query_dm_request(conn: &Connection, id: &str) -> Result<Option<DmRequestRow>> {
    conn.query_row(
        &format!("SELECT {DM_REQUEST_COLUMNS} FROM dm_requests WHERE id = ?1"),
        [id],
        dm_request_from_row,
    )
    .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar_url: row.get(4)?,
        profanity_filter_enabled: row.get(5)?,
        privacy_mode: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        content: row.get(3)?,
        media_url: row.get(4)?,
        kind: row.get(5)?,
        created_at: row.get(6)?,
        edited_at: row.get(7)?,
    })
}

fn dm_request_from_row(row: &Row<'_>) -> rusqlite::Result<DmRequestRow> {
    Ok(DmRequestRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
