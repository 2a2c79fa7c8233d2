//! Database row types. These map directly to SQLite rows and are converted to
//! hallway-types models at the edge.

use hallway_types::models::{
    AllowedContact, DmRequest, DmRequestStatus, Message, MessageKind, User, UserSettings,
};
use tracing::warn;
use uuid::Uuid;

use crate::parse_timestamp;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub profanity_filter_enabled: bool,
    pub privacy_mode: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub kind: String,
    pub created_at: String,
    pub edited_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DmRequestRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct AllowedContactRow {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub created_at: String,
}

/// Fields of a profile update; `None` leaves the column alone.
#[derive(Debug, Default)]
pub struct ProfileUpdate<'a> {
    pub name: Option<&'a str>,
    pub avatar_url: Option<Option<&'a str>>,
    pub profanity_filter_enabled: Option<bool>,
    pub privacy_mode: Option<bool>,
}

/// Result of a message insert that reached the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageInsert {
    Inserted,
    /// Rejected by the `messages_privacy_gate` trigger.
    PrivacyBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    Incoming,
    Outgoing,
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

impl UserRow {
    pub fn user_id(&self) -> Uuid {
        parse_id(&self.id, "user id")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.user_id(),
            name: self.name.clone(),
            email: self.email.clone(),
            avatar_url: self.avatar_url.clone(),
            privacy_mode: self.privacy_mode,
        }
    }

    pub fn to_settings(&self) -> UserSettings {
        UserSettings {
            id: self.user_id(),
            name: self.name.clone(),
            email: self.email.clone(),
            avatar_url: self.avatar_url.clone(),
            profanity_filter_enabled: self.profanity_filter_enabled,
            privacy_mode: self.privacy_mode,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

impl MessageRow {
    pub fn to_message(&self) -> Message {
        Message {
            id: parse_id(&self.id, "message id"),
            sender_id: parse_id(&self.sender_id, "sender_id"),
            recipient_id: parse_id(&self.recipient_id, "recipient_id"),
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            kind: self.kind.parse().unwrap_or_else(|e| {
                warn!("Corrupt kind on message '{}': {}", self.id, e);
                MessageKind::Text
            }),
            created_at: parse_timestamp(&self.created_at),
            edited_at: self.edited_at.as_deref().map(parse_timestamp),
        }
    }

    /// The participant that isn't `user_id`.
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }
}

impl DmRequestRow {
    pub fn status(&self) -> DmRequestStatus {
        self.status.parse().unwrap_or_else(|e| {
            warn!("Corrupt status on dm request '{}': {}", self.id, e);
            DmRequestStatus::Pending
        })
    }

    pub fn to_request(&self) -> DmRequest {
        DmRequest {
            id: parse_id(&self.id, "dm request id"),
            sender_id: parse_id(&self.sender_id, "sender_id"),
            recipient_id: parse_id(&self.recipient_id, "recipient_id"),
            status: self.status(),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

impl AllowedContactRow {
    pub fn to_contact(&self) -> AllowedContact {
        AllowedContact {
            id: parse_id(&self.id, "contact id"),
            user1_id: parse_id(&self.user1_id, "user1_id"),
            user2_id: parse_id(&self.user2_id, "user2_id"),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}
