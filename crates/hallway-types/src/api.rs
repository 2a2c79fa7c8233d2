use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DmRequest, DmRequestStatus, Message, MessageKind, User};

// -- JWT Claims --

/// JWT claims shared by hallway-api (REST middleware) and hallway-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

// -- Users --

/// Partial profile update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    /// `Some(None)` clears the avatar.
    #[serde(default, with = "double_option")]
    pub avatar_url: Option<Option<String>>,
    pub profanity_filter_enabled: Option<bool>,
    pub privacy_mode: Option<bool>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub content: String,
    pub media_url: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

/// One entry of the conversation list: the other participant and the most
/// recent message exchanged with them.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationHead {
    pub peer: User,
    pub last_message: Message,
}

// -- DM requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendDmRequest {
    pub recipient_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RespondDmRequest {
    pub accept: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DmRequestResponse {
    #[serde(flatten)]
    pub request: DmRequest,
    /// The user on the other side of the request, from the caller's view.
    pub counterpart: Option<User>,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Someone asked to message the caller.
    DmRequestReceived {
        request_id: Uuid,
        from: User,
        at: DateTime<Utc>,
    },
    /// A request the caller sent was accepted or rejected.
    DmRequestAnswered {
        request_id: Uuid,
        by: User,
        status: DmRequestStatus,
        at: DateTime<Utc>,
    },
    /// Latest message received from a peer.
    MessageReceived {
        message: Message,
        from: User,
        at: DateTime<Utc>,
    },
}

impl Notification {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::DmRequestReceived { at, .. }
            | Self::DmRequestAnswered { at, .. }
            | Self::MessageReceived { at, .. } => *at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationFeed {
    pub pending_count: usize,
    pub items: Vec<Notification>,
}

// -- Storage --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub bucket: String,
    pub path: String,
    pub public_url: String,
    pub size: u64,
    pub etag: String,
}

// -- GIFs --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GifResult {
    pub id: String,
    pub url: String,
    pub preview_url: String,
    pub description: String,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}
