use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile of a user, as other members of the school see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub privacy_mode: bool,
}

/// The caller's own profile including private preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub profanity_filter_enabled: bool,
    pub privacy_mode: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Gif,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Gif => "gif",
        }
    }

    /// Image and GIF messages carry a media reference; text messages don't.
    pub fn requires_media(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "gif" => Ok(Self::Gif),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A direct message. Conversations are reconstructed from the unordered
/// {sender, recipient} pair; there is no thread entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub media_url: Option<String>,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl DmRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Accepted and rejected requests never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DmRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DmRequestStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub status: DmRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedContact {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Order-independent pair of users. `user1 < user2` always holds, so the
/// same two people map to the same pair whichever one is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactPair {
    user1: Uuid,
    user2: Uuid,
}

impl ContactPair {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { user1: a, user2: b }
        } else {
            Self { user1: b, user2: a }
        }
    }

    pub fn user1(&self) -> Uuid {
        self.user1
    }

    pub fn user2(&self) -> Uuid {
        self.user2
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.user1 == id || self.user2 == id
    }

    /// The member of the pair that isn't `id`. Returns `None` if `id` is not
    /// part of the pair.
    pub fn other(&self, id: Uuid) -> Option<Uuid> {
        if id == self.user1 {
            Some(self.user2)
        } else if id == self.user2 {
            Some(self.user1)
        } else {
            None
        }
    }

    /// Stable string key, used as the top-level folder for conversation media.
    pub fn key(&self) -> String {
        format!("{}_{}", self.user1, self.user2)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let (a, b) = key.split_once('_')?;
        let a: Uuid = a.parse().ok()?;
        let b: Uuid = b.parse().ok()?;
        let pair = Self::new(a, b);
        // Only the canonical spelling is a valid key
        (pair.key() == key).then_some(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let p = ContactPair::new(a, b);
        assert_eq!(p, ContactPair::new(b, a));
        assert!(p.user1() < p.user2());
        assert!(p.user1().to_string() < p.user2().to_string());
        assert_eq!(p.other(a), Some(b));
        assert_eq!(p.other(Uuid::new_v4()), None);
    }

    #[test]
    fn pair_key_round_trips_only_in_canonical_order() {
        let p = ContactPair::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(ContactPair::parse_key(&p.key()), Some(p));

        let swapped = format!("{}_{}", p.user2(), p.user1());
        assert_eq!(ContactPair::parse_key(&swapped), None);
        assert_eq!(ContactPair::parse_key("not-a-key"), None);
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!DmRequestStatus::Pending.is_terminal());
        assert!(DmRequestStatus::Accepted.is_terminal());
        assert!(DmRequestStatus::Rejected.is_terminal());
        assert_eq!("accepted".parse::<DmRequestStatus>(), Ok(DmRequestStatus::Accepted));
        assert!("archived".parse::<DmRequestStatus>().is_err());
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MessageKind::Gif).unwrap(), "\"gif\"");
        assert!(MessageKind::Image.requires_media());
        assert!(!MessageKind::Text.requires_media());
    }
}
