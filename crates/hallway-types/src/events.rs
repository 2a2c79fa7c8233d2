use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DmRequest, Message};

/// Tables a client can follow over the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    DmRequests,
}

/// Events sent over the WebSocket gateway. Every row event is delivered only
/// to the users it concerns (the recipient for inserts, both participants for
/// message edits and deletes, the sender for request answers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// A message addressed to this user was stored
    MessageInsert { message: Message },

    /// The sender edited a message
    MessageUpdate { message: Message },

    /// The sender deleted a message
    MessageDelete {
        id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
    },

    /// Someone sent this user a DM request
    DmRequestInsert { request: DmRequest },

    /// A DM request changed status
    DmRequestUpdate { request: DmRequest },
}

impl GatewayEvent {
    /// Returns the table this event is a change feed of. `None` for
    /// connection-level events, which are always delivered.
    pub fn table(&self) -> Option<Table> {
        match self {
            Self::Ready { .. } => None,
            Self::MessageInsert { .. } | Self::MessageUpdate { .. } | Self::MessageDelete { .. } => {
                Some(Table::Messages)
            }
            Self::DmRequestInsert { .. } | Self::DmRequestUpdate { .. } => Some(Table::DmRequests),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of tables this connection receives row events for.
    Subscribe { tables: Vec<Table> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_tagged_layout() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Subscribe","data":{"tables":["messages","dm_requests"]}}"#)
                .unwrap();
        match cmd {
            GatewayCommand::Subscribe { tables } => {
                assert_eq!(tables, vec![Table::Messages, Table::DmRequests])
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn ready_is_not_table_scoped() {
        let ev = GatewayEvent::Ready { user_id: Uuid::nil(), name: "x".into() };
        assert_eq!(ev.table(), None);
        let ev = GatewayEvent::MessageDelete {
            id: Uuid::nil(),
            sender_id: Uuid::nil(),
            recipient_id: Uuid::nil(),
        };
        assert_eq!(ev.table(), Some(Table::Messages));
    }
}
