use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use hallway_db::models::{DmRequestRow, MessageRow, RequestDirection, UserRow};
use hallway_db::parse_timestamp;
use hallway_types::api::{Claims, Notification, NotificationFeed};
use hallway_types::models::DmRequestStatus;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /notifications: pending requests addressed to the caller, answers
/// to requests the caller sent, and the latest message from each peer.
pub async fn get_feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let me = claims.sub.to_string();
    let limit = query.limit.clamp(1, 200);

    let (incoming, outgoing, messages, users) = blocking(&state, move |db| {
        let incoming = db.list_dm_requests(&me, RequestDirection::Incoming, Some(DmRequestStatus::Pending))?;
        let outgoing: Vec<DmRequestRow> = db
            .list_dm_requests(&me, RequestDirection::Outgoing, None)?
            .into_iter()
            .filter(|r| r.status().is_terminal())
            .collect();
        let messages = db.latest_message_per_peer(&me, true)?;

        let ids: HashSet<String> = incoming
            .iter()
            .map(|r| r.sender_id.clone())
            .chain(outgoing.iter().map(|r| r.recipient_id.clone()))
            .chain(messages.iter().map(|m| m.sender_id.clone()))
            .collect();
        let users = db.get_users_by_ids(&ids.into_iter().collect::<Vec<_>>())?;

        Ok((incoming, outgoing, messages, users))
    })
    .await?;

    Ok(Json(build_feed(incoming, outgoing, messages, users, limit)))
}

fn build_feed(
    incoming: Vec<DmRequestRow>,
    outgoing: Vec<DmRequestRow>,
    messages: Vec<MessageRow>,
    users: Vec<UserRow>,
    limit: usize,
) -> NotificationFeed {
    let users: HashMap<String, UserRow> = users.into_iter().map(|u| (u.id.clone(), u)).collect();
    let pending_count = incoming.len();

    let mut items: Vec<Notification> = Vec::new();

    for r in &incoming {
        if let Some(from) = users.get(&r.sender_id) {
            items.push(Notification::DmRequestReceived {
                request_id: r.to_request().id,
                from: from.to_user(),
                at: parse_timestamp(&r.created_at),
            });
        }
    }

    for r in &outgoing {
        if let Some(by) = users.get(&r.recipient_id) {
            items.push(Notification::DmRequestAnswered {
                request_id: r.to_request().id,
                by: by.to_user(),
                status: r.status(),
                at: parse_timestamp(&r.updated_at),
            });
        }
    }

    for m in &messages {
        if let Some(from) = users.get(&m.sender_id) {
            items.push(Notification::MessageReceived {
                message: m.to_message(),
                from: from.to_user(),
                at: parse_timestamp(&m.created_at),
            });
        }
    }

    items.sort_by(|a, b| b.at().cmp(&a.at()));
    items.truncate(limit);

    NotificationFeed { pending_count, items }
}
