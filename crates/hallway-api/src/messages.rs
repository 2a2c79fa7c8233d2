use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hallway_db::models::{MessageInsert, MessageRow};
use hallway_db::now_timestamp;
use hallway_types::api::{Claims, ConversationHead, EditMessageRequest, SendMessageRequest};
use hallway_types::events::GatewayEvent;
use hallway_types::models::{Message, MessageKind};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};

const MAX_CONTENT_CHARS: usize = 4000;
const MAX_MEDIA_URL_LEN: usize = 2048;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the id of the oldest message of the
    /// previous page to fetch older messages.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

fn check_content_len(content: &str) -> ApiResult<()> {
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::bad_request("message is too long"));
    }
    Ok(())
}

/// Validate a send request against its kind: text needs content, image and
/// GIF need a media reference, and only they may carry one.
fn validate_send(req: &SendMessageRequest) -> ApiResult<()> {
    check_content_len(&req.content)?;

    let media = req.media_url.as_deref().map(str::trim).filter(|m| !m.is_empty());
    match (req.kind.requires_media(), media) {
        (false, Some(_)) => Err(ApiError::bad_request("text messages cannot carry media")),
        (false, None) if req.content.trim().is_empty() => {
            Err(ApiError::bad_request("message content is empty"))
        }
        (true, None) => Err(ApiError::bad_request(format!("{} messages need a media_url", req.kind))),
        (true, Some(m)) if m.len() > MAX_MEDIA_URL_LEN => {
            Err(ApiError::bad_request("media_url is too long"))
        }
        _ => Ok(()),
    }
}

/// POST /messages: store a direct message for the recipient.
///
/// The recipient's preferences decide both steps: their profanity setting
/// chooses whether the text is masked, and their privacy mode requires an
/// allowed-contact row for the pair before anything is stored.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.recipient_id == claims.sub {
        return Err(ApiError::bad_request("cannot message yourself"));
    }
    validate_send(&req)?;

    let sender_id = claims.sub.to_string();
    let recipient_id = req.recipient_id.to_string();
    let profanity = state.profanity.clone();

    let row = blocking(&state, move |db| {
        let Some(recipient) = db.get_user_by_id(&recipient_id)? else {
            return Ok(Err(ApiError::not_found("recipient not found")));
        };

        if recipient.privacy_mode && !db.are_allowed_contacts(&sender_id, &recipient_id)? {
            return Ok(Err(privacy_rejection()));
        }

        let content = profanity
            .for_recipient(&req.content, recipient.profanity_filter_enabled)
            .into_owned();

        let row = MessageRow {
            id: Uuid::new_v4().to_string(),
            sender_id,
            recipient_id,
            content,
            media_url: req.media_url.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            kind: req.kind.as_str().to_string(),
            created_at: now_timestamp(),
            edited_at: None,
        };

        // messages_privacy_gate enforces the same rule at insert time.
        match db.insert_message(&row)? {
            MessageInsert::Inserted => Ok(Ok(row)),
            MessageInsert::PrivacyBlocked => Ok(Err(privacy_rejection())),
        }
    })
    .await??;

    let message = row.to_message();
    debug!("{} -> {}: {} message {}", message.sender_id, message.recipient_id, message.kind, message.id);

    state
        .dispatcher
        .publish(GatewayEvent::MessageInsert { message: message.clone() }, &[message.recipient_id])
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

fn privacy_rejection() -> ApiError {
    ApiError::forbidden("recipient only accepts messages from approved contacts")
}

/// GET /conversations/{peer_id}/messages
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<impl IntoResponse> {
    let me = claims.sub.to_string();
    let peer = peer_id.to_string();
    let limit = query.limit.clamp(1, 200);
    let before = query.before.map(|id| id.to_string());

    let rows = blocking(&state, move |db| {
        db.get_conversation(&me, &peer, limit, before.as_deref())
    })
    .await?;

    let messages: Vec<Message> = rows.iter().map(MessageRow::to_message).collect();
    Ok(Json(messages))
}

/// GET /conversations: one entry per peer, most recent conversation first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let me = claims.sub.to_string();

    let (heads, peers) = blocking(&state, move |db| {
        let heads = db.latest_message_per_peer(&me, false)?;
        let peer_ids: Vec<String> = heads.iter().map(|m| m.peer_of(&me).to_string()).collect();
        let peers = db.get_users_by_ids(&peer_ids)?;
        Ok((heads, peers))
    })
    .await?;

    let peers: HashMap<String, _> = peers.into_iter().map(|p| (p.id.clone(), p)).collect();
    let me = claims.sub.to_string();

    let conversations: Vec<ConversationHead> = heads
        .iter()
        .filter_map(|row| {
            let Some(peer) = peers.get(row.peer_of(&me)) else {
                warn!("Conversation head {} references a missing user", row.id);
                return None;
            };
            Some(ConversationHead {
                peer: peer.to_user(),
                last_message: row.to_message(),
            })
        })
        .collect();

    Ok(Json(conversations))
}

/// PATCH /messages/{message_id}: sender only. The new text goes through
/// the recipient's filter just like the original did.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    check_content_len(&req.content)?;

    let me = claims.sub.to_string();
    let profanity = state.profanity.clone();

    let row = blocking(&state, move |db| {
        let id = message_id.to_string();
        let Some(existing) = db.get_message(&id)? else {
            return Ok(Err(ApiError::not_found("message not found")));
        };
        if existing.sender_id != me {
            return Ok(Err(ApiError::forbidden("only the sender can edit a message")));
        }
        if existing.kind == MessageKind::Text.as_str() && req.content.trim().is_empty() {
            return Ok(Err(ApiError::bad_request("message content is empty")));
        }

        let filter_enabled = db
            .get_user_by_id(&existing.recipient_id)?
            .is_some_and(|r| r.profanity_filter_enabled);
        let content = profanity.for_recipient(&req.content, filter_enabled);

        match db.update_message_content(&id, &content)? {
            Some(row) => Ok(Ok(row)),
            None => Ok(Err(ApiError::not_found("message not found"))),
        }
    })
    .await??;

    let message = row.to_message();
    state
        .dispatcher
        .publish(
            GatewayEvent::MessageUpdate { message: message.clone() },
            &[message.sender_id, message.recipient_id],
        )
        .await;

    Ok(Json(message))
}

/// DELETE /messages/{message_id}: sender only.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let me = claims.sub.to_string();

    let row = blocking(&state, move |db| {
        let id = message_id.to_string();
        let Some(existing) = db.get_message(&id)? else {
            return Ok(Err(ApiError::not_found("message not found")));
        };
        if existing.sender_id != me {
            return Ok(Err(ApiError::forbidden("only the sender can delete a message")));
        }
        db.delete_message(&id)?;
        Ok(Ok(existing))
    })
    .await??;

    let message = row.to_message();
    info!("{} deleted message {}", claims.sub, message.id);

    state
        .dispatcher
        .publish(
            GatewayEvent::MessageDelete {
                id: message.id,
                sender_id: message.sender_id,
                recipient_id: message.recipient_id,
            },
            &[message.sender_id, message.recipient_id],
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
