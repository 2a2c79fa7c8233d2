use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use hallway_db::models::{DmRequestRow, RequestDirection, UserRow};
use hallway_types::api::{Claims, DmRequestResponse, RespondDmRequest, SendDmRequest};
use hallway_types::events::GatewayEvent;
use hallway_types::models::{DmRequestStatus, User};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct DmRequestListQuery {
    pub direction: Option<String>,
    pub status: Option<String>,
}

/// POST /dm-requests: ask a user for permission to message them.
pub async fn send_dm_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendDmRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.recipient_id == claims.sub {
        return Err(ApiError::bad_request("cannot send a request to yourself"));
    }

    let sender_id = claims.sub.to_string();
    let recipient_id = req.recipient_id.to_string();

    let (row, recipient) = blocking(&state, move |db| {
        let Some(recipient) = db.get_user_by_id(&recipient_id)? else {
            return Ok(Err(ApiError::not_found("recipient not found")));
        };
        if db.are_allowed_contacts(&sender_id, &recipient_id)? {
            return Ok(Err(ApiError::conflict("you can already message this user")));
        }

        let id = Uuid::new_v4().to_string();
        if !db.create_dm_request(&id, &sender_id, &recipient_id)? {
            return Ok(Err(ApiError::conflict("a request to this user already exists")));
        }

        match db.get_dm_request(&id)? {
            Some(row) => Ok(Ok((row, recipient))),
            None => Err(anyhow::anyhow!("dm request {} vanished after insert", id)),
        }
    })
    .await??;

    let request = row.to_request();
    info!("{} sent DM request {} to {}", request.sender_id, request.id, request.recipient_id);

    state
        .dispatcher
        .publish(GatewayEvent::DmRequestInsert { request: request.clone() }, &[request.recipient_id])
        .await;

    Ok((
        StatusCode::CREATED,
        Json(DmRequestResponse {
            request,
            counterpart: Some(recipient.to_user()),
        }),
    ))
}

/// POST /dm-requests/{request_id}/respond: recipient only.
///
/// Accepting creates the allowed-contact row in the same transaction.
/// Repeating the decision already recorded succeeds without side effects;
/// asking for the opposite of a recorded decision is a conflict.
pub async fn respond_dm_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<RespondDmRequest>,
) -> ApiResult<impl IntoResponse> {
    let desired = if req.accept {
        DmRequestStatus::Accepted
    } else {
        DmRequestStatus::Rejected
    };
    let me = claims.sub.to_string();

    let (row, transitioned, sender) = blocking(&state, move |db| {
        let id = request_id.to_string();
        let Some(existing) = db.get_dm_request(&id)? else {
            return Ok(Err(ApiError::not_found("request not found")));
        };
        if existing.recipient_id != me {
            return Ok(Err(ApiError::forbidden("only the recipient can respond to a request")));
        }

        let Some((row, transitioned)) = db.respond_dm_request(&id, desired)? else {
            return Ok(Err(ApiError::not_found("request not found")));
        };
        if row.status() != desired {
            return Ok(Err(ApiError::conflict(format!("request was already {}", row.status))));
        }

        let sender = db.get_user_by_id(&row.sender_id)?;
        Ok(Ok((row, transitioned, sender)))
    })
    .await??;

    let request = row.to_request();

    if transitioned {
        info!("{} {} DM request {}", claims.sub, request.status, request.id);
        state
            .dispatcher
            .publish(
                GatewayEvent::DmRequestUpdate { request: request.clone() },
                &[request.sender_id, request.recipient_id],
            )
            .await;
    }

    Ok(Json(DmRequestResponse {
        request,
        counterpart: sender.map(|s| s.to_user()),
    }))
}

/// GET /dm-requests?direction=incoming|outgoing&status=
pub async fn list_dm_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DmRequestListQuery>,
) -> ApiResult<impl IntoResponse> {
    let direction = match query.direction.as_deref() {
        None | Some("incoming") => RequestDirection::Incoming,
        Some("outgoing") => RequestDirection::Outgoing,
        Some(other) => return Err(ApiError::bad_request(format!("unknown direction '{}'", other))),
    };
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DmRequestStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let me = claims.sub.to_string();

    let (rows, users) = blocking(&state, move |db| {
        let rows = db.list_dm_requests(&me, direction, status)?;
        let ids: Vec<String> = rows.iter().map(|r| counterpart_id(r, direction).to_string()).collect();
        let users = db.get_users_by_ids(&ids)?;
        Ok((rows, users))
    })
    .await?;

    let users: HashMap<String, UserRow> = users.into_iter().map(|u| (u.id.clone(), u)).collect();

    let requests: Vec<DmRequestResponse> = rows
        .iter()
        .map(|row| DmRequestResponse {
            request: row.to_request(),
            counterpart: users.get(counterpart_id(row, direction)).map(UserRow::to_user),
        })
        .collect();

    Ok(Json(requests))
}

fn counterpart_id(row: &DmRequestRow, direction: RequestDirection) -> &str {
    match direction {
        RequestDirection::Incoming => &row.sender_id,
        RequestDirection::Outgoing => &row.recipient_id,
    }
}

/// GET /contacts: users the caller shares an allowed-contact row with.
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let me = claims.sub.to_string();

    let users = blocking(&state, move |db| {
        let contacts = db.list_allowed_contacts(&me)?;
        let ids: Vec<String> = contacts
            .iter()
            .map(|c| if c.user1_id == me { c.user2_id.clone() } else { c.user1_id.clone() })
            .collect();
        db.get_users_by_ids(&ids)
    })
    .await?;

    let mut users: Vec<User> = users.iter().map(UserRow::to_user).collect();
    users.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(Json(users))
}
