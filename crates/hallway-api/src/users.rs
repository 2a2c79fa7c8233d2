use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use hallway_db::models::ProfileUpdate;
use hallway_types::api::{Claims, UpdateProfileRequest};
use hallway_types::models::User;

use crate::auth::{AppState, validate_name};
use crate::blocking;
use crate::error::{ApiError, ApiResult};

const MAX_AVATAR_URL_LEN: usize = 2048;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: String,
}

/// GET /users: open discovery. Privacy-mode users only show up once they
/// are the caller's contacts.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<impl IntoResponse> {
    let viewer = claims.sub.to_string();
    let limit = query.limit.clamp(1, 200);
    let search = query.search;

    let rows = blocking(&state, move |db| {
        db.list_discoverable_users(&viewer, search.as_deref(), limit)
    })
    .await?;

    let users: Vec<User> = rows.iter().map(|r| r.to_user()).collect();
    Ok(Json(users))
}

/// GET /users/lookup?email=: exact match, privacy mode included, so a
/// student can find a classmate to send a DM request to.
pub async fn lookup_user(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<impl IntoResponse> {
    let email = query.email.trim().to_string();
    if email.is_empty() {
        return Err(ApiError::bad_request("email is required"));
    }

    let row = blocking(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::not_found("no user with that email"))?;

    Ok(Json(row.to_user()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let row = blocking(&state, move |db| db.get_user_by_id(&user_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    Ok(Json(row.to_user()))
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let row = blocking(&state, move |db| db.get_user_by_id(&claims.sub.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    Ok(Json(row.to_settings()))
}

/// PATCH /users/me: the only way a user row changes, and only by its owner.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.as_deref().map(validate_name).transpose()?.map(str::to_string);

    let avatar_url = match req.avatar_url {
        Some(Some(url)) => {
            let url = url.trim().to_string();
            if url.is_empty() || url.len() > MAX_AVATAR_URL_LEN {
                return Err(ApiError::bad_request("invalid avatar_url"));
            }
            Some(Some(url))
        }
        other => other,
    };

    let profanity_filter_enabled = req.profanity_filter_enabled;
    let privacy_mode = req.privacy_mode;
    let user_id = claims.sub.to_string();

    let row = blocking(&state, move |db| {
        let update = ProfileUpdate {
            name: name.as_deref(),
            avatar_url: avatar_url.as_ref().map(|v| v.as_deref()),
            profanity_filter_enabled,
            privacy_mode,
        };
        db.update_user_profile(&user_id, &update)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("user not found"))?;

    if let Some(on) = privacy_mode {
        info!("{} turned privacy mode {}", claims.sub, if on { "on" } else { "off" });
    }

    Ok(Json(row.to_settings()))
}
