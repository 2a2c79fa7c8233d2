pub mod auth;
pub mod dm_requests;
pub mod error;
pub mod files;
pub mod gifs;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod profanity;
pub mod storage;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch, post, put},
};
use tracing::error;

use hallway_db::Database;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}

/// All REST routes. The WebSocket gateway and health check are mounted by
/// the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // Reads are public; writes go through the same auth check as the
        // protected routes below.
        .route(
            "/storage/{bucket}/{*path}",
            get(files::download_object).merge(
                put(files::upload_object)
                    .delete(files::delete_object)
                    .layer(DefaultBodyLimit::max(storage::MAX_OBJECT_SIZE))
                    .layer(from_fn_with_state(state.clone(), middleware::require_auth)),
            ),
        )
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/lookup", get(users::lookup_user))
        .route("/users/me", get(users::get_me).patch(users::update_me))
        .route("/users/{user_id}", get(users::get_user))
        .route("/messages", post(messages::send_message))
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/conversations", get(messages::list_conversations))
        .route("/conversations/{peer_id}/messages", get(messages::get_conversation))
        .route(
            "/dm-requests",
            get(dm_requests::list_dm_requests).post(dm_requests::send_dm_request),
        )
        .route("/dm-requests/{request_id}/respond", post(dm_requests::respond_dm_request))
        .route("/contacts", get(dm_requests::list_contacts))
        .route("/notifications", get(notifications::get_feed))
        .route("/gifs/search", get(gifs::search_gifs))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
