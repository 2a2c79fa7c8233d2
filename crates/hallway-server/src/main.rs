mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hallway_api::auth::{AppState, AppStateInner};
use hallway_api::gifs::GifClient;
use hallway_api::middleware::decode_token;
use hallway_api::profanity::ProfanityFilter;
use hallway_api::storage::{MAX_OBJECT_SIZE, ObjectStore};
use hallway_db::Database;
use hallway_gateway::connection;
use hallway_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hallway=debug,hallway_api=debug,hallway_gateway=debug,hallway_db=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.dev {
        warn!("Running in dev mode");
    }

    let db = Database::open(&config.db_path)?;
    let storage = ObjectStore::new(config.storage_dir.clone()).await?;
    let gifs = GifClient::new(config.tenor_api_key.clone(), config.tenor_url.clone());
    if !gifs.is_configured() {
        warn!("HALLWAY_TENOR_API_KEY not set; GIF search is disabled");
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: Dispatcher::new(),
        storage,
        gifs,
        profanity: ProfanityFilter::default(),
    });

    let ws_routes = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state.clone());

    let app = Router::new()
        .merge(hallway_api::router(state))
        .merge(ws_routes)
        .layer(RequestBodyLimitLayer::new(MAX_OBJECT_SIZE + 64 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr = config.addr()?;
    info!("Hallway server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// `?token=` authenticates at the upgrade; without it the client must send
/// Identify as its first frame.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let dispatcher = state.dispatcher.clone();

    match query.token {
        Some(token) => {
            let Some(claims) = decode_token(&state.jwt_secret, &token) else {
                return StatusCode::UNAUTHORIZED.into_response();
            };
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, dispatcher, claims.sub, claims.name)
            })
        }
        None => {
            let secret = state.jwt_secret.clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, secret))
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
