use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use hallway_db::Database;
use hallway_gateway::dispatcher::Dispatcher;
use hallway_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::gifs::GifClient;
use crate::profanity::ProfanityFilter;
use crate::storage::ObjectStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub storage: ObjectStore,
    pub gifs: GifClient,
    pub profanity: ProfanityFilter,
}

const TOKEN_TTL_DAYS: i64 = 30;

pub(crate) fn validate_name(name: &str) -> ApiResult<&str> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > 64 {
        return Err(ApiError::bad_request("name must be 1-64 characters"));
    }
    Ok(name)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    let name = validate_name(&req.name)?.to_string();
    let email = req.email.trim().to_string();
    if email.len() > 254 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::bad_request("invalid email address"));
    }
    if req.password.len() < 8 || req.password.len() > 128 {
        return Err(ApiError::bad_request("password must be 8-128 characters"));
    }

    let user_id = Uuid::new_v4();
    let password = req.password;

    // Hash on the blocking pool
    let (created, email) = blocking(&state, move |db| {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        let created = db.create_user(&user_id.to_string(), &name, &email, &password_hash)?;
        Ok((created, email))
    })
    .await?;

    if !created {
        return Err(ApiError::conflict("email is already registered"));
    }

    info!("Registered user {} ({})", user_id, email);

    let token = create_token(&state.jwt_secret, user_id, &email, req.name.trim())?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_string();
    let password = req.password;

    let user = blocking(&state, move |db| {
        let Some(user) = db.get_user_by_email(&email)? else {
            return Ok(None);
        };

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| anyhow::anyhow!("stored hash for {} is unreadable: {}", user.id, e))?;

        let verified = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();

        Ok(verified.then_some(user))
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let user_id = user.user_id();
    let token = create_token(&state.jwt_secret, user_id, &user.email, &user.name)?;

    Ok(Json(LoginResponse {
        user_id,
        name: user.name,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
