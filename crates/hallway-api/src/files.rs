use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;
use tracing::info;

use hallway_types::api::{Claims, UploadResponse};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::storage::{Bucket, MAX_OBJECT_SIZE, ObjectKey, PutResult, can_write};

fn parse_location(bucket: &str, path: &str) -> ApiResult<(Bucket, ObjectKey)> {
    let bucket: Bucket = bucket
        .parse()
        .map_err(|_| ApiError::not_found(format!("no bucket named '{}'", bucket)))?;
    let key = ObjectKey::parse(path).ok_or_else(|| ApiError::bad_request("invalid object path"))?;
    Ok((bucket, key))
}

/// PUT /storage/{bucket}/{*path}: raw image bytes in the body.
pub async fn upload_object(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((bucket, path)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let (bucket, key) = parse_location(&bucket, &path)?;

    if !can_write(bucket, &key, claims.sub) {
        return Err(ApiError::forbidden(format!("cannot write to {}/{}", bucket, key.as_path())));
    }
    if key.content_type().is_none() {
        return Err(ApiError::bad_request("only png, jpeg, gif and webp images are accepted"));
    }
    if body.is_empty() {
        return Err(ApiError::bad_request("empty upload"));
    }
    if body.len() > MAX_OBJECT_SIZE {
        return Err(ApiError::PayloadTooLarge(format!(
            "objects are limited to {} bytes",
            MAX_OBJECT_SIZE
        )));
    }

    let stored = match state.storage.put_object(bucket, &key, &body).await? {
        PutResult::Stored(stored) => stored,
        PutResult::PathConflict => {
            return Err(ApiError::conflict(format!(
                "{}/{} collides with an existing folder or object",
                bucket,
                key.as_path()
            )));
        }
    };
    info!("{} uploaded {}/{} ({} bytes)", claims.sub, bucket, key.as_path(), stored.size);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            bucket: bucket.to_string(),
            path: key.as_path(),
            public_url: format!("/storage/{}/{}", bucket, key.as_path()),
            size: stored.size,
            etag: stored.etag,
        }),
    ))
}

/// GET /storage/{bucket}/{*path}: public read, streamed from disk.
pub async fn download_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let (bucket, key) = parse_location(&bucket, &path)?;

    let (file, len) = state
        .storage
        .open_object(bucket, &key)
        .await?
        .ok_or_else(|| ApiError::not_found("object not found"))?;

    let content_type = key.content_type().unwrap_or("application/octet-stream");

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=300"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))))
}

/// DELETE /storage/{bucket}/{*path}: same ownership rule as uploads.
pub async fn delete_object(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((bucket, path)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let (bucket, key) = parse_location(&bucket, &path)?;

    if !can_write(bucket, &key, claims.sub) {
        return Err(ApiError::forbidden(format!("cannot delete {}/{}", bucket, key.as_path())));
    }

    if state.storage.delete_object(bucket, &key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("object not found"))
    }
}
