use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, warn};

use hallway_types::api::GifResult;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

pub const DEFAULT_TENOR_URL: &str = "https://tenor.googleapis.com/v2";

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 50;

/// Thin client for the Tenor v2 search API. The API key stays on the
/// server; clients only ever talk to `/gifs/search`.
pub struct GifClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TenorResponse {
    #[serde(default)]
    pub results: Vec<TenorItem>,
}

#[derive(Debug, Deserialize)]
pub struct TenorItem {
    pub id: String,
    #[serde(default)]
    pub content_description: String,
    #[serde(default)]
    pub media_formats: HashMap<String, TenorMedia>,
}

#[derive(Debug, Deserialize)]
pub struct TenorMedia {
    pub url: String,
}

impl GifClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn search(&self, query: &str, limit: u32) -> ApiResult<Vec<GifResult>> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::Unavailable("GIF search is not configured".into()))?;

        let limit = limit.to_string();
        let resp = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("key", key),
                ("client_key", "hallway"),
                ("limit", limit.as_str()),
                ("media_filter", "gif,tinygif"),
                ("contentfilter", "high"),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!("GIF search request failed: {}", e);
                ApiError::BadGateway("GIF provider unreachable".into())
            })?;

        if !resp.status().is_success() {
            warn!("GIF provider returned {}", resp.status());
            return Err(ApiError::BadGateway("GIF provider error".into()));
        }

        let body: TenorResponse = resp.json().await.map_err(|e| {
            warn!("GIF provider sent an unreadable body: {}", e);
            ApiError::BadGateway("GIF provider error".into())
        })?;

        Ok(to_results(body))
    }
}

/// Keep items that have a full-size GIF; the preview falls back to it.
pub fn to_results(body: TenorResponse) -> Vec<GifResult> {
    body.results
        .into_iter()
        .filter_map(|item| {
            let url = item.media_formats.get("gif")?.url.clone();
            let preview_url = item
                .media_formats
                .get("tinygif")
                .map(|m| m.url.clone())
                .unwrap_or_else(|| url.clone());
            Some(GifResult {
                id: item.id,
                url,
                preview_url,
                description: item.content_description,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct GifQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

/// GET /gifs/search?q=&limit=
pub async fn search_gifs(
    State(state): State<AppState>,
    Query(query): Query<GifQuery>,
) -> ApiResult<impl IntoResponse> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(ApiError::bad_request("q is required"));
    }
    if q.len() > 100 {
        return Err(ApiError::bad_request("q is too long"));
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let results = state.gifs.search(q, limit).await?;
    debug!("GIF search '{}' -> {} results", q, results.len());

    Ok(Json(results))
}
