//! On-demand revalidation.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

/// Either a tag or a path; `tag` wins when both are set.
#[derive(Debug, Deserialize)]
pub struct RevalidateRequest {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    pub tag: String,
    pub purged: usize,
    pub failed: usize,
}

pub async fn revalidate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RevalidateRequest>,
) -> Result<Json<RevalidateResponse>, (StatusCode, Json<RevalidateResponse>)> {
    let outcome = match (request.tag, request.path) {
        (Some(tag), _) if !tag.trim().is_empty() => state.cache.revalidate_tag(&tag).await,
        (_, Some(path)) if !path.trim().is_empty() => state.cache.revalidate_path(&path).await,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(RevalidateResponse {
                    revalidated: false,
                    tag: String::new(),
                    purged: 0,
                    failed: 0,
                }),
            ));
        }
    };

    let response = RevalidateResponse {
        revalidated: outcome.invalidated(),
        tag: outcome.tag.to_string(),
        purged: outcome.purge.succeeded,
        failed: outcome.purge.failed.len(),
    };

    if !response.revalidated {
        warn!(tag = %response.tag, "Revalidation did not reach the store");
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)));
    }
    Ok(Json(response))
}
